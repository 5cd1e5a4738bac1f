//! Wire schemas for the message bus and the control surface.
//!
//! One closed tagged-variant schema per channel, newline-delimited JSON on
//! the wire. Producers and consumers share these types, so the channels
//! cannot silently drift; `PROTOCOL_VERSION` is checked at registration.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentKind, Direction, Position};

/// Bus protocol version, sent with every registration.
pub const PROTOCOL_VERSION: u32 = 1;

/// Action channel: agent process -> environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionMessage {
    /// Announce this process on the bus; must precede any event.
    Register {
        agent_id: AgentId,
        pid: u32,
        protocol: u32,
    },
    Move {
        agent_id: AgentId,
        seq: u64,
        direction: Direction,
    },
    Eat {
        agent_id: AgentId,
        seq: u64,
    },
    Reproduce {
        agent_id: AgentId,
        seq: u64,
    },
    Die {
        agent_id: AgentId,
        seq: u64,
    },
}

impl ActionMessage {
    pub fn agent_id(&self) -> AgentId {
        match *self {
            ActionMessage::Register { agent_id, .. }
            | ActionMessage::Move { agent_id, .. }
            | ActionMessage::Eat { agent_id, .. }
            | ActionMessage::Reproduce { agent_id, .. }
            | ActionMessage::Die { agent_id, .. } => agent_id,
        }
    }

    /// Convert an event-bearing message into an `ActionEvent`.
    /// `Register` is a handshake, not an event.
    pub fn into_event(self) -> Option<ActionEvent> {
        let (agent_id, seq, action) = match self {
            ActionMessage::Register { .. } => return None,
            ActionMessage::Move {
                agent_id,
                seq,
                direction,
            } => (agent_id, seq, AgentAction::Move(direction)),
            ActionMessage::Eat { agent_id, seq } => (agent_id, seq, AgentAction::Eat),
            ActionMessage::Reproduce { agent_id, seq } => (agent_id, seq, AgentAction::Reproduce),
            ActionMessage::Die { agent_id, seq } => (agent_id, seq, AgentAction::Die),
        };
        Some(ActionEvent {
            agent_id,
            seq,
            action,
        })
    }
}

/// The single action an agent submits for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    Move(Direction),
    Eat,
    Reproduce,
    Die,
}

impl AgentAction {
    /// Build the wire message for this action
    pub fn into_message(self, agent_id: AgentId, seq: u64) -> ActionMessage {
        match self {
            AgentAction::Move(direction) => ActionMessage::Move {
                agent_id,
                seq,
                direction,
            },
            AgentAction::Eat => ActionMessage::Eat { agent_id, seq },
            AgentAction::Reproduce => ActionMessage::Reproduce { agent_id, seq },
            AgentAction::Die => ActionMessage::Die { agent_id, seq },
        }
    }
}

/// A validated intent queued for application during a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionEvent {
    pub agent_id: AgentId,
    pub seq: u64,
    pub action: AgentAction,
}

/// Lifecycle channel: environment -> agent processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleMessage {
    /// Registration acknowledgement carrying the current tick.
    Registered { agent_id: AgentId, tick: u64 },
    /// A new tick began; decide and submit one action.
    TickSignal { tick: u64 },
    /// Exit cleanly (code 0).
    Terminate,
}

/// Control commands accepted by the control socket server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    SpawnAgent {
        kind: AgentKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Position>,
    },
    SetParameter {
        name: String,
        value: f64,
    },
    IntroduceFood {
        position: Position,
        amount: u32,
    },
}

/// Structured reply to every control command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub status: ReplyStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Error,
}

impl CommandReply {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            detail: detail.into(),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            detail: detail.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

/// Encode a message as one newline-terminated JSON line
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON line into a message
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}
