//! Message bus between agent processes and the environment.
//!
//! Two channels, never mixed:
//!
//! - Action channel: many writers (agent connection tasks), one reader (the
//!   coordinator). One bounded queue per registered agent; drained once per
//!   tick. Events arriving after the drain wait for the next tick, so a
//!   slow sender can never stall tick progress.
//! - Lifecycle channel: one writer (the coordinator), many readers (agents).
//!   One bounded outbound queue per connection; sends are non-blocking and
//!   drop on a full queue, the deadline accounting catches the stall.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::agent::AgentId;
use crate::protocol::{ActionEvent, AgentAction, LifecycleMessage};

/// Errors produced by bus sends
#[derive(Debug, PartialEq)]
pub enum BusError {
    /// Queue at its bounded depth; drop or coalesce, never block
    Backpressure { agent_id: AgentId },
    /// No queue registered under this agent id
    Unregistered { agent_id: AgentId },
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backpressure { agent_id } => {
                write!(f, "action queue full for agent {}", agent_id)
            }
            Self::Unregistered { agent_id } => {
                write!(f, "agent {} is not registered on the bus", agent_id)
            }
        }
    }
}

impl std::error::Error for BusError {}

/// Outbound lifecycle queue handle for one agent connection
pub type LifecycleSender = tokio::sync::mpsc::Sender<LifecycleMessage>;

struct AgentChannel {
    actions: VecDeque<ActionEvent>,
    lifecycle: LifecycleSender,
}

/// The bus itself. Shared between the coordinator thread and the connection
/// tasks; all internal state is behind one mutex, held only for queue
/// operations (no I/O under the lock).
pub struct MessageBus {
    channels: Mutex<HashMap<AgentId, AgentChannel>>,
    registrations: Mutex<Vec<Registration>>,
    queue_depth: usize,
}

/// A registration handshake waiting for the coordinator to acknowledge
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub agent_id: AgentId,
    pub pid: u32,
    pub protocol: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MessageBus {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            registrations: Mutex::new(Vec::new()),
            queue_depth,
        }
    }

    /// Open the per-agent queues. Returns false if the id is already taken.
    pub fn register(&self, registration: Registration, lifecycle: LifecycleSender) -> bool {
        let mut channels = lock(&self.channels);
        if channels.contains_key(&registration.agent_id) {
            return false;
        }
        channels.insert(
            registration.agent_id,
            AgentChannel {
                actions: VecDeque::new(),
                lifecycle,
            },
        );
        drop(channels);
        lock(&self.registrations).push(registration);
        true
    }

    /// Drop the per-agent queues; pending events are discarded
    pub fn deregister(&self, agent_id: AgentId) {
        lock(&self.channels).remove(&agent_id);
    }

    pub fn is_registered(&self, agent_id: AgentId) -> bool {
        lock(&self.channels).contains_key(&agent_id)
    }

    pub fn registered(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = lock(&self.channels).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Registration handshakes since the last drain, in arrival order
    pub fn drain_registrations(&self) -> Vec<Registration> {
        std::mem::take(&mut *lock(&self.registrations))
    }

    /// Enqueue an action event, non-blocking.
    ///
    /// A newer `Move` supersedes an already-queued `Move` from the same
    /// agent (at most one move per agent per tick is meaningful); other
    /// events past the bounded depth fail with `Backpressure`.
    pub fn send(&self, event: ActionEvent) -> Result<(), BusError> {
        let mut channels = lock(&self.channels);
        let channel = channels
            .get_mut(&event.agent_id)
            .ok_or(BusError::Unregistered {
                agent_id: event.agent_id,
            })?;

        if matches!(event.action, AgentAction::Move(_)) {
            if let Some(slot) = channel
                .actions
                .iter_mut()
                .find(|queued| matches!(queued.action, AgentAction::Move(_)))
            {
                *slot = event;
                return Ok(());
            }
        }

        if channel.actions.len() >= self.queue_depth {
            return Err(BusError::Backpressure {
                agent_id: event.agent_id,
            });
        }
        channel.actions.push_back(event);
        Ok(())
    }

    /// Drain one agent's queue atomically with respect to concurrent sends
    pub fn receive_all(&self, agent_id: AgentId) -> Vec<ActionEvent> {
        let mut channels = lock(&self.channels);
        match channels.get_mut(&agent_id) {
            Some(channel) => channel.actions.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Drain every queue, sorted by (agent_id, seq) for auditable ordering.
    /// Called once per tick by the coordinator.
    pub fn drain_all(&self) -> Vec<ActionEvent> {
        let mut channels = lock(&self.channels);
        let mut events: Vec<ActionEvent> = channels
            .values_mut()
            .flat_map(|channel| channel.actions.drain(..))
            .collect();
        drop(channels);
        events.sort_by_key(|event| (event.agent_id, event.seq));
        events
    }

    /// Non-blocking lifecycle send to one agent; a full queue drops the
    /// message and returns false.
    pub fn signal(&self, agent_id: AgentId, message: LifecycleMessage) -> bool {
        let channels = lock(&self.channels);
        match channels.get(&agent_id) {
            Some(channel) => channel.lifecycle.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Lifecycle broadcast to every registered agent; returns how many
    /// queues accepted the message.
    pub fn broadcast(&self, message: LifecycleMessage) -> usize {
        let channels = lock(&self.channels);
        channels
            .values()
            .filter(|channel| channel.lifecycle.try_send(message.clone()).is_ok())
            .count()
    }

    /// Drop every channel (shutdown)
    pub fn clear(&self) {
        lock(&self.channels).clear();
        lock(&self.registrations).clear();
    }
}
