//! Fault taxonomy for the coordinator and its collaborators.
//!
//! Every fault here is recoverable: the coordinator drops the offending
//! mutation, reaps the offending agent, or returns the fault to the control
//! client, and the tick loop keeps running. Only a `Stop` command ends it.

use crate::agent::AgentId;

/// A recoverable fault observed by the environment coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Malformed or stale action event; dropped without propagation.
    Validation {
        agent_id: AgentId,
        seq: u64,
        reason: String,
    },
    /// World store exclusive section unavailable within the bounded wait.
    Contention { tick: u64, waited_ms: u64 },
    /// Agent missed its tick deadlines or exited unexpectedly.
    AgentUnresponsive { agent_id: AgentId, missed: u32 },
    /// Per-agent queue full; the sender drops or coalesces.
    Backpressure { agent_id: AgentId },
    /// Control command invalid in the current coordinator state.
    Control { detail: String },
    /// Agent process failed to register on the bus before its deadline.
    Startup { agent_id: AgentId, detail: String },
}

impl Fault {
    /// Short label used for counting faults in per-tick statistics.
    pub fn label(&self) -> &'static str {
        match self {
            Fault::Validation { .. } => "validation",
            Fault::Contention { .. } => "contention",
            Fault::AgentUnresponsive { .. } => "unresponsive",
            Fault::Backpressure { .. } => "backpressure",
            Fault::Control { .. } => "control",
            Fault::Startup { .. } => "startup",
        }
    }

    pub fn control(detail: impl Into<String>) -> Self {
        Fault::Control {
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Validation {
                agent_id,
                seq,
                reason,
            } => {
                write!(f, "invalid event from agent {} (seq {}): {}", agent_id, seq, reason)
            }
            Fault::Contention { tick, waited_ms } => {
                write!(f, "world store contended at tick {} after {}ms", tick, waited_ms)
            }
            Fault::AgentUnresponsive { agent_id, missed } => {
                write!(f, "agent {} unresponsive ({} missed deadlines)", agent_id, missed)
            }
            Fault::Backpressure { agent_id } => {
                write!(f, "action queue full for agent {}", agent_id)
            }
            Fault::Control { detail } => write!(f, "control fault: {}", detail),
            Fault::Startup { agent_id, detail } => {
                write!(f, "agent {} failed to start: {}", agent_id, detail)
            }
        }
    }
}

impl std::error::Error for Fault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_labels() {
        let fault = Fault::Backpressure { agent_id: 7 };
        assert_eq!(fault.label(), "backpressure");
        assert!(fault.to_string().contains('7'));
    }

    #[test]
    fn test_control_constructor() {
        let fault = Fault::control("not running");
        assert_eq!(fault.label(), "control");
        assert!(fault.to_string().contains("not running"));
    }
}
