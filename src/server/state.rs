//! Shared application state for the control server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};

use crate::coordinator::handle::CoordinatorHandle;
use crate::coordinator::CoordinatorState;
use crate::protocol::{CommandReply, ControlCommand};
use crate::store::WorldView;

/// Bounded wait for a coordinator reply. SpawnAgent replies settle at
/// registration, so this must cover the registration deadline.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared between all handlers
pub struct AppState {
    /// Coordinator handle (mutex for exclusive access to its channels)
    handle: Mutex<CoordinatorHandle>,
    /// Broadcast channel feeding WebSocket subscribers
    snapshot_tx: broadcast::Sender<Arc<WorldView>>,
    /// Latest published snapshot, for the REST surface
    latest: RwLock<Option<Arc<WorldView>>>,
    /// Mirror of the coordinator state, updated on successful commands
    state: RwLock<CoordinatorState>,
}

impl AppState {
    pub fn new(handle: CoordinatorHandle, broadcast_capacity: usize) -> Self {
        let (snapshot_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            handle: Mutex::new(handle),
            snapshot_tx,
            latest: RwLock::new(None),
            state: RwLock::new(CoordinatorState::Idle),
        }
    }

    /// Forward a command to the coordinator and await its structured reply
    pub async fn send_command(&self, command: ControlCommand) -> CommandReply {
        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let handle = self.handle.lock().await;
            if let Err(fault) = handle.send(command.clone(), Some(tx)) {
                return CommandReply::error(fault.to_string());
            }
        }

        let reply = match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => CommandReply::error("coordinator dropped the command"),
            Err(_) => CommandReply::error("timed out waiting for the coordinator"),
        };

        if reply.is_ok() {
            match command {
                ControlCommand::Start => *self.state.write().await = CoordinatorState::Running,
                ControlCommand::Stop => *self.state.write().await = CoordinatorState::Stopped,
                _ => {}
            }
        }
        reply
    }

    /// Poll the coordinator's snapshot channel (non-blocking)
    pub async fn try_recv_snapshot(&self) -> Option<Arc<WorldView>> {
        let handle = self.handle.lock().await;
        handle.try_recv_snapshot()
    }

    /// Record and broadcast a freshly published snapshot
    pub async fn publish_snapshot(&self, snapshot: Arc<WorldView>) {
        *self.latest.write().await = Some(Arc::clone(&snapshot));
        // No subscribers is fine.
        let _ = self.snapshot_tx.send(snapshot);
    }

    pub async fn latest_snapshot(&self) -> Option<Arc<WorldView>> {
        self.latest.read().await.clone()
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Arc<WorldView>> {
        self.snapshot_tx.subscribe()
    }

    pub async fn coordinator_state(&self) -> CoordinatorState {
        *self.state.read().await
    }
}

/// Relay snapshots from the coordinator thread to the broadcast channel
pub fn spawn_snapshot_relay(state: Arc<AppState>) {
    tokio::spawn(async move {
        let poll_interval = Duration::from_millis(33);
        loop {
            if let Some(snapshot) = state.try_recv_snapshot().await {
                state.publish_snapshot(snapshot).await;
            }
            tokio::time::sleep(poll_interval).await;
        }
    });
}
