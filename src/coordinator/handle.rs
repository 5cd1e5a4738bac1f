//! Handle for the coordinator thread.
//!
//! The tick loop runs on its own OS thread; this handle owns the command
//! channel into it and the snapshot channel out of it. The control socket
//! server holds one of these.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::coordinator::{ControlRequest, Environment};
use crate::fault::Fault;
use crate::protocol::{CommandReply, ControlCommand};
use crate::store::WorldView;
use crate::supervisor::{Launcher, Supervisor};

/// Handle controlling a running coordinator
pub struct CoordinatorHandle {
    thread: Option<JoinHandle<()>>,
    command_tx: Sender<ControlRequest>,
    snapshot_rx: Receiver<Arc<WorldView>>,
    bus: Arc<MessageBus>,
}

impl CoordinatorHandle {
    /// Build the bus, supervisor and environment, then spawn the tick loop
    /// on a dedicated thread.
    pub fn spawn(config: Config, seed: u64) -> Result<Self, Box<dyn std::error::Error>> {
        let bus = Arc::new(MessageBus::new(config.runtime.queue_depth));

        let exe = std::env::current_exe()?;
        let launcher = Launcher::Exec {
            exe,
            bus_addr: config.runtime.bus_bind.clone(),
            world_slot: config.runtime.world_slot.clone(),
            tick_interval_ms: config.runtime.tick_interval_ms,
            sensing_radius: config.agents.sensing_radius,
        };
        let supervisor = Supervisor::new(
            launcher,
            config.runtime.max_agents,
            config.runtime.miss_limit,
            config.runtime.register_deadline_ticks,
        );

        let slot_path = config.runtime.world_slot.clone();
        let environment = Environment::new(
            config,
            Arc::clone(&bus),
            supervisor,
            Some(&slot_path),
            seed,
        )?;

        let (command_tx, command_rx) = mpsc::channel();
        let (snapshot_tx, snapshot_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("coordinator".to_string())
            .spawn(move || environment.run(command_rx, snapshot_tx))?;

        Ok(Self {
            thread: Some(thread),
            command_tx,
            snapshot_rx,
            bus,
        })
    }

    /// The bus shared with the connection listener
    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    /// Submit a control command. The reply (if a slot is given) is settled
    /// by the coordinator thread; a stopped coordinator fails immediately.
    pub fn send(
        &self,
        command: ControlCommand,
        reply: Option<tokio::sync::oneshot::Sender<CommandReply>>,
    ) -> Result<(), Fault> {
        self.command_tx
            .send(ControlRequest { command, reply })
            .map_err(|_| Fault::control("coordinator has stopped"))
    }

    /// Latest published snapshot, draining any backlog (non-blocking)
    pub fn try_recv_snapshot(&self) -> Option<Arc<WorldView>> {
        let mut latest = None;
        loop {
            match self.snapshot_rx.try_recv() {
                Ok(snapshot) => latest = Some(snapshot),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        latest
    }

    /// Stop the simulation and join the coordinator thread
    pub fn shutdown(&mut self) {
        let _ = self.send(ControlCommand::Stop, None);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    static SLOT_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_config() -> Config {
        let n = SLOT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut config = Config::default();
        config.world.grid_size = 8;
        config.agents.initial_prey = 0;
        config.agents.initial_predators = 0;
        config.runtime.tick_interval_ms = 10;
        config.runtime.shutdown_grace_ms = 100;
        config.runtime.world_slot = std::env::temp_dir()
            .join(format!("vivarium-handle-test-{}-{}", std::process::id(), n))
            .to_string_lossy()
            .to_string();
        config.logging.stats_interval = 1_000;
        config
    }

    fn send_and_wait(handle: &CoordinatorHandle, command: ControlCommand) -> CommandReply {
        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.send(command, Some(tx)).unwrap();
        rx.blocking_recv().expect("coordinator must reply")
    }

    #[test]
    fn test_start_tick_stop() {
        let config = test_config();
        let slot = config.runtime.world_slot.clone();
        let mut handle = CoordinatorHandle::spawn(config, 7).unwrap();

        let reply = send_and_wait(&handle, ControlCommand::Start);
        assert!(reply.is_ok());

        // Ticks are flowing: a snapshot arrives within a few intervals.
        let mut snapshot = None;
        for _ in 0..100 {
            if let Some(view) = handle.try_recv_snapshot() {
                snapshot = Some(view);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let snapshot = snapshot.expect("no snapshot from a running coordinator");
        assert!(snapshot.tick >= 1);

        let reply = send_and_wait(&handle, ControlCommand::Stop);
        assert!(reply.is_ok());

        handle.shutdown();
        // The coordinator thread is gone; further sends fail.
        assert!(handle.send(ControlCommand::Start, None).is_err());

        std::fs::remove_file(&slot).ok();
    }

    #[test]
    fn test_commands_while_idle() {
        let config = test_config();
        let slot = config.runtime.world_slot.clone();
        let handle = CoordinatorHandle::spawn(config, 7).unwrap();

        // Parameters are settable before Start.
        let reply = send_and_wait(
            &handle,
            ControlCommand::SetParameter {
                name: "hunger_rate".to_string(),
                value: 2.0,
            },
        );
        assert!(reply.is_ok());

        // Stop from Idle is a clean shutdown.
        let reply = send_and_wait(&handle, ControlCommand::Stop);
        assert!(reply.is_ok());

        std::fs::remove_file(&slot).ok();
    }
}
