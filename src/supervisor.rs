//! Agent process supervision.
//!
//! One OS process per living individual. The supervisor owns the typed
//! lifecycle (`Spawned -> Registered -> Running -> Terminated/Reaped`),
//! caps concurrent processes (queueing further spawn requests), tracks
//! missed tick deadlines, and force-kills stragglers on shutdown.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::agent::{AgentId, AgentKind, Position};

/// Immutable startup arguments for one agent process
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSpec {
    pub agent_id: AgentId,
    pub kind: AgentKind,
    pub position: Position,
    pub energy: u32,
}

/// Where a supervised agent is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// Process launched, not yet registered on the bus
    Spawned,
    /// Registered on the bus, no action submitted yet
    Registered,
    /// Submitting actions
    Running,
    /// Signalled to exit or force-killed; awaiting reap
    Terminated,
}

/// How agent processes are created.
///
/// `Exec` re-invokes the current executable with the hidden `agent`
/// subcommand; `Null` records the launch without forking, which keeps the
/// coordinator logic testable without real processes.
pub enum Launcher {
    Exec {
        exe: PathBuf,
        bus_addr: String,
        world_slot: String,
        tick_interval_ms: u64,
        sensing_radius: u8,
    },
    Null,
}

impl Launcher {
    fn launch(&self, spec: &SpawnSpec) -> io::Result<Option<Child>> {
        match self {
            Launcher::Exec {
                exe,
                bus_addr,
                world_slot,
                tick_interval_ms,
                sensing_radius,
            } => {
                let child = Command::new(exe)
                    .arg("agent")
                    .arg("--agent-id")
                    .arg(spec.agent_id.to_string())
                    .arg("--kind")
                    .arg(spec.kind.as_str())
                    .arg("--x")
                    .arg(spec.position.x.to_string())
                    .arg("--y")
                    .arg(spec.position.y.to_string())
                    .arg("--energy")
                    .arg(spec.energy.to_string())
                    .arg("--radius")
                    .arg(sensing_radius.to_string())
                    .arg("--bus")
                    .arg(bus_addr)
                    .arg("--world-slot")
                    .arg(world_slot)
                    .arg("--tick-ms")
                    .arg(tick_interval_ms.to_string())
                    .stdin(Stdio::null())
                    .spawn()?;
                Ok(Some(child))
            }
            Launcher::Null => Ok(None),
        }
    }
}

struct Supervised {
    spec: SpawnSpec,
    child: Option<Child>,
    phase: AgentPhase,
    /// Tick the process was launched at (registration deadline base)
    spawned_tick: u64,
    /// Consecutive tick deadlines missed
    missed: u32,
    /// Whether an action arrived this tick
    acted: bool,
}

/// Outcome of the per-tick deadline sweep
#[derive(Debug, Default, PartialEq)]
pub struct DeadlineReport {
    /// Agents past the miss limit, to be force-reaped
    pub unresponsive: Vec<(AgentId, u32)>,
    /// Spawned agents that never registered, to be rolled back
    pub startup_failures: Vec<AgentId>,
}

/// Process supervisor owned by the environment coordinator
pub struct Supervisor {
    launcher: Launcher,
    agents: HashMap<AgentId, Supervised>,
    pending: VecDeque<SpawnSpec>,
    max_agents: usize,
    miss_limit: u32,
    register_deadline_ticks: u64,
}

impl Supervisor {
    pub fn new(
        launcher: Launcher,
        max_agents: usize,
        miss_limit: u32,
        register_deadline_ticks: u64,
    ) -> Self {
        Self {
            launcher,
            agents: HashMap::new(),
            pending: VecDeque::new(),
            max_agents,
            miss_limit,
            register_deadline_ticks,
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn at_cap(&self) -> bool {
        self.agents.len() >= self.max_agents
    }

    pub fn pending_spawns(&self) -> usize {
        self.pending.len()
    }

    pub fn phase(&self, agent_id: AgentId) -> Option<AgentPhase> {
        self.agents.get(&agent_id).map(|entry| entry.phase)
    }

    /// Request a new agent process. At the cap the request queues; it is
    /// launched by `admit_pending` once a slot frees up.
    pub fn request_spawn(&mut self, spec: SpawnSpec, tick: u64) -> io::Result<()> {
        if self.at_cap() {
            log::debug!(
                "agent cap reached ({}); queueing spawn of agent {}",
                self.max_agents,
                spec.agent_id
            );
            self.pending.push_back(spec);
            return Ok(());
        }
        self.launch(spec, tick)
    }

    fn launch(&mut self, spec: SpawnSpec, tick: u64) -> io::Result<()> {
        let child = self.launcher.launch(&spec)?;
        log::debug!(
            "launched {} agent {} at {} with energy {}",
            spec.kind,
            spec.agent_id,
            spec.position,
            spec.energy
        );
        self.agents.insert(
            spec.agent_id,
            Supervised {
                spec,
                child,
                phase: AgentPhase::Spawned,
                spawned_tick: tick,
                missed: 0,
                acted: false,
            },
        );
        Ok(())
    }

    /// Launch queued spawn requests while below the cap
    pub fn admit_pending(&mut self, tick: u64) -> io::Result<usize> {
        let mut admitted = 0;
        while !self.at_cap() {
            match self.pending.pop_front() {
                Some(spec) => {
                    self.launch(spec, tick)?;
                    admitted += 1;
                }
                None => break,
            }
        }
        Ok(admitted)
    }

    /// Mark an agent as registered on the bus
    pub fn mark_registered(&mut self, agent_id: AgentId) -> bool {
        match self.agents.get_mut(&agent_id) {
            Some(entry) if entry.phase == AgentPhase::Spawned => {
                entry.phase = AgentPhase::Registered;
                true
            }
            _ => false,
        }
    }

    /// Note an action received from an agent this tick
    pub fn note_action(&mut self, agent_id: AgentId) {
        if let Some(entry) = self.agents.get_mut(&agent_id) {
            entry.acted = true;
            entry.missed = 0;
            if entry.phase == AgentPhase::Registered {
                entry.phase = AgentPhase::Running;
            }
        }
    }

    /// Clear per-tick deadline flags; call at the start of every tick
    pub fn begin_tick(&mut self) {
        for entry in self.agents.values_mut() {
            entry.acted = false;
        }
    }

    /// Deadline sweep; call at the end of every tick.
    ///
    /// Registered/Running agents that submitted nothing accrue a miss;
    /// `miss_limit` consecutive misses presume the process unresponsive.
    /// Spawned agents past the registration deadline become startup
    /// failures.
    pub fn end_of_tick(&mut self, tick: u64) -> DeadlineReport {
        let mut report = DeadlineReport::default();
        for (id, entry) in self.agents.iter_mut() {
            match entry.phase {
                AgentPhase::Registered | AgentPhase::Running => {
                    if !entry.acted {
                        entry.missed += 1;
                        if entry.missed >= self.miss_limit {
                            report.unresponsive.push((*id, entry.missed));
                        }
                    }
                }
                AgentPhase::Spawned => {
                    if tick.saturating_sub(entry.spawned_tick) >= self.register_deadline_ticks {
                        report.startup_failures.push(*id);
                    }
                }
                AgentPhase::Terminated => {}
            }
        }
        report.unresponsive.sort_unstable();
        report.startup_failures.sort_unstable();
        report
    }

    /// Poll children for exits. Returns (agent_id, exit_code) for every
    /// process that exited since the last poll; a nonzero or signal exit of
    /// a non-terminated agent is an unexpected exit the coordinator treats
    /// like a missed deadline.
    pub fn poll_exits(&mut self) -> Vec<(AgentId, Option<i32>, AgentPhase)> {
        let mut exits = Vec::new();
        for (id, entry) in self.agents.iter_mut() {
            let Some(child) = entry.child.as_mut() else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    exits.push((*id, status.code(), entry.phase));
                    entry.child = None;
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("wait on agent {} failed: {}", id, e);
                }
            }
        }
        exits.sort_unstable_by_key(|(id, _, _)| *id);
        exits
    }

    /// Kill the process (if any) and mark the entry terminated
    pub fn force_terminate(&mut self, agent_id: AgentId) {
        if let Some(entry) = self.agents.get_mut(&agent_id) {
            if let Some(child) = entry.child.as_mut() {
                if let Err(e) = child.kill() {
                    log::debug!("kill agent {}: {}", agent_id, e);
                }
                let _ = child.wait();
                entry.child = None;
            }
            entry.phase = AgentPhase::Terminated;
        }
    }

    /// Mark an agent terminated without killing (clean exit expected)
    pub fn mark_terminated(&mut self, agent_id: AgentId) {
        if let Some(entry) = self.agents.get_mut(&agent_id) {
            entry.phase = AgentPhase::Terminated;
        }
    }

    /// Remove the supervision entry entirely (record reaped)
    pub fn reap(&mut self, agent_id: AgentId) -> Option<SpawnSpec> {
        self.pending.retain(|spec| spec.agent_id != agent_id);
        self.agents.remove(&agent_id).map(|mut entry| {
            if let Some(child) = entry.child.as_mut() {
                if let Err(e) = child.kill() {
                    log::debug!("kill agent {}: {}", agent_id, e);
                }
                let _ = child.wait();
            }
            entry.spec
        })
    }

    /// Cooperative-with-deadline shutdown: the coordinator has already sent
    /// `Terminate`; wait up to `grace` for children to exit, then force-kill
    /// the rest. Returns the number force-killed.
    pub fn shutdown(&mut self, grace: Duration) -> usize {
        self.pending.clear();
        let deadline = Instant::now() + grace;

        loop {
            let mut alive = 0;
            for entry in self.agents.values_mut() {
                if let Some(child) = entry.child.as_mut() {
                    if let Ok(None) = child.try_wait() {
                        alive += 1;
                    }
                }
            }
            if alive == 0 || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let mut killed = 0;
        for (id, entry) in self.agents.iter_mut() {
            if let Some(child) = entry.child.as_mut() {
                if let Ok(None) = child.try_wait() {
                    log::warn!("agent {} did not exit within grace; killing", id);
                    if child.kill().is_ok() {
                        killed += 1;
                    }
                }
                let _ = child.wait();
                entry.child = None;
            }
            entry.phase = AgentPhase::Terminated;
        }
        self.agents.clear();
        killed
    }
}
