//! Environment coordinator - the authoritative simulation loop.
//!
//! Sole writer of world mutations. Drains the message bus once per tick,
//! validates every action event against the current records, applies deltas
//! with deterministic tie-breaks (agent_id ascending wherever two agents
//! contend), ages and reaps, regrows the grid, publishes the snapshot and
//! signals the next tick.

pub mod handle;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentKind, AgentRecord, Direction, Position};
use crate::bus::MessageBus;
use crate::config::Config;
use crate::fault::Fault;
use crate::grid::FoodGrid;
use crate::protocol::{
    ActionEvent, AgentAction, CommandReply, ControlCommand, LifecycleMessage, PROTOCOL_VERSION,
};
use crate::stats::Stats;
use crate::store::{StoreError, StoreReader, WorldStore, WorldView};
use crate::supervisor::{SpawnSpec, Supervisor};

/// Coordinator state machine. `Stopped` is terminal: a fresh simulation
/// requires a new coordinator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Running => "running",
            CoordinatorState::Stopping => "stopping",
            CoordinatorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A control command paired with its (optional) reply slot
pub struct ControlRequest {
    pub command: ControlCommand,
    pub reply: Option<tokio::sync::oneshot::Sender<CommandReply>>,
}

/// The environment coordinator
pub struct Environment {
    config: Config,
    state: CoordinatorState,
    tick: u64,
    grid: FoodGrid,
    /// Agent directory; BTreeMap iteration order is the tie-break order
    agents: BTreeMap<AgentId, AgentRecord>,
    params: crate::config::SimParameters,
    /// Last applied sequence number per agent
    applied_seq: HashMap<AgentId, u64>,
    store: WorldStore,
    bus: Arc<MessageBus>,
    supervisor: Supervisor,
    /// SpawnAgent replies deferred until registration or rollback
    pending_spawn_replies: HashMap<AgentId, tokio::sync::oneshot::Sender<CommandReply>>,
    stats: Stats,
    rng: ChaCha8Rng,
    next_agent_id: AgentId,
    // Per-tick counters
    births: usize,
    deaths: usize,
    predation_events: usize,
    faults: usize,
}

impl Environment {
    /// Create a coordinator in `Idle` state.
    ///
    /// `slot` is the shared world slot path; `None` keeps the store
    /// in-memory (tests, embedded runs).
    pub fn new(
        config: Config,
        bus: Arc<MessageBus>,
        supervisor: Supervisor,
        slot: Option<&str>,
        seed: u64,
    ) -> Result<Self, StoreError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut grid = FoodGrid::new(config.world.grid_size, config.world.food_cap);
        grid.initialize(config.world.initial_food_density, &mut rng);

        let params = config.params;
        let initial = WorldView::new(0, &grid, Vec::new(), params);
        let apply_timeout = Duration::from_millis(config.runtime.apply_timeout_ms);
        let store = match slot {
            Some(path) => WorldStore::with_slot(initial, apply_timeout, path)?,
            None => WorldStore::new(initial, apply_timeout),
        };

        Ok(Self {
            config,
            state: CoordinatorState::Idle,
            tick: 0,
            grid,
            agents: BTreeMap::new(),
            params,
            applied_seq: HashMap::new(),
            store,
            bus,
            supervisor,
            pending_spawn_replies: HashMap::new(),
            stats: Stats::new(),
            rng,
            next_agent_id: 1,
            births: 0,
            deaths: 0,
            predation_events: 0,
            faults: 0,
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentRecord> {
        self.agents.get(&id)
    }

    pub fn grid(&self) -> &FoodGrid {
        &self.grid
    }

    pub fn params(&self) -> &crate::config::SimParameters {
        &self.params
    }

    pub fn store_reader(&self) -> StoreReader {
        self.store.reader()
    }

    /// Run the coordinator loop until `Stopped`. Commands arrive on
    /// `command_rx`; every published snapshot is relayed on `snapshot_tx`.
    pub fn run(mut self, command_rx: Receiver<ControlRequest>, snapshot_tx: Sender<Arc<WorldView>>) {
        let tick_interval = Duration::from_millis(self.config.runtime.tick_interval_ms);
        let mut next_tick = Instant::now() + tick_interval;

        log::info!(
            "coordinator ready: {0}x{0} grid, bus {1}",
            self.config.world.grid_size,
            self.config.runtime.bus_bind
        );

        loop {
            let wait = if self.state == CoordinatorState::Running {
                next_tick.saturating_duration_since(Instant::now())
            } else {
                Duration::from_millis(50)
            };

            match command_rx.recv_timeout(wait) {
                Ok(request) => {
                    self.handle_command(request);
                    if self.state == CoordinatorState::Stopped {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("control channel closed; stopping simulation");
                    self.stop();
                    break;
                }
            }

            // Registrations are acknowledged even while Idle, so a spawn
            // issued before Start can settle.
            self.process_registrations();

            if self.state == CoordinatorState::Running && Instant::now() >= next_tick {
                self.step();
                if let Ok(view) = self.store.reader().read_snapshot() {
                    let _ = snapshot_tx.send(view);
                }
                next_tick += tick_interval;
                if next_tick < Instant::now() {
                    // Fell behind; do not bunch up ticks.
                    next_tick = Instant::now() + tick_interval;
                }
            }
        }

        log::info!("coordinator stopped at tick {}", self.tick);
    }

    /// Handle one control request, replying through its slot
    pub fn handle_command(&mut self, request: ControlRequest) {
        let ControlRequest { command, reply } = request;
        match command {
            ControlCommand::Start => {
                let outcome = self.start();
                respond(reply, outcome);
            }
            ControlCommand::Stop => {
                let outcome = self.stop();
                respond(reply, outcome);
            }
            ControlCommand::SpawnAgent { kind, position } => match self.control_spawn(kind, position) {
                Ok(agent_id) => {
                    // Defer the reply until the process registers (or its
                    // registration deadline rolls the spawn back).
                    if let Some(reply) = reply {
                        self.pending_spawn_replies.insert(agent_id, reply);
                    }
                }
                Err(fault) => respond(reply, CommandReply::error(fault.to_string())),
            },
            ControlCommand::SetParameter { name, value } => {
                let outcome = self.set_parameter(&name, value);
                respond(reply, outcome);
            }
            ControlCommand::IntroduceFood { position, amount } => {
                let outcome = self.introduce_food(position, amount);
                respond(reply, outcome);
            }
        }
    }

    fn start(&mut self) -> CommandReply {
        if self.state != CoordinatorState::Idle {
            let fault = Fault::control(format!("cannot start while {}", self.state));
            return CommandReply::error(fault.to_string());
        }
        self.state = CoordinatorState::Running;

        let prey = self.config.agents.initial_prey;
        let predators = self.config.agents.initial_predators;
        for _ in 0..prey {
            if let Err(fault) = self.spawn_at_random(AgentKind::Prey) {
                log::warn!("initial prey spawn failed: {}", fault);
            }
        }
        for _ in 0..predators {
            if let Err(fault) = self.spawn_at_random(AgentKind::Predator) {
                log::warn!("initial predator spawn failed: {}", fault);
            }
        }

        log::info!(
            "simulation started with {} prey, {} predators",
            prey,
            predators
        );
        CommandReply::ok(format!("started with {} agents", prey + predators))
    }

    /// Stopping drains in-flight work, signals every agent process to exit,
    /// waits out a bounded grace period, then force-kills stragglers.
    /// `Stopped` never loops back.
    fn stop(&mut self) -> CommandReply {
        match self.state {
            CoordinatorState::Idle | CoordinatorState::Running => {}
            CoordinatorState::Stopping | CoordinatorState::Stopped => {
                let fault = Fault::control(format!("cannot stop while {}", self.state));
                return CommandReply::error(fault.to_string());
            }
        }
        self.state = CoordinatorState::Stopping;
        log::info!("stopping simulation ({} agents)", self.agents.len());

        // Settle deferred spawn replies before tearing the bus down.
        for (agent_id, reply) in self.pending_spawn_replies.drain() {
            let fault = Fault::Startup {
                agent_id,
                detail: "simulation stopping".to_string(),
            };
            let _ = reply.send(CommandReply::error(fault.to_string()));
        }

        self.bus.broadcast(LifecycleMessage::Terminate);
        let grace = Duration::from_millis(self.config.runtime.shutdown_grace_ms);
        let killed = self.supervisor.shutdown(grace);
        if killed > 0 {
            log::warn!("{} agent processes force-killed at shutdown", killed);
        }

        for record in self.agents.values_mut() {
            record.alive = false;
        }
        self.bus.clear();
        self.publish();

        self.state = CoordinatorState::Stopped;
        log::info!("simulation stopped at tick {}", self.tick);
        CommandReply::ok("simulation stopped")
    }

    fn control_spawn(
        &mut self,
        kind: AgentKind,
        position: Option<Position>,
    ) -> Result<AgentId, Fault> {
        match self.state {
            CoordinatorState::Idle | CoordinatorState::Running => {}
            other => {
                return Err(Fault::control(format!("cannot spawn while {}", other)));
            }
        }
        let position = match position {
            Some(position) => {
                let size = self.grid.size();
                if position.x as usize >= size || position.y as usize >= size {
                    return Err(Fault::control(format!("{} is outside the grid", position)));
                }
                if !self.cell_enterable(kind, position) {
                    return Err(Fault::control(format!("{} is occupied", position)));
                }
                position
            }
            None => self
                .random_free_cell()
                .ok_or_else(|| Fault::control("no free cell on the grid"))?,
        };
        self.spawn_record(kind, position, self.config.agents.initial_energy)
    }

    fn spawn_at_random(&mut self, kind: AgentKind) -> Result<AgentId, Fault> {
        let position = self
            .random_free_cell()
            .ok_or_else(|| Fault::control("no free cell on the grid"))?;
        self.spawn_record(kind, position, self.config.agents.initial_energy)
    }

    /// Create the AgentRecord and hand the process spawn to the supervisor
    fn spawn_record(
        &mut self,
        kind: AgentKind,
        position: Position,
        energy: u32,
    ) -> Result<AgentId, Fault> {
        let agent_id = self.next_agent_id;
        self.next_agent_id += 1;

        self.agents
            .insert(agent_id, AgentRecord::new(agent_id, kind, position, energy));

        let spec = SpawnSpec {
            agent_id,
            kind,
            position,
            energy,
        };
        if let Err(e) = self.supervisor.request_spawn(spec, self.tick) {
            self.agents.remove(&agent_id);
            return Err(Fault::Startup {
                agent_id,
                detail: e.to_string(),
            });
        }
        Ok(agent_id)
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> CommandReply {
        match self.state {
            CoordinatorState::Idle | CoordinatorState::Running => {}
            other => {
                let fault = Fault::control(format!("cannot set parameters while {}", other));
                return CommandReply::error(fault.to_string());
            }
        }
        match self.params.set(name, value) {
            Ok(()) => {
                log::info!("parameter {} set to {}", name, value);
                CommandReply::ok(format!("{} = {}", name, value))
            }
            Err(detail) => CommandReply::error(Fault::control(detail).to_string()),
        }
    }

    fn introduce_food(&mut self, position: Position, amount: u32) -> CommandReply {
        match self.state {
            CoordinatorState::Idle | CoordinatorState::Running => {}
            other => {
                let fault = Fault::control(format!("cannot introduce food while {}", other));
                return CommandReply::error(fault.to_string());
            }
        }
        let size = self.grid.size();
        if position.x as usize >= size || position.y as usize >= size {
            let fault = Fault::control(format!("{} is outside the grid", position));
            return CommandReply::error(fault.to_string());
        }
        let added = self.grid.introduce(position.x, position.y, amount);
        CommandReply::ok(format!("added {} food at {}", added, position))
    }

    /// Acknowledge registration handshakes gathered by the bus listener
    fn process_registrations(&mut self) {
        for registration in self.bus.drain_registrations() {
            let agent_id = registration.agent_id;
            if registration.protocol != PROTOCOL_VERSION {
                log::warn!(
                    "agent {} registered with protocol {} (expected {}); terminating",
                    agent_id,
                    registration.protocol,
                    PROTOCOL_VERSION
                );
                self.bus.signal(agent_id, LifecycleMessage::Terminate);
                self.bus.deregister(agent_id);
                continue;
            }
            let known = self
                .agents
                .get(&agent_id)
                .map(|record| record.alive)
                .unwrap_or(false);
            if !known {
                log::warn!("registration from unknown agent {}; terminating", agent_id);
                self.bus.signal(agent_id, LifecycleMessage::Terminate);
                self.bus.deregister(agent_id);
                continue;
            }

            self.supervisor.mark_registered(agent_id);
            self.bus.signal(
                agent_id,
                LifecycleMessage::Registered {
                    agent_id,
                    tick: self.tick,
                },
            );
            if let Some(reply) = self.pending_spawn_replies.remove(&agent_id) {
                let _ = reply.send(CommandReply::ok(format!("agent {} registered", agent_id)));
            }
            log::debug!("agent {} registered (pid {})", agent_id, registration.pid);
        }
    }

    /// One tick: all events gathered for tick t apply atomically before
    /// tick t+1 begins.
    pub fn step(&mut self) {
        if self.state != CoordinatorState::Running {
            return;
        }
        self.tick += 1;
        self.births = 0;
        self.deaths = 0;
        self.predation_events = 0;
        self.faults = 0;

        // Phase 0: purge records reaped last tick (they were published once
        // as dead so observers could see the transition).
        self.purge_dead();

        // Phase 1: registrations and queued process launches
        self.process_registrations();
        if let Err(e) = self.supervisor.admit_pending(self.tick) {
            log::warn!("queued spawn failed: {}", e);
        }
        self.supervisor.begin_tick();

        // Phase 2: drain the bus; events arriving after this cutoff wait
        // for the next tick, never blocking this one.
        let events = self.bus.drain_all();

        // Phase 3: validate and apply in (agent_id, seq) order
        self.apply_events(events);

        // Phase 4: hunger and starvation
        self.age_agents();

        // Phase 5: regrowth, suppressed under drought
        if !self.params.drought {
            self.grid.regrow(self.config.world.regrow_rate);
            let amount = self.config.world.grass_amount;
            self.grid
                .introduce_random(self.params.grass_rate, amount, &mut self.rng);
        }

        // Phase 6: deadline sweep and unexpected process exits
        self.sweep_processes();

        // Phase 7: publish the new snapshot version
        self.publish();

        // Phase 8: signal the next tick and record statistics
        self.bus
            .broadcast(LifecycleMessage::TickSignal { tick: self.tick });
        self.update_stats();
    }

    fn purge_dead(&mut self) {
        let dead: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(_, record)| !record.alive)
            .map(|(id, _)| *id)
            .collect();
        for agent_id in dead {
            self.bus.signal(agent_id, LifecycleMessage::Terminate);
            self.bus.deregister(agent_id);
            self.supervisor.reap(agent_id);
            self.agents.remove(&agent_id);
            self.applied_seq.remove(&agent_id);
        }
    }

    fn apply_events(&mut self, events: Vec<ActionEvent>) {
        // One Eat per prey per tick: claimed victims are off the table.
        let mut claimed: HashSet<AgentId> = HashSet::new();
        for event in events {
            if let Err(fault) = self.apply_event(event, &mut claimed) {
                self.faults += 1;
                log::debug!("dropped event: {}", fault);
            }
        }
    }

    fn apply_event(&mut self, event: ActionEvent, claimed: &mut HashSet<AgentId>) -> Result<(), Fault> {
        let alive = self
            .agents
            .get(&event.agent_id)
            .map(|record| record.alive)
            .unwrap_or(false);
        if !alive {
            return Err(Fault::Validation {
                agent_id: event.agent_id,
                seq: event.seq,
                reason: "no living agent under this id".to_string(),
            });
        }

        // Sequence discipline: only the next expected number is applied, so
        // duplicate or reordered IPC delivery is a no-op.
        let expected = self.applied_seq.get(&event.agent_id).copied().unwrap_or(0) + 1;
        if event.seq != expected {
            return Err(Fault::Validation {
                agent_id: event.agent_id,
                seq: event.seq,
                reason: format!("expected seq {}", expected),
            });
        }
        self.applied_seq.insert(event.agent_id, event.seq);
        self.supervisor.note_action(event.agent_id);

        match event.action {
            AgentAction::Move(direction) => self.apply_move(event, direction),
            AgentAction::Eat => self.apply_eat(event, claimed),
            AgentAction::Reproduce => self.apply_reproduce(event),
            AgentAction::Die => {
                if let Some(record) = self.agents.get_mut(&event.agent_id) {
                    record.alive = false;
                    self.deaths += 1;
                }
                Ok(())
            }
        }
    }

    /// Occupancy rule: prey never enter an occupied cell; predators may
    /// enter any cell (entering a prey's cell is what makes an Eat claim
    /// valid). Events apply in agent_id order, so the lowest id wins a
    /// contended free cell and later movers quietly stay put.
    fn apply_move(&mut self, event: ActionEvent, direction: Direction) -> Result<(), Fault> {
        let (kind, from) = match self.agents.get(&event.agent_id) {
            Some(record) => (record.kind, record.position()),
            None => return Ok(()),
        };
        let target = match from.step(direction, self.grid.size()) {
            Some(target) => target,
            None => {
                return Err(Fault::Validation {
                    agent_id: event.agent_id,
                    seq: event.seq,
                    reason: "move out of bounds".to_string(),
                })
            }
        };

        if !self.cell_enterable(kind, target) {
            // Lost the cell to an earlier mover or a standing agent.
            return Ok(());
        }

        if let Some(record) = self.agents.get_mut(&event.agent_id) {
            record.x = target.x;
            record.y = target.y;
        }
        Ok(())
    }

    fn apply_eat(&mut self, event: ActionEvent, claimed: &mut HashSet<AgentId>) -> Result<(), Fault> {
        let eater = match self.agents.get(&event.agent_id) {
            Some(record) => record.clone(),
            None => return Ok(()),
        };
        match eater.kind {
            AgentKind::Prey => {
                let bite = self
                    .grid
                    .consume(eater.x, eater.y, self.config.agents.eat_bite);
                if bite == 0 {
                    return Err(Fault::Validation {
                        agent_id: event.agent_id,
                        seq: event.seq,
                        reason: "no food at cell".to_string(),
                    });
                }
                if let Some(record) = self.agents.get_mut(&event.agent_id) {
                    record.gain(bite, self.config.agents.max_energy);
                }
                Ok(())
            }
            AgentKind::Predator => {
                // Lowest-id co-located living prey not yet claimed this tick.
                let victim_id = self
                    .agents
                    .values()
                    .filter(|other| {
                        other.alive
                            && other.kind == AgentKind::Prey
                            && other.position() == eater.position()
                    })
                    .map(|other| other.id)
                    .find(|id| !claimed.contains(id));

                let victim_id = match victim_id {
                    Some(id) => id,
                    None => {
                        let prey_here = self.agents.values().any(|other| {
                            other.alive
                                && other.kind == AgentKind::Prey
                                && other.position() == eater.position()
                        });
                        if prey_here {
                            // Lost the claim to a lower-id predator.
                            return Ok(());
                        }
                        return Err(Fault::Validation {
                            agent_id: event.agent_id,
                            seq: event.seq,
                            reason: "no prey at cell".to_string(),
                        });
                    }
                };

                claimed.insert(victim_id);
                let transfer = {
                    let victim = match self.agents.get_mut(&victim_id) {
                        Some(victim) => victim,
                        None => return Ok(()),
                    };
                    let transfer = self.config.agents.predation_bite.min(victim.energy);
                    victim.drain(transfer);
                    if !victim.alive {
                        self.deaths += 1;
                    }
                    transfer
                };
                if let Some(record) = self.agents.get_mut(&event.agent_id) {
                    record.gain(transfer, self.config.agents.max_energy);
                }
                self.predation_events += 1;
                Ok(())
            }
        }
    }

    /// Reproduction halves the parent's energy into the child, exactly:
    /// parent keeps `e - e/2`, the child starts with `e/2`. Without an
    /// adjacent free cell the event is a no-op with energy unchanged.
    fn apply_reproduce(&mut self, event: ActionEvent) -> Result<(), Fault> {
        let parent = match self.agents.get(&event.agent_id) {
            Some(record) => record.clone(),
            None => return Ok(()),
        };
        if parent.energy < self.params.reproduction_threshold {
            return Err(Fault::Validation {
                agent_id: event.agent_id,
                seq: event.seq,
                reason: "below reproduction threshold".to_string(),
            });
        }

        let child_position = Direction::ALL.iter().find_map(|&direction| {
            parent
                .position()
                .step(direction, self.grid.size())
                .filter(|candidate| self.cell_free(*candidate))
        });
        let child_position = match child_position {
            Some(position) => position,
            None => return Ok(()),
        };

        let child_energy = parent.energy / 2;
        if child_energy == 0 {
            return Ok(());
        }

        if let Some(record) = self.agents.get_mut(&event.agent_id) {
            record.energy -= child_energy;
        }
        match self.spawn_record(parent.kind, child_position, child_energy) {
            Ok(_) => {
                self.births += 1;
                Ok(())
            }
            Err(fault) => {
                // Roll the split back; the parent keeps its energy.
                if let Some(record) = self.agents.get_mut(&event.agent_id) {
                    record.energy += child_energy;
                }
                Err(fault)
            }
        }
    }

    fn age_agents(&mut self) {
        let hunger = self.params.effective_hunger();
        if hunger == 0 {
            return;
        }
        for record in self.agents.values_mut() {
            if record.alive {
                record.drain(hunger);
                if !record.alive {
                    self.deaths += 1;
                }
            }
        }
    }

    fn sweep_processes(&mut self) {
        for (agent_id, code, phase) in self.supervisor.poll_exits() {
            let alive = self
                .agents
                .get(&agent_id)
                .map(|record| record.alive)
                .unwrap_or(false);
            if phase != crate::supervisor::AgentPhase::Terminated && alive {
                let fault = Fault::AgentUnresponsive {
                    agent_id,
                    missed: 0,
                };
                log::warn!("agent {} exited unexpectedly (code {:?}): {}", agent_id, code, fault);
                self.faults += 1;
                if let Some(record) = self.agents.get_mut(&agent_id) {
                    record.alive = false;
                    self.deaths += 1;
                }
                self.supervisor.mark_terminated(agent_id);
            }
        }

        let report = self.supervisor.end_of_tick(self.tick);
        for (agent_id, missed) in report.unresponsive {
            let fault = Fault::AgentUnresponsive { agent_id, missed };
            log::warn!("{}", fault);
            self.faults += 1;
            if let Some(record) = self.agents.get_mut(&agent_id) {
                if record.alive {
                    record.alive = false;
                    self.deaths += 1;
                }
            }
            self.supervisor.force_terminate(agent_id);
        }
        for agent_id in report.startup_failures {
            let fault = Fault::Startup {
                agent_id,
                detail: "no registration before deadline".to_string(),
            };
            log::warn!("{}", fault);
            self.faults += 1;
            self.supervisor.reap(agent_id);
            self.bus.deregister(agent_id);
            self.agents.remove(&agent_id);
            self.applied_seq.remove(&agent_id);
            if let Some(reply) = self.pending_spawn_replies.remove(&agent_id) {
                let _ = reply.send(CommandReply::error(fault.to_string()));
            }
        }
    }

    fn publish(&mut self) {
        let view = WorldView::new(
            self.tick,
            &self.grid,
            self.agents.values().cloned().collect(),
            self.params,
        );
        match self.store.apply(view) {
            Ok(_) => {}
            Err(StoreError::Contention { waited_ms }) => {
                let fault = Fault::Contention {
                    tick: self.tick,
                    waited_ms,
                };
                // Availability over strict fairness: the tick proceeds and
                // this snapshot version is skipped.
                log::warn!("{}", fault);
                self.faults += 1;
            }
            Err(e) => log::error!("world store apply failed: {}", e),
        }
    }

    fn update_stats(&mut self) {
        self.stats.tick = self.tick;
        self.stats.births = self.births;
        self.stats.deaths = self.deaths;
        self.stats.predation_events = self.predation_events;
        self.stats.faults = self.faults;
        self.stats
            .update(self.agents.values(), self.grid.total_food());

        if self.tick % self.config.logging.stats_interval.max(1) == 0 {
            log::info!("{}", self.stats.summary());
        }
    }

    /// No living agent at the cell ("free" in the reproduction sense)
    fn cell_free(&self, position: Position) -> bool {
        !self
            .agents
            .values()
            .any(|record| record.alive && record.position() == position)
    }

    /// Whether an agent of `kind` may occupy the cell: prey require a free
    /// cell, predators may share any cell.
    fn cell_enterable(&self, kind: AgentKind, position: Position) -> bool {
        match kind {
            AgentKind::Prey => self.cell_free(position),
            AgentKind::Predator => true,
        }
    }

    fn random_free_cell(&mut self) -> Option<Position> {
        let size = self.grid.size();
        for _ in 0..64 {
            let candidate = Position::new(
                self.rng.gen_range(0..size) as u8,
                self.rng.gen_range(0..size) as u8,
            );
            if self.cell_free(candidate) {
                return Some(candidate);
            }
        }
        // Dense grid: fall back to the first free cell in scan order.
        for y in 0..size {
            for x in 0..size {
                let candidate = Position::new(x as u8, y as u8);
                if self.cell_free(candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

fn respond(reply: Option<tokio::sync::oneshot::Sender<CommandReply>>, outcome: CommandReply) {
    if let Some(reply) = reply {
        let _ = reply.send(outcome);
    }
}

#[cfg(test)]
mod tests;
