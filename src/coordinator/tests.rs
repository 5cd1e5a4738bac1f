use super::*;

use crate::bus::Registration;
use crate::supervisor::Launcher;

fn test_config() -> Config {
    let mut config = Config::default();
    config.world.grid_size = 10;
    config.world.food_cap = 50;
    config.world.initial_food_density = 0.0;
    config.world.regrow_rate = 0;
    config.params.hunger_rate = 0;
    config.params.reproduction_threshold = 20;
    config.params.grass_rate = 0.0;
    config.agents.initial_prey = 0;
    config.agents.initial_predators = 0;
    config.agents.initial_energy = 10;
    config.agents.eat_bite = 5;
    config.agents.predation_bite = 8;
    config.runtime.queue_depth = 16;
    config.runtime.register_deadline_ticks = 1_000;
    config.runtime.miss_limit = 1_000;
    config.logging.stats_interval = 1_000;
    config
}

fn new_env(config: Config) -> (Environment, Arc<MessageBus>) {
    let bus = Arc::new(MessageBus::new(config.runtime.queue_depth));
    let supervisor = Supervisor::new(
        Launcher::Null,
        config.runtime.max_agents,
        config.runtime.miss_limit,
        config.runtime.register_deadline_ticks,
    );
    let env = Environment::new(config, Arc::clone(&bus), supervisor, None, 42).unwrap();
    (env, bus)
}

fn command(env: &mut Environment, command: ControlCommand) {
    env.handle_command(ControlRequest {
        command,
        reply: None,
    });
}

fn command_reply(env: &mut Environment, command: ControlCommand) -> CommandReply {
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    env.handle_command(ControlRequest {
        command,
        reply: Some(tx),
    });
    rx.try_recv().expect("command must reply synchronously")
}

/// Spawn through the control surface and register the (virtual) process on
/// the bus, as a live agent connection would.
fn spawn(
    env: &mut Environment,
    bus: &MessageBus,
    kind: AgentKind,
    position: Position,
) -> (AgentId, tokio::sync::mpsc::Receiver<LifecycleMessage>) {
    command(
        env,
        ControlCommand::SpawnAgent {
            kind,
            position: Some(position),
        },
    );
    let agent_id = env.next_agent_id - 1;
    assert!(env.agent(agent_id).is_some(), "spawn must create a record");

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    assert!(bus.register(
        Registration {
            agent_id,
            pid: agent_id as u32,
            protocol: PROTOCOL_VERSION,
        },
        tx,
    ));
    (agent_id, rx)
}

fn send(bus: &MessageBus, agent_id: AgentId, seq: u64, action: AgentAction) {
    bus.send(ActionEvent {
        agent_id,
        seq,
        action,
    })
    .unwrap();
}

#[test]
fn test_state_machine_transitions() {
    let (mut env, _bus) = new_env(test_config());
    assert_eq!(env.state(), CoordinatorState::Idle);

    assert!(command_reply(&mut env, ControlCommand::Start).is_ok());
    assert_eq!(env.state(), CoordinatorState::Running);

    // Start is only valid from Idle.
    assert!(!command_reply(&mut env, ControlCommand::Start).is_ok());

    assert!(command_reply(&mut env, ControlCommand::Stop).is_ok());
    assert_eq!(env.state(), CoordinatorState::Stopped);

    // Stopped is terminal.
    assert!(!command_reply(&mut env, ControlCommand::Start).is_ok());
    assert!(!command_reply(&mut env, ControlCommand::Stop).is_ok());
}

/// Spec scenario: 10x10 all-zero grid, food 5 at (3,3), one prey at (3,3)
/// with energy 10, H=1, R=20. After one tick the prey holds 10 - 1 + 5 and
/// the cell is empty.
#[test]
fn test_scenario_introduce_food_then_eat() {
    let mut config = test_config();
    config.params.hunger_rate = 1;
    let (mut env, bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let reply = command_reply(
        &mut env,
        ControlCommand::IntroduceFood {
            position: Position::new(3, 3),
            amount: 5,
        },
    );
    assert!(reply.is_ok());
    assert_eq!(env.grid().get(3, 3), 5);

    let (prey, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(3, 3));
    send(&bus, prey, 1, AgentAction::Eat);
    env.step();

    let record = env.agent(prey).unwrap();
    assert_eq!(record.energy, 10 + 5 - 1);
    assert_eq!(env.grid().get(3, 3), 0);
}

/// The snapshot after tick t reflects exactly tick t's validated events:
/// nothing from a past or future tick leaks in.
#[test]
fn test_tick_delta_exactness() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);
    command(
        &mut env,
        ControlCommand::IntroduceFood {
            position: Position::new(3, 3),
            amount: 50,
        },
    );

    let (prey, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(3, 3));

    // A future-sequence event is dropped, not deferred.
    send(&bus, prey, 3, AgentAction::Eat);
    send(&bus, prey, 1, AgentAction::Eat);
    env.step();

    let reader = env.store_reader();
    let view = reader.read_snapshot().unwrap();
    assert_eq!(view.tick, 1);
    assert_eq!(view.agent(prey).unwrap().energy, 15);
    assert_eq!(view.food_at(3, 3), 45);

    // A quiet tick changes nothing.
    env.step();
    let view = reader.read_snapshot().unwrap();
    assert_eq!(view.tick, 2);
    assert_eq!(view.agent(prey).unwrap().energy, 15);
    assert_eq!(view.food_at(3, 3), 45);
}

/// Resending an already-applied event (same agent, same seq) is a no-op.
#[test]
fn test_duplicate_delivery_is_idempotent() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);
    command(
        &mut env,
        ControlCommand::IntroduceFood {
            position: Position::new(2, 2),
            amount: 50,
        },
    );

    let (prey, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(2, 2));

    // Duplicate within one tick.
    send(&bus, prey, 1, AgentAction::Eat);
    send(&bus, prey, 1, AgentAction::Eat);
    env.step();
    assert_eq!(env.agent(prey).unwrap().energy, 15);
    assert_eq!(env.grid().get(2, 2), 45);

    // Duplicate re-sent a tick later.
    send(&bus, prey, 1, AgentAction::Eat);
    env.step();
    assert_eq!(env.agent(prey).unwrap().energy, 15);
    assert_eq!(env.grid().get(2, 2), 45);

    // The next expected sequence number still applies.
    send(&bus, prey, 2, AgentAction::Eat);
    env.step();
    assert_eq!(env.agent(prey).unwrap().energy, 20);
    assert_eq!(env.grid().get(2, 2), 40);
}

/// Reproduction conserves energy exactly: parent-after + child == parent-before.
#[test]
fn test_reproduction_energy_conservation() {
    let mut config = test_config();
    config.agents.initial_energy = 31;
    let (mut env, bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let (parent, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(5, 5));
    send(&bus, parent, 1, AgentAction::Reproduce);
    env.step();

    let child = parent + 1;
    let parent_energy = env.agent(parent).unwrap().energy;
    let child_record = env.agent(child).expect("child record must exist");
    assert_eq!(child_record.energy, 31 / 2);
    assert_eq!(parent_energy + child_record.energy, 31);
    assert_eq!(child_record.kind, AgentKind::Prey);
    // Child placed at the first free adjacent cell in scan order (north).
    assert_eq!(child_record.position(), Position::new(5, 4));
}

/// Without an adjacent free cell, Reproduce is a no-op with energy unchanged.
#[test]
fn test_reproduction_without_free_cell_is_noop() {
    let mut config = test_config();
    config.agents.initial_energy = 30;
    let (mut env, bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let (parent, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(0, 0));
    spawn(&mut env, &bus, AgentKind::Prey, Position::new(1, 0));
    spawn(&mut env, &bus, AgentKind::Prey, Position::new(0, 1));

    send(&bus, parent, 1, AgentAction::Reproduce);
    env.step();

    assert_eq!(env.agent(parent).unwrap().energy, 30);
    assert_eq!(env.next_agent_id, 4); // no child was assigned an id
}

/// Predation moves energy strictly: prey down, predator up.
#[test]
fn test_predation_energy_monotonic() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);

    let (prey, _p) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(4, 4));
    let (predator, _q) = spawn(&mut env, &bus, AgentKind::Predator, Position::new(4, 4));

    send(&bus, predator, 1, AgentAction::Eat);
    env.step();

    let prey_record = env.agent(prey).unwrap();
    let predator_record = env.agent(predator).unwrap();
    assert_eq!(prey_record.energy, 10 - 8);
    assert_eq!(predator_record.energy, 10 + 8);
    assert!(prey_record.alive);
}

/// A depleted prey is marked dead in the published snapshot, and exactly
/// one Eat applies even with redundant claims.
#[test]
fn test_predation_kill_and_single_eat() {
    let mut config = test_config();
    config.agents.predation_bite = 12;
    let (mut env, bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let (prey, _p) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(4, 4));
    let (predator, _q) = spawn(&mut env, &bus, AgentKind::Predator, Position::new(4, 4));

    // Two Eat events from the same predator in one tick: one applies.
    send(&bus, predator, 1, AgentAction::Eat);
    send(&bus, predator, 2, AgentAction::Eat);
    env.step();

    let view = env.store_reader().read_snapshot().unwrap();
    let prey_view = view.agent(prey).unwrap();
    assert!(!prey_view.alive);
    assert_eq!(prey_view.energy, 0);
    // Transfer capped at the prey's remaining energy, counted once.
    assert_eq!(view.agent(predator).unwrap().energy, 10 + 10);

    // The record is reaped out of the directory on the following tick.
    env.step();
    assert!(env.agent(prey).is_none());
}

/// Two predators, one prey, one tick: the lower agent_id always wins.
#[test]
fn test_predation_tie_break_is_deterministic() {
    for _ in 0..3 {
        let (mut env, bus) = new_env(test_config());
        command(&mut env, ControlCommand::Start);

        let (prey, _p) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(5, 5));
        let (first, _q) = spawn(&mut env, &bus, AgentKind::Predator, Position::new(5, 5));
        let (second, _r) = spawn(&mut env, &bus, AgentKind::Predator, Position::new(5, 5));
        assert!(first < second);

        // Deliver the higher id's claim first; ordering must not matter.
        send(&bus, second, 1, AgentAction::Eat);
        send(&bus, first, 1, AgentAction::Eat);
        env.step();

        assert_eq!(env.agent(prey).unwrap().energy, 10 - 8);
        assert_eq!(env.agent(first).unwrap().energy, 10 + 8);
        assert_eq!(env.agent(second).unwrap().energy, 10);
    }
}

/// Two prey moving into the same free cell: agent_id ascending wins.
#[test]
fn test_move_conflict_tie_break() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);

    let (first, _p) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(2, 2));
    let (second, _q) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(2, 4));

    send(&bus, second, 1, AgentAction::Move(Direction::North));
    send(&bus, first, 1, AgentAction::Move(Direction::South));
    env.step();

    assert_eq!(env.agent(first).unwrap().position(), Position::new(2, 3));
    assert_eq!(env.agent(second).unwrap().position(), Position::new(2, 4));
}

#[test]
fn test_prey_cannot_enter_occupied_cell() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);

    let (blocker, _p) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(3, 3));
    let (mover, _q) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(3, 4));

    send(&bus, mover, 1, AgentAction::Move(Direction::North));
    env.step();

    assert_eq!(env.agent(mover).unwrap().position(), Position::new(3, 4));
    assert_eq!(env.agent(blocker).unwrap().position(), Position::new(3, 3));
}

#[test]
fn test_predator_may_enter_prey_cell() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);

    let (prey, _p) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(3, 3));
    let (predator, _q) = spawn(&mut env, &bus, AgentKind::Predator, Position::new(3, 4));

    send(&bus, predator, 1, AgentAction::Move(Direction::North));
    env.step();

    assert_eq!(env.agent(predator).unwrap().position(), Position::new(3, 3));
    assert_eq!(env.agent(prey).unwrap().position(), Position::new(3, 3));
}

/// Hunger drains every record each tick; a record reaching zero is marked
/// dead, published once, then purged.
#[test]
fn test_hunger_reaps_at_zero() {
    let mut config = test_config();
    config.params.hunger_rate = 1;
    config.agents.initial_energy = 2;
    let (mut env, bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let (prey, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(1, 1));

    env.step();
    assert_eq!(env.agent(prey).unwrap().energy, 1);

    env.step();
    let record = env.agent(prey).unwrap();
    assert_eq!(record.energy, 0);
    assert!(!record.alive);
    let view = env.store_reader().read_snapshot().unwrap();
    assert!(!view.agent(prey).unwrap().alive);

    env.step();
    assert!(env.agent(prey).is_none());
    let view = env.store_reader().read_snapshot().unwrap();
    assert!(view.agent(prey).is_none());
}

/// A stale or out-of-order event is dropped without effect.
#[test]
fn test_out_of_order_event_dropped() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);
    command(
        &mut env,
        ControlCommand::IntroduceFood {
            position: Position::new(2, 2),
            amount: 50,
        },
    );

    let (prey, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(2, 2));

    send(&bus, prey, 2, AgentAction::Eat);
    env.step();
    assert_eq!(env.agent(prey).unwrap().energy, 10);

    send(&bus, prey, 1, AgentAction::Eat);
    env.step();
    assert_eq!(env.agent(prey).unwrap().energy, 15);
}

/// Spec scenario: Stop with many agents running reaches Stopped within the
/// grace period, and a subsequent SpawnAgent is a ControlFault.
#[test]
fn test_stop_with_running_agents() {
    let mut config = test_config();
    config.runtime.shutdown_grace_ms = 100;
    let (mut env, bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let mut receivers = Vec::new();
    for i in 0..50 {
        let x = (i % 10) as u8;
        let y = (i / 10) as u8;
        let (_, rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(x, y));
        receivers.push(rx);
    }
    env.step();

    let reply = command_reply(&mut env, ControlCommand::Stop);
    assert!(reply.is_ok());
    assert_eq!(env.state(), CoordinatorState::Stopped);

    // Every agent connection saw the Terminate signal.
    for rx in &mut receivers {
        let mut terminated = false;
        while let Ok(message) = rx.try_recv() {
            if message == LifecycleMessage::Terminate {
                terminated = true;
            }
        }
        assert!(terminated);
    }

    let reply = command_reply(
        &mut env,
        ControlCommand::SpawnAgent {
            kind: AgentKind::Prey,
            position: None,
        },
    );
    assert!(!reply.is_ok());
    assert!(reply.detail.contains("control fault"));
}

/// SetParameter validates names and takes effect on the next tick.
#[test]
fn test_set_parameter_and_drought() {
    let mut config = test_config();
    config.world.regrow_rate = 2;
    config.params.hunger_rate = 1;
    config.agents.initial_energy = 20;
    let (mut env, bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let (prey, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(1, 1));

    env.step();
    assert_eq!(env.grid().get(0, 0), 2);
    assert_eq!(env.agent(prey).unwrap().energy, 19);

    let reply = command_reply(
        &mut env,
        ControlCommand::SetParameter {
            name: "drought".to_string(),
            value: 1.0,
        },
    );
    assert!(reply.is_ok());

    env.step();
    // Regrowth suppressed, hunger doubled.
    assert_eq!(env.grid().get(0, 0), 2);
    assert_eq!(env.agent(prey).unwrap().energy, 17);

    let reply = command_reply(
        &mut env,
        ControlCommand::SetParameter {
            name: "gravity".to_string(),
            value: 9.8,
        },
    );
    assert!(!reply.is_ok());
}

/// A spawned process that never registers is rolled back: record removed,
/// StartupFault surfaced to the triggering command.
#[test]
fn test_startup_fault_rolls_back_spawn() {
    let mut config = test_config();
    config.runtime.register_deadline_ticks = 2;
    let (mut env, _bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let (tx, mut rx) = tokio::sync::oneshot::channel();
    env.handle_command(ControlRequest {
        command: ControlCommand::SpawnAgent {
            kind: AgentKind::Prey,
            position: Some(Position::new(5, 5)),
        },
        reply: Some(tx),
    });
    let agent_id = env.next_agent_id - 1;
    assert!(env.agent(agent_id).is_some());
    // Deferred reply: nothing yet.
    assert!(rx.try_recv().is_err());

    env.step();
    env.step();

    assert!(env.agent(agent_id).is_none());
    let reply = rx.try_recv().expect("rollback must settle the reply");
    assert!(!reply.is_ok());
    assert!(reply.detail.contains("failed to start"));
}

/// An agent that stops submitting actions is presumed unresponsive after
/// `miss_limit` consecutive deadlines and force-reaped.
#[test]
fn test_unresponsive_agent_reaped() {
    let mut config = test_config();
    config.runtime.miss_limit = 2;
    let (mut env, bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let (prey, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(1, 1));
    send(&bus, prey, 1, AgentAction::Move(Direction::East));
    env.step();
    assert!(env.agent(prey).unwrap().alive);

    env.step();
    assert!(env.agent(prey).unwrap().alive);

    env.step();
    assert!(!env.agent(prey).unwrap().alive);
}

/// A voluntary Die event reaps the record immediately.
#[test]
fn test_die_event_reaps() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);

    let (prey, _rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(1, 1));
    send(&bus, prey, 1, AgentAction::Die);
    env.step();

    assert!(!env.agent(prey).unwrap().alive);
    env.step();
    assert!(env.agent(prey).is_none());
}

/// Registered agents receive the Registered acknowledgement and per-tick
/// signals on the lifecycle channel.
#[test]
fn test_registration_ack_and_tick_signal() {
    let (mut env, bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);

    let (prey, mut rx) = spawn(&mut env, &bus, AgentKind::Prey, Position::new(1, 1));
    env.step();

    // Registration is acknowledged during the tick in progress.
    assert_eq!(
        rx.try_recv().unwrap(),
        LifecycleMessage::Registered { agent_id: prey, tick: 1 }
    );
    assert_eq!(rx.try_recv().unwrap(), LifecycleMessage::TickSignal { tick: 1 });
}

/// Snapshot versions advance with every tick and carry the tick number.
#[test]
fn test_snapshot_versioning() {
    let (mut env, _bus) = new_env(test_config());
    command(&mut env, ControlCommand::Start);

    let reader = env.store_reader();
    let v0 = reader.version();
    env.step();
    let v1 = reader.version();
    assert_eq!(v1, v0 + 2);
    assert_eq!(reader.read_snapshot().unwrap().tick, 1);

    env.step();
    assert_eq!(reader.version(), v1 + 2);
    assert_eq!(reader.read_snapshot().unwrap().tick, 2);
}

/// Start spawns the configured initial populations.
#[test]
fn test_start_spawns_initial_population() {
    let mut config = test_config();
    config.agents.initial_prey = 5;
    config.agents.initial_predators = 2;
    let (mut env, _bus) = new_env(config);
    command(&mut env, ControlCommand::Start);

    let prey = env
        .agents
        .values()
        .filter(|r| r.kind == AgentKind::Prey)
        .count();
    let predators = env
        .agents
        .values()
        .filter(|r| r.kind == AgentKind::Predator)
        .count();
    assert_eq!(prey, 5);
    assert_eq!(predators, 2);
}
