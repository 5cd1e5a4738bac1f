//! Kind-specific decision policies.
//!
//! Pure functions over a world snapshot: one call, one action. The agent
//! process runs these against its latest snapshot each tick; the
//! environment revalidates everything, so a stale decision is dropped, not
//! dangerous.

use rand::Rng;

use crate::agent::{AgentKind, AgentRecord, Direction, Position};
use crate::protocol::AgentAction;
use crate::store::WorldView;

/// Decide this tick's action for `me`
pub fn decide<R: Rng>(me: &AgentRecord, view: &WorldView, radius: u8, rng: &mut R) -> AgentAction {
    match me.kind {
        AgentKind::Prey => decide_prey(me, view, radius, rng),
        AgentKind::Predator => decide_predator(me, view, radius, rng),
    }
}

fn decide_prey<R: Rng>(me: &AgentRecord, view: &WorldView, radius: u8, rng: &mut R) -> AgentAction {
    let pos = me.position();

    if let Some(threat) = nearest(view, me, AgentKind::Predator, radius) {
        if let Some(direction) = flee_direction(pos, threat.position(), view.grid_size) {
            return AgentAction::Move(direction);
        }
    }

    if me.energy >= view.params.reproduction_threshold {
        return AgentAction::Reproduce;
    }

    if view.food_at(pos.x, pos.y) > 0 {
        return AgentAction::Eat;
    }

    if let Some(direction) = richest_food_direction(pos, view, radius) {
        return AgentAction::Move(direction);
    }

    wander(pos, view.grid_size, rng)
}

fn decide_predator<R: Rng>(
    me: &AgentRecord,
    view: &WorldView,
    radius: u8,
    rng: &mut R,
) -> AgentAction {
    let pos = me.position();

    let prey_here = view
        .live_agents()
        .any(|other| other.kind == AgentKind::Prey && other.position() == pos);
    if prey_here {
        return AgentAction::Eat;
    }

    if me.energy >= view.params.reproduction_threshold {
        return AgentAction::Reproduce;
    }

    if let Some(target) = nearest(view, me, AgentKind::Prey, radius) {
        if let Some(direction) = approach_direction(pos, target.position(), view.grid_size) {
            return AgentAction::Move(direction);
        }
    }

    wander(pos, view.grid_size, rng)
}

/// Nearest living agent of `kind` within `radius`, ties broken by id
fn nearest<'a>(
    view: &'a WorldView,
    me: &AgentRecord,
    kind: AgentKind,
    radius: u8,
) -> Option<&'a AgentRecord> {
    let pos = me.position();
    view.live_agents()
        .filter(|other| other.kind == kind && other.id != me.id)
        .map(|other| (pos.distance(other.position()), other.id, other))
        .filter(|(distance, _, _)| *distance <= radius)
        .min_by_key(|(distance, id, _)| (*distance, *id))
        .map(|(_, _, record)| record)
}

/// Step that maximizes distance to the threat
fn flee_direction(from: Position, threat: Position, grid_size: usize) -> Option<Direction> {
    Direction::ALL
        .iter()
        .filter_map(|&direction| {
            from.step(direction, grid_size)
                .map(|next| (next.distance(threat), direction))
        })
        .max_by_key(|(distance, _)| *distance)
        .map(|(_, direction)| direction)
}

/// Step that minimizes distance to the target
fn approach_direction(from: Position, target: Position, grid_size: usize) -> Option<Direction> {
    Direction::ALL
        .iter()
        .filter_map(|&direction| {
            from.step(direction, grid_size)
                .map(|next| (next.distance(target), direction))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, direction)| direction)
}

/// Direction whose ray (up to `radius` cells) holds the most food
fn richest_food_direction(from: Position, view: &WorldView, radius: u8) -> Option<Direction> {
    let mut best: Option<(u32, Direction)> = None;
    for &direction in &Direction::ALL {
        if from.step(direction, view.grid_size).is_none() {
            continue;
        }
        let (dx, dy) = direction.delta();
        let mut total = 0u32;
        let mut cx = from.x as i16;
        let mut cy = from.y as i16;
        for _ in 0..radius {
            cx += dx as i16;
            cy += dy as i16;
            if cx < 0 || cy < 0 || cx >= view.grid_size as i16 || cy >= view.grid_size as i16 {
                break;
            }
            total += view.food_at(cx as u8, cy as u8);
        }
        if total > 0 && best.map(|(b, _)| total > b).unwrap_or(true) {
            best = Some((total, direction));
        }
    }
    best.map(|(_, direction)| direction)
}

/// Random valid step; falls back to Eat on a gridless corner case
fn wander<R: Rng>(from: Position, grid_size: usize, rng: &mut R) -> AgentAction {
    let valid: Vec<Direction> = Direction::ALL
        .iter()
        .copied()
        .filter(|&direction| from.step(direction, grid_size).is_some())
        .collect();
    if valid.is_empty() {
        return AgentAction::Eat;
    }
    AgentAction::Move(valid[rng.gen_range(0..valid.len())])
}
