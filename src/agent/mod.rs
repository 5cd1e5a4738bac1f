//! Agent records, kinds and grid geometry.

pub mod policy;
pub mod process;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Unique agent identifier.
///
/// Identifiers are assigned by the environment in ascending order and never
/// reused; every contended decision in the simulation tie-breaks on them.
pub type AgentId = u64;

/// Kind of a living individual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Prey,
    Predator,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Prey => "prey",
            AgentKind::Predator => "predator",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prey" => Ok(AgentKind::Prey),
            "predator" => Ok(AgentKind::Predator),
            other => Err(format!("unknown agent kind: {}", other)),
        }
    }
}

/// A grid coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u8,
    pub y: u8,
}

impl Position {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Chebyshev distance (sensing uses square neighborhoods)
    pub fn distance(&self, other: Position) -> u8 {
        let dx = (self.x as i16 - other.x as i16).unsigned_abs() as u8;
        let dy = (self.y as i16 - other.y as i16).unsigned_abs() as u8;
        dx.max(dy)
    }

    /// Neighbor in a direction, if it stays inside a `grid_size` grid
    pub fn step(&self, direction: Direction, grid_size: usize) -> Option<Position> {
        let (dx, dy) = direction.delta();
        let nx = self.x as i16 + dx as i16;
        let ny = self.y as i16 + dy as i16;
        if nx >= 0 && ny >= 0 && (nx as usize) < grid_size && (ny as usize) < grid_size {
            Some(Position::new(nx as u8, ny as u8))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Movement direction on the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// All directions in the fixed tie-break scan order
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// (dx, dy) with north pointing toward smaller y
    pub fn delta(&self) -> (i8, i8) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }
}

/// Authoritative state of one living individual.
///
/// Owned by the environment; agent processes only ever hold cached copies
/// read from world snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub kind: AgentKind,
    pub x: u8,
    pub y: u8,
    pub energy: u32,
    pub alive: bool,
}

impl AgentRecord {
    pub fn new(id: AgentId, kind: AgentKind, position: Position, energy: u32) -> Self {
        Self {
            id,
            kind,
            x: position.x,
            y: position.y,
            energy,
            alive: true,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    /// Add energy, clamped to the ceiling
    pub fn gain(&mut self, amount: u32, max_energy: u32) {
        self.energy = (self.energy + amount).min(max_energy);
    }

    /// Drain energy; at zero the record is marked dead
    pub fn drain(&mut self, amount: u32) {
        self.energy = self.energy.saturating_sub(amount);
        if self.energy == 0 {
            self.alive = false;
        }
    }
}
