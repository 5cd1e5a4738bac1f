//! Statistics tracking for the simulation.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentKind, AgentRecord};

/// Statistics snapshot for one tick
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Current tick
    pub tick: u64,
    /// Living prey
    pub prey: usize,
    /// Living predators
    pub predators: usize,
    /// Mean energy across living agents
    pub energy_mean: f32,
    /// Total food in the world
    pub total_food: u64,
    /// Births this tick
    pub births: usize,
    /// Deaths this tick
    pub deaths: usize,
    /// Successful predation events this tick
    pub predation_events: usize,
    /// Faults recovered this tick (all kinds)
    pub faults: usize,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update population figures from the current agent directory
    pub fn update<'a, I>(&mut self, agents: I, total_food: u64)
    where
        I: Iterator<Item = &'a AgentRecord>,
    {
        let mut prey = 0;
        let mut predators = 0;
        let mut energy_sum = 0u64;

        for record in agents.filter(|record| record.alive) {
            match record.kind {
                AgentKind::Prey => prey += 1,
                AgentKind::Predator => predators += 1,
            }
            energy_sum += record.energy as u64;
        }

        self.prey = prey;
        self.predators = predators;
        let population = prey + predators;
        self.energy_mean = if population == 0 {
            0.0
        } else {
            energy_sum as f32 / population as f32
        };
        self.total_food = total_food;
    }

    /// One-line summary for periodic logging
    pub fn summary(&self) -> String {
        format!(
            "tick {:>6} | prey {:>4} | predators {:>4} | energy {:>6.1} | food {:>7} | births {:>3} | deaths {:>3} | predation {:>3} | faults {:>3}",
            self.tick,
            self.prey,
            self.predators,
            self.energy_mean,
            self.total_food,
            self.births,
            self.deaths,
            self.predation_events,
            self.faults,
        )
    }
}
