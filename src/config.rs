//! Configuration system for the vivarium simulation.
//!
//! Supports YAML configuration files with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub world: WorldConfig,
    pub agents: AgentConfig,
    #[serde(default)]
    pub params: SimParameters,
    pub runtime: RuntimeConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

/// World/environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Size of the square grid
    pub grid_size: usize,
    /// Maximum food per cell
    pub food_cap: u32,
    /// Food regrowth per cell per tick
    pub regrow_rate: u32,
    /// Fraction of cells seeded with food at startup (0.0 - 1.0)
    pub initial_food_density: f32,
    /// Food amount placed by one random grass introduction
    pub grass_amount: u32,
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Prey spawned when the simulation starts
    pub initial_prey: usize,
    /// Predators spawned when the simulation starts
    pub initial_predators: usize,
    /// Starting energy for new agents
    pub initial_energy: u32,
    /// Energy ceiling per agent
    pub max_energy: u32,
    /// Sensing radius for prey and predator policies (cells)
    pub sensing_radius: u8,
    /// Maximum food a prey consumes in one Eat
    pub eat_bite: u32,
    /// Energy transferred by one successful predation Eat
    pub predation_bite: u32,
}

/// Simulation parameters settable at runtime through `SetParameter`.
///
/// Published to agents in every world snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimParameters {
    /// Energy drained from every agent each tick (H)
    pub hunger_rate: u32,
    /// Energy threshold enabling reproduction (R)
    pub reproduction_threshold: u32,
    /// Probability per tick of a random grass introduction event
    pub grass_rate: f64,
    /// While set, regrowth stops and hunger drain doubles
    pub drought: bool,
}

/// Runtime limits and IPC endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Milliseconds between ticks
    pub tick_interval_ms: u64,
    /// Concurrent agent process cap; further spawns queue
    pub max_agents: usize,
    /// Bounded depth of each per-agent action queue
    pub queue_depth: usize,
    /// Consecutive missed tick deadlines before an agent is presumed dead
    pub miss_limit: u32,
    /// Ticks a spawned process gets to register before rollback
    pub register_deadline_ticks: u64,
    /// Bounded wait for the world store exclusive section (ms)
    pub apply_timeout_ms: u64,
    /// Grace period for agent processes to exit during shutdown (ms)
    pub shutdown_grace_ms: u64,
    /// TCP address the message bus listener binds to
    pub bus_bind: String,
    /// Path of the shared world slot file
    pub world_slot: String,
}

/// Control socket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// HTTP/WebSocket bind address
    pub bind: String,
    /// Snapshot broadcast channel capacity (slow clients skip frames)
    pub broadcast_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Ticks between stats log lines
    pub stats_interval: u64,
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            agents: AgentConfig::default(),
            params: SimParameters::default(),
            runtime: RuntimeConfig::default(),
            control: ControlConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            grid_size: 32,
            food_cap: 50,
            regrow_rate: 1,
            initial_food_density: 0.3,
            grass_amount: 5,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            initial_prey: 12,
            initial_predators: 4,
            initial_energy: 50,
            max_energy: 100,
            sensing_radius: 4,
            eat_bite: 5,
            predation_bite: 8,
        }
    }
}

impl Default for SimParameters {
    fn default() -> Self {
        Self {
            hunger_rate: 1,
            reproduction_threshold: 60,
            grass_rate: 0.2,
            drought: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            max_agents: 128,
            queue_depth: 16,
            miss_limit: 3,
            register_deadline_ticks: 3,
            apply_timeout_ms: 50,
            shutdown_grace_ms: 2000,
            bus_bind: "127.0.0.1:1789".to_string(),
            world_slot: "/tmp/vivarium-world.slot".to_string(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            broadcast_capacity: 16,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stats_interval: 50,
            log_level: "info".to_string(),
        }
    }
}

impl SimParameters {
    /// Effective hunger drain for the current tick
    pub fn effective_hunger(&self) -> u32 {
        if self.drought {
            self.hunger_rate.saturating_mul(2)
        } else {
            self.hunger_rate
        }
    }

    /// Apply a named parameter update. Unknown names are rejected.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), String> {
        match name {
            "hunger_rate" | "h" => {
                if value < 0.0 {
                    return Err("hunger_rate must be >= 0".to_string());
                }
                self.hunger_rate = value as u32;
            }
            "reproduction_threshold" | "r" => {
                if value < 0.0 {
                    return Err("reproduction_threshold must be >= 0".to_string());
                }
                self.reproduction_threshold = value as u32;
            }
            "grass_rate" => {
                if !(0.0..=1.0).contains(&value) {
                    return Err("grass_rate must be within [0, 1]".to_string());
                }
                self.grass_rate = value;
            }
            "drought" => {
                self.drought = value != 0.0;
            }
            other => return Err(format!("unknown parameter: {}", other)),
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.world.grid_size == 0 || self.world.grid_size > 255 {
            return Err("grid_size must be between 1 and 255".to_string());
        }
        if self.agents.max_energy == 0 {
            return Err("max_energy must be > 0".to_string());
        }
        if self.agents.initial_energy > self.agents.max_energy {
            return Err("initial_energy cannot exceed max_energy".to_string());
        }
        if self.runtime.max_agents == 0 {
            return Err("max_agents must be > 0".to_string());
        }
        if self.agents.initial_prey + self.agents.initial_predators > self.runtime.max_agents {
            return Err("initial populations cannot exceed max_agents".to_string());
        }
        if self.runtime.queue_depth == 0 {
            return Err("queue_depth must be > 0".to_string());
        }
        if self.runtime.miss_limit == 0 {
            return Err("miss_limit must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.world.initial_food_density) {
            return Err("initial_food_density must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.params.grass_rate) {
            return Err("grass_rate must be within [0, 1]".to_string());
        }
        Ok(())
    }
}
