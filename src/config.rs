use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    default_spawn_points, ARENA_HEIGHT, ARENA_WIDTH, DEFAULT_OBSTACLE_COUNT,
    DEFAULT_TIME_LIMIT_MS, MAX_ARENA_SIDE, ROBOT_RADIUS, TICK_MS,
};
use crate::geometry::Point;
use crate::robot::Loadout;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid match config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid match config: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub rotation: f64,
}

impl SpawnPoint {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Everything fixed for the lifetime of one match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchConfig {
    pub arena_width: f64,
    pub arena_height: f64,
    pub obstacle_count: usize,
    pub seed: u32,
    /// Match time limit; 0 disables it.
    pub time_limit_ms: u64,
    /// Simulated time per tick, used for the elapsed-time clock only.
    pub tick_ms: u64,
    pub robot_ids: [String; 2],
    pub loadouts: [Loadout; 2],
    /// Falls back to fixed fractions of the arena when absent.
    pub spawn_points: Option<[SpawnPoint; 2]>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            arena_width: ARENA_WIDTH,
            arena_height: ARENA_HEIGHT,
            obstacle_count: DEFAULT_OBSTACLE_COUNT,
            seed: 1,
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            tick_ms: TICK_MS,
            robot_ids: ["robot_1".to_string(), "robot_2".to_string()],
            loadouts: [Loadout::default(), Loadout::default()],
            spawn_points: None,
        }
    }
}

impl MatchConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: MatchConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn resolved_spawn_points(&self) -> [SpawnPoint; 2] {
        self.spawn_points.unwrap_or_else(|| {
            default_spawn_points(self.arena_width, self.arena_height)
                .map(|(x, y, rotation)| SpawnPoint { x, y, rotation })
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let min_side = ROBOT_RADIUS * 4.0;
        if !(self.arena_width.is_finite() && self.arena_height.is_finite())
            || self.arena_width < min_side
            || self.arena_height < min_side
        {
            return Err(ConfigError::Invalid(format!(
                "arena must be at least {min_side}x{min_side}, got {}x{}",
                self.arena_width, self.arena_height
            )));
        }
        if self.arena_width > MAX_ARENA_SIDE || self.arena_height > MAX_ARENA_SIDE {
            return Err(ConfigError::Invalid(format!(
                "arena must be at most {MAX_ARENA_SIDE}x{MAX_ARENA_SIDE}, got {}x{}",
                self.arena_width, self.arena_height
            )));
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tickMs must be positive".to_string()));
        }

        let [first_id, second_id] = &self.robot_ids;
        if first_id.trim().is_empty() || second_id.trim().is_empty() {
            return Err(ConfigError::Invalid("robot ids must not be empty".to_string()));
        }
        if first_id == second_id {
            return Err(ConfigError::Invalid(format!("robot ids must differ, both are `{first_id}`")));
        }

        for (slot, loadout) in self.loadouts.iter().enumerate() {
            validate_loadout(loadout).map_err(|reason| ConfigError::Invalid(format!("loadout {slot}: {reason}")))?;
        }

        let spawns = self.resolved_spawn_points();
        for (slot, spawn) in spawns.iter().enumerate() {
            let inside = spawn.x - ROBOT_RADIUS >= 0.0
                && spawn.x + ROBOT_RADIUS <= self.arena_width
                && spawn.y - ROBOT_RADIUS >= 0.0
                && spawn.y + ROBOT_RADIUS <= self.arena_height;
            if !inside {
                return Err(ConfigError::Invalid(format!(
                    "spawn point {slot} ({}, {}) is outside the arena",
                    spawn.x, spawn.y
                )));
            }
        }
        if spawns[0].position().distance_to(spawns[1].position()) < ROBOT_RADIUS * 2.0 {
            return Err(ConfigError::Invalid("spawn points overlap".to_string()));
        }
        Ok(())
    }
}

fn validate_loadout(loadout: &Loadout) -> Result<(), String> {
    let values = [
        ("armor.hp", loadout.armor.hp),
        ("armor.maxHp", loadout.armor.max_hp),
        ("armor.weight", loadout.armor.weight),
        ("cannon.damage", loadout.cannon.damage),
        ("cannon.range", loadout.cannon.range),
        ("cannon.energyCost", loadout.cannon.energy_cost),
        ("cannon.weight", loadout.cannon.weight),
        ("battery.energy", loadout.battery.energy),
        ("battery.maxEnergy", loadout.battery.max_energy),
        ("battery.rechargeRate", loadout.battery.recharge_rate),
        ("battery.weight", loadout.battery.weight),
        ("motor.maxSpeed", loadout.motor.max_speed),
        ("motor.maxRotationSpeed", loadout.motor.max_rotation_speed),
        ("motor.maxWeight", loadout.motor.max_weight),
        ("motor.energyCostPerMove", loadout.motor.energy_cost_per_move),
        ("motor.energyCostPerRotation", loadout.motor.energy_cost_per_rotation),
        ("motor.weight", loadout.motor.weight),
        ("radar.range", loadout.radar.range),
        ("radar.weight", loadout.radar.weight),
    ];
    for (name, value) in values {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be a non-negative number, got {value}"));
        }
    }
    if loadout.armor.hp > loadout.armor.max_hp {
        return Err("armor.hp exceeds armor.maxHp".to_string());
    }
    if loadout.battery.energy > loadout.battery.max_energy {
        return Err("battery.energy exceeds battery.maxEnergy".to_string());
    }
    Ok(())
}
