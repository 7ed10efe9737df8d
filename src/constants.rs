pub const TICK_RATE: u32 = 60;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;
pub const DEFAULT_TIME_LIMIT_MS: u64 = 3 * 60 * 1000;

pub const ARENA_WIDTH: f64 = 800.0;
pub const ARENA_HEIGHT: f64 = 600.0;
pub const MAX_ARENA_SIDE: f64 = 10_000.0;
pub const DEFAULT_OBSTACLE_COUNT: usize = 6;

pub const OBSTACLE_MIN_SIZE: f64 = 30.0;
pub const OBSTACLE_MAX_SIZE: f64 = 80.0;
pub const OBSTACLE_MARGIN: f64 = 15.0;
pub const SAFE_ZONE_RADIUS: f64 = 100.0;
pub const MAX_PLACEMENT_ATTEMPTS: usize = 100;

pub const ROBOT_RADIUS: f64 = 20.0;
pub const HULL_MAX_HP: f64 = 100.0;
pub const OVERWEIGHT_SPEED_FACTOR: f64 = 0.5;
pub const OVERWEIGHT_ENERGY_FACTOR: f64 = 1.5;
pub const COMMAND_TOLERANCE: f64 = 0.1;

pub const PROJECTILE_SPEED: f64 = 8.0;
pub const PROJECTILE_RADIUS: f64 = 3.0;

pub const FSM_GRACE_TICKS: i64 = 5;
pub const ROBOT_LOG_LIMIT: usize = 50;

pub const SCRIPT_MAX_OPERATIONS: u64 = 50_000;
pub const SCRIPT_MAX_CALL_LEVELS: usize = 32;
pub const SCRIPT_MAX_STRING_SIZE: usize = 4 * 1024;
pub const SCRIPT_MAX_ARRAY_SIZE: usize = 1024;
pub const SCRIPT_MAX_MAP_SIZE: usize = 256;

/// Spawn points for the two combatants as fractions of the arena size.
pub fn default_spawn_points(width: f64, height: f64) -> [(f64, f64, f64); 2] {
    [
        (width * 0.15, height * 0.5, 0.0),
        (width * 0.85, height * 0.5, 180.0),
    ]
}
