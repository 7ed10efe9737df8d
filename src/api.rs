//! Capability surface handed to a behavior once per tick.
//!
//! Every mutating call only stages an intent in `staged`; the ActionSystem
//! applies them after the behavior returns. Queries read the snapshot the
//! API was built from, so calling order inside one `run()` does not matter,
//! with one exception: `stop()` discards whatever was staged before it.

use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::arena::Arena;
use crate::constants::{COMMAND_TOLERANCE, PROJECTILE_RADIUS, ROBOT_RADIUS};
use crate::geometry::{relative_angle, Point};
use crate::navigation::{plan_path_steps, NavGrid, PathStep};
use crate::rng::Rng;
use crate::robot::{Loadout, Robot};
use crate::types::{EnemyScan, GameEvent, ObstacleScan, RobotView};

/// Script-owned key/value store that survives between ticks.
pub type Memory = Map<String, Value>;

/// Intent staged by a behavior, materialised by the ActionSystem.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Signed distance; positive drives forward.
    Move { distance: f64, speed: f64 },
    /// Signed angle in degrees; positive turns clockwise.
    Rotate { angle: f64, speed: f64 },
    EndSequence,
    /// Retarget the active rotation (or start one) by `angle` degrees.
    Aim { angle: f64, speed: f64 },
    Fire,
    Stop { source: String },
    /// Path markers for visualisation.
    Path {
        waypoints: Vec<Point>,
        destination: Point,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BehaviorError {
    #[error("script error: {0}")]
    Script(String),
    #[error("script exceeded its operation budget")]
    BudgetExceeded,
    #[error("{0}")]
    Native(String),
}

/// Anything that can drive a robot. Implementations must keep all
/// cross-tick state in the robot's memory, never in themselves.
pub trait Behavior {
    fn run(&self, api: &mut RobotApi) -> Result<(), BehaviorError>;
}

/// Static world data shared read-only by every behavior.
#[derive(Clone, Debug, Default)]
pub struct WorldView {
    pub arena: Arena,
    pub nav: NavGrid,
}

impl WorldView {
    pub fn new(arena: Arena) -> Self {
        let nav = NavGrid::build(&arena, ROBOT_RADIUS);
        Self { arena, nav }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryState {
    pub energy: f64,
    pub max_energy: f64,
    pub recharge_rate: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GaugeState {
    pub hp: f64,
    pub max_hp: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaDimensions {
    pub width: f64,
    pub height: f64,
}

/// What a behavior left behind after one `run()`.
#[derive(Debug, Default)]
pub struct ApiOutcome {
    pub actions: Vec<Action>,
    pub memory: Memory,
    pub logs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RobotApi {
    me: RobotView,
    loadout: Loadout,
    enemy: Option<EnemyScan>,
    obstacles: Vec<ObstacleScan>,
    world: Rc<WorldView>,
    events: Vec<GameEvent>,
    memory: Memory,
    staged: Vec<Action>,
    logs: Vec<String>,
    rng: Rng,
    fire_staged: bool,
    tick: u64,
}

impl RobotApi {
    /// `events` must already be filtered to the ones concerning `robot`.
    pub fn new(robot: &Robot, world: Rc<WorldView>, events: Vec<GameEvent>, rng: Rng, tick: u64) -> Self {
        Self {
            me: robot.to_view(),
            loadout: Loadout {
                armor: robot.armor.clone(),
                cannon: robot.cannon.clone(),
                battery: robot.battery.clone(),
                motor: robot.motor.clone(),
                radar: robot.radar.clone(),
            },
            enemy: robot.last_scan.clone(),
            obstacles: robot.last_obstacle_scan.clone(),
            world,
            events,
            memory: robot.memory.clone(),
            staged: Vec::new(),
            logs: Vec::new(),
            rng,
            fire_staged: false,
            tick,
        }
    }

    pub fn finish(self) -> ApiOutcome {
        ApiOutcome {
            actions: self.staged,
            memory: self.memory,
            logs: self.logs,
        }
    }

    pub fn staged(&self) -> &[Action] {
        &self.staged
    }

    // ---- async motion ----

    pub fn move_by(&mut self, distance: f64) {
        let speed = self.loadout.motor.max_speed;
        self.move_with_speed(distance, speed);
    }

    pub fn move_with_speed(&mut self, distance: f64, speed: f64) {
        if !distance.is_finite() || !speed.is_finite() {
            return;
        }
        let speed = speed.abs().min(self.loadout.motor.max_speed);
        self.staged.push(Action::Move { distance, speed });
    }

    pub fn rotate(&mut self, angle: f64) {
        let speed = self.loadout.motor.max_rotation_speed;
        self.rotate_with_speed(angle, speed);
    }

    pub fn rotate_with_speed(&mut self, angle: f64, speed: f64) {
        if !angle.is_finite() || !speed.is_finite() {
            return;
        }
        let speed = speed.abs().min(self.loadout.motor.max_rotation_speed);
        self.staged.push(Action::Rotate { angle, speed });
    }

    /// Plans a grid path to `(x, y)` and queues it as rotate/move steps
    /// closed by a sequence marker. Returns false when no path exists.
    pub fn move_to(&mut self, x: f64, y: f64) -> bool {
        let goal = Point::new(x, y);
        if !self.world.arena.is_position_valid(goal, ROBOT_RADIUS) {
            return false;
        }
        let start = self.me.position();
        let Some(waypoints) = self.world.nav.find_path(start, goal) else {
            return false;
        };
        let steps = plan_path_steps(start, self.me.rotation, &waypoints);
        self.staged.push(Action::Path {
            waypoints,
            destination: goal,
        });
        self.sequence(&steps);
        true
    }

    /// Turns toward `(x, y)`. Meant to be called every tick; each call
    /// corrects the active rotation. Returns the remaining relative angle.
    pub fn aim_at(&mut self, x: f64, y: f64) -> f64 {
        let angle = relative_angle(self.me.position(), self.me.rotation, Point::new(x, y));
        if angle.abs() >= COMMAND_TOLERANCE {
            self.staged.push(Action::Aim {
                angle,
                speed: self.loadout.motor.max_rotation_speed,
            });
        }
        angle
    }

    /// Clears the robot's queue and anything staged earlier in this run.
    pub fn stop(&mut self, source: &str) {
        self.staged.clear();
        self.fire_staged = false;
        self.staged.push(Action::Stop {
            source: source.to_string(),
        });
    }

    pub fn sequence(&mut self, steps: &[PathStep]) {
        for step in steps {
            match *step {
                PathStep::Move(distance) => self.move_by(distance),
                PathStep::Rotate(angle) => self.rotate(angle),
            }
        }
        self.staged.push(Action::EndSequence);
    }

    /// Stages a shot if cooldown and energy allow it. At most one shot per
    /// run is accepted.
    pub fn fire(&mut self) -> bool {
        if self.fire_staged
            || self.me.cooldown > 0
            || self.me.energy < self.loadout.cannon.energy_cost
        {
            return false;
        }
        self.fire_staged = true;
        self.staged.push(Action::Fire);
        true
    }

    // ---- queries ----

    pub fn scan(&self) -> Option<&EnemyScan> {
        self.enemy.as_ref()
    }

    pub fn scan_obstacles(&self) -> &[ObstacleScan] {
        &self.obstacles
    }

    pub fn state(&self) -> &RobotView {
        &self.me
    }

    pub fn battery_state(&self) -> BatteryState {
        BatteryState {
            energy: self.me.energy,
            max_energy: self.me.energy_max,
            recharge_rate: self.loadout.battery.recharge_rate,
        }
    }

    pub fn armor_state(&self) -> GaugeState {
        GaugeState {
            hp: self.me.armor,
            max_hp: self.me.armor_max,
        }
    }

    pub fn hull_state(&self) -> GaugeState {
        GaugeState {
            hp: self.me.hull,
            max_hp: self.me.hull_max,
        }
    }

    pub fn arena_dimensions(&self) -> ArenaDimensions {
        ArenaDimensions {
            width: self.world.arena.width,
            height: self.world.arena.height,
        }
    }

    pub fn loadout(&self) -> &Loadout {
        &self.loadout
    }

    pub fn is_queue_empty(&self) -> bool {
        self.me.queue_length == 0
    }

    pub fn is_line_of_sight_clear(&self, x: f64, y: f64) -> bool {
        self.world
            .arena
            .check_line_of_sight(self.me.position(), Point::new(x, y), PROJECTILE_RADIUS)
    }

    pub fn is_position_valid(&self, x: f64, y: f64) -> bool {
        self.world
            .arena
            .is_position_valid(Point::new(x, y), ROBOT_RADIUS)
    }

    /// Whether driving `probe_distance` straight ahead would hit a wall or
    /// an obstacle.
    pub fn is_obstacle_ahead(&self, probe_distance: f64) -> bool {
        let from = self.me.position();
        let to = from.advance(self.me.rotation, probe_distance);
        !self.world.arena.is_within_bounds(to, ROBOT_RADIUS)
            || self
                .world
                .arena
                .first_obstacle_on_path(from, to, ROBOT_RADIUS)
                .is_some()
    }

    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    pub fn has_event(&self, kind: &str) -> bool {
        self.events.iter().any(|event| event.kind() == kind)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Seeded per robot and tick, so replays stay identical.
    pub fn random(&mut self) -> f64 {
        self.rng.next_f64()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    // ---- memory ----

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Shallow merge: top-level keys in `patch` replace existing ones.
    pub fn update_memory(&mut self, patch: Memory) {
        for (key, value) in patch {
            self.memory.insert(key, value);
        }
    }

    pub fn set_memory(&mut self, key: &str, value: impl Into<Value>) {
        self.memory.insert(key.to_string(), value.into());
    }

    pub fn memory_str(&self, key: &str) -> Option<&str> {
        self.memory.get(key).and_then(Value::as_str)
    }

    pub fn memory_i64(&self, key: &str) -> Option<i64> {
        self.memory.get(key).and_then(Value::as_i64)
    }
}
