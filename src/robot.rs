use std::collections::VecDeque;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::api::{Action, Behavior, BehaviorError, Memory, RobotApi, WorldView};
use crate::constants::{
    HULL_MAX_HP, OVERWEIGHT_ENERGY_FACTOR, OVERWEIGHT_SPEED_FACTOR, ROBOT_LOG_LIMIT, ROBOT_RADIUS,
};
use crate::geometry::{Point, Rect};
use crate::rng::Rng;
use crate::types::{CombatStats, EnemyScan, GameEvent, ObstacleScan, RobotView};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmorSpec {
    pub hp: f64,
    pub max_hp: f64,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CannonSpec {
    pub damage: f64,
    /// Ticks between shots.
    pub fire_rate: u32,
    pub range: f64,
    pub energy_cost: f64,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatterySpec {
    pub energy: f64,
    pub max_energy: f64,
    /// Energy restored per tick.
    pub recharge_rate: f64,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotorSpec {
    /// Units per tick.
    pub max_speed: f64,
    /// Degrees per tick.
    pub max_rotation_speed: f64,
    pub max_weight: f64,
    pub energy_cost_per_move: f64,
    pub energy_cost_per_rotation: f64,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarSpec {
    pub range: f64,
    pub weight: f64,
}

/// The five components a robot is assembled from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loadout {
    pub armor: ArmorSpec,
    pub cannon: CannonSpec,
    pub battery: BatterySpec,
    pub motor: MotorSpec,
    pub radar: RadarSpec,
}

impl Default for Loadout {
    fn default() -> Self {
        Self {
            armor: ArmorSpec {
                hp: 50.0,
                max_hp: 50.0,
                weight: 20.0,
            },
            cannon: CannonSpec {
                damage: 10.0,
                fire_rate: 30,
                range: 400.0,
                energy_cost: 5.0,
                weight: 15.0,
            },
            battery: BatterySpec {
                energy: 100.0,
                max_energy: 100.0,
                recharge_rate: 0.2,
                weight: 10.0,
            },
            motor: MotorSpec {
                max_speed: 3.0,
                max_rotation_speed: 5.0,
                max_weight: 100.0,
                energy_cost_per_move: 0.05,
                energy_cost_per_rotation: 0.02,
                weight: 20.0,
            },
            radar: RadarSpec {
                range: 300.0,
                weight: 5.0,
            },
        }
    }
}

/// An in-flight asynchronous action. Speeds are signed; the remaining
/// amount is always non-negative.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Move { speed: f64, remaining: f64 },
    Rotate { speed: f64, remaining: f64 },
    EndSequence,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DamageReport {
    pub armor: f64,
    pub hull: f64,
}

#[derive(Clone, Debug)]
pub struct Robot {
    pub id: String,
    pub position: Point,
    pub rotation: f64,
    pub armor: ArmorSpec,
    pub cannon: CannonSpec,
    pub battery: BatterySpec,
    pub motor: MotorSpec,
    pub radar: RadarSpec,
    pub hull_hp: f64,
    pub queue: VecDeque<Command>,
    pub next_actions: Vec<Action>,
    pub memory: Memory,
    pub cooldown: u32,
    pub last_scan: Option<EnemyScan>,
    pub last_obstacle_scan: Vec<ObstacleScan>,
    pub logs: VecDeque<String>,
    pub path: Vec<Point>,
    pub destination: Option<Point>,
    pub stats: CombatStats,
}

impl Robot {
    pub fn new(id: impl Into<String>, loadout: &Loadout, position: Point, rotation: f64) -> Self {
        Self {
            id: id.into(),
            position,
            rotation,
            armor: loadout.armor.clone(),
            cannon: loadout.cannon.clone(),
            battery: loadout.battery.clone(),
            motor: loadout.motor.clone(),
            radar: loadout.radar.clone(),
            hull_hp: HULL_MAX_HP,
            queue: VecDeque::new(),
            next_actions: Vec::new(),
            memory: Memory::new(),
            cooldown: 0,
            last_scan: None,
            last_obstacle_scan: Vec::new(),
            logs: VecDeque::new(),
            path: Vec::new(),
            destination: None,
            stats: CombatStats::default(),
        }
    }

    pub fn radius(&self) -> f64 {
        ROBOT_RADIUS
    }

    pub fn bounding_box(&self) -> Rect {
        let r = self.radius();
        Rect::new(self.position.x - r, self.position.y - r, r * 2.0, r * 2.0)
    }

    pub fn total_weight(&self) -> f64 {
        self.armor.weight
            + self.cannon.weight
            + self.battery.weight
            + self.motor.weight
            + self.radar.weight
    }

    pub fn is_overweight(&self) -> bool {
        self.total_weight() > self.motor.max_weight
    }

    pub fn effective_speed(&self, speed: f64) -> f64 {
        if self.is_overweight() {
            speed * OVERWEIGHT_SPEED_FACTOR
        } else {
            speed
        }
    }

    fn energy_factor(&self) -> f64 {
        if self.is_overweight() {
            OVERWEIGHT_ENERGY_FACTOR
        } else {
            1.0
        }
    }

    pub fn move_cost(&self, distance: f64) -> f64 {
        distance.abs() * self.motor.energy_cost_per_move * self.energy_factor()
    }

    pub fn rotation_cost(&self, angle: f64) -> f64 {
        angle.abs() * self.motor.energy_cost_per_rotation * self.energy_factor()
    }

    pub fn can_fire(&self) -> bool {
        self.cooldown == 0 && self.battery.energy >= self.cannon.energy_cost
    }

    pub fn is_destroyed(&self) -> bool {
        self.hull_hp <= 0.0
    }

    /// Hull as reported outward; never negative.
    pub fn hull(&self) -> f64 {
        self.hull_hp.max(0.0)
    }

    /// Armor soaks damage first, the remainder goes to the hull.
    pub fn apply_damage(&mut self, amount: f64) -> DamageReport {
        let amount = amount.max(0.0);
        let absorbed = amount.min(self.armor.hp.max(0.0));
        self.armor.hp -= absorbed;
        let hull = amount - absorbed;
        self.hull_hp -= hull;
        DamageReport {
            armor: absorbed,
            hull,
        }
    }

    /// Empties the command queue and path markers. Returns whether anything
    /// was queued.
    pub fn clear_queue(&mut self) -> bool {
        let had_commands = !self.queue.is_empty();
        self.queue.clear();
        self.path.clear();
        self.destination = None;
        had_commands
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.logs.push_back(line.into());
        while self.logs.len() > ROBOT_LOG_LIMIT {
            self.logs.pop_front();
        }
    }

    /// Runs `behavior` against an API built from the robot as it is now and
    /// keeps whatever it staged for the ActionSystem. A failing behavior
    /// leaves nothing staged and its memory changes are dropped.
    pub fn compute_next_action(
        &mut self,
        behavior: &dyn Behavior,
        world: Rc<WorldView>,
        events: Vec<GameEvent>,
        rng: Rng,
        tick: u64,
    ) -> Result<(), BehaviorError> {
        let mut api = RobotApi::new(self, world, events, rng, tick);
        let result = behavior.run(&mut api);
        let outcome = api.finish();
        for line in outcome.logs {
            self.push_log(line);
        }
        match result {
            Ok(()) => {
                self.memory = outcome.memory;
                self.next_actions = outcome.actions;
                Ok(())
            }
            Err(err) => {
                self.next_actions.clear();
                self.push_log(format!("behavior error: {err}"));
                Err(err)
            }
        }
    }

    pub fn to_view(&self) -> RobotView {
        RobotView {
            id: self.id.clone(),
            x: self.position.x,
            y: self.position.y,
            rotation: self.rotation,
            hull: self.hull(),
            hull_max: HULL_MAX_HP,
            armor: self.armor.hp.max(0.0),
            armor_max: self.armor.max_hp,
            energy: self.battery.energy,
            energy_max: self.battery.max_energy,
            weight: self.total_weight(),
            overweight: self.is_overweight(),
            radar_range: self.radar.range,
            cooldown: self.cooldown,
            queue_length: self.queue.len(),
            logs: self.logs.iter().cloned().collect(),
            path: self.path.clone(),
            destination: self.destination,
        }
    }
}
