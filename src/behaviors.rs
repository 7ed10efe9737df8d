//! Behaviors shipped with the engine.
//!
//! `hunter` is a state machine built on the shared FSM engine; `sentry` is a
//! flat reactive behavior. Both keep every bit of cross-tick state in robot
//! memory.

use std::rc::Rc;

use crate::api::{Behavior, BehaviorError, RobotApi};
use crate::fsm::{Fsm, FsmDescriptor, FsmError, StateDef, BASE_FSM, GRACE_TICKS_KEY};
use crate::types::{GameEvent, StopReason};

const ATTACK_RANGE_FACTOR: f64 = 0.6;
const KITE_DISTANCE: f64 = 120.0;
const AIM_TOLERANCE_DEG: f64 = 5.0;
const WANDER_MARGIN: f64 = 60.0;
const WANDER_ATTEMPTS: usize = 8;

pub const BUILTIN_NAMES: [&str; 2] = ["hunter", "sentry"];

pub fn by_name(name: &str) -> Option<Rc<dyn Behavior>> {
    match name {
        "hunter" => hunter().ok().map(|fsm| Rc::new(fsm) as Rc<dyn Behavior>),
        "sentry" => Some(Rc::new(Sentry)),
        _ => None,
    }
}

/// Default pairing used when nothing else is configured.
pub fn default_pair() -> Result<[Rc<dyn Behavior>; 2], FsmError> {
    let first: Rc<dyn Behavior> = Rc::new(hunter()?);
    let second: Rc<dyn Behavior> = Rc::new(Sentry);
    Ok([first, second])
}

// ---- hunter ----

/// Searches the arena, closes in, fights at range while kiting, breaks off
/// when its armor is gone and backs out of collisions.
pub fn hunter() -> Result<Fsm, FsmError> {
    let descriptor = FsmDescriptor::new()
        .initial_state("search")
        .state("search", StateDef::new().on_execute(search_execute))
        .state("approach", StateDef::new().on_execute(approach_execute))
        .state(
            "attack",
            StateDef::new()
                .on_enter(attack_enter)
                .on_execute(attack_execute),
        )
        .state(
            "evade",
            StateDef::new()
                .on_enter(evade_enter)
                .on_execute(resume_search_when_idle)
                .interruptible_by(["attack"]),
        )
        .state(
            "unstick",
            StateDef::new()
                .on_enter(unstick_enter)
                .on_execute(resume_search_when_idle)
                .interruptible_by(Vec::<String>::new()),
        )
        .emergency("unstick", collided)
        .emergency("evade", hit_without_armor)
        .tactical("attack", in_attack_window)
        .tactical("approach", enemy_out_of_window)
        .tactical("search", enemy_lost);
    Fsm::compose(&BASE_FSM, descriptor)
}

fn collided(api: &mut RobotApi) -> bool {
    api.events().iter().any(|event| {
        matches!(
            event,
            GameEvent::ActionStopped {
                reason: StopReason::Collision,
                ..
            }
        )
    })
}

fn hit_without_armor(api: &mut RobotApi) -> bool {
    let settled = api.memory_i64(GRACE_TICKS_KEY).unwrap_or(0) == 0;
    settled && api.has_event("HIT_BY_PROJECTILE") && api.armor_state().hp <= 0.0
}

fn in_attack_window(api: &mut RobotApi) -> bool {
    let range = api.loadout().cannon.range * ATTACK_RANGE_FACTOR;
    match api.scan() {
        Some(enemy) => {
            let (x, y, distance) = (enemy.x, enemy.y, enemy.distance);
            distance <= range && api.is_line_of_sight_clear(x, y)
        }
        None => false,
    }
}

fn enemy_out_of_window(api: &mut RobotApi) -> bool {
    api.scan().is_some() && !in_attack_window(api)
}

fn enemy_lost(api: &mut RobotApi) -> bool {
    api.scan().is_none()
}

fn search_execute(api: &mut RobotApi) -> Option<String> {
    if !api.is_queue_empty() {
        return None;
    }
    let arena = api.arena_dimensions();
    for _ in 0..WANDER_ATTEMPTS {
        let x = WANDER_MARGIN + api.random() * (arena.width - 2.0 * WANDER_MARGIN);
        let y = WANDER_MARGIN + api.random() * (arena.height - 2.0 * WANDER_MARGIN);
        if api.move_to(x, y) {
            return None;
        }
    }
    api.rotate(45.0);
    None
}

fn approach_execute(api: &mut RobotApi) -> Option<String> {
    let (x, y) = match api.scan() {
        Some(enemy) => (enemy.x, enemy.y),
        None => return Some("search".to_string()),
    };
    if api.is_queue_empty() && !api.move_to(x, y) {
        api.aim_at(x, y);
    }
    None
}

fn attack_enter(api: &mut RobotApi) -> Option<String> {
    api.log("engaging");
    None
}

fn attack_execute(api: &mut RobotApi) -> Option<String> {
    let (x, y, distance) = match api.scan() {
        Some(enemy) => (enemy.x, enemy.y, enemy.distance),
        None => return Some("search".to_string()),
    };
    if distance < KITE_DISTANCE && api.is_queue_empty() && !api.is_obstacle_ahead(-40.0) {
        api.move_by(-40.0);
    }
    let angle = api.aim_at(x, y);
    if angle.abs() < AIM_TOLERANCE_DEG && api.is_line_of_sight_clear(x, y) {
        api.fire();
    }
    None
}

fn evade_enter(api: &mut RobotApi) -> Option<String> {
    let turn = if api.random() < 0.5 { 90.0 } else { -90.0 };
    api.log("armor gone, evading");
    api.rotate(turn);
    api.move_by(80.0);
    None
}

fn unstick_enter(api: &mut RobotApi) -> Option<String> {
    let turn = 90.0 + api.random() * 45.0;
    let turn = if api.random() < 0.5 { turn } else { -turn };
    api.move_by(-30.0);
    api.rotate(turn);
    None
}

fn resume_search_when_idle(api: &mut RobotApi) -> Option<String> {
    api.is_queue_empty().then(|| "search".to_string())
}

// ---- sentry ----

/// Holds position, sweeps the radar and shoots once the enemy is lined up.
/// The sweep direction flips every three seconds.
pub struct Sentry;

impl Behavior for Sentry {
    fn run(&self, api: &mut RobotApi) -> Result<(), BehaviorError> {
        let target = api.scan().map(|enemy| (enemy.x, enemy.y));
        let Some((x, y)) = target else {
            let dir = api.memory_i64("sweep").unwrap_or(1);
            if api.is_queue_empty() {
                api.rotate(30.0 * dir as f64);
            }
            if api.tick() % 180 == 0 {
                api.set_memory("sweep", -dir);
            }
            return Ok(());
        };

        let angle = api.aim_at(x, y);
        if angle.abs() < AIM_TOLERANCE_DEG && api.is_line_of_sight_clear(x, y) {
            api.fire();
        }
        Ok(())
    }
}
