//! Rhai bindings for [`RobotApi`].
//!
//! Scripts receive a `RobotApi` handle. The handle shares the real API
//! through `Rc<RefCell<_>>` for the duration of a single call; afterwards
//! the API is moved back out so the caller owns it again.

use std::cell::RefCell;
use std::rc::Rc;

use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, FLOAT, INT, AST};
use serde_json::Value;

use crate::api::{BehaviorError, RobotApi};
use crate::navigation::PathStep;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

#[derive(Clone)]
pub struct ScriptApi {
    inner: Rc<RefCell<RobotApi>>,
}

impl ScriptApi {
    fn new(api: RobotApi) -> Self {
        Self {
            inner: Rc::new(RefCell::new(api)),
        }
    }

    fn into_api(self) -> RobotApi {
        self.inner.take()
    }

    fn do_move(&mut self, distance: Dynamic) -> ScriptResult<()> {
        let distance = number(&distance, "move")?;
        self.inner.borrow_mut().move_by(distance);
        Ok(())
    }

    fn do_move_with_speed(&mut self, distance: Dynamic, speed: Dynamic) -> ScriptResult<()> {
        let distance = number(&distance, "move")?;
        let speed = number(&speed, "move")?;
        self.inner.borrow_mut().move_with_speed(distance, speed);
        Ok(())
    }

    fn move_to(&mut self, x: Dynamic, y: Dynamic) -> ScriptResult<bool> {
        let x = number(&x, "move_to")?;
        let y = number(&y, "move_to")?;
        Ok(self.inner.borrow_mut().move_to(x, y))
    }

    fn rotate(&mut self, angle: Dynamic) -> ScriptResult<()> {
        let angle = number(&angle, "rotate")?;
        self.inner.borrow_mut().rotate(angle);
        Ok(())
    }

    fn rotate_with_speed(&mut self, angle: Dynamic, speed: Dynamic) -> ScriptResult<()> {
        let angle = number(&angle, "rotate")?;
        let speed = number(&speed, "rotate")?;
        self.inner.borrow_mut().rotate_with_speed(angle, speed);
        Ok(())
    }

    fn aim_at(&mut self, x: Dynamic, y: Dynamic) -> ScriptResult<FLOAT> {
        let x = number(&x, "aim_at")?;
        let y = number(&y, "aim_at")?;
        Ok(self.inner.borrow_mut().aim_at(x, y))
    }

    fn stop(&mut self) {
        self.inner.borrow_mut().stop("USER");
    }

    fn stop_with_source(&mut self, source: &str) {
        self.inner.borrow_mut().stop(source);
    }

    /// Accepts `[#{ rotate: 90 }, #{ move: 120 }, ...]`.
    fn sequence(&mut self, steps: Array) -> ScriptResult<()> {
        let mut plan = Vec::with_capacity(steps.len());
        for step in steps {
            let Some(map) = step.try_cast::<rhai::Map>() else {
                return Err("sequence steps must be maps like #{ move: 100 }".into());
            };
            if let Some(distance) = map.get("move") {
                plan.push(PathStep::Move(number(distance, "sequence")?));
            } else if let Some(angle) = map.get("rotate") {
                plan.push(PathStep::Rotate(number(angle, "sequence")?));
            } else {
                return Err("sequence step needs a `move` or `rotate` key".into());
            }
        }
        self.inner.borrow_mut().sequence(&plan);
        Ok(())
    }

    fn fire(&mut self) -> bool {
        self.inner.borrow_mut().fire()
    }

    fn scan(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().scan())
    }

    fn scan_obstacles(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().scan_obstacles())
    }

    fn get_state(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().state())
    }

    fn get_battery_state(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().battery_state())
    }

    fn get_armor_state(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().armor_state())
    }

    fn get_hull_state(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().hull_state())
    }

    fn get_arena_dimensions(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().arena_dimensions())
    }

    fn is_queue_empty(&mut self) -> bool {
        self.inner.borrow().is_queue_empty()
    }

    fn is_line_of_sight_clear(&mut self, x: Dynamic, y: Dynamic) -> ScriptResult<bool> {
        let x = number(&x, "is_line_of_sight_clear")?;
        let y = number(&y, "is_line_of_sight_clear")?;
        Ok(self.inner.borrow().is_line_of_sight_clear(x, y))
    }

    fn is_position_valid(&mut self, x: Dynamic, y: Dynamic) -> ScriptResult<bool> {
        let x = number(&x, "is_position_valid")?;
        let y = number(&y, "is_position_valid")?;
        Ok(self.inner.borrow().is_position_valid(x, y))
    }

    fn is_obstacle_ahead(&mut self, probe: Dynamic) -> ScriptResult<bool> {
        let probe = number(&probe, "is_obstacle_ahead")?;
        Ok(self.inner.borrow().is_obstacle_ahead(probe))
    }

    fn get_events(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().events())
    }

    fn get_tick(&mut self) -> INT {
        self.inner.borrow().tick() as INT
    }

    fn random(&mut self) -> FLOAT {
        self.inner.borrow_mut().random()
    }

    fn log(&mut self, line: Dynamic) {
        let line = match line.clone().into_string() {
            Ok(text) => text,
            Err(_) => line.to_string(),
        };
        self.inner.borrow_mut().log(line);
    }

    fn get_memory(&mut self) -> ScriptResult<Dynamic> {
        to_dynamic(self.inner.borrow().memory())
    }

    /// Shallow merge of a script map into memory.
    fn update_memory(&mut self, patch: Dynamic) -> ScriptResult<()> {
        if !patch.is_map() {
            return Err(format!("update_memory expects a map, got {}", patch.type_name()).into());
        }
        let value: Value = from_dynamic(&patch)?;
        if let Value::Object(map) = value {
            self.inner.borrow_mut().update_memory(map);
        }
        Ok(())
    }
}

fn number(value: &Dynamic, name: &str) -> ScriptResult<f64> {
    if let Ok(v) = value.as_float() {
        return Ok(v);
    }
    if let Ok(v) = value.as_int() {
        return Ok(v as f64);
    }
    Err(format!("`{name}` expects a number, got {}", value.type_name()).into())
}

pub fn register_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptApi>("RobotApi");
    engine.register_fn("move", ScriptApi::do_move);
    engine.register_fn("move", ScriptApi::do_move_with_speed);
    engine.register_fn("move_to", ScriptApi::move_to);
    engine.register_fn("rotate", ScriptApi::rotate);
    engine.register_fn("rotate", ScriptApi::rotate_with_speed);
    engine.register_fn("aim_at", ScriptApi::aim_at);
    engine.register_fn("stop", ScriptApi::stop);
    engine.register_fn("stop", ScriptApi::stop_with_source);
    engine.register_fn("sequence", ScriptApi::sequence);
    engine.register_fn("fire", ScriptApi::fire);
    engine.register_fn("scan", ScriptApi::scan);
    engine.register_fn("scan_obstacles", ScriptApi::scan_obstacles);
    engine.register_fn("get_state", ScriptApi::get_state);
    engine.register_fn("get_battery_state", ScriptApi::get_battery_state);
    engine.register_fn("get_armor_state", ScriptApi::get_armor_state);
    engine.register_fn("get_hull_state", ScriptApi::get_hull_state);
    engine.register_fn("get_arena_dimensions", ScriptApi::get_arena_dimensions);
    engine.register_fn("is_queue_empty", ScriptApi::is_queue_empty);
    engine.register_fn("is_line_of_sight_clear", ScriptApi::is_line_of_sight_clear);
    engine.register_fn("is_position_valid", ScriptApi::is_position_valid);
    engine.register_fn("is_obstacle_ahead", ScriptApi::is_obstacle_ahead);
    engine.register_fn("get_events", ScriptApi::get_events);
    engine.register_fn("get_tick", ScriptApi::get_tick);
    engine.register_fn("random", ScriptApi::random);
    engine.register_fn("log", ScriptApi::log);
    engine.register_fn("get_memory", ScriptApi::get_memory);
    engine.register_fn("update_memory", ScriptApi::update_memory);
}

/// Calls `fn_ptr(api)` with the API lent to the script. The API is always
/// handed back, even when the script fails.
pub fn call_with_api(
    engine: &Engine,
    ast: &AST,
    fn_ptr: &FnPtr,
    api: &mut RobotApi,
) -> Result<Dynamic, BehaviorError> {
    let handle = ScriptApi::new(std::mem::take(api));
    let result = fn_ptr.call::<Dynamic>(engine, ast, (handle.clone(),));
    *api = handle.into_api();
    result.map_err(|err| behavior_error(&err))
}

pub fn behavior_error(err: &EvalAltResult) -> BehaviorError {
    if exceeded_budget(err) {
        BehaviorError::BudgetExceeded
    } else {
        BehaviorError::Script(err.to_string())
    }
}

fn exceeded_budget(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorTooManyOperations(..) | EvalAltResult::ErrorTerminated(..) => true,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => exceeded_budget(inner),
        _ => false,
    }
}
