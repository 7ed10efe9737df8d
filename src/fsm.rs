//! Hierarchical-priority state machine runtime.
//!
//! A behavior author supplies an [`FsmDescriptor`]: named states with
//! optional lifecycle hooks, per-state transitions and two global bands
//! (emergency, tactical). [`Fsm::compose`] validates it and binds it to the
//! stateless [`FsmEngine`], which does the per-tick work. All runtime state
//! lives in the robot's memory under `current`, `lastState` and
//! `stateGraceTicks`.
//!
//! Per tick the engine checks, first match wins:
//! 1. emergency transitions, always;
//! 2. tactical transitions, unless the state is still in its grace period,
//!    filtered by the state's `interruptible_by` list when present;
//! 3. the current state's own transitions.
//!
//! A transition whose target is the current state never fires. If nothing
//! fires, `on_execute` runs and may return a state name, which is taken as
//! an implicit transition.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::api::{Behavior, BehaviorError, RobotApi};
use crate::constants::FSM_GRACE_TICKS;

pub const CURRENT_STATE_KEY: &str = "current";
pub const LAST_STATE_KEY: &str = "lastState";
pub const GRACE_TICKS_KEY: &str = "stateGraceTicks";
pub const STATE_TRANSITION_SOURCE: &str = "STATE_TRANSITION";

/// Lifecycle callback. A returned name requests a transition; only
/// `on_execute` results are acted upon.
pub trait Hook {
    fn call(&self, api: &mut RobotApi) -> Result<Option<String>, BehaviorError>;
}

pub trait Condition {
    fn check(&self, api: &mut RobotApi) -> Result<bool, BehaviorError>;
}

impl<F> Hook for F
where
    F: Fn(&mut RobotApi) -> Option<String>,
{
    fn call(&self, api: &mut RobotApi) -> Result<Option<String>, BehaviorError> {
        Ok(self(api))
    }
}

impl<F> Condition for F
where
    F: Fn(&mut RobotApi) -> bool,
{
    fn check(&self, api: &mut RobotApi) -> Result<bool, BehaviorError> {
        Ok(self(api))
    }
}

#[derive(Clone)]
pub struct Transition {
    pub target: String,
    pub condition: Rc<dyn Condition>,
}

impl Transition {
    pub fn new(target: impl Into<String>, condition: impl Condition + 'static) -> Self {
        Self {
            target: target.into(),
            condition: Rc::new(condition),
        }
    }
}

#[derive(Clone, Default)]
pub struct StateDef {
    pub on_enter: Option<Rc<dyn Hook>>,
    pub on_execute: Option<Rc<dyn Hook>>,
    pub on_exit: Option<Rc<dyn Hook>>,
    pub transitions: Vec<Transition>,
    /// When set, only tactical transitions to these targets may interrupt.
    pub interruptible_by: Option<Vec<String>>,
}

impl StateDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enter(mut self, hook: impl Hook + 'static) -> Self {
        self.on_enter = Some(Rc::new(hook));
        self
    }

    pub fn on_execute(mut self, hook: impl Hook + 'static) -> Self {
        self.on_execute = Some(Rc::new(hook));
        self
    }

    pub fn on_exit(mut self, hook: impl Hook + 'static) -> Self {
        self.on_exit = Some(Rc::new(hook));
        self
    }

    pub fn transition(mut self, target: impl Into<String>, condition: impl Condition + 'static) -> Self {
        self.transitions.push(Transition::new(target, condition));
        self
    }

    pub fn interruptible_by<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interruptible_by = Some(targets.into_iter().map(Into::into).collect());
        self
    }
}

/// Engine settings a descriptor may override.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FsmOverrides {
    pub initial_state: Option<String>,
    pub grace_ticks: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FsmConfig {
    pub initial_state: String,
    pub grace_ticks: i64,
}

#[derive(Clone, Default)]
pub struct FsmDescriptor {
    pub states: BTreeMap<String, StateDef>,
    pub emergency: Vec<Transition>,
    pub tactical: Vec<Transition>,
    pub config: FsmOverrides,
}

impl FsmDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, name: impl Into<String>, state: StateDef) -> Self {
        self.states.insert(name.into(), state);
        self
    }

    pub fn emergency(mut self, target: impl Into<String>, condition: impl Condition + 'static) -> Self {
        self.emergency.push(Transition::new(target, condition));
        self
    }

    pub fn tactical(mut self, target: impl Into<String>, condition: impl Condition + 'static) -> Self {
        self.tactical.push(Transition::new(target, condition));
        self
    }

    pub fn initial_state(mut self, name: impl Into<String>) -> Self {
        self.config.initial_state = Some(name.into());
        self
    }

    pub fn grace_ticks(mut self, ticks: i64) -> Self {
        self.config.grace_ticks = Some(ticks);
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FsmError {
    #[error("state machine declares no states")]
    NoStates,
    #[error("initial state `{0}` is not declared")]
    MissingInitialState(String),
    #[error("transition from `{from}` targets unknown state `{target}`")]
    UnknownTarget { from: String, target: String },
    #[error("state `{state}` lists unknown interrupt target `{target}`")]
    UnknownInterrupt { state: String, target: String },
}

/// The shared, stateless transition engine.
#[derive(Debug)]
pub struct FsmEngine {
    pub default_initial_state: &'static str,
    pub grace_ticks: i64,
}

pub static BASE_FSM: FsmEngine = FsmEngine {
    default_initial_state: "idle",
    grace_ticks: FSM_GRACE_TICKS,
};

/// A descriptor bound to an engine. Cheap to clone; safe to share between
/// robots since it carries no per-robot state.
#[derive(Clone)]
pub struct Fsm {
    engine: &'static FsmEngine,
    config: FsmConfig,
    states: Rc<BTreeMap<String, StateDef>>,
    emergency: Rc<Vec<Transition>>,
    tactical: Rc<Vec<Transition>>,
}

impl Fsm {
    /// Merges `descriptor` over `engine` defaults and validates every state
    /// reference.
    pub fn compose(engine: &'static FsmEngine, descriptor: FsmDescriptor) -> Result<Self, FsmError> {
        let FsmDescriptor {
            states,
            emergency,
            tactical,
            config: overrides,
        } = descriptor;

        let config = FsmConfig {
            initial_state: overrides
                .initial_state
                .unwrap_or_else(|| engine.default_initial_state.to_string()),
            grace_ticks: overrides.grace_ticks.unwrap_or(engine.grace_ticks).max(0),
        };

        if states.is_empty() {
            return Err(FsmError::NoStates);
        }
        if !states.contains_key(&config.initial_state) {
            return Err(FsmError::MissingInitialState(config.initial_state));
        }
        for (band, transitions) in [("emergency", &emergency), ("tactical", &tactical)] {
            for transition in transitions {
                if !states.contains_key(&transition.target) {
                    return Err(FsmError::UnknownTarget {
                        from: band.to_string(),
                        target: transition.target.clone(),
                    });
                }
            }
        }
        for (name, state) in &states {
            for transition in &state.transitions {
                if !states.contains_key(&transition.target) {
                    return Err(FsmError::UnknownTarget {
                        from: name.clone(),
                        target: transition.target.clone(),
                    });
                }
            }
            for target in state.interruptible_by.iter().flatten() {
                if !states.contains_key(target) {
                    return Err(FsmError::UnknownInterrupt {
                        state: name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        Ok(Self {
            engine,
            config,
            states: Rc::new(states),
            emergency: Rc::new(emergency),
            tactical: Rc::new(tactical),
        })
    }

    pub fn config(&self) -> &FsmConfig {
        &self.config
    }

    pub fn current_state(api: &RobotApi) -> Option<&str> {
        api.memory_str(CURRENT_STATE_KEY)
    }
}

impl Behavior for Fsm {
    fn run(&self, api: &mut RobotApi) -> Result<(), BehaviorError> {
        self.engine.run(self, api)
    }
}

impl FsmEngine {
    pub fn run(&self, fsm: &Fsm, api: &mut RobotApi) -> Result<(), BehaviorError> {
        let known = Fsm::current_state(api)
            .filter(|name| fsm.states.contains_key(*name))
            .map(str::to_string);
        let current = match known {
            Some(name) => name,
            None => {
                self.enter_initial(fsm, api)?;
                fsm.config.initial_state.clone()
            }
        };

        let grace = api.memory_i64(GRACE_TICKS_KEY).unwrap_or(0);
        let in_grace = grace > 0;
        if in_grace {
            api.set_memory(GRACE_TICKS_KEY, grace - 1);
        }

        let Some(state) = fsm.states.get(&current) else {
            return Ok(());
        };

        if let Some(target) = self.select_transition(fsm, state, &current, in_grace, api)? {
            return self.transition(fsm, &current, &target, api);
        }

        if let Some(hook) = &state.on_execute {
            if let Some(next) = hook.call(api)? {
                if next != current {
                    if fsm.states.contains_key(&next) {
                        return self.transition(fsm, &current, &next, api);
                    }
                    api.log(format!("ignoring transition to unknown state `{next}`"));
                }
            }
        }
        Ok(())
    }

    fn enter_initial(&self, fsm: &Fsm, api: &mut RobotApi) -> Result<(), BehaviorError> {
        let initial = fsm.config.initial_state.clone();
        api.update_memory(state_record(&initial, Value::Null, fsm.config.grace_ticks));
        if let Some(hook) = fsm.states.get(&initial).and_then(|state| state.on_enter.clone()) {
            hook.call(api)?;
        }
        Ok(())
    }

    fn select_transition(
        &self,
        fsm: &Fsm,
        state: &StateDef,
        current: &str,
        in_grace: bool,
        api: &mut RobotApi,
    ) -> Result<Option<String>, BehaviorError> {
        if let Some(target) = first_match(&fsm.emergency, current, api, |_| true)? {
            return Ok(Some(target));
        }
        if !in_grace {
            let allowed = |target: &str| match &state.interruptible_by {
                Some(list) => list.iter().any(|name| name == target),
                None => true,
            };
            if let Some(target) = first_match(&fsm.tactical, current, api, allowed)? {
                return Ok(Some(target));
            }
        }
        first_match(&state.transitions, current, api, |_| true)
    }

    fn transition(&self, fsm: &Fsm, from: &str, to: &str, api: &mut RobotApi) -> Result<(), BehaviorError> {
        if let Some(hook) = fsm.states.get(from).and_then(|state| state.on_exit.clone()) {
            hook.call(api)?;
        }
        api.stop(STATE_TRANSITION_SOURCE);
        api.update_memory(state_record(to, Value::from(from), fsm.config.grace_ticks));
        debug!(tick = api.tick(), from, to, "state transition");
        if let Some(hook) = fsm.states.get(to).and_then(|state| state.on_enter.clone()) {
            hook.call(api)?;
        }
        Ok(())
    }
}

fn first_match(
    transitions: &[Transition],
    current: &str,
    api: &mut RobotApi,
    allowed: impl Fn(&str) -> bool,
) -> Result<Option<String>, BehaviorError> {
    for transition in transitions {
        if transition.target == current || !allowed(&transition.target) {
            continue;
        }
        if transition.condition.check(api)? {
            return Ok(Some(transition.target.clone()));
        }
    }
    Ok(None)
}

fn state_record(current: &str, last: Value, grace_ticks: i64) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert(CURRENT_STATE_KEY.to_string(), Value::from(current));
    record.insert(LAST_STATE_KEY.to_string(), last);
    record.insert(GRACE_TICKS_KEY.to_string(), Value::from(grace_ticks));
    record
}
