//! Behavior compiler and sandbox.
//!
//! A behavior script must evaluate to an object map. Two shapes are
//! accepted:
//!
//! ```rhai
//! #{ run: |api| { api.rotate(5); } }
//! ```
//!
//! or a state machine descriptor, which is bound to the shared FSM engine:
//!
//! ```rhai
//! #{
//!     config: #{ initialState: "search" },
//!     states: #{
//!         search: #{ onExecute: |api| { api.rotate(10); } },
//!         attack: #{ onEnter: |api| { api.log("engage"); } },
//!     },
//!     tacticalTransitions: [
//!         #{ target: "attack", condition: |api| api.scan() != () },
//!     ],
//! }
//! ```
//!
//! Anything else is rejected before a behavior is ever produced.
//!
//! Closures cannot capture variables, so `memory` is the only state a
//! script keeps between ticks. All callbacks of one behavior share a single
//! operation budget per `run()`.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Array, Dynamic, Engine, FnPtr, ImmutableString, Map, AST};
use thiserror::Error;
use tracing::debug;

use crate::api::{Behavior, BehaviorError, RobotApi};
use crate::constants::{
    SCRIPT_MAX_ARRAY_SIZE, SCRIPT_MAX_CALL_LEVELS, SCRIPT_MAX_MAP_SIZE, SCRIPT_MAX_OPERATIONS,
    SCRIPT_MAX_STRING_SIZE,
};
use crate::fsm::{Condition, Fsm, FsmDescriptor, FsmError, Hook, StateDef, Transition, BASE_FSM};
use crate::script_api::{call_with_api, register_api};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("script failed while evaluating: {0}")]
    Evaluation(String),
    #[error("behavior script must evaluate to an object map, got {0}")]
    NotAnObject(String),
    #[error("behavior object has neither `run` nor `states`")]
    MissingRun,
    #[error("field `{field}` must be {expected}")]
    InvalidField { field: String, expected: &'static str },
    #[error(transparent)]
    Descriptor(#[from] FsmError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Operations spent by one behavior in the current `run()`. rhai counts
/// per call, so finished calls are folded into `spent`.
#[derive(Default)]
struct OperationBudget {
    spent: Cell<u64>,
    in_call: Cell<u64>,
}

impl OperationBudget {
    fn exhausted(&self, in_call: u64) -> bool {
        self.in_call.set(in_call);
        self.spent.get().saturating_add(in_call) > SCRIPT_MAX_OPERATIONS
    }

    fn settle(&self) {
        self.spent.set(self.spent.get().saturating_add(self.in_call.take()));
    }

    fn reset(&self) {
        self.spent.set(0);
        self.in_call.set(0);
    }
}

/// Interpreter plus the compiled script every callback runs against.
pub struct ScriptRuntime {
    engine: Engine,
    ast: AST,
    budget: Rc<OperationBudget>,
}

impl ScriptRuntime {
    fn call(&self, fn_ptr: &FnPtr, api: &mut RobotApi) -> Result<Dynamic, BehaviorError> {
        let result = call_with_api(&self.engine, &self.ast, fn_ptr, api);
        self.budget.settle();
        result
    }
}

/// A script function used as an FSM hook or transition condition.
pub struct ScriptCallback {
    runtime: Rc<ScriptRuntime>,
    fn_ptr: FnPtr,
}

impl Hook for ScriptCallback {
    fn call(&self, api: &mut RobotApi) -> Result<Option<String>, BehaviorError> {
        let value = self.runtime.call(&self.fn_ptr, api)?;
        Ok(value.into_string().ok())
    }
}

impl Condition for ScriptCallback {
    fn check(&self, api: &mut RobotApi) -> Result<bool, BehaviorError> {
        let value = self.runtime.call(&self.fn_ptr, api)?;
        let type_name = value.type_name();
        value.as_bool().map_err(|_| {
            BehaviorError::Script(format!(
                "transition condition `{}` returned {type_name}, expected bool",
                self.fn_ptr.fn_name()
            ))
        })
    }
}

enum BehaviorKind {
    /// Flat reactive script: `run(api)` every tick.
    Reactive(FnPtr),
    StateMachine(Fsm),
}

pub struct CompiledBehavior {
    runtime: Rc<ScriptRuntime>,
    kind: BehaviorKind,
}

impl CompiledBehavior {
    pub fn is_state_machine(&self) -> bool {
        matches!(self.kind, BehaviorKind::StateMachine(_))
    }
}

impl Behavior for CompiledBehavior {
    fn run(&self, api: &mut RobotApi) -> Result<(), BehaviorError> {
        self.runtime.budget.reset();
        match &self.kind {
            BehaviorKind::Reactive(run) => self.runtime.call(run, api).map(|_| ()),
            BehaviorKind::StateMachine(fsm) => fsm.run(api),
        }
    }
}

/// Interpreter locked down for untrusted behavior code.
fn sandbox_engine(budget: &Rc<OperationBudget>) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(SCRIPT_MAX_OPERATIONS);
    let tracker = Rc::clone(budget);
    engine.on_progress(move |ops| tracker.exhausted(ops).then_some(Dynamic::UNIT));
    engine.set_max_call_levels(SCRIPT_MAX_CALL_LEVELS);
    engine.set_max_string_size(SCRIPT_MAX_STRING_SIZE);
    engine.set_max_array_size(SCRIPT_MAX_ARRAY_SIZE);
    engine.set_max_map_size(SCRIPT_MAX_MAP_SIZE);
    engine.set_max_expr_depths(64, 32);
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.on_print(|text| debug!(output = text, "script print"));
    engine.on_debug(|text, source, pos| {
        debug!(output = text, source = source.unwrap_or(""), position = %pos, "script debug")
    });
    register_api(&mut engine);
    engine
}

pub fn compile(source: &str) -> Result<CompiledBehavior, CompileError> {
    let budget = Rc::new(OperationBudget::default());
    let engine = sandbox_engine(&budget);
    let ast = engine
        .compile(source)
        .map_err(|err| CompileError::Syntax(err.to_string()))?;
    let value = engine
        .eval_ast::<Dynamic>(&ast)
        .map_err(|err| CompileError::Evaluation(err.to_string()))?;

    let type_name = value.type_name().to_string();
    let Some(object) = value.try_cast::<Map>() else {
        return Err(CompileError::NotAnObject(type_name));
    };
    let runtime = Rc::new(ScriptRuntime { engine, ast, budget });

    if let Some(run) = object.get("run") {
        let run = callable(run, "run")?;
        return Ok(CompiledBehavior {
            runtime,
            kind: BehaviorKind::Reactive(run),
        });
    }
    if object.contains_key("states") {
        let descriptor = descriptor_from_map(&object, &runtime)?;
        let fsm = Fsm::compose(&BASE_FSM, descriptor)?;
        return Ok(CompiledBehavior {
            runtime,
            kind: BehaviorKind::StateMachine(fsm),
        });
    }
    Err(CompileError::MissingRun)
}

pub fn compile_file(path: impl AsRef<Path>) -> Result<CompiledBehavior, CompileError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    compile(&source)
}

fn descriptor_from_map(object: &Map, runtime: &Rc<ScriptRuntime>) -> Result<FsmDescriptor, CompileError> {
    let mut descriptor = FsmDescriptor::new();

    let states = map_field(object, "states")?.unwrap_or_default();
    for (name, value) in states {
        let field = format!("states.{name}");
        let Some(spec) = value.try_cast::<Map>() else {
            return Err(invalid(field, "an object map"));
        };
        descriptor
            .states
            .insert(name.to_string(), state_from_map(&spec, &field, runtime)?);
    }

    descriptor.emergency = transitions(object, "emergencyTransitions", runtime)?;
    descriptor.tactical = transitions(object, "tacticalTransitions", runtime)?;

    if let Some(config) = map_field(object, "config")? {
        if let Some(initial) = config.get("initialState") {
            let initial = initial
                .clone()
                .into_string()
                .map_err(|_| invalid("config.initialState", "a string"))?;
            descriptor.config.initial_state = Some(initial);
        }
        if let Some(grace) = config.get("graceTicks") {
            let grace = grace
                .as_int()
                .map_err(|_| invalid("config.graceTicks", "an integer"))?;
            descriptor.config.grace_ticks = Some(grace);
        }
    }
    Ok(descriptor)
}

fn state_from_map(spec: &Map, field: &str, runtime: &Rc<ScriptRuntime>) -> Result<StateDef, CompileError> {
    let hook = |key: &str| -> Result<Option<Rc<dyn Hook>>, CompileError> {
        match spec.get(key) {
            Some(value) if !value.is_unit() => {
                let fn_ptr = callable(value, &format!("{field}.{key}"))?;
                let hook: Rc<dyn Hook> = Rc::new(ScriptCallback {
                    runtime: Rc::clone(runtime),
                    fn_ptr,
                });
                Ok(Some(hook))
            }
            _ => Ok(None),
        }
    };

    let interruptible_by = match spec.get("interruptibleBy") {
        Some(value) if !value.is_unit() => {
            let Some(list) = value.clone().try_cast::<Array>() else {
                return Err(invalid(format!("{field}.interruptibleBy"), "an array of state names"));
            };
            let mut names = Vec::with_capacity(list.len());
            for entry in list {
                let name = entry
                    .into_string()
                    .map_err(|_| invalid(format!("{field}.interruptibleBy"), "an array of state names"))?;
                names.push(name);
            }
            Some(names)
        }
        _ => None,
    };

    Ok(StateDef {
        on_enter: hook("onEnter")?,
        on_execute: hook("onExecute")?,
        on_exit: hook("onExit")?,
        transitions: transitions(spec, "transitions", runtime)
            .map_err(|err| prefix_field(err, field))?,
        interruptible_by,
    })
}

fn transitions(object: &Map, key: &str, runtime: &Rc<ScriptRuntime>) -> Result<Vec<Transition>, CompileError> {
    let list = match object.get(key) {
        Some(value) if !value.is_unit() => value
            .clone()
            .try_cast::<Array>()
            .ok_or_else(|| invalid(key, "an array of transitions"))?,
        _ => return Ok(Vec::new()),
    };

    let mut out = Vec::with_capacity(list.len());
    for (idx, entry) in list.into_iter().enumerate() {
        let field = format!("{key}[{idx}]");
        let Some(spec) = entry.try_cast::<Map>() else {
            return Err(invalid(field, "an object map"));
        };
        let target = spec
            .get("target")
            .and_then(|value| value.clone().into_string().ok())
            .ok_or_else(|| invalid(format!("{field}.target"), "a state name"))?;
        let condition = spec
            .get("condition")
            .ok_or_else(|| invalid(format!("{field}.condition"), "a function"))?;
        let fn_ptr = callable(condition, &format!("{field}.condition"))?;
        out.push(Transition {
            target,
            condition: Rc::new(ScriptCallback {
                runtime: Rc::clone(runtime),
                fn_ptr,
            }),
        });
    }
    Ok(out)
}

fn map_field(object: &Map, key: &str) -> Result<Option<Map>, CompileError> {
    match object.get(key) {
        Some(value) if !value.is_unit() => value
            .clone()
            .try_cast::<Map>()
            .map(Some)
            .ok_or_else(|| invalid(key, "an object map")),
        _ => Ok(None),
    }
}

/// A function pointer or closure, or the name of a script-level function.
fn callable(value: &Dynamic, field: &str) -> Result<FnPtr, CompileError> {
    if let Some(fn_ptr) = value.clone().try_cast::<FnPtr>() {
        return Ok(fn_ptr);
    }
    if let Some(name) = value.clone().try_cast::<ImmutableString>() {
        return FnPtr::new(name).map_err(|_| invalid(field, "a function"));
    }
    Err(invalid(field, "a function"))
}

fn invalid(field: impl Into<String>, expected: &'static str) -> CompileError {
    CompileError::InvalidField {
        field: field.into(),
        expected,
    }
}

fn prefix_field(err: CompileError, prefix: &str) -> CompileError {
    match err {
        CompileError::InvalidField { field, expected } => CompileError::InvalidField {
            field: format!("{prefix}.{field}"),
            expected,
        },
        other => other,
    }
}
