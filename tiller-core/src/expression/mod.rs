//! Embedded expression engine.
//!
//! Mapping rules carry a textual CEL expression that turns a decoded field
//! into the value stored under the rule's target path. The engine compiles
//! each rule's expression once, caches the program by rule identity, and
//! executes it against a per-call environment: the built-in conversion
//! functions (see [`builtins`]) plus the rule's own constants plus whatever
//! the mapper bound for this message (usually `value`).
//!
//! The program cache is append-only and never invalidated; rule tables are
//! static for the process lifetime. Concurrent callers compiling the same
//! rule serialize on the cache lock.

pub mod builtins;

pub use builtins::{current_to_ratio, height_to_volume, pressure_to_height, BUILTIN_NAMES};

use crate::config::MappingConfig;
use crate::error::MappingError;
use crate::message::{Position, ValueData};
use cel_interpreter::objects::{Key, Map};
use cel_interpreter::{Context, ExecutionError, Program, Value as CelValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A value bound in an expression environment.
///
/// Explicit sum type instead of an open structure so the built-ins can be
/// exhaustive over what they may receive. All numeric inputs normalize to
/// `Float`; CEL arithmetic is strict about mixing integer and float
/// operands, and sensor values are floats anyway.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvValue {
    Float(f64),
    Text(String),
    Bool(bool),
    List(Vec<EnvValue>),
    Map(BTreeMap<String, EnvValue>),
}

/// The variables visible to one expression run.
pub type Environment = BTreeMap<String, EnvValue>;

/// Compiles and runs mapping expressions, caching compiled programs by rule
/// identity.
pub struct ExpressionEngine {
    programs: Mutex<HashMap<String, Arc<Program>>>,
    compilations: AtomicUsize,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        ExpressionEngine {
            programs: Mutex::new(HashMap::new()),
            compilations: AtomicUsize::new(0),
        }
    }

    /// Number of times the compiler actually ran. A cached rule never
    /// increments this again.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Evaluate `rule` against `base` (the mapper-supplied bindings). The
    /// rule's extra environment merges in; a key collision is a
    /// configuration error, not a per-message one.
    pub fn run(&self, rule: &MappingConfig, base: &Environment) -> Result<ValueData, MappingError> {
        let extras = environment_from_config(&rule.environment)?;
        let env = merge_environments(base, &extras)?;
        let program = self.program_for(rule)?;

        let mut context = Context::default();
        register_builtins(&mut context);
        for (name, value) in &env {
            context.add_variable_from_value(name.clone(), env_to_cel(value));
        }

        let output = program
            .execute(&context)
            .map_err(|e| MappingError::ExpressionRuntime {
                expression: rule.expression.clone(),
                message: e.to_string(),
            })?;

        cel_to_value(output, &rule.expression)
    }

    fn program_for(&self, rule: &MappingConfig) -> Result<Arc<Program>, MappingError> {
        let key = format!("{}|{}", rule.path, rule.expression);
        let mut programs = self.programs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(program) = programs.get(&key) {
            return Ok(program.clone());
        }
        let program = Program::compile(&rule.expression).map_err(|e| {
            MappingError::ExpressionCompile {
                expression: rule.expression.clone(),
                message: e.to_string(),
            }
        })?;
        self.compilations.fetch_add(1, Ordering::Relaxed);
        let program = Arc::new(program);
        programs.insert(key, program.clone());
        Ok(program)
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Disjoint union of two environments. Fails when `right` shadows a key of
/// `left` or the name of a built-in function.
pub fn merge_environments(
    left: &Environment,
    right: &Environment,
) -> Result<Environment, MappingError> {
    let mut result = left.clone();
    for (key, value) in right {
        if BUILTIN_NAMES.contains(&key.as_str()) {
            return Err(MappingError::Configuration(format!(
                "environment key {} shadows a built-in function",
                key
            )));
        }
        if result.contains_key(key) {
            return Err(MappingError::Configuration(format!(
                "could not merge environments, the key {} is already present",
                key
            )));
        }
        result.insert(key.clone(), value.clone());
    }
    Ok(result)
}

/// Converts a rule's configured constants (plain JSON) into environment
/// values. Numbers normalize to floats; null has no meaning in a rule
/// environment and is rejected at load.
pub fn environment_from_config(
    config: &BTreeMap<String, serde_json::Value>,
) -> Result<Environment, MappingError> {
    let mut result = Environment::new();
    for (key, value) in config {
        result.insert(key.clone(), json_to_env(key, value)?);
    }
    Ok(result)
}

fn json_to_env(key: &str, value: &serde_json::Value) -> Result<EnvValue, MappingError> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(EnvValue::Float).ok_or_else(|| {
            MappingError::Configuration(format!("environment key {} is not a finite number", key))
        }),
        serde_json::Value::String(s) => Ok(EnvValue::Text(s.clone())),
        serde_json::Value::Bool(b) => Ok(EnvValue::Bool(*b)),
        serde_json::Value::Array(items) => Ok(EnvValue::List(
            items
                .iter()
                .map(|v| json_to_env(key, v))
                .collect::<Result<_, _>>()?,
        )),
        serde_json::Value::Object(map) => {
            let mut result = BTreeMap::new();
            for (k, v) in map {
                result.insert(k.clone(), json_to_env(k, v)?);
            }
            Ok(EnvValue::Map(result))
        }
        serde_json::Value::Null => Err(MappingError::Configuration(format!(
            "environment key {} is null",
            key
        ))),
    }
}

fn env_to_cel(value: &EnvValue) -> CelValue {
    match value {
        EnvValue::Float(f) => CelValue::Float(*f),
        EnvValue::Text(s) => CelValue::String(Arc::new(s.clone())),
        EnvValue::Bool(b) => CelValue::Bool(*b),
        EnvValue::List(items) => CelValue::List(Arc::new(items.iter().map(env_to_cel).collect())),
        EnvValue::Map(map) => {
            let mut result: HashMap<Key, CelValue> = HashMap::new();
            for (k, v) in map {
                result.insert(Key::String(Arc::new(k.clone())), env_to_cel(v));
            }
            CelValue::Map(Map {
                map: Arc::new(result),
            })
        }
    }
}

/// Converts an evaluated CEL value into delta value data. A map result gets
/// a secondary decode pass into a structured position; failure of that pass
/// is non-fatal and keeps the raw object.
fn cel_to_value(value: CelValue, expression: &str) -> Result<ValueData, MappingError> {
    match value {
        CelValue::Float(f) => Ok(ValueData::Number(f)),
        CelValue::Int(i) => Ok(ValueData::Integer(i)),
        CelValue::UInt(u) => {
            if u <= i64::MAX as u64 {
                Ok(ValueData::Integer(u as i64))
            } else {
                Ok(ValueData::Number(u as f64))
            }
        }
        CelValue::Bool(b) => Ok(ValueData::Bool(b)),
        CelValue::String(s) => Ok(ValueData::Text(s.to_string())),
        CelValue::Bytes(b) => Ok(ValueData::List(
            b.iter().map(|byte| ValueData::Integer(*byte as i64)).collect(),
        )),
        CelValue::List(items) => Ok(ValueData::List(
            items
                .iter()
                .map(|item| cel_to_value(item.clone(), expression))
                .collect::<Result<_, _>>()?,
        )),
        CelValue::Map(map) => {
            let mut object = BTreeMap::new();
            for (key, item) in map.map.iter() {
                let key = match key {
                    Key::String(s) => s.to_string(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                object.insert(key, cel_to_value(item.clone(), expression)?);
            }
            Ok(decode_structured(object))
        }
        CelValue::Null => Err(MappingError::ExpressionRuntime {
            expression: expression.to_string(),
            message: "expression produced no value".to_string(),
        }),
        other => Err(MappingError::ExpressionRuntime {
            expression: expression.to_string(),
            message: format!("expression produced an unsupported value: {:?}", other),
        }),
    }
}

/// Secondary decode pass: a key-value result that looks like a position
/// becomes one. Anything else stays a plain object.
fn decode_structured(object: BTreeMap<String, ValueData>) -> ValueData {
    let known = object
        .keys()
        .all(|k| matches!(k.as_str(), "longitude" | "latitude" | "altitude"));
    if known {
        if let (Some(&ValueData::Number(longitude)), Some(&ValueData::Number(latitude))) =
            (object.get("longitude"), object.get("latitude"))
        {
            let altitude = match object.get("altitude") {
                Some(&ValueData::Number(a)) => Some(a),
                Some(_) => return ValueData::Object(object),
                None => None,
            };
            return ValueData::Position(Position {
                longitude,
                latitude,
                altitude,
            });
        }
    }
    ValueData::Object(object)
}

fn numeric_arg(function: &str, value: &CelValue) -> Result<f64, ExecutionError> {
    match value {
        CelValue::Float(f) => Ok(*f),
        CelValue::Int(i) => Ok(*i as f64),
        CelValue::UInt(u) => Ok(*u as f64),
        other => Err(ExecutionError::FunctionError {
            function: function.to_string(),
            message: format!("expected a numeric argument, got {:?}", other),
        }),
    }
}

fn list_arg(function: &str, value: &CelValue) -> Result<Vec<EnvValue>, ExecutionError> {
    match value {
        CelValue::List(items) => Ok(items.iter().map(cel_to_env).collect()),
        other => Err(ExecutionError::FunctionError {
            function: function.to_string(),
            message: format!("expected a list argument, got {:?}", other),
        }),
    }
}

fn cel_to_env(value: &CelValue) -> EnvValue {
    match value {
        CelValue::Float(f) => EnvValue::Float(*f),
        CelValue::Int(i) => EnvValue::Float(*i as f64),
        CelValue::UInt(u) => EnvValue::Float(*u as f64),
        CelValue::Bool(b) => EnvValue::Bool(*b),
        CelValue::String(s) => EnvValue::Text(s.to_string()),
        CelValue::List(items) => EnvValue::List(items.iter().map(cel_to_env).collect()),
        other => EnvValue::Text(format!("{:?}", other)),
    }
}

fn register_builtins(context: &mut Context) {
    context.add_function(
        "currentToRatio",
        |current: CelValue| -> Result<CelValue, ExecutionError> {
            let current = numeric_arg("currentToRatio", &current)?;
            Ok(CelValue::Float(builtins::current_to_ratio(current)))
        },
    );
    context.add_function(
        "pressureToHeight",
        |pressure: CelValue, density: CelValue| -> Result<CelValue, ExecutionError> {
            let pressure = numeric_arg("pressureToHeight", &pressure)?;
            let density = numeric_arg("pressureToHeight", &density)?;
            Ok(CelValue::Float(builtins::pressure_to_height(
                pressure, density,
            )))
        },
    );
    context.add_function(
        "heightToVolume",
        |height: CelValue,
         sensor_offset: CelValue,
         heights: CelValue,
         volumes: CelValue|
         -> Result<CelValue, ExecutionError> {
            let height = numeric_arg("heightToVolume", &height)?;
            let sensor_offset = numeric_arg("heightToVolume", &sensor_offset)?;
            let heights = list_arg("heightToVolume", &heights)?;
            let volumes = list_arg("heightToVolume", &volumes)?;
            builtins::height_to_volume(height, sensor_offset, &heights, &volumes)
                .map(CelValue::Float)
                .map_err(|e| ExecutionError::FunctionError {
                    function: "heightToVolume".to_string(),
                    message: e.to_string(),
                })
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(expression: &str) -> MappingConfig {
        MappingConfig {
            expression: expression.to_string(),
            path: "test.path".to_string(),
            environment: BTreeMap::new(),
        }
    }

    fn value_env(value: f64) -> Environment {
        let mut env = Environment::new();
        env.insert("value".to_string(), EnvValue::Float(value));
        env
    }

    #[test]
    fn test_run_simple_expression() {
        let engine = ExpressionEngine::new();
        let result = engine.run(&rule("value * 2.0"), &value_env(21.0)).unwrap();
        assert_eq!(result, ValueData::Number(42.0));
    }

    #[test]
    fn test_compilation_is_cached() {
        let engine = ExpressionEngine::new();
        let r = rule("value + 1.0");
        let first = engine.run(&r, &value_env(1.0)).unwrap();
        let second = engine.run(&r, &value_env(2.0)).unwrap();
        assert_eq!(first, ValueData::Number(2.0));
        assert_eq!(second, ValueData::Number(3.0));
        assert_eq!(engine.compilations(), 1);

        // a different rule compiles separately
        engine.run(&rule("value + 2.0"), &value_env(1.0)).unwrap();
        assert_eq!(engine.compilations(), 2);
    }

    #[test]
    fn test_compile_error_is_reported_per_rule() {
        let engine = ExpressionEngine::new();
        let result = engine.run(&rule("value +"), &value_env(1.0));
        assert!(matches!(
            result,
            Err(MappingError::ExpressionCompile { .. })
        ));
    }

    #[test]
    fn test_runtime_error_for_missing_variable() {
        let engine = ExpressionEngine::new();
        let result = engine.run(&rule("missing + 1.0"), &value_env(1.0));
        assert!(matches!(
            result,
            Err(MappingError::ExpressionRuntime { .. })
        ));
    }

    #[test]
    fn test_builtins_available_in_expressions() {
        let engine = ExpressionEngine::new();
        let result = engine
            .run(&rule("currentToRatio(value)"), &value_env(12000.0))
            .unwrap();
        assert_eq!(result, ValueData::Number(0.5));

        let result = engine
            .run(
                &rule("heightToVolume(value, 0.0, [0.0, 1.0, 2.0], [0.0, 10.0, 40.0])"),
                &value_env(1.5),
            )
            .unwrap();
        assert_eq!(result, ValueData::Number(25.0));
    }

    #[test]
    fn test_rule_environment_constants() {
        let engine = ExpressionEngine::new();
        let mut r = rule("pressureToHeight(value, density)");
        r.environment
            .insert("density".to_string(), serde_json::json!(840));
        let result = engine.run(&r, &value_env(100000.0)).unwrap();
        match result {
            ValueData::Number(h) => assert!((h - 100000.0 / (840.0 * 9.8)).abs() < 1e-12),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_merge_environments_disjoint_is_union() {
        let mut left = Environment::new();
        left.insert("a".to_string(), EnvValue::Float(1.0));
        let mut right = Environment::new();
        right.insert("b".to_string(), EnvValue::Float(2.0));
        let merged = merge_environments(&left, &right).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["a"], EnvValue::Float(1.0));
        assert_eq!(merged["b"], EnvValue::Float(2.0));
    }

    #[test]
    fn test_merge_environments_rejects_duplicate_keys() {
        let mut left = Environment::new();
        left.insert("value".to_string(), EnvValue::Float(1.0));
        let mut right = Environment::new();
        right.insert("value".to_string(), EnvValue::Float(2.0));
        assert!(matches!(
            merge_environments(&left, &right),
            Err(MappingError::Configuration(_))
        ));
    }

    #[test]
    fn test_merge_environments_rejects_builtin_shadowing() {
        let left = Environment::new();
        let mut right = Environment::new();
        right.insert("heightToVolume".to_string(), EnvValue::Float(2.0));
        assert!(matches!(
            merge_environments(&left, &right),
            Err(MappingError::Configuration(_))
        ));
    }

    #[test]
    fn test_map_output_decodes_to_position() {
        let engine = ExpressionEngine::new();
        let result = engine
            .run(
                &rule("{'longitude': value, 'latitude': 52.1}"),
                &value_env(4.3),
            )
            .unwrap();
        assert_eq!(
            result,
            ValueData::Position(Position {
                longitude: 4.3,
                latitude: 52.1,
                altitude: None,
            })
        );
    }

    #[test]
    fn test_map_output_keeps_raw_object_when_decode_fails() {
        let engine = ExpressionEngine::new();
        let result = engine
            .run(&rule("{'state': 'running', 'rpm': value}"), &value_env(1500.0))
            .unwrap();
        match result {
            ValueData::Object(map) => {
                assert_eq!(map["state"], ValueData::Text("running".to_string()));
                assert_eq!(map["rpm"], ValueData::Number(1500.0));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
