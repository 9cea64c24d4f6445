//! Cross-path aggregation.
//!
//! A post-stage over already-mapped messages: when every member of a
//! configured group matches a value path in one update, the group's
//! expressions run with the matched values bound by member name and the
//! results are appended as one extra update under a synthetic source. The
//! stage is stateless: a group that is only partially present in a message
//! derives nothing, and nothing is buffered to be completed by a later
//! message.

use crate::config::AggregateGroupConfig;
use crate::error::MappingError;
use crate::expression::{EnvValue, Environment, ExpressionEngine};
use crate::message::{Mapped, ProtocolType, Source, Update, Value, ValueData};
use uuid::Uuid;
use wildmatch::WildMatch;

/// Source label attached to derived values.
pub const AGGREGATE_SOURCE_LABEL: &str = "signalk";

struct Group {
    origin: Option<String>,
    members: Vec<(String, WildMatch)>,
    mappings: Vec<crate::config::MappingConfig>,
}

/// Appends derived values to mapped messages.
pub struct AggregateMapper {
    groups: Vec<Group>,
    engine: ExpressionEngine,
}

impl AggregateMapper {
    pub fn new(groups: Vec<AggregateGroupConfig>) -> Result<Self, MappingError> {
        let mut compiled = Vec::with_capacity(groups.len());
        for group in groups {
            group.validate()?;
            compiled.push(Group {
                origin: group.origin,
                members: group
                    .members
                    .into_iter()
                    .map(|m| (m.name, WildMatch::new(&m.path)))
                    .collect(),
                mappings: group.mappings,
            });
        }
        Ok(AggregateMapper {
            groups: compiled,
            engine: ExpressionEngine::new(),
        })
    }

    /// Runs every group against the message. When nothing matches the
    /// message passes through untouched.
    pub fn map(&mut self, mapped: &Mapped) -> Result<Mapped, MappingError> {
        let mut result = mapped.clone();

        let mut derived: Vec<Value> = Vec::new();
        let mut timestamp = None;
        for update in &mapped.updates {
            for group in &self.groups {
                if let Some(origin) = &group.origin {
                    if origin != &mapped.origin {
                        continue;
                    }
                }
                let env = match match_group(group, &update.values) {
                    Some(env) => env,
                    None => continue,
                };
                for mapping in &group.mappings {
                    match self.engine.run(mapping, &env) {
                        Ok(output) => {
                            derived.push(
                                Value::new().with_path(&mapping.path).with_value(output),
                            );
                            timestamp.get_or_insert(update.timestamp);
                        }
                        Err(e) => {
                            log::error!("could not derive value for {}: {}", mapping.path, e);
                        }
                    }
                }
            }
        }

        if derived.is_empty() {
            return Ok(result);
        }

        let mut update = Update::new().with_source(
            Source::new()
                .with_label(AGGREGATE_SOURCE_LABEL)
                .with_type(ProtocolType::Signalk)
                .with_id(Uuid::nil()),
        );
        if let Some(timestamp) = timestamp {
            update = update.with_timestamp(timestamp);
        }
        for value in derived {
            update = update.add_value(value);
        }
        result.updates.push(update);
        Ok(result)
    }
}

// All members must match; each binds the first value whose path fits its
// pattern.
fn match_group(group: &Group, values: &[Value]) -> Option<Environment> {
    let mut env = Environment::new();
    for (name, pattern) in &group.members {
        let matched = values.iter().find(|v| pattern.matches(&v.path))?;
        env.insert(name.clone(), to_env_value(&matched.value)?);
    }
    Some(env)
}

fn to_env_value(value: &ValueData) -> Option<EnvValue> {
    match value {
        ValueData::Number(n) => Some(EnvValue::Float(*n)),
        ValueData::Integer(i) => Some(EnvValue::Float(*i as f64)),
        ValueData::Bool(b) => Some(EnvValue::Bool(*b)),
        ValueData::Text(t) => Some(EnvValue::Text(t.clone())),
        _ => None,
    }
}
