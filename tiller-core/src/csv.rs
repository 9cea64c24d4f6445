//! CSV line mapping.
//!
//! The loosest protocol: a line of comma-separated fields from some ad-hoc
//! sensor. Rules match on a line prefix and pick one field by index; the
//! field binds as a number when it parses as one and as text otherwise, so
//! expressions can handle both.

use crate::config::{validate_mappings, CsvMappingConfig, MapperConfig};
use crate::error::MappingError;
use crate::expression::{EnvValue, Environment, ExpressionEngine};
use crate::mapper::Mapper;
use crate::message::{Mapped, RawMessage, Source, Update, Value};

/// Maps CSV lines through prefix-matched rules.
pub struct CsvMapper {
    config: MapperConfig,
    rules: Vec<CsvMappingConfig>,
    engine: ExpressionEngine,
}

impl CsvMapper {
    pub fn new(config: MapperConfig, rules: Vec<CsvMappingConfig>) -> Result<Self, MappingError> {
        validate_mappings(rules.iter().map(|r| &r.mapping))?;
        Ok(CsvMapper {
            config,
            rules,
            engine: ExpressionEngine::new(),
        })
    }
}

impl Mapper for CsvMapper {
    fn map(&mut self, raw: &RawMessage) -> Result<Option<Mapped>, MappingError> {
        let line = std::str::from_utf8(&raw.payload)
            .map_err(|_| MappingError::Decode("CSV line is not valid UTF-8".to_string()))?
            .trim();

        let mut update = Update::new()
            .with_source(
                Source::new()
                    .with_label(&raw.connector)
                    .with_type(raw.protocol)
                    .with_id(raw.id),
            )
            .with_timestamp(raw.timestamp);

        for rule in &self.rules {
            if !line.starts_with(&rule.begins_with) {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            let field = match fields.get(rule.field) {
                Some(field) => field.trim(),
                None => {
                    log::warn!(
                        "line matching {:?} has no field {}",
                        rule.begins_with,
                        rule.field
                    );
                    continue;
                }
            };
            let bound = match field.parse::<f64>() {
                Ok(number) => EnvValue::Float(number),
                Err(_) => EnvValue::Text(field.to_string()),
            };
            let mut env = Environment::new();
            env.insert("value".to_string(), bound);
            match self.engine.run(&rule.mapping, &env) {
                Ok(output) => {
                    update = update
                        .add_value(Value::new().with_path(&rule.mapping.path).with_value(output));
                }
                Err(e) => {
                    log::error!("could not map value for {}: {}", rule.mapping.path, e);
                }
            }
        }

        Ok(Some(
            Mapped::new()
                .with_context(&self.config.context)
                .with_origin(&self.config.context)
                .add_update(update),
        ))
    }
}
