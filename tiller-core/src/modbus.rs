//! Modbus register mapping.
//!
//! The poller upstream publishes each completed read as one lossless binary
//! payload: slave id, function code, start address, register count, then the
//! registers themselves, all big-endian. Rules address a window inside such
//! a group; every rule whose window fits runs independently against the same
//! payload.

use crate::config::{validate_mappings, MapperConfig, ModbusMappingConfig};
use crate::error::MappingError;
use crate::expression::{EnvValue, Environment, ExpressionEngine};
use crate::mapper::Mapper;
use crate::message::{Mapped, RawMessage, Source, Update, Value};

/// One decoded register group.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterGroup {
    pub slave: u8,
    pub function_code: u16,
    pub address: u16,
    pub registers: Vec<u16>,
}

impl RegisterGroup {
    /// Parses the poller's wire payload. The declared register count must
    /// match the remaining bytes exactly.
    pub fn from_payload(payload: &[u8]) -> Result<RegisterGroup, MappingError> {
        if payload.len() < 7 {
            return Err(MappingError::Decode(format!(
                "Modbus payload of {} bytes is shorter than its header",
                payload.len()
            )));
        }
        let slave = payload[0];
        let function_code = u16::from_be_bytes([payload[1], payload[2]]);
        let address = u16::from_be_bytes([payload[3], payload[4]]);
        let count = u16::from_be_bytes([payload[5], payload[6]]) as usize;

        let body = &payload[7..];
        if body.len() != count * 2 {
            return Err(MappingError::Decode(format!(
                "Modbus payload declares {} registers but carries {} bytes",
                count,
                body.len()
            )));
        }
        let registers = body
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        Ok(RegisterGroup {
            slave,
            function_code,
            address,
            registers,
        })
    }

    /// The registers a rule's window selects, if the window lies inside
    /// this group.
    fn window(&self, rule: &ModbusMappingConfig) -> Option<&[u16]> {
        if rule.slave != self.slave || rule.function_code != self.function_code {
            return None;
        }
        let start = rule.address.checked_sub(self.address)? as usize;
        let end = start + rule.number_of_registers as usize;
        self.registers.get(start..end)
    }
}

/// Maps register groups through window-matched rules.
pub struct ModbusMapper {
    config: MapperConfig,
    rules: Vec<ModbusMappingConfig>,
    engine: ExpressionEngine,
}

impl ModbusMapper {
    pub fn new(
        config: MapperConfig,
        rules: Vec<ModbusMappingConfig>,
    ) -> Result<Self, MappingError> {
        validate_mappings(rules.iter().map(|r| &r.mapping))?;
        Ok(ModbusMapper {
            config,
            rules,
            engine: ExpressionEngine::new(),
        })
    }
}

impl Mapper for ModbusMapper {
    fn map(&mut self, raw: &RawMessage) -> Result<Option<Mapped>, MappingError> {
        let group = RegisterGroup::from_payload(&raw.payload)?;

        let mut update = Update::new()
            .with_source(
                Source::new()
                    .with_label(&raw.connector)
                    .with_type(raw.protocol)
                    .with_id(raw.id),
            )
            .with_timestamp(raw.timestamp);

        for rule in &self.rules {
            let window = match group.window(rule) {
                Some(window) => window,
                None => continue,
            };
            let mut env = Environment::new();
            if window.len() == 1 {
                env.insert("value".to_string(), EnvValue::Float(f64::from(window[0])));
            } else {
                env.insert(
                    "registers".to_string(),
                    EnvValue::List(window.iter().map(|r| EnvValue::Float(f64::from(*r))).collect()),
                );
            }
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
