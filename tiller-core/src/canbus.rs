//! CAN bus mapping driven by DBC signal definitions.
//!
//! The DBC catalog is parsed once at construction and shared read-only by
//! every decode call. Each frame is looked up by id; every signal of the
//! matched message runs through the bit-exact extractor and, when a rule is
//! configured for `(message name, signal name)`, through the expression
//! engine. A frame with no DBC entry is normal bus traffic and only worth a
//! diagnostic note.

use crate::config::{validate_mappings, CanBusMappingConfig, MapperConfig};
use crate::error::MappingError;
use crate::expression::{EnvValue, Environment, ExpressionEngine};
use crate::frame::CanFrame;
use crate::mapper::Mapper;
use crate::message::{Mapped, RawMessage, Source, Update, Value};
use std::collections::HashMap;

/// Extracts one signal value from an 8-byte frame payload.
///
/// The payload is treated as an opaque big-endian bit string, never as a
/// native machine integer, so the arithmetic is identical on any host. For
/// big-endian (Motorola) signals the configured start bit is first adjusted
/// by 7 to compensate for the reversed bit numbering convention of the DBC
/// format; the signal is then isolated by shifting the 64-bit window left by
/// the start bit and right by `64 - length`. Signed signals reinterpret the
/// isolated window as a two's-complement 64-bit value.
pub fn extract_signal(signal: &can_dbc::Signal, data: &[u8; 8]) -> Result<f64, MappingError> {
    let length = *signal.signal_size();
    let mut start = *signal.start_bit();
    if *signal.byte_order() == can_dbc::ByteOrder::BigEndian {
        start = start.checked_sub(7).ok_or_else(|| {
            MappingError::Configuration(format!(
                "big-endian signal {} has start bit {} below 7",
                signal.name(),
                signal.start_bit()
            ))
        })?;
    }
    if start > 63 || length == 0 || length > 64 {
        return Err(MappingError::Configuration(format!(
            "signal {} has an invalid bit layout ({}|{})",
            signal.name(),
            signal.start_bit(),
            signal.signal_size()
        )));
    }

    let window = u64::from_be_bytes(*data);
    let raw = (window << start) >> (64 - length);

    let value = if *signal.value_type() == can_dbc::ValueType::Signed {
        raw as i64 as f64
    } else {
        raw as f64
    };
    Ok(value * signal.factor() + signal.offset())
}

fn message_id(message: &can_dbc::Message) -> u32 {
    match message.message_id() {
        can_dbc::MessageId::Standard(id) => *id as u32,
        can_dbc::MessageId::Extended(id) => *id,
    }
}

/// Maps raw CAN frames using a DBC catalog plus user-configured rules keyed
/// by `(message name, signal name)`.
pub struct CanBusMapper {
    config: MapperConfig,
    dbc: HashMap<u32, can_dbc::Message>,
    mappings: HashMap<String, HashMap<String, CanBusMappingConfig>>,
    engine: ExpressionEngine,
}

impl CanBusMapper {
    /// Builds a mapper from DBC source text and a rule table. Both are
    /// validated here; any problem is a configuration error that should
    /// halt startup.
    pub fn new(
        config: MapperConfig,
        rules: Vec<CanBusMappingConfig>,
        dbc_source: &[u8],
    ) -> Result<Self, MappingError> {
        validate_mappings(rules.iter().map(|r| &r.mapping))?;

        let dbc = can_dbc::DBC::from_slice(dbc_source)
            .map_err(|e| MappingError::Configuration(format!("could not parse DBC: {:?}", e)))?;
        let mut messages = HashMap::new();
        for message in dbc.messages() {
            let id = message_id(message);
            if messages.insert(id, message.clone()).is_some() {
                log::warn!(
                    "duplicate DBC message id {:#x} ({}), keeping the last definition",
                    id,
                    message.message_name()
                );
            }
        }

        let mut mappings: HashMap<String, HashMap<String, CanBusMappingConfig>> = HashMap::new();
        for rule in rules {
            mappings
                .entry(rule.origin.clone())
                .or_default()
                .insert(rule.name.clone(), rule);
        }

        Ok(CanBusMapper {
            config,
            dbc: messages,
            mappings,
            engine: ExpressionEngine::new(),
        })
    }

    /// Convenience constructor reading the DBC catalog from a file.
    pub fn from_dbc_file(
        config: MapperConfig,
        rules: Vec<CanBusMappingConfig>,
        path: &std::path::Path,
    ) -> Result<Self, MappingError> {
        let source = std::fs::read(path).map_err(|e| {
            MappingError::Configuration(format!("could not read DBC file {:?}: {}", path, e))
        })?;
        Self::new(config, rules, &source)
    }
}

impl Mapper for CanBusMapper {
    fn map(&mut self, raw: &RawMessage) -> Result<Option<Mapped>, MappingError> {
        let frame = CanFrame::from_payload(&raw.payload)?;

        let mut update = Update::new()
            .with_source(
                Source::new()
                    .with_label(&raw.connector)
                    .with_type(raw.protocol)
                    .with_id(raw.id),
            )
            .with_timestamp(raw.timestamp);

        if let Some(message) = self.dbc.get(&frame.id) {
            let origin = message.message_name().to_string();
            let data = frame.padded_data();
            for signal in message.signals() {
                let value = match extract_signal(signal, &data) {
                    Ok(value) => value,
                    Err(e) => {
                        log::warn!(
                            "could not extract signal {} from frame {:#x}: {}",
                            signal.name(),
                            frame.id,
                            e
                        );
                        continue;
                    }
                };
                let rule = match self
                    .mappings
                    .get(&origin)
                    .and_then(|rules| rules.get(signal.name().as_str()))
                {
                    Some(rule) => rule,
                    None => continue,
                };

                let mut env = Environment::new();
                env.insert("value".to_string(), EnvValue::Float(value));
                match self.engine.run(&rule.mapping, &env) {
                    Ok(output) => {
                        update = update.add_value(
                            Value::new().with_path(&rule.mapping.path).with_value(output),
                        );
                    }
                    Err(e) => {
                        log::error!("could not map value for {}: {}", rule.mapping.path, e);
                    }
                }
            }
        } else {
            log::debug!("no DBC entry for frame id {:#x}", frame.id);
        }

        // An empty update is still a valid result; the frame was seen.
        Ok(Some(
            Mapped::new()
                .with_context(&self.config.context)
                .with_origin(&self.config.context)
                .add_update(update),
        ))
    }
}
