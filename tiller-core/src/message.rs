//! Canonical message model.
//!
//! Two message shapes cross the bus boundary: [`RawMessage`], one physical
//! reading as acquired by a transport connector, and [`Mapped`], the
//! path-keyed delta this crate produces from it. Both are plain serde data;
//! the wire encoding is newline-delimited JSON and must round-trip exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Source protocol of a raw message, fixed at connector configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Nmea0183,
    Nmea2000,
    Canbus,
    Modbus,
    Csv,
    Json,
    /// Synthetic origin for values derived inside the mapping layer itself.
    Signalk,
}

impl std::fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolType::Nmea0183 => "nmea0183",
            ProtocolType::Nmea2000 => "nmea2000",
            ProtocolType::Canbus => "canbus",
            ProtocolType::Modbus => "modbus",
            ProtocolType::Csv => "csv",
            ProtocolType::Json => "json",
            ProtocolType::Signalk => "signalk",
        };
        write!(f, "{}", s)
    }
}

/// One physical reading from one connector. Immutable once produced; `id`
/// is used downstream for deduplication and lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub connector: String,
    #[serde(rename = "type")]
    pub protocol: ProtocolType,
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
    pub id: Uuid,
}

impl RawMessage {
    pub fn new(connector: &str, protocol: ProtocolType, payload: Vec<u8>) -> Self {
        RawMessage {
            connector: connector.to_string(),
            protocol,
            timestamp: Utc::now(),
            payload,
            id: Uuid::new_v4(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

/// A geographic position; the one structured value the secondary decode pass
/// of the expression engine produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

/// A typed scalar or structured payload stored under a path.
///
/// Untagged on the wire so deltas read as plain JSON. No open/reflective
/// structure: the interpreter and the mappers only ever exchange these kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueData {
    Number(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
    Position(Position),
    List(Vec<ValueData>),
    Object(BTreeMap<String, ValueData>),
}

impl From<f64> for ValueData {
    fn from(v: f64) -> Self {
        ValueData::Number(v)
    }
}

impl From<&str> for ValueData {
    fn from(v: &str) -> Self {
        ValueData::Text(v.to_string())
    }
}

/// One path/value pair inside an update. Path uniqueness is not enforced;
/// consumers merge last-write-wins per path and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub path: String,
    pub value: ValueData,
}

impl Value {
    pub fn new() -> Self {
        Value {
            path: String::new(),
            value: ValueData::Number(0.0),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_value(mut self, value: impl Into<ValueData>) -> Self {
        self.value = value.into();
        self
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::new()
    }
}

/// Where an update came from. `label` ties back to the originating
/// connector, `id` propagates the raw message id for traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ProtocolType,
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<Uuid>,
}

impl Source {
    pub fn new() -> Self {
        Source {
            label: String::new(),
            kind: ProtocolType::Json,
            id: Uuid::nil(),
            transfer_id: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_type(mut self, kind: ProtocolType) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::new()
    }
}

/// A set of values observed together from one source at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    pub values: Vec<Value>,
}

impl Update {
    pub fn new() -> Self {
        Update {
            source: Source::new(),
            timestamp: Utc::now(),
            values: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn add_value(mut self, value: Value) -> Self {
        self.values.push(value);
        self
    }
}

impl Default for Update {
    fn default() -> Self {
        Self::new()
    }
}

/// The canonical delta: one or more updates for one context.
///
/// `origin` identifies the mapping domain that produced the delta and scopes
/// which aggregate rule sets apply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapped {
    pub context: String,
    pub origin: String,
    pub updates: Vec<Update>,
}

impl Mapped {
    pub fn new() -> Self {
        Mapped {
            context: String::new(),
            origin: String::new(),
            updates: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = context.to_string();
        self
    }

    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    pub fn add_update(mut self, update: Update) -> Self {
        self.updates.push(update);
        self
    }
}

impl Default for Mapped {
    fn default() -> Self {
        Self::new()
    }
}
