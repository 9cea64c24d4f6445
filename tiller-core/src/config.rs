//! Mapping rule tables.
//!
//! All configuration is loaded once at mapper construction and read-only
//! afterwards. Validation is eager: a malformed rule table is a human error
//! in static configuration and halts startup instead of surfacing one
//! message at a time.

use crate::error::MappingError;
use crate::expression::{environment_from_config, merge_environments, Environment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapper-level settings shared by every protocol variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Subject of every produced delta, e.g. `vessels.urn:mrn:imo:mmsi:...`.
    pub context: String,
}

/// The protocol-independent part of a mapping rule: the expression, where
/// its result goes, and the constants it may refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub expression: String,
    pub path: String,
    #[serde(default)]
    pub environment: BTreeMap<String, serde_json::Value>,
}

impl MappingConfig {
    pub fn validate(&self) -> Result<(), MappingError> {
        if self.path.is_empty() {
            return Err(MappingError::Configuration(format!(
                "mapping rule with expression {:?} has no path",
                self.expression
            )));
        }
        if self.expression.is_empty() {
            return Err(MappingError::Configuration(format!(
                "mapping rule for path {} has no expression",
                self.path
            )));
        }
        // Reject null constants and built-in shadowing now rather than on
        // the first message that hits this rule.
        let extras = environment_from_config(&self.environment)?;
        merge_environments(&Environment::new(), &extras)?;
        Ok(())
    }
}

/// One CAN bus rule, matched by `(origin, signal name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanBusMappingConfig {
    pub origin: String,
    pub name: String,
    #[serde(flatten)]
    pub mapping: MappingConfig,
}

/// One Modbus rule, matched by `(slave, function code, address)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModbusMappingConfig {
    pub slave: u8,
    pub function_code: u16,
    pub address: u16,
    #[serde(default = "default_register_count")]
    pub number_of_registers: u16,
    #[serde(flatten)]
    pub mapping: MappingConfig,
}

fn default_register_count() -> u16 {
    1
}

/// One CSV rule, matched by line prefix; `field` selects the column bound
/// as `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvMappingConfig {
    pub begins_with: String,
    #[serde(default)]
    pub field: usize,
    #[serde(flatten)]
    pub mapping: MappingConfig,
}

/// A named member of an aggregate group. `path` may contain wildcards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMemberConfig {
    pub name: String,
    pub path: String,
}

/// A group of paths that, when all present in one message, produce one or
/// more derived values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateGroupConfig {
    /// Restrict this group to deltas of one mapping domain. Unset applies
    /// to every origin.
    #[serde(default)]
    pub origin: Option<String>,
    pub members: Vec<AggregateMemberConfig>,
    pub mappings: Vec<MappingConfig>,
}

impl AggregateGroupConfig {
    pub fn validate(&self) -> Result<(), MappingError> {
        if self.members.is_empty() {
            return Err(MappingError::Configuration(
                "aggregate group has no members".to_string(),
            ));
        }
        let mut names: Vec<&str> = self.members.iter().map(|m| m.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.members.len() {
            return Err(MappingError::Configuration(
                "aggregate group has duplicate member names".to_string(),
            ));
        }
        for mapping in &self.mappings {
            mapping.validate()?;
        }
        Ok(())
    }
}

/// Validates a whole rule table at load time.
pub fn validate_mappings<'a, I>(mappings: I) -> Result<(), MappingError>
where
    I: IntoIterator<Item = &'a MappingConfig>,
{
    for mapping in mappings {
        mapping.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modbus_rule_deserializes_camel_case() {
        let rule: ModbusMappingConfig = serde_json::from_str(
            r#"{
                "slave": 1,
                "functionCode": 3,
                "address": 40001,
                "numberOfRegisters": 2,
                "expression": "value * 0.1",
                "path": "tanks.fuel.0.currentLevel"
            }"#,
        )
        .unwrap();
        assert_eq!(rule.function_code, 3);
        assert_eq!(rule.number_of_registers, 2);
        assert_eq!(rule.mapping.path, "tanks.fuel.0.currentLevel");
    }

    #[test]
    fn test_csv_rule_defaults() {
        let rule: CsvMappingConfig = serde_json::from_str(
            r#"{"beginsWith": "level", "expression": "value", "path": "a.b"}"#,
        )
        .unwrap();
        assert_eq!(rule.field, 0);
    }

    #[test]
    fn test_validate_rejects_missing_path() {
        let rule = MappingConfig {
            expression: "value".to_string(),
            path: String::new(),
            environment: BTreeMap::new(),
        };
        assert!(matches!(
            rule.validate(),
            Err(MappingError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_builtin_shadowing_eagerly() {
        let mut environment = BTreeMap::new();
        environment.insert("currentToRatio".to_string(), serde_json::json!(1));
        let rule = MappingConfig {
            expression: "value".to_string(),
            path: "a.b".to_string(),
            environment,
        };
        assert!(matches!(
            rule.validate(),
            Err(MappingError::Configuration(_))
        ));
    }

    #[test]
    fn test_aggregate_group_validation() {
        let group: AggregateGroupConfig = serde_json::from_str(
            r#"{
                "members": [
                    {"name": "port", "path": "propulsion.port.drive.power"},
                    {"name": "starboard", "path": "propulsion.starboard.drive.power"}
                ],
                "mappings": [
                    {"expression": "port + starboard", "path": "propulsion.combined.drive.power"}
                ]
            }"#,
        )
        .unwrap();
        assert!(group.validate().is_ok());
        assert!(group.origin.is_none());

        let empty = AggregateGroupConfig {
            origin: None,
            members: vec![],
            mappings: vec![],
        };
        assert!(matches!(
            empty.validate(),
            Err(MappingError::Configuration(_))
        ));
    }
}
