//! Server settings.
//!
//! One JSON file configures one mapper instance: the protocol, the rule
//! tables for that protocol, the aggregate groups, and the two bus
//! addresses. Everything is validated while building the mappers, so a bad
//! settings file fails startup instead of the first message.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tiller_core::config::{
    AggregateGroupConfig, CanBusMappingConfig, CsvMappingConfig, MapperConfig,
    ModbusMappingConfig,
};
use tiller_core::message::ProtocolType;
use tiller_core::{
    AggregateMapper, CanBusMapper, CsvMapper, Mapper, ModbusMapper, Nmea0183Mapper,
    Nmea2000Mapper,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub protocol: ProtocolType,
    pub context: String,
    /// Address of the raw-message publisher to subscribe to.
    pub subscribe_address: String,
    /// Address to serve mapped deltas on.
    pub publish_address: String,
    /// DBC catalog, required for the canbus protocol.
    #[serde(default)]
    pub dbc_file: Option<PathBuf>,
    #[serde(default)]
    pub canbus_mappings: Vec<CanBusMappingConfig>,
    #[serde(default)]
    pub modbus_mappings: Vec<ModbusMappingConfig>,
    #[serde(default)]
    pub csv_mappings: Vec<CsvMappingConfig>,
    #[serde(default)]
    pub aggregate_groups: Vec<AggregateGroupConfig>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read settings file {:?}", path))?;
        let settings: Settings = serde_json::from_str(&text)
            .with_context(|| format!("could not parse settings file {:?}", path))?;
        Ok(settings)
    }

    fn mapper_config(&self) -> MapperConfig {
        MapperConfig {
            context: self.context.clone(),
        }
    }

    /// Builds the protocol mapper this instance runs.
    pub fn build_mapper(&self) -> Result<Box<dyn Mapper + Send>> {
        let config = self.mapper_config();
        let mapper: Box<dyn Mapper + Send> = match self.protocol {
            ProtocolType::Canbus => {
                let dbc_file = self
                    .dbc_file
                    .as_ref()
                    .context("the canbus protocol requires a dbcFile")?;
                Box::new(CanBusMapper::from_dbc_file(
                    config,
                    self.canbus_mappings.clone(),
                    dbc_file,
                )?)
            }
            ProtocolType::Nmea2000 => Box::new(Nmea2000Mapper::new(config)?),
            ProtocolType::Nmea0183 => Box::new(Nmea0183Mapper::new(config)),
            ProtocolType::Modbus => {
                Box::new(ModbusMapper::new(config, self.modbus_mappings.clone())?)
            }
            ProtocolType::Csv => Box::new(CsvMapper::new(config, self.csv_mappings.clone())?),
            other => bail!("protocol {} has no mapper", other),
        };
        Ok(mapper)
    }

    /// Builds the aggregate stage, or `None` when no groups are configured.
    pub fn build_aggregate(&self) -> Result<Option<AggregateMapper>> {
        if self.aggregate_groups.is_empty() {
            return Ok(None);
        }
        Ok(Some(AggregateMapper::new(self.aggregate_groups.clone())?))
    }
}
