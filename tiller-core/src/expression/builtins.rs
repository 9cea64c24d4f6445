//! Built-in conversion functions available to every mapping expression.
//!
//! These are pure functions, exposed both as plain Rust (tested directly)
//! and as CEL functions registered by the engine. They cover the common
//! analog-sensor conversions: 4-20mA current loops, pressure-based tank
//! level sensing, and tank sounding tables.

use super::EnvValue;
use crate::error::MappingError;

/// Names reserved by the built-in function set. Rule environments may not
/// shadow these.
pub const BUILTIN_NAMES: &[&str] = &["currentToRatio", "pressureToHeight", "heightToVolume"];

/// Acceleration due to gravity, m/s2.
const G: f64 = 9.8;

/// Maps a 4-20mA input signal to a ratio: 4000uA => 0.0, 20000uA => 1.0.
///
/// `current` is in uA (1000000uA is 1A).
pub fn current_to_ratio(current: f64) -> f64 {
    (current - 4000.0) / 16000.0
}

/// Converts a pressure and density to a height.
///
/// `pressure` is in Pa (1 bar is 100000 Pa), `density` is in kg/m3 (typical
/// value for diesel is 840). Result is in m.
pub fn pressure_to_height(pressure: f64, density: f64) -> f64 {
    pressure / (density * G)
}

/// Returns the volume corresponding to a measured height, used when a
/// pressure sensor is placed in a tank.
///
/// `sensor_offset` is in m; positive means the sensor sits above the bottom
/// of the tank. `heights` (m) and `volumes` (m3) form a strictly increasing
/// sounding table of equal length. Queries below the table return the first
/// tabulated volume, queries above it the last; in between the volume is
/// linearly interpolated.
pub fn height_to_volume(
    height: f64,
    sensor_offset: f64,
    heights: &[EnvValue],
    volumes: &[EnvValue],
) -> Result<f64, MappingError> {
    if heights.len() != volumes.len() {
        return Err(MappingError::Configuration(format!(
            "the list of heights should have the same length as the list of volumes, the lengths are {} and {}",
            heights.len(),
            volumes.len()
        )));
    }
    if heights.is_empty() {
        return Err(MappingError::Configuration(
            "the sounding table is empty".to_string(),
        ));
    }

    let heights = list_to_floats(heights)?;
    let volumes = list_to_floats(volumes)?;

    for i in 1..heights.len() {
        if heights[i] <= heights[i - 1] {
            return Err(MappingError::Configuration(format!(
                "the list of heights should be in increasing order, height at position {} is equal or lower than the previous one",
                i
            )));
        }
        if volumes[i] <= volumes[i - 1] {
            return Err(MappingError::Configuration(format!(
                "the list of volumes should be in increasing order, volume at position {} is equal or lower than the previous one",
                i
            )));
        }
    }

    let query = height + sensor_offset;
    if query < heights[0] {
        return Ok(volumes[0]);
    }
    for i in 1..heights.len() {
        if query < heights[i] {
            let ratio = (query - heights[i - 1]) / (heights[i] - heights[i - 1]);
            return Ok(ratio * (volumes[i] - volumes[i - 1]) + volumes[i - 1]);
        }
    }
    Ok(volumes[volumes.len() - 1])
}

/// Normalizes a list of mixed numeric values to f64. A non-numeric element
/// fails with a type error naming its position.
pub fn list_to_floats(input: &[EnvValue]) -> Result<Vec<f64>, MappingError> {
    input
        .iter()
        .enumerate()
        .map(|(position, v)| match v {
            EnvValue::Float(f) => Ok(*f),
            _ => Err(MappingError::Type { position }),
        })
        .collect()
}
