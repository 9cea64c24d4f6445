//! The PGN catalog: which PGNs exist, whether they are fast packets, and how
//! to decode their assembled payloads into canonical values.
//!
//! Exactly one PGN (130824) carries both a single-frame and a fast-packet
//! definition, told apart by the manufacturer code in the first two payload
//! bytes. That property is load-bearing for the mapper's dispatch, so the
//! catalog asserts it once at construction instead of trusting the table.

use crate::error::MappingError;
use crate::message::{Position, Value, ValueData};
use std::collections::{BTreeMap, HashMap};

/// Decodes an assembled PGN payload into path/value pairs. An empty vec is a
/// recognized but unsupported payload, not an error.
pub type Decoder = fn(&[u8]) -> Result<Vec<Value>, MappingError>;

/// One catalog entry. `manufacturer` is set only for proprietary variants
/// that are selected by the manufacturer code in the payload.
#[derive(Clone)]
pub struct PgnInfo {
    pub pgn: u32,
    pub fast: bool,
    pub manufacturer: Option<u16>,
    pub description: &'static str,
    pub decode: Decoder,
}

/// Registry of PGN definitions, keyed by PGN, in priority order.
pub struct PgnCatalog {
    entries: HashMap<u32, Vec<PgnInfo>>,
}

impl PgnCatalog {
    /// Builds a catalog, rejecting tables that break the dual-variant
    /// invariant the mapper relies on.
    pub fn new(infos: Vec<PgnInfo>) -> Result<PgnCatalog, MappingError> {
        let mut entries: HashMap<u32, Vec<PgnInfo>> = HashMap::new();
        for info in infos {
            entries.entry(info.pgn).or_default().push(info);
        }

        for (pgn, variants) in &entries {
            if variants.len() == 1 {
                continue;
            }
            if *pgn != 130824 {
                return Err(MappingError::CatalogInvariant(format!(
                    "PGN {} has {} variants, only 130824 may have more than one",
                    pgn,
                    variants.len()
                )));
            }
            let fast = variants.iter().filter(|v| v.fast).count();
            let single = variants.len() - fast;
            if fast != 1 || single != 1 {
                return Err(MappingError::CatalogInvariant(format!(
                    "PGN 130824 must have exactly one fast and one single-frame variant, \
                     found {} fast and {} single",
                    fast, single
                )));
            }
            let selectable = variants
                .iter()
                .all(|v| v.fast || v.manufacturer.is_some());
            if !selectable {
                return Err(MappingError::CatalogInvariant(
                    "the single-frame variant of PGN 130824 has no manufacturer code"
                        .to_string(),
                ));
            }
        }

        Ok(PgnCatalog { entries })
    }

    /// The built-in catalog covering the PGNs this mapper understands.
    pub fn standard() -> Result<PgnCatalog, MappingError> {
        PgnCatalog::new(vec![
            PgnInfo {
                pgn: 126992,
                fast: false,
                manufacturer: None,
                description: "system time",
                decode: decode_system_time,
            },
            PgnInfo {
                pgn: 127250,
                fast: false,
                manufacturer: None,
                description: "vessel heading",
                decode: decode_vessel_heading,
            },
            PgnInfo {
                pgn: 127257,
                fast: false,
                manufacturer: None,
                description: "attitude",
                decode: decode_attitude,
            },
            PgnInfo {
                pgn: 129025,
                fast: false,
                manufacturer: None,
                description: "position, rapid update",
                decode: decode_position_rapid,
            },
            PgnInfo {
                pgn: 130306,
                fast: false,
                manufacturer: None,
                description: "wind data",
                decode: decode_wind_data,
            },
            PgnInfo {
                pgn: 129029,
                fast: true,
                manufacturer: None,
                description: "GNSS position data",
                decode: decode_gnss_position,
            },
            PgnInfo {
                pgn: 130824,
                fast: false,
                manufacturer: Some(381),
                description: "annunciator",
                decode: decode_proprietary,
            },
            PgnInfo {
                pgn: 130824,
                fast: true,
                manufacturer: None,
                description: "key-value data",
                decode: decode_proprietary,
            },
        ])
    }

    pub fn get(&self, pgn: u32) -> Option<&[PgnInfo]> {
        self.entries.get(&pgn).map(|v| v.as_slice())
    }
}

/// The manufacturer code packed into the first two payload bytes of
/// proprietary PGNs: little-endian u16, low 11 bits.
pub fn manufacturer_code(data: &[u8]) -> Option<u16> {
    if data.len() < 2 {
        return None;
    }
    Some(u16::from_le_bytes([data[0], data[1]]) & 0x7FF)
}

/// Cursor over a little-endian payload. Every read distinguishes a truncated
/// payload (an error) from the all-ones "data not available" sentinel (a
/// `None` the decoder skips).
struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(data: &'a [u8]) -> Fields<'a> {
        Fields { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MappingError> {
        if self.pos + len > self.data.len() {
            return Err(MappingError::Decode(format!(
                "payload truncated at byte {} (need {} more)",
                self.pos, len
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<Option<u8>, MappingError> {
        let v = self.take(1)?[0];
        Ok((v != 0xFF).then_some(v))
    }

    fn u16(&mut self) -> Result<Option<u16>, MappingError> {
        let b = self.take(2)?;
        let v = u16::from_le_bytes([b[0], b[1]]);
        Ok((v != 0xFFFF).then_some(v))
    }

    fn i16(&mut self) -> Result<Option<i16>, MappingError> {
        let b = self.take(2)?;
        let v = i16::from_le_bytes([b[0], b[1]]);
        Ok((v != 0x7FFF).then_some(v))
    }

    fn u32(&mut self) -> Result<Option<u32>, MappingError> {
        let b = self.take(4)?;
        let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        Ok((v != 0xFFFF_FFFF).then_some(v))
    }

    fn i32(&mut self) -> Result<Option<i32>, MappingError> {
        let b = self.take(4)?;
        let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        Ok((v != 0x7FFF_FFFF).then_some(v))
    }

    fn i64(&mut self) -> Result<Option<i64>, MappingError> {
        let b = self.take(8)?;
        let v = i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        Ok((v != 0x7FFF_FFFF_FFFF_FFFF).then_some(v))
    }
}

fn datetime_value(days: u16, ticks: u32) -> Option<Value> {
    let seconds = i64::from(days) * 86_400 + i64::from(ticks / 10_000);
    let nanos = (ticks % 10_000) * 100_000;
    let datetime = chrono::DateTime::from_timestamp(seconds, nanos)?;
    Some(
        Value::new()
            .with_path("navigation.datetime")
            .with_value(ValueData::Text(datetime.to_rfc3339())),
    )
}

// PGN 126992: SID, time source, date (days since epoch), time (1e-4 s).
fn decode_system_time(data: &[u8]) -> Result<Vec<Value>, MappingError> {
    let mut fields = Fields::new(data);
    let _sid = fields.u8()?;
    let _source = fields.u8()?;
    let date = fields.u16()?;
    let time = fields.u32()?;

    let mut values = Vec::new();
    if let (Some(days), Some(ticks)) = (date, time) {
        values.extend(datetime_value(days, ticks));
    }
    Ok(values)
}

// PGN 127250: SID, heading (1e-4 rad), deviation, variation, reference.
fn decode_vessel_heading(data: &[u8]) -> Result<Vec<Value>, MappingError> {
    let mut fields = Fields::new(data);
    let _sid = fields.u8()?;
    let heading = fields.u16()?;
    let _deviation = fields.i16()?;
    let variation = fields.i16()?;
    let reference = fields.u8()?.map(|b| b & 0x03);

    let mut values = Vec::new();
    if let Some(raw) = heading {
        let path = match reference {
            Some(0) => Some("navigation.headingTrue"),
            Some(1) => Some("navigation.headingMagnetic"),
            _ => None,
        };
        if let Some(path) = path {
            values.push(
                Value::new()
                    .with_path(path)
                    .with_value(ValueData::Number(f64::from(raw) * 1e-4)),
            );
        }
    }
    if let Some(raw) = variation {
        values.push(
            Value::new()
                .with_path("navigation.magneticVariation")
                .with_value(ValueData::Number(f64::from(raw) * 1e-4)),
        );
    }
    Ok(values)
}

// PGN 127257: SID, yaw, pitch, roll (all 1e-4 rad).
fn decode_attitude(data: &[u8]) -> Result<Vec<Value>, MappingError> {
    let mut fields = Fields::new(data);
    let _sid = fields.u8()?;
    let yaw = fields.i16()?;
    let pitch = fields.i16()?;
    let roll = fields.i16()?;

    let mut attitude = BTreeMap::new();
    for (key, raw) in [("yaw", yaw), ("pitch", pitch), ("roll", roll)] {
        if let Some(raw) = raw {
            attitude.insert(
                key.to_string(),
                ValueData::Number(f64::from(raw) * 1e-4),
            );
        }
    }
    if attitude.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Value::new()
        .with_path("navigation.attitude")
        .with_value(ValueData::Object(attitude))])
}

// PGN 129025: latitude and longitude as 1e-7 degrees.
fn decode_position_rapid(data: &[u8]) -> Result<Vec<Value>, MappingError> {
    let mut fields = Fields::new(data);
    let latitude = fields.i32()?;
    let longitude = fields.i32()?;

    let (latitude, longitude) = match (latitude, longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Ok(Vec::new()),
    };
    Ok(vec![Value::new()
        .with_path("navigation.position")
        .with_value(ValueData::Position(Position {
            latitude: f64::from(latitude) * 1e-7,
            longitude: f64::from(longitude) * 1e-7,
            altitude: None,
        }))])
}

// PGN 130306: SID, speed (0.01 m/s), angle (1e-4 rad), reference.
fn decode_wind_data(data: &[u8]) -> Result<Vec<Value>, MappingError> {
    let mut fields = Fields::new(data);
    let _sid = fields.u8()?;
    let speed = fields.u16()?;
    let angle = fields.u16()?;
    let reference = fields.u8()?.map(|b| b & 0x07);

    let (speed_path, angle_path) = match reference {
        Some(0) => ("environment.wind.speedOverGround", "environment.wind.directionTrue"),
        Some(2) => ("environment.wind.speedApparent", "environment.wind.angleApparent"),
        Some(3) => ("environment.wind.speedTrue", "environment.wind.angleTrueWater"),
        _ => return Ok(Vec::new()),
    };

    let mut values = Vec::new();
    if let Some(raw) = speed {
        values.push(
            Value::new()
                .with_path(speed_path)
                .with_value(ValueData::Number(f64::from(raw) * 0.01)),
        );
    }
    if let Some(raw) = angle {
        values.push(
            Value::new()
                .with_path(angle_path)
                .with_value(ValueData::Number(f64::from(raw) * 1e-4)),
        );
    }
    Ok(values)
}

// PGN 129029 (fast, 43 bytes): SID, date, time, latitude and longitude as
// 1e-16 degrees, altitude as 1e-6 m, then fix metadata this decoder skips.
fn decode_gnss_position(data: &[u8]) -> Result<Vec<Value>, MappingError> {
    let mut fields = Fields::new(data);
    let _sid = fields.u8()?;
    let date = fields.u16()?;
    let time = fields.u32()?;
    let latitude = fields.i64()?;
    let longitude = fields.i64()?;
    let altitude = fields.i64()?;

    let mut values = Vec::new();
    if let (Some(lat), Some(lon)) = (latitude, longitude) {
        values.push(
            Value::new()
                .with_path("navigation.position")
                .with_value(ValueData::Position(Position {
                    latitude: lat as f64 * 1e-16,
                    longitude: lon as f64 * 1e-16,
                    altitude: altitude.map(|alt| alt as f64 * 1e-6),
                })),
        );
    }
    if let (Some(days), Some(ticks)) = (date, time) {
        values.extend(datetime_value(days, ticks));
    }
    Ok(values)
}

// Proprietary payloads are recognized so they do not count as decode
// failures, but they map to no canonical path.
fn decode_proprietary(_data: &[u8]) -> Result<Vec<Value>, MappingError> {
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_is_valid() {
        let catalog = PgnCatalog::standard().unwrap();
        assert_eq!(catalog.get(130824).unwrap().len(), 2);
        assert_eq!(catalog.get(127250).unwrap().len(), 1);
        assert!(catalog.get(60928).is_none());
    }

    #[test]
    fn test_catalog_rejects_dual_variant_outside_130824() {
        let result = PgnCatalog::new(vec![
            PgnInfo {
                pgn: 127250,
                fast: false,
                manufacturer: None,
                description: "a",
                decode: decode_proprietary,
            },
            PgnInfo {
                pgn: 127250,
                fast: true,
                manufacturer: None,
                description: "b",
                decode: decode_proprietary,
            },
        ]);
        assert!(matches!(result, Err(MappingError::CatalogInvariant(_))));
    }

    #[test]
    fn test_catalog_rejects_unselectable_dual_variant() {
        let result = PgnCatalog::new(vec![
            PgnInfo {
                pgn: 130824,
                fast: false,
                manufacturer: None,
                description: "single without manufacturer",
                decode: decode_proprietary,
            },
            PgnInfo {
                pgn: 130824,
                fast: true,
                manufacturer: None,
                description: "fast",
                decode: decode_proprietary,
            },
        ]);
        assert!(matches!(result, Err(MappingError::CatalogInvariant(_))));
    }

    #[test]
    fn test_manufacturer_code_masks_low_bits() {
        assert_eq!(manufacturer_code(&[0x7D, 0x81]), Some(381));
        assert_eq!(manufacturer_code(&[0x7D]), None);
    }

    #[test]
    fn test_decode_vessel_heading_magnetic() {
        // heading 1.8000 rad, variation 0.0100 rad, reference magnetic
        let mut data = vec![0x00];
        data.extend_from_slice(&18000u16.to_le_bytes());
        data.extend_from_slice(&0x7FFFu16.to_le_bytes()); // deviation n/a
        data.extend_from_slice(&100i16.to_le_bytes());
        data.push(0x01);

        let values = decode_vessel_heading(&data).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].path, "navigation.headingMagnetic");
        assert_eq!(values[0].value, ValueData::Number(1.8));
        assert_eq!(values[1].path, "navigation.magneticVariation");
        assert_eq!(values[1].value, ValueData::Number(0.01));
    }

    #[test]
    fn test_decode_heading_unavailable_yields_nothing() {
        let data = [0x00, 0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0x7F, 0xFF];
        let values = decode_vessel_heading(&data).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_decode_position_rapid() {
        let mut data = Vec::new();
        data.extend_from_slice(&529000000i32.to_le_bytes()); // 52.9 N
        data.extend_from_slice(&(-43000000i32).to_le_bytes()); // 4.3 W

        let values = decode_position_rapid(&data).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].path, "navigation.position");
        match &values[0].value {
            ValueData::Position(p) => {
                assert!((p.latitude - 52.9).abs() < 1e-9);
                assert!((p.longitude + 4.3).abs() < 1e-9);
                assert!(p.altitude.is_none());
            }
            other => panic!("expected a position, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_truncated_payload_is_an_error() {
        let result = decode_position_rapid(&[0x00, 0x01, 0x02]);
        assert!(matches!(result, Err(MappingError::Decode(_))));
    }

    #[test]
    fn test_decode_wind_apparent() {
        let mut data = vec![0x00];
        data.extend_from_slice(&523u16.to_le_bytes()); // 5.23 m/s
        data.extend_from_slice(&31415u16.to_le_bytes()); // 3.1415 rad
        data.push(0x02);

        let values = decode_wind_data(&data).unwrap();
        assert_eq!(values[0].path, "environment.wind.speedApparent");
        assert_eq!(values[0].value, ValueData::Number(5.23));
        assert_eq!(values[1].path, "environment.wind.angleApparent");
        assert_eq!(values[1].value, ValueData::Number(3.1415));
    }

    #[test]
    fn test_decode_system_time() {
        let mut data = vec![0x00, 0x00];
        data.extend_from_slice(&19000u16.to_le_bytes()); // 2022-01-08
        data.extend_from_slice(&432000000u32.to_le_bytes()); // 12:00:00

        let values = decode_system_time(&data).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].path, "navigation.datetime");
        match &values[0].value {
            ValueData::Text(t) => assert!(t.starts_with("2022-01-08T12:00:00")),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_gnss_position() {
        let mut data = vec![0x00];
        data.extend_from_slice(&19000u16.to_le_bytes());
        data.extend_from_slice(&432000000u32.to_le_bytes());
        data.extend_from_slice(&(529i64 * 10i64.pow(15)).to_le_bytes()); // 52.9
        data.extend_from_slice(&(43i64 * 10i64.pow(15)).to_le_bytes()); // 4.3
        data.extend_from_slice(&1_500_000i64.to_le_bytes()); // 1.5 m
        data.extend_from_slice(&[0x13, 0xFC, 0x0A, 0x64, 0x00, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        let values = decode_gnss_position(&data).unwrap();
        assert_eq!(values.len(), 2);
        match &values[0].value {
            ValueData::Position(p) => {
                assert!((p.latitude - 52.9).abs() < 1e-9);
                assert!((p.longitude - 4.3).abs() < 1e-9);
                assert_eq!(p.altitude, Some(1.5));
            }
            other => panic!("expected a position, got {:?}", other),
        }
        assert_eq!(values[1].path, "navigation.datetime");
    }

    #[test]
    fn test_decode_attitude_partial_fields() {
        let mut data = vec![0x00];
        data.extend_from_slice(&100i16.to_le_bytes()); // yaw 0.01
        data.extend_from_slice(&0x7FFFu16.to_le_bytes()); // pitch n/a
        data.extend_from_slice(&(-200i16).to_le_bytes()); // roll -0.02

        let values = decode_attitude(&data).unwrap();
        assert_eq!(values.len(), 1);
        match &values[0].value {
            ValueData::Object(map) => {
                assert_eq!(map.get("yaw"), Some(&ValueData::Number(0.01)));
                assert!(!map.contains_key("pitch"));
                assert_eq!(map.get("roll"), Some(&ValueData::Number(-0.02)));
            }
            other => panic!("expected an object, got {:?}", other),
        }
    }
}
