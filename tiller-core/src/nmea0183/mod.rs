//! NMEA0183 mapping.
//!
//! Sentences are parsed into typed structs (`sentences`), then queried
//! through small capability traits: a sentence type implements
//! `TrueHeading`, `Position2D` and friends only for the quantities it can
//! actually report. A capability refuses (`Unavailable`) when the sentence's
//! validity field rejects the reading or the field is absent; it never
//! derives the true variant of a quantity from the magnetic one or vice
//! versa. Unit conversion to SI happens here, at the capability boundary.

mod sentences;

pub use sentences::{parse, Gga, Gll, Gns, Hdt, Rmc, Sentence, Ths, Vhw, Vtg};

use crate::config::MapperConfig;
use crate::error::MappingError;
use crate::mapper::Mapper;
use crate::message::{Mapped, Position, RawMessage, Source, Update, Value, ValueData};

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
const KNOTS_TO_MS: f64 = 1852.0 / 3600.0;
const KPH_TO_MS: f64 = 1.0 / 3.6;

fn unavailable(what: &str) -> MappingError {
    MappingError::Unavailable(what.to_string())
}

pub trait Position2D {
    fn position_2d(&self) -> Result<Position, MappingError>;
}

pub trait Position3D {
    fn position_3d(&self) -> Result<Position, MappingError>;
}

pub trait TrueHeading {
    fn true_heading(&self) -> Result<f64, MappingError>;
}

pub trait MagneticHeading {
    fn magnetic_heading(&self) -> Result<f64, MappingError>;
}

pub trait TrueCourseOverGround {
    fn true_course_over_ground(&self) -> Result<f64, MappingError>;
}

pub trait MagneticCourseOverGround {
    fn magnetic_course_over_ground(&self) -> Result<f64, MappingError>;
}

pub trait MagneticVariation {
    fn magnetic_variation(&self) -> Result<f64, MappingError>;
}

pub trait SpeedOverGround {
    fn speed_over_ground(&self) -> Result<f64, MappingError>;
}

pub trait SpeedThroughWater {
    fn speed_through_water(&self) -> Result<f64, MappingError>;
}

fn pair(latitude: Option<f64>, longitude: Option<f64>) -> Result<Position, MappingError> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Ok(Position {
            latitude,
            longitude,
            altitude: None,
        }),
        _ => Err(unavailable("position")),
    }
}

impl Position2D for Rmc {
    fn position_2d(&self) -> Result<Position, MappingError> {
        if !self.valid {
            return Err(unavailable("position in an invalid fix"));
        }
        pair(self.latitude, self.longitude)
    }
}

impl Position2D for Gll {
    fn position_2d(&self) -> Result<Position, MappingError> {
        if !self.valid {
            return Err(unavailable("position in an invalid fix"));
        }
        pair(self.latitude, self.longitude)
    }
}

impl Gga {
    fn has_fix(&self) -> bool {
        matches!(self.fix_quality, Some(1) | Some(2))
    }
}

impl Position2D for Gga {
    fn position_2d(&self) -> Result<Position, MappingError> {
        if !self.has_fix() {
            return Err(unavailable("position without GPS or DGPS fix"));
        }
        pair(self.latitude, self.longitude)
    }
}

impl Position3D for Gga {
    fn position_3d(&self) -> Result<Position, MappingError> {
        let altitude = self.altitude.ok_or_else(|| unavailable("altitude"))?;
        let mut position = self.position_2d()?;
        position.altitude = Some(altitude);
        Ok(position)
    }
}

impl Gns {
    // one letter per constellation; any trusted mode makes the fix usable
    fn has_fix(&self) -> bool {
        self.mode
            .chars()
            .any(|m| matches!(m, 'A' | 'D' | 'P' | 'R' | 'F'))
    }
}

impl Position2D for Gns {
    fn position_2d(&self) -> Result<Position, MappingError> {
        if !self.has_fix() {
            return Err(unavailable("position without a trusted fix mode"));
        }
        pair(self.latitude, self.longitude)
    }
}

impl Position3D for Gns {
    fn position_3d(&self) -> Result<Position, MappingError> {
        let altitude = self.altitude.ok_or_else(|| unavailable("altitude"))?;
        let mut position = self.position_2d()?;
        position.altitude = Some(altitude);
        Ok(position)
    }
}

impl TrueHeading for Hdt {
    fn true_heading(&self) -> Result<f64, MappingError> {
        if !self.is_true {
            return Err(unavailable("true heading from a magnetic reading"));
        }
        self.heading
            .map(|h| h * DEG_TO_RAD)
            .ok_or_else(|| unavailable("heading"))
    }
}

impl MagneticHeading for Hdt {
    fn magnetic_heading(&self) -> Result<f64, MappingError> {
        if self.is_true {
            return Err(unavailable("magnetic heading from a true reading"));
        }
        self.heading
            .map(|h| h * DEG_TO_RAD)
            .ok_or_else(|| unavailable("heading"))
    }
}

impl TrueHeading for Vhw {
    fn true_heading(&self) -> Result<f64, MappingError> {
        self.true_heading
            .map(|h| h * DEG_TO_RAD)
            .ok_or_else(|| unavailable("true heading"))
    }
}

impl MagneticHeading for Vhw {
    fn magnetic_heading(&self) -> Result<f64, MappingError> {
        self.magnetic_heading
            .map(|h| h * DEG_TO_RAD)
            .ok_or_else(|| unavailable("magnetic heading"))
    }
}

impl TrueHeading for Ths {
    fn true_heading(&self) -> Result<f64, MappingError> {
        if self.status != Some('A') {
            return Err(unavailable("heading without autonomous status"));
        }
        self.heading
            .map(|h| h * DEG_TO_RAD)
            .ok_or_else(|| unavailable("heading"))
    }
}

impl TrueCourseOverGround for Rmc {
    fn true_course_over_ground(&self) -> Result<f64, MappingError> {
        if !self.valid {
            return Err(unavailable("course in an invalid fix"));
        }
        self.course_over_ground
            .map(|c| c * DEG_TO_RAD)
            .ok_or_else(|| unavailable("course over ground"))
    }
}

impl TrueCourseOverGround for Vtg {
    fn true_course_over_ground(&self) -> Result<f64, MappingError> {
        self.true_track
            .map(|c| c * DEG_TO_RAD)
            .ok_or_else(|| unavailable("true track"))
    }
}

impl MagneticCourseOverGround for Vtg {
    fn magnetic_course_over_ground(&self) -> Result<f64, MappingError> {
        self.magnetic_track
            .map(|c| c * DEG_TO_RAD)
            .ok_or_else(|| unavailable("magnetic track"))
    }
}

impl MagneticVariation for Rmc {
    fn magnetic_variation(&self) -> Result<f64, MappingError> {
        if !self.valid {
            return Err(unavailable("variation in an invalid fix"));
        }
        self.magnetic_variation
            .map(|v| v * DEG_TO_RAD)
            .ok_or_else(|| unavailable("magnetic variation"))
    }
}

impl SpeedOverGround for Rmc {
    fn speed_over_ground(&self) -> Result<f64, MappingError> {
        if !self.valid {
            return Err(unavailable("speed in an invalid fix"));
        }
        self.speed_over_ground_knots
            .map(|s| s * KNOTS_TO_MS)
            .ok_or_else(|| unavailable("speed over ground"))
    }
}

impl SpeedOverGround for Vtg {
    fn speed_over_ground(&self) -> Result<f64, MappingError> {
        // km/h carries more precision on the wire than knots
        if let Some(kph) = self.speed_over_ground_kph {
            return Ok(kph * KPH_TO_MS);
        }
        self.speed_over_ground_knots
            .map(|s| s * KNOTS_TO_MS)
            .ok_or_else(|| unavailable("speed over ground"))
    }
}

impl SpeedThroughWater for Vhw {
    fn speed_through_water(&self) -> Result<f64, MappingError> {
        if let Some(kph) = self.speed_through_water_kph {
            return Ok(kph * KPH_TO_MS);
        }
        self.speed_through_water_knots
            .map(|s| s * KNOTS_TO_MS)
            .ok_or_else(|| unavailable("speed through water"))
    }
}

/// Maps parsed sentences to the fixed canonical navigation paths.
pub struct Nmea0183Mapper {
    config: MapperConfig,
}

impl Nmea0183Mapper {
    pub fn new(config: MapperConfig) -> Self {
        Nmea0183Mapper { config }
    }
}

fn push_number(values: &mut Vec<Value>, path: &str, result: Result<f64, MappingError>) {
    if let Ok(number) = result {
        values.push(
            Value::new()
                .with_path(path)
                .with_value(ValueData::Number(number)),
        );
    }
}

fn push_position(values: &mut Vec<Value>, result: Result<Position, MappingError>) {
    if let Ok(position) = result {
        values.push(
            Value::new()
                .with_path("navigation.position")
                .with_value(ValueData::Position(position)),
        );
    }
}

fn sentence_values(sentence: &Sentence) -> Vec<Value> {
    let mut values = Vec::new();
    match sentence {
        Sentence::Rmc(s) => {
            push_position(&mut values, s.position_2d());
            push_number(
                &mut values,
                "navigation.courseOverGroundTrue",
                s.true_course_over_ground(),
            );
            push_number(
                &mut values,
                "navigation.magneticVariation",
                s.magnetic_variation(),
            );
            push_number(
                &mut values,
                "navigation.speedOverGround",
                s.speed_over_ground(),
            );
        }
        Sentence::Gll(s) => push_position(&mut values, s.position_2d()),
        Sentence::Gga(s) => {
            push_position(&mut values, s.position_3d().or_else(|_| s.position_2d()))
        }
        Sentence::Gns(s) => {
            push_position(&mut values, s.position_3d().or_else(|_| s.position_2d()))
        }
        Sentence::Vtg(s) => {
            push_number(
                &mut values,
                "navigation.courseOverGroundTrue",
                s.true_course_over_ground(),
            );
            push_number(
                &mut values,
                "navigation.courseOverGroundMagnetic",
                s.magnetic_course_over_ground(),
            );
            push_number(
                &mut values,
                "navigation.speedOverGround",
                s.speed_over_ground(),
            );
        }
        Sentence::Vhw(s) => {
            push_number(&mut values, "navigation.headingTrue", s.true_heading());
            push_number(
                &mut values,
                "navigation.headingMagnetic",
                s.magnetic_heading(),
            );
            push_number(
                &mut values,
                "navigation.speedThroughWater",
                s.speed_through_water(),
            );
        }
        Sentence::Hdt(s) => {
            push_number(&mut values, "navigation.headingTrue", s.true_heading());
            push_number(
                &mut values,
                "navigation.headingMagnetic",
                s.magnetic_heading(),
            );
        }
        Sentence::Ths(s) => {
            push_number(&mut values, "navigation.headingTrue", s.true_heading())
        }
    }
    values
}

impl Mapper for Nmea0183Mapper {
    fn map(&mut self, raw: &RawMessage) -> Result<Option<Mapped>, MappingError> {
        let line = std::str::from_utf8(&raw.payload)
            .map_err(|_| MappingError::Decode("sentence is not valid UTF-8".to_string()))?;
        let sentence = match parse(line) {
            Ok(sentence) => sentence,
            Err(MappingError::Unmapped(what)) => {
                log::debug!("{}", what);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut update = Update::new()
            .with_source(
                Source::new()
                    .with_label(&raw.connector)
                    .with_type(raw.protocol)
                    .with_id(raw.id),
            )
            .with_timestamp(raw.timestamp);
        for value in sentence_values(&sentence) {
            update = update.add_value(value);
        }

        Ok(Some(
            Mapped::new()
                .with_context(&self.config.context)
                .with_origin(&self.config.context)
                .add_update(update),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ProtocolType;
    use std::f64::consts::PI;

    #[test]
    fn test_magnetic_heading_capability() {
        assert!(Hdt::default().magnetic_heading().is_err());
        assert!(Hdt {
            heading: Some(180.0),
            is_true: true
        }
        .magnetic_heading()
        .is_err());
        assert_eq!(
            Hdt {
                heading: Some(270.0),
                is_true: false
            }
            .magnetic_heading()
            .unwrap(),
            1.5 * PI
        );

        assert!(Vhw::default().magnetic_heading().is_err());
        assert_eq!(
            Vhw {
                magnetic_heading: Some(270.0),
                true_heading: Some(180.0),
                ..Vhw::default()
            }
            .magnetic_heading()
            .unwrap(),
            1.5 * PI
        );
    }

    #[test]
    fn test_true_heading_capability() {
        assert!(Hdt {
            heading: Some(180.0),
            is_true: false
        }
        .true_heading()
        .is_err());
        assert_eq!(
            Hdt {
                heading: Some(180.0),
                is_true: true
            }
            .true_heading()
            .unwrap(),
            PI
        );

        assert!(Ths {
            heading: Some(180.0),
            status: None
        }
        .true_heading()
        .is_err());
        assert!(Ths {
            heading: Some(180.0),
            status: Some('E')
        }
        .true_heading()
        .is_err());
        assert_eq!(
            Ths {
                heading: Some(180.0),
                status: Some('A')
            }
            .true_heading()
            .unwrap(),
            PI
        );
    }

    #[test]
    fn test_course_over_ground_capabilities() {
        assert!(Rmc::default().true_course_over_ground().is_err());
        assert!(Rmc {
            course_over_ground: Some(180.0),
            ..Rmc::default()
        }
        .true_course_over_ground()
        .is_err());
        assert_eq!(
            Rmc {
                course_over_ground: Some(180.0),
                valid: true,
                ..Rmc::default()
            }
            .true_course_over_ground()
            .unwrap(),
            PI
        );

        let vtg = Vtg {
            true_track: Some(180.0),
            magnetic_track: Some(270.0),
            ..Vtg::default()
        };
        assert_eq!(vtg.true_course_over_ground().unwrap(), PI);
        assert_eq!(vtg.magnetic_course_over_ground().unwrap(), 1.5 * PI);
    }

    #[test]
    fn test_magnetic_variation_requires_validity() {
        assert!(Rmc {
            magnetic_variation: Some(180.0),
            ..Rmc::default()
        }
        .magnetic_variation()
        .is_err());
        assert_eq!(
            Rmc {
                magnetic_variation: Some(270.0),
                valid: true,
                ..Rmc::default()
            }
            .magnetic_variation()
            .unwrap(),
            1.5 * PI
        );
    }

    #[test]
    fn test_speed_prefers_kph_over_knots() {
        let vtg = Vtg {
            speed_over_ground_knots: Some(10.0),
            speed_over_ground_kph: Some(18.0),
            ..Vtg::default()
        };
        assert!((vtg.speed_over_ground().unwrap() - 5.0).abs() < 1e-9);

        let knots_only = Vtg {
            speed_over_ground_knots: Some(10.0),
            ..Vtg::default()
        };
        assert!((knots_only.speed_over_ground().unwrap() - 5.144444).abs() < 1e-5);
    }

    #[test]
    fn test_position_gating() {
        let gga = Gga {
            fix_quality: Some(0),
            latitude: Some(52.0),
            longitude: Some(4.0),
            altitude: Some(1.0),
        };
        assert!(gga.position_2d().is_err());

        let fixed = Gga {
            fix_quality: Some(2),
            ..gga
        };
        let position = fixed.position_3d().unwrap();
        assert_eq!(position.altitude, Some(1.0));

        assert!(Gns {
            mode: "NN".to_string(),
            latitude: Some(52.0),
            longitude: Some(4.0),
            altitude: None,
        }
        .position_2d()
        .is_err());
        assert!(Gns {
            mode: "AN".to_string(),
            latitude: Some(52.0),
            longitude: Some(4.0),
            altitude: None,
        }
        .position_2d()
        .is_ok());
    }

    fn raw(line: &str) -> RawMessage {
        RawMessage::new("nmea0", ProtocolType::Nmea0183, line.as_bytes().to_vec())
    }

    #[test]
    fn test_map_rmc_emits_navigation_values() {
        let mut mapper = Nmea0183Mapper::new(MapperConfig {
            context: "vessel".to_string(),
        });
        let mapped = mapper
            .map(&raw(
                "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A",
            ))
            .unwrap()
            .unwrap();
        let update = &mapped.updates[0];
        let paths: Vec<&str> = update.values.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "navigation.position",
                "navigation.courseOverGroundTrue",
                "navigation.magneticVariation",
                "navigation.speedOverGround",
            ]
        );
    }

    #[test]
    fn test_map_invalid_fix_emits_empty_update() {
        let mut mapper = Nmea0183Mapper::new(MapperConfig {
            context: "vessel".to_string(),
        });
        let mapped = mapper
            .map(&raw("$GPRMC,123519,V,,,,,,,230394,,"))
            .unwrap()
            .unwrap();
        assert!(mapped.updates[0].values.is_empty());
    }

    #[test]
    fn test_map_unknown_sentence_yields_nothing() {
        let mut mapper = Nmea0183Mapper::new(MapperConfig {
            context: "vessel".to_string(),
        });
        let mapped = mapper.map(&raw("$GPZDA,160012.71,11,03,2004,-1,00")).unwrap();
        assert!(mapped.is_none());
    }
}
