//! NMEA0183 sentence parsing.
//!
//! Sentences are `$`/`!` framed comma-separated fields with an optional
//! `*HH` XOR checksum. Every field is optional on the wire; parsed sentences
//! keep that with `Option` fields so the capability layer can tell "absent"
//! from "zero".

use crate::error::MappingError;

/// A parsed sentence, by type, talker-independent.
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    Rmc(Rmc),
    Gll(Gll),
    Gga(Gga),
    Gns(Gns),
    Vtg(Vtg),
    Vhw(Vhw),
    Hdt(Hdt),
    Ths(Ths),
}

/// Recommended minimum navigation information.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rmc {
    pub valid: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed_over_ground_knots: Option<f64>,
    pub course_over_ground: Option<f64>,
    pub magnetic_variation: Option<f64>,
}

/// Geographic position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gll {
    pub valid: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// GPS fix data. Quality 1 (GPS) and 2 (DGPS) count as a usable fix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gga {
    pub fix_quality: Option<u8>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

/// GNSS fix data; `mode` holds one letter per constellation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gns {
    pub mode: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

/// Course and speed over ground.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vtg {
    pub true_track: Option<f64>,
    pub magnetic_track: Option<f64>,
    pub speed_over_ground_knots: Option<f64>,
    pub speed_over_ground_kph: Option<f64>,
}

/// Water speed and heading.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vhw {
    pub true_heading: Option<f64>,
    pub magnetic_heading: Option<f64>,
    pub speed_through_water_knots: Option<f64>,
    pub speed_through_water_kph: Option<f64>,
}

/// Heading with a true/magnetic discriminator field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hdt {
    pub heading: Option<f64>,
    pub is_true: bool,
}

/// True heading and status ('A' is autonomous, anything else untrusted).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ths {
    pub heading: Option<f64>,
    pub status: Option<char>,
}

/// Parses one sentence line. Unknown sentence types are `Unmapped`; framing
/// and checksum problems are `Decode`.
pub fn parse(line: &str) -> Result<Sentence, MappingError> {
    let line = line.trim();
    let body = line
        .strip_prefix('$')
        .or_else(|| line.strip_prefix('!'))
        .ok_or_else(|| {
            MappingError::Decode(format!("sentence {:?} has no $ or ! prefix", line))
        })?;

    let body = match body.split_once('*') {
        Some((data, checksum)) => {
            let want = u8::from_str_radix(checksum.trim(), 16).map_err(|_| {
                MappingError::Decode(format!("sentence checksum {:?} is not hex", checksum))
            })?;
            let got = data.bytes().fold(0u8, |acc, b| acc ^ b);
            if got != want {
                return Err(MappingError::Decode(format!(
                    "sentence checksum mismatch, got {:02X} want {:02X}",
                    got, want
                )));
            }
            data
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields[0];
    // the talker/type split below indexes bytes, so the address must be
    // plain ASCII
    if address.len() < 5 || !address.is_ascii() {
        return Err(MappingError::Decode(format!(
            "sentence address {:?} is invalid",
            address
        )));
    }
    let sentence_type = &address[address.len() - 3..];

    match sentence_type {
        "RMC" => parse_rmc(&fields),
        "GLL" => parse_gll(&fields),
        "GGA" => parse_gga(&fields),
        "GNS" => parse_gns(&fields),
        "VTG" => parse_vtg(&fields),
        "VHW" => parse_vhw(&fields),
        "HDT" => parse_hdt(&fields),
        "THS" => parse_ths(&fields),
        other => Err(MappingError::Unmapped(format!(
            "unsupported sentence type {}",
            other
        ))),
    }
}

fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).copied().filter(|f| !f.is_empty())
}

fn num(fields: &[&str], index: usize) -> Result<Option<f64>, MappingError> {
    match field(fields, index) {
        None => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| MappingError::Decode(format!("field {:?} is not a number", text))),
    }
}

// NMEA packs coordinates as (d)ddmm.mmmm with a separate hemisphere letter.
fn coordinate(
    fields: &[&str],
    value_index: usize,
    hemisphere_index: usize,
) -> Result<Option<f64>, MappingError> {
    let raw = match num(fields, value_index)? {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let value = degrees + minutes / 60.0;
    match field(fields, hemisphere_index) {
        Some("N") | Some("E") => Ok(Some(value)),
        Some("S") | Some("W") => Ok(Some(-value)),
        other => Err(MappingError::Decode(format!(
            "invalid hemisphere {:?}",
            other
        ))),
    }
}

fn parse_rmc(fields: &[&str]) -> Result<Sentence, MappingError> {
    let variation = match num(fields, 10)? {
        Some(v) if field(fields, 11) == Some("W") => Some(-v),
        v => v,
    };
    Ok(Sentence::Rmc(Rmc {
        valid: field(fields, 2) == Some("A"),
        latitude: coordinate(fields, 3, 4)?,
        longitude: coordinate(fields, 5, 6)?,
        speed_over_ground_knots: num(fields, 7)?,
        course_over_ground: num(fields, 8)?,
        magnetic_variation: variation,
    }))
}

fn parse_gll(fields: &[&str]) -> Result<Sentence, MappingError> {
    Ok(Sentence::Gll(Gll {
        valid: field(fields, 6) == Some("A"),
        latitude: coordinate(fields, 1, 2)?,
        longitude: coordinate(fields, 3, 4)?,
    }))
}

fn parse_gga(fields: &[&str]) -> Result<Sentence, MappingError> {
    let quality = match field(fields, 6) {
        None => None,
        Some(text) => Some(text.parse().map_err(|_| {
            MappingError::Decode(format!("fix quality {:?} is not a number", text))
        })?),
    };
    Ok(Sentence::Gga(Gga {
        fix_quality: quality,
        latitude: coordinate(fields, 2, 3)?,
        longitude: coordinate(fields, 4, 5)?,
        altitude: num(fields, 9)?,
    }))
}

fn parse_gns(fields: &[&str]) -> Result<Sentence, MappingError> {
    Ok(Sentence::Gns(Gns {
        mode: field(fields, 6).unwrap_or_default().to_string(),
        latitude: coordinate(fields, 2, 3)?,
        longitude: coordinate(fields, 4, 5)?,
        altitude: num(fields, 9)?,
    }))
}

fn parse_vtg(fields: &[&str]) -> Result<Sentence, MappingError> {
    Ok(Sentence::Vtg(Vtg {
        true_track: num(fields, 1)?,
        magnetic_track: num(fields, 3)?,
        speed_over_ground_knots: num(fields, 5)?,
        speed_over_ground_kph: num(fields, 7)?,
    }))
}

fn parse_vhw(fields: &[&str]) -> Result<Sentence, MappingError> {
    Ok(Sentence::Vhw(Vhw {
        true_heading: num(fields, 1)?,
        magnetic_heading: num(fields, 3)?,
        speed_through_water_knots: num(fields, 5)?,
        speed_through_water_kph: num(fields, 7)?,
    }))
}

fn parse_hdt(fields: &[&str]) -> Result<Sentence, MappingError> {
    Ok(Sentence::Hdt(Hdt {
        heading: num(fields, 1)?,
        is_true: field(fields, 2) == Some("T"),
    }))
}

fn parse_ths(fields: &[&str]) -> Result<Sentence, MappingError> {
    Ok(Sentence::Ths(Ths {
        heading: num(fields, 1)?,
        status: field(fields, 2).and_then(|f| f.chars().next()),
    }))
}
