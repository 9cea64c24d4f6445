//! Textual CAN frame encoding.
//!
//! Transport connectors publish CAN traffic in the candump text form
//! `ID#HEXDATA` (`123#1122` for a standard id, eight hex digits for an
//! extended one). That keeps the raw bus encoding human-greppable and
//! exactly round-trippable.

use crate::error::MappingError;
use std::str::FromStr;

/// One CAN frame: identifier plus up to 8 data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub extended: bool,
    pub data: Vec<u8>,
}

impl CanFrame {
    /// The frame payload zero-padded to the full 8 bytes, the view the
    /// signal extractor works on.
    pub fn padded_data(&self) -> [u8; 8] {
        let mut padded = [0u8; 8];
        padded[..self.data.len()].copy_from_slice(&self.data);
        padded
    }

    /// Parses a raw connector payload into a frame.
    pub fn from_payload(payload: &[u8]) -> Result<CanFrame, MappingError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| MappingError::Decode("CAN frame is not valid UTF-8".to_string()))?;
        text.trim().parse()
    }
}

impl FromStr for CanFrame {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id_part, data_part) = s
            .split_once('#')
            .ok_or_else(|| MappingError::Decode(format!("CAN frame {:?} has no '#'", s)))?;

        if id_part.is_empty() || id_part.len() > 8 {
            return Err(MappingError::Decode(format!(
                "CAN frame id {:?} has an invalid length",
                id_part
            )));
        }
        let id = u32::from_str_radix(id_part, 16)
            .map_err(|_| MappingError::Decode(format!("CAN frame id {:?} is not hex", id_part)))?;
        let extended = id_part.len() > 3 || id > 0x7FF;
        if extended && id > 0x1FFF_FFFF {
            return Err(MappingError::Decode(format!(
                "extended CAN id {:#x} out of range",
                id
            )));
        }

        // byte-offset slicing below requires single-byte characters
        if !data_part.is_ascii() || data_part.len() % 2 != 0 || data_part.len() > 16 {
            return Err(MappingError::Decode(format!(
                "CAN frame data {:?} has an invalid length or encoding",
                data_part
            )));
        }
        let mut data = Vec::with_capacity(data_part.len() / 2);
        for i in (0..data_part.len()).step_by(2) {
            let byte = u8::from_str_radix(&data_part[i..i + 2], 16).map_err(|_| {
                MappingError::Decode(format!("CAN frame data {:?} is not hex", data_part))
            })?;
            data.push(byte);
        }

        Ok(CanFrame { id, extended, data })
    }
}

impl std::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.extended {
            write!(f, "{:08X}#", self.id)?;
        } else {
            write!(f, "{:03X}#", self.id)?;
        }
        for byte in &self.data {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}
