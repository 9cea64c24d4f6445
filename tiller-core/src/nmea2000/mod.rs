//! NMEA2000 mapping.
//!
//! ```text
//! raw frame ──> PGN/source split ──> single frame ────────┐
//!                     │                                   ▼
//!                     └──> fast packet ──> reassembly ──> catalog decoders ──> delta
//! ```
//!
//! The frame id carries the PGN and the sender's source address. Single-frame
//! PGNs decode directly; fast-packet PGNs go through per-(PGN, source)
//! reassembly first. PGN 130824 is the one dual-variant PGN: its single-frame
//! interpretation is selected by the manufacturer code in the payload,
//! everything else falls through to the fast-packet path.

mod catalog;
mod fastpacket;

pub use catalog::{manufacturer_code, Decoder, PgnCatalog, PgnInfo};
pub use fastpacket::FastPacketAssembler;

use crate::config::MapperConfig;
use crate::error::MappingError;
use crate::frame::CanFrame;
use crate::mapper::Mapper;
use crate::message::{Mapped, RawMessage, Source, Update, Value};

/// The PGN encoded in an extended CAN id. PDU1 ids (PF below 240) address a
/// specific node and zero out the low byte; PDU2 ids are broadcast and keep
/// it.
pub fn pgn_of(id: u32) -> u32 {
    let pf = (id >> 16) & 0xFF;
    if pf < 240 {
        (id >> 8) & 0x3FF00
    } else {
        (id >> 8) & 0x3FFFF
    }
}

/// The sender's source address, the low byte of the id.
pub fn source_of(id: u32) -> u8 {
    (id & 0xFF) as u8
}

/// Maps NMEA2000 CAN frames to canonical deltas using the PGN catalog.
pub struct Nmea2000Mapper {
    config: MapperConfig,
    catalog: PgnCatalog,
    assembler: FastPacketAssembler,
}

impl Nmea2000Mapper {
    pub fn new(config: MapperConfig) -> Result<Self, MappingError> {
        Ok(Nmea2000Mapper {
            config,
            catalog: PgnCatalog::standard()?,
            assembler: FastPacketAssembler::new(),
        })
    }

    fn decode(
        &self,
        pgn: u32,
        candidates: &[&PgnInfo],
        data: &[u8],
        raw: &RawMessage,
    ) -> Result<Option<Mapped>, MappingError> {
        for info in candidates {
            match (info.decode)(data) {
                Ok(values) => {
                    if values.is_empty() {
                        log::debug!("PGN {} ({}) maps to no path", pgn, info.description);
                        return Ok(None);
                    }
                    return Ok(Some(self.to_delta(values, raw)));
                }
                Err(e) => {
                    log::warn!("decoder {} failed for PGN {}: {}", info.description, pgn, e);
                }
            }
        }
        Err(MappingError::Decode(format!(
            "no decoder succeeded for PGN {}",
            pgn
        )))
    }

    fn to_delta(&self, values: Vec<Value>, raw: &RawMessage) -> Mapped {
        let mut update = Update::new()
            .with_source(
                Source::new()
                    .with_label(&raw.connector)
                    .with_type(raw.protocol)
                    .with_id(raw.id),
            )
            .with_timestamp(raw.timestamp);
        for value in values {
            update = update.add_value(value);
        }
        Mapped::new()
            .with_context(&self.config.context)
            .with_origin(&self.config.context)
            .add_update(update)
    }
}

impl Mapper for Nmea2000Mapper {
    fn map(&mut self, raw: &RawMessage) -> Result<Option<Mapped>, MappingError> {
        let frame = CanFrame::from_payload(&raw.payload)?;
        let pgn = pgn_of(frame.id);
        let source = source_of(frame.id);

        let variants = match self.catalog.get(pgn) {
            Some(variants) => variants,
            None => {
                log::debug!("no catalog entry for PGN {}", pgn);
                return Ok(None);
            }
        };

        // Dual-variant dispatch: a matching manufacturer code selects the
        // single-frame interpretation and bypasses reassembly.
        if variants.len() > 1 {
            let code = manufacturer_code(&frame.data);
            if let Some(single) = variants
                .iter()
                .find(|v| !v.fast && v.manufacturer.is_some() && v.manufacturer == code)
            {
                return self.decode(pgn, &[single], &frame.data, raw);
            }
            let fast: Vec<&PgnInfo> = variants.iter().filter(|v| v.fast).collect();
            return match self.assembler.push(pgn, source, &frame.data)? {
                Some(payload) => self.decode(pgn, &fast, &payload, raw),
                None => Ok(None),
            };
        }

        let info = &variants[0];
        if info.fast {
            match self.assembler.push(pgn, source, &frame.data)? {
                Some(payload) => self.decode(pgn, &[info], &payload, raw),
                None => Ok(None),
            }
        } else {
            self.decode(pgn, &[info], &frame.data, raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ProtocolType, ValueData};

    fn mapper() -> Nmea2000Mapper {
        Nmea2000Mapper::new(MapperConfig {
            context: "vessel".to_string(),
        })
        .unwrap()
    }

    fn raw_frame(id: u32, data: &[u8]) -> RawMessage {
        let mut text = format!("{:08X}#", id);
        for byte in data {
            text.push_str(&format!("{:02X}", byte));
        }
        RawMessage::new("n2k0", ProtocolType::Nmea2000, text.into_bytes())
    }

    fn frame_id(priority: u32, pgn: u32, source: u32) -> u32 {
        (priority << 26) | (pgn << 8) | source
    }

    #[test]
    fn test_pgn_extraction() {
        assert_eq!(pgn_of(frame_id(2, 127250, 1)), 127250);
        assert_eq!(pgn_of(frame_id(3, 129029, 0x23)), 129029);
        assert_eq!(source_of(frame_id(3, 129029, 0x23)), 0x23);
        // PDU1: the destination byte is not part of the PGN
        assert_eq!(pgn_of(0x18EA2301), 59904);
    }

    #[test]
    fn test_single_frame_heading_maps_directly() {
        let mut mapper = mapper();
        let mut data = vec![0x00];
        data.extend_from_slice(&18000u16.to_le_bytes());
        data.extend_from_slice(&[0xFF, 0x7F, 0xFF, 0x7F]); // deviation, variation n/a
        data.push(0x01);

        let mapped = mapper
            .map(&raw_frame(frame_id(2, 127250, 1), &data))
            .unwrap()
            .unwrap();
        assert_eq!(mapped.context, "vessel");
        let update = &mapped.updates[0];
        assert_eq!(update.source.label, "n2k0");
        assert_eq!(update.values.len(), 1);
        assert_eq!(update.values[0].path, "navigation.headingMagnetic");
        assert_eq!(update.values[0].value, ValueData::Number(1.8));
    }

    #[test]
    fn test_unknown_pgn_yields_nothing() {
        let mut mapper = mapper();
        let mapped = mapper
            .map(&raw_frame(frame_id(6, 60928, 1), &[0u8; 8]))
            .unwrap();
        assert!(mapped.is_none());
    }

    #[test]
    fn test_fast_packet_gnss_assembles_and_decodes() {
        let mut mapper = mapper();

        let mut payload = vec![0x00];
        payload.extend_from_slice(&19000u16.to_le_bytes());
        payload.extend_from_slice(&432000000u32.to_le_bytes());
        payload.extend_from_slice(&(529i64 * 10i64.pow(15)).to_le_bytes());
        payload.extend_from_slice(&(43i64 * 10i64.pow(15)).to_le_bytes());
        payload.extend_from_slice(&1_500_000i64.to_le_bytes());
        payload.extend_from_slice(&[0x13, 0xFC, 0x0A, 0x64, 0x00, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(payload.len(), 43);

        // chunk into fast-packet frames: 6 bytes after the header pair,
        // then 7 per continuation
        let id = frame_id(3, 129029, 0x23);
        let mut frames = Vec::new();
        let mut first = vec![0x40, payload.len() as u8];
        first.extend_from_slice(&payload[..6]);
        frames.push(first);
        let mut offset = 6;
        let mut counter = 1u8;
        while offset < payload.len() {
            let end = (offset + 7).min(payload.len());
            let mut frame = vec![0x40 | counter];
            frame.extend_from_slice(&payload[offset..end]);
            frame.resize(8, 0xFF);
            frames.push(frame);
            offset = end;
            counter += 1;
        }

        let mut result = None;
        for (i, frame) in frames.iter().enumerate() {
            let mapped = mapper.map(&raw_frame(id, frame)).unwrap();
            if i + 1 < frames.len() {
                assert!(mapped.is_none());
            } else {
                result = mapped;
            }
        }

        let mapped = result.expect("last frame completes the packet");
        let update = &mapped.updates[0];
        assert_eq!(update.values[0].path, "navigation.position");
        match &update.values[0].value {
            ValueData::Position(p) => {
                assert!((p.latitude - 52.9).abs() < 1e-9);
                assert_eq!(p.altitude, Some(1.5));
            }
            other => panic!("expected a position, got {:?}", other),
        }
    }

    #[test]
    fn test_dual_variant_manufacturer_match_selects_single_frame() {
        let mut mapper = mapper();
        let id = frame_id(3, 130824, 0x05);
        // manufacturer code 381 selects the single-frame variant, which is
        // recognized but maps to no path
        let data = [0x7D, 0x81, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mapped = mapper.map(&raw_frame(id, &data)).unwrap();
        assert!(mapped.is_none());
        assert_eq!(mapper.assembler.in_flight(), 0);
    }

    #[test]
    fn test_dual_variant_other_payload_goes_to_fast_path() {
        let mut mapper = mapper();
        let id = frame_id(3, 130824, 0x05);
        // first fast-packet frame of a 9-byte payload, not the single-frame
        // manufacturer code
        let data = [0x00, 9, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60];
        let mapped = mapper.map(&raw_frame(id, &data)).unwrap();
        assert!(mapped.is_none());
        assert_eq!(mapper.assembler.in_flight(), 1);
    }

    #[test]
    fn test_malformed_payload_is_a_decode_error() {
        let mut mapper = mapper();
        let raw = RawMessage::new("n2k0", ProtocolType::Nmea2000, b"garbage".to_vec());
        assert!(matches!(mapper.map(&raw), Err(MappingError::Decode(_))));
    }
}
