//! Fast-packet reassembly.
//!
//! A fast packet spreads up to 223 payload bytes over consecutive CAN
//! frames. Every frame's first byte carries a 3-bit sequence id and a 5-bit
//! frame counter; the first frame (counter 0) additionally carries the total
//! payload length. Accumulation state is keyed by (PGN, source address) and
//! owned by the mapper instance, so two talkers sending the same PGN never
//! interleave.

use crate::error::MappingError;
use std::collections::HashMap;

struct Accumulator {
    sequence: u8,
    next_counter: u8,
    expected: usize,
    data: Vec<u8>,
}

/// Reassembles fast-packet frames into complete payloads. There is no
/// recovery: any frame that does not continue the in-flight sequence for its
/// key discards that accumulation.
#[derive(Default)]
pub struct FastPacketAssembler {
    in_flight: HashMap<(u32, u8), Accumulator>,
}

impl FastPacketAssembler {
    pub fn new() -> FastPacketAssembler {
        FastPacketAssembler::default()
    }

    /// Accumulators currently awaiting frames.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Feeds one frame. Returns the assembled payload exactly once, on the
    /// frame that completes it; `None` while accumulating or after a dropped
    /// out-of-sequence frame.
    pub fn push(
        &mut self,
        pgn: u32,
        source: u8,
        frame_data: &[u8],
    ) -> Result<Option<Vec<u8>>, MappingError> {
        let header = *frame_data.first().ok_or_else(|| {
            MappingError::Decode(format!("empty fast-packet frame for PGN {}", pgn))
        })?;
        let sequence = header >> 5;
        let counter = header & 0x1F;
        let key = (pgn, source);

        if counter == 0 {
            if frame_data.len() < 2 {
                return Err(MappingError::Decode(format!(
                    "first fast-packet frame for PGN {} carries no length byte",
                    pgn
                )));
            }
            let expected = frame_data[1] as usize;
            if self.in_flight.remove(&key).is_some() {
                log::debug!(
                    "discarding in-flight fast packet for PGN {} source {}",
                    pgn,
                    source
                );
            }
            let mut data = Vec::with_capacity(expected);
            data.extend_from_slice(&frame_data[2..]);
            return Ok(self.finish_or_store(
                key,
                Accumulator {
                    sequence,
                    next_counter: 1,
                    expected,
                    data,
                },
            ));
        }

        let accumulator = match self.in_flight.get_mut(&key) {
            Some(a) => a,
            None => {
                log::debug!(
                    "dropping fast-packet continuation for PGN {} source {} with no first frame",
                    pgn,
                    source
                );
                return Ok(None);
            }
        };
        if accumulator.sequence != sequence || accumulator.next_counter != counter {
            log::debug!(
                "out-of-sequence fast-packet frame for PGN {} source {}, discarding accumulation",
                pgn,
                source
            );
            self.in_flight.remove(&key);
            return Ok(None);
        }

        accumulator.next_counter += 1;
        accumulator.data.extend_from_slice(&frame_data[1..]);
        if accumulator.data.len() >= accumulator.expected {
            let mut accumulator = self
                .in_flight
                .remove(&key)
                .ok_or_else(|| MappingError::Decode("accumulator vanished".to_string()))?;
            accumulator.data.truncate(accumulator.expected);
            return Ok(Some(accumulator.data));
        }
        Ok(None)
    }

    fn finish_or_store(&mut self, key: (u32, u8), mut accumulator: Accumulator) -> Option<Vec<u8>> {
        if accumulator.data.len() >= accumulator.expected {
            accumulator.data.truncate(accumulator.expected);
            return Some(accumulator.data);
        }
        self.in_flight.insert(key, accumulator);
        None
    }
}
