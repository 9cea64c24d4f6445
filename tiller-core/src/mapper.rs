//! The mapper seam.
//!
//! One implementation exists per protocol; the server selects the variant at
//! construction time from configuration. A mapper owns whatever per-instance
//! state its protocol needs (fast-packet accumulators, compiled-program
//! cache) and processes one message at a time.

use crate::error::MappingError;
use crate::message::{Mapped, RawMessage};

/// Converts one raw message into at most one canonical delta.
///
/// `Ok(None)` is a benign miss: a fast packet still accumulating, a PGN the
/// catalog does not know, a decoder set that maps nothing to a path. An
/// `Err` means the message was dropped; the next message is independent and
/// the caller just logs and continues.
pub trait Mapper {
    fn map(&mut self, raw: &RawMessage) -> Result<Option<Mapped>, MappingError>;
}
