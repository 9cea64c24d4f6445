//! Error types for the mapping core

use thiserror::Error;

/// Errors that can occur while mapping raw traffic to deltas.
///
/// The variants split along operational lines: `Decode` drops one message,
/// `Unavailable`/`Unmapped` are expected misses, the expression variants omit
/// a single derived value, and `Configuration`/`CatalogInvariant` indicate a
/// static setup problem that should abort startup rather than be tolerated
/// per message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    /// Raw payload could not be decoded; the message is dropped and the next
    /// one is independent.
    #[error("Could not decode raw payload: {0}")]
    Decode(String),

    /// The sentence parsed, but the requested reading is not usable right now
    /// (validity flag not set, field absent).
    #[error("Value is unavailable: {0}")]
    Unavailable(String),

    /// No catalog entry or mapping rule matched; normal bus traffic contains
    /// plenty of these.
    #[error("No mapping for input: {0}")]
    Unmapped(String),

    /// The rule's expression text does not compile.
    #[error("Could not compile expression {expression:?}: {message}")]
    ExpressionCompile { expression: String, message: String },

    /// The rule's expression failed against this message's environment.
    #[error("Could not run expression {expression:?}: {message}")]
    ExpressionRuntime { expression: String, message: String },

    /// A value that must be numeric is not, at the named position.
    #[error("The value in position {position} can not be converted to a float")]
    Type { position: usize },

    /// Static configuration is wrong (rule tables, interpolation tables,
    /// duplicate environment keys). Surfaces at load time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The external PGN catalog no longer satisfies a structural invariant
    /// this code depends on. Fatal at startup.
    #[error("PGN catalog invariant violated: {0}")]
    CatalogInvariant(String),
}

impl MappingError {
    /// True for errors that indicate broken static configuration and must
    /// halt startup instead of being skipped per message.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MappingError::Configuration(_) | MappingError::CatalogInvariant(_)
        )
    }
}
