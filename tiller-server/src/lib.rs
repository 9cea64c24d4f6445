//! # Tiller Server
//!
//! Bus wiring and CLI around [`tiller_core`].
//!
//! The server runs exactly one mapper instance, selected by a JSON settings
//! file: it subscribes to a raw-message publisher, maps each message through
//! the configured protocol mapper and the aggregate stage, and republishes
//! the resulting deltas to its own subscribers.
//!
//! ```text
//! connector ──TCP/json──> [subscribe] ──> mapper ──> aggregate ──> [publish] ──TCP/json──> consumers
//! ```
//!
//! All I/O lives here; `tiller-core` stays pure.

use clap::Parser;
use std::path::PathBuf;

pub mod bus;
pub mod pipeline;
pub mod settings;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Path to the JSON settings file
    #[arg(short, long)]
    pub settings: PathBuf,
}
