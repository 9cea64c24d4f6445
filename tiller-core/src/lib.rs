//! # Tiller Core
//!
//! Platform-independent mapping library turning raw marine sensor traffic
//! into SignalK-style delta messages.
//!
//! This crate contains pure decoding and rule-evaluation logic with **zero
//! I/O dependencies**. Transport (where raw messages come from, where deltas
//! go) lives in `tiller-server`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  tiller-core (platform-independent, no tokio/async deps)    │
//! │  ├── message/     (raw and mapped message model)            │
//! │  ├── expression/  (CEL engine, marine builtins, env merge)  │
//! │  ├── canbus/      (DBC-driven bit-exact signal extraction)  │
//! │  ├── nmea2000/    (PGN catalog + fast-packet reassembly)    │
//! │  ├── nmea0183/    (sentence parsing, capability traits)     │
//! │  ├── modbus/ csv/ (register windows, prefix-matched lines)  │
//! │  └── aggregate/   (cross-path derived values)               │
//! └──────────────────────────────────────────────────────────────┘
//!                              ▲
//!                  ┌───────────┴───────────┐
//!                  │  tiller-server        │
//!                  │  (tokio message bus)  │
//!                  └───────────────────────┘
//! ```
//!
//! ## Key Modules
//!
//! - [`message`] - the canonical data model shared by every mapper
//! - [`expression`] - the embedded expression engine and its builtins
//! - [`mapper`] - the [`Mapper`](mapper::Mapper) trait each protocol implements
//! - [`canbus`], [`nmea2000`], [`nmea0183`], [`modbus`], [`csv`] - protocol mappers
//! - [`aggregate`] - the post-stage deriving values across paths

pub mod aggregate;
pub mod canbus;
pub mod config;
pub mod csv;
pub mod error;
pub mod expression;
pub mod frame;
pub mod mapper;
pub mod message;
pub mod modbus;
pub mod nmea0183;
pub mod nmea2000;

pub use aggregate::AggregateMapper;
pub use canbus::CanBusMapper;
pub use csv::CsvMapper;
pub use error::MappingError;
pub use mapper::Mapper;
pub use message::{Mapped, RawMessage};
pub use modbus::ModbusMapper;
pub use nmea0183::Nmea0183Mapper;
pub use nmea2000::Nmea2000Mapper;
