//! Sequenced Packet Exchange (SPX) reassembly and flow-control engine.
//!
//! Takes SPX segments as they arrive, updates acknowledgment, window,
//! round-trip and congestion state from their headers, and hands their data
//! to a receive buffer in sequence order with duplicates removed. Out of
//! order segments are held until the gap before them fills.
//!
//! The engine does no I/O of its own. Socket buffers are reached through the
//! [protocol::ReceiveBuffer] and [protocol::SendBuffer] traits.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod log;
pub mod parse;
pub mod protocol;

pub use config::Config;
pub use error::{ConfigError, Error, ParseError, Result};
