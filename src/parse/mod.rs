//! Parsing and construction of SPX segment headers.

mod spx;

pub use spx::{ControlBits, SpxHeader};
