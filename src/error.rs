//! Error types for SPX header parsing, configuration and socket I/O.
//!
//! Conditions met while processing a segment (duplicates, window violations,
//! allocation failures) are not errors; they are reported through
//! [`crate::protocol::Disposition`].

use std::{error, fmt, io, result};

/// A convenience wrapper around `Result` for [crate::Error].
pub type Result<T> = result::Result<T, Error>;

/// Set of errors that can occur around the SPX engine.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error while reading or writing a datagram, or a connection timing out.
    Io(io::Error),
    /// Error parsing an SPX header.
    Parse(ParseError),
    /// Invalid engine configuration.
    Config(ConfigError),
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Error {
        Error::Config(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref err) => fmt::Display::fmt(err, f),
            Error::Parse(ref err) => fmt::Display::fmt(err, f),
            Error::Config(ref err) => fmt::Display::fmt(err, f),
        }
    }
}

/// Error occurred while trying to parse an SPX segment.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ParseError {
    /// Input buffer shorter than a full SPX header.
    InvalidBufferLength { provided: usize, min: usize },
}

impl error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::InvalidBufferLength { provided, min } => {
                write!(
                    f,
                    "invalid SPX header length: {provided} bytes (less than minimum required {min} bytes)"
                )
            }
        }
    }
}

/// Error occurred while building or validating a [`crate::Config`].
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ConfigError {
    /// A window or unit that must be non-zero was zero.
    ZeroValue(&'static str),
    /// A lower bound exceeds its upper bound.
    InvertedBounds {
        name: &'static str,
        min: u16,
        max: u16,
    },
    /// The receive window plus out-of-band slack spans half the sequence
    /// space or more.
    WindowTooLarge { window: u16, slack: u16, max: u16 },
    /// A command-line flag value could not be parsed.
    InvalidValue { flag: String, provided: String },
    /// A command-line flag expecting a value was last on the line.
    MissingValue(String),
    /// An unrecognized command-line flag.
    UnknownFlag(String),
}

impl error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroValue(name) => write!(f, "invalid {name}: must be greater than 0"),
            ConfigError::InvertedBounds { name, min, max } => {
                write!(
                    f,
                    "invalid {name} bounds: minimum {min} exceeds maximum {max}"
                )
            }
            ConfigError::WindowTooLarge { window, slack, max } => {
                write!(
                    f,
                    "invalid receive window: {window} segments plus {slack} out-of-band slack exceeds {max}"
                )
            }
            ConfigError::InvalidValue { flag, provided } => {
                write!(f, "invalid value for {flag}: {provided:?}")
            }
            ConfigError::MissingValue(flag) => write!(f, "missing value for {flag}"),
            ConfigError::UnknownFlag(flag) => write!(f, "unknown flag: {flag}"),
        }
    }
}
