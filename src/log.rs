//! Leveled logging for SPX connection events.
//!
//! Messages at or below the current maximum [Level] are written with a local
//! timestamp and the source tag `spx`. The maximum level defaults to
//! [Level::Info] and can be changed with [set_max_level] or read from the
//! `SPX_LOG` environment variable with [init_from_env].

use std::env;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time;

/// Source of the log message.
const SOURCE: &str = "spx";

/// Environment variable consulted by [init_from_env].
pub const LOG_ENV: &str = "SPX_LOG";

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Logs a message at the [Level::Error] level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Error, format_args!($($arg)+));
    }};
}

/// Logs a message at the [Level::Warn] level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Warn, format_args!($($arg)+));
    }};
}

/// Logs a message at the [Level::Info] level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Info, format_args!($($arg)+));
    }};
}

/// Logs a message at the [Level::Debug] level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Debug, format_args!($($arg)+));
    }};
}

/// Severity levels for log messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Designates very serious errors.
    Error = 1,
    /// Designates hazardous situations, such as protocol anomalies.
    Warn = 2,
    /// Designates useful information.
    Info = 3,
    /// Designates lower priority information.
    Debug = 4,
}

impl Level {
    /// Parses a level name (`error`, `warn`, `info`, `debug`), ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" | "warning" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            _ => None,
        }
    }
}

/// Sets the most verbose level that will be emitted.
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns `true` if a message at `level` would be emitted.
pub fn enabled(level: Level) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

/// Sets the maximum level from the `SPX_LOG` environment variable, leaving
/// the current level untouched if it is unset or unrecognized.
pub fn init_from_env() {
    if let Some(level) = env::var(LOG_ENV).ok().as_deref().and_then(Level::from_name) {
        set_max_level(level);
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// [Level::Info] and [Level::Debug] to `stdout`, [Level::Warn] and
    /// [Level::Error] to `stderr`.
    Split,
    /// Every level to `stderr`, leaving `stdout` for data.
    Stderr,
}

static STDERR_ONLY: AtomicBool = AtomicBool::new(false);

/// Sets where log lines are written. Defaults to [Target::Split].
pub fn set_target(target: Target) {
    STDERR_ONLY.store(target == Target::Stderr, Ordering::Relaxed);
}

/// Returns the current [Target].
pub fn target() -> Target {
    if STDERR_ONLY.load(Ordering::Relaxed) {
        Target::Stderr
    } else {
        Target::Split
    }
}

/// Returns `true` if a message at `level` goes to `stderr` under `target`.
fn to_stderr(level: Level, target: Target) -> bool {
    target == Target::Stderr || level <= Level::Warn
}

/// Logs a message with the specified severity level, to the stream chosen
/// by the current [Target].
pub fn log(level: Level, msg: impl std::fmt::Display) {
    if !enabled(level) {
        return;
    }

    let timestamp = timestamp();

    let tag = match level {
        Level::Error => "\x1b[1;31mERROR\x1b[0m",
        Level::Warn => "\x1b[1;33mWARN \x1b[0m",
        Level::Info => "\x1b[1;32mINFO \x1b[0m",
        Level::Debug => "\x1b[1;34mDEBUG\x1b[0m",
    };

    if to_stderr(level, target()) {
        eprintln!("[\x1b[1;37m{timestamp}\x1b[0m] {tag} [\x1b[1;37m{SOURCE}\x1b[0m] {msg}");
    } else {
        println!("[\x1b[1;37m{timestamp}\x1b[0m] {tag} [\x1b[1;37m{SOURCE}\x1b[0m] {msg}");
    }
}

/// Formats the current local time as `YYYY-MM-DD HH:MM:SS`.
fn timestamp() -> String {
    let now = time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as libc::time_t;

    // SAFETY: `tm` is plain data and `localtime_r` only writes into it.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    let res = unsafe { libc::localtime_r(&now, &mut tm) };

    if res.is_null() {
        return "UNKNOWN".to_string();
    }

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}
