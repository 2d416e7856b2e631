//! Per-connection tunables for the SPX engine.

use crate::error::ConfigError;

/// Fixed-point scale of the congestion window: one segment is `CUNIT` units.
pub const CUNIT: u32 = 1024;

/// Number of consecutive duplicate acks that triggers a fast retransmit.
pub const REXMT_THRESHOLD: u8 = 3;

/// How far past the advertised window an out-of-band segment may land and
/// still be queued.
pub const OOB_SLACK: u16 = 60;

/// Largest span `recv_window + oob_slack` may cover. Sequence numbers
/// further apart than this no longer compare in order.
pub const MAX_WINDOW_SPAN: u16 = 0x7fff;

/// Slow timer ticks per second.
pub const SLOWHZ: u16 = 2;

/// Minimum retransmit timeout, in slow ticks.
pub const RTT_MIN: u16 = SLOWHZ;

/// Maximum retransmit timeout, in slow ticks.
pub const RTT_MAX: u16 = 64 * SLOWHZ;

/// Default round-trip time before any sample, in slow ticks.
pub const RTT_DEFAULT: u16 = 3 * SLOWHZ;

/// Minimum persist timeout, in slow ticks.
pub const PERSIST_MIN: u16 = 5 * SLOWHZ;

/// Maximum persist timeout, in slow ticks.
pub const PERSIST_MAX: u16 = 60 * SLOWHZ;

/// Maximum number of retransmit backoffs before the connection is dropped.
pub const MAX_RXT_SHIFT: u8 = 12;

/// Configuration for one SPX connection.
///
/// Windows are counted in segments. The congestion window is kept in
/// `congestion_unit` fixed-point units per segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of segments this side advertises it will accept beyond the
    /// cumulative ack point.
    pub recv_window: u16,
    /// Initial congestion window and slow-start threshold, in segments.
    pub initial_window: u16,
    /// Ceiling for the congestion window, in segments.
    pub max_congestion_window: u16,
    /// Fixed-point units per segment of congestion window.
    pub congestion_unit: u32,
    /// Consecutive duplicate acks before a fast retransmit.
    pub rexmt_threshold: u8,
    /// Delay acknowledgments requested by the peer instead of sending them
    /// immediately.
    pub delayed_ack: bool,
    /// Deliver whole datagrams, SPX header included, as separate records.
    pub packet_mode: bool,
    /// Honor end-of-message and datastream-type boundaries in stream mode.
    pub message_mode: bool,
    /// Slack past the advertised window tolerated for out-of-band segments.
    pub oob_slack: u16,
    /// Maximum number of out-of-order segments held at once. `None` means
    /// bounded only by memory.
    pub max_pending: Option<usize>,
    /// Lower bound for the retransmit timeout, in slow ticks.
    pub rtt_min: u16,
    /// Upper bound for the retransmit timeout, in slow ticks.
    pub rtt_max: u16,
    /// Lower bound for the persist timeout, in slow ticks.
    pub persist_min: u16,
    /// Upper bound for the persist timeout, in slow ticks.
    pub persist_max: u16,
    /// Retransmit backoffs allowed before the connection times out.
    pub max_rxt_shift: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recv_window: 8,
            initial_window: 8,
            max_congestion_window: 64,
            congestion_unit: CUNIT,
            rexmt_threshold: REXMT_THRESHOLD,
            delayed_ack: false,
            packet_mode: false,
            message_mode: false,
            oob_slack: OOB_SLACK,
            max_pending: None,
            rtt_min: RTT_MIN,
            rtt_max: RTT_MAX,
            persist_min: PERSIST_MIN,
            persist_max: PERSIST_MAX,
            max_rxt_shift: MAX_RXT_SHIFT,
        }
    }
}

impl Config {
    /// Checks that windows and units are non-zero, that the receive window
    /// and out-of-band slack stay within half the sequence space, and that
    /// every pair of bounds is ordered.
    ///
    /// # Errors
    ///
    /// Returns the first [ConfigError] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recv_window == 0 {
            return Err(ConfigError::ZeroValue("receive window"));
        }
        if self.initial_window == 0 {
            return Err(ConfigError::ZeroValue("initial window"));
        }
        if self.congestion_unit == 0 {
            return Err(ConfigError::ZeroValue("congestion unit"));
        }
        if self.rexmt_threshold == 0 {
            return Err(ConfigError::ZeroValue("duplicate ack threshold"));
        }
        if self.rtt_min == 0 {
            return Err(ConfigError::ZeroValue("minimum retransmit timeout"));
        }
        if u32::from(self.recv_window) + u32::from(self.oob_slack) > u32::from(MAX_WINDOW_SPAN) {
            return Err(ConfigError::WindowTooLarge {
                window: self.recv_window,
                slack: self.oob_slack,
                max: MAX_WINDOW_SPAN,
            });
        }
        if self.initial_window > self.max_congestion_window {
            return Err(ConfigError::InvertedBounds {
                name: "congestion window",
                min: self.initial_window,
                max: self.max_congestion_window,
            });
        }
        if self.rtt_min > self.rtt_max {
            return Err(ConfigError::InvertedBounds {
                name: "retransmit timeout",
                min: self.rtt_min,
                max: self.rtt_max,
            });
        }
        if self.persist_min > self.persist_max {
            return Err(ConfigError::InvertedBounds {
                name: "persist timeout",
                min: self.persist_min,
                max: self.persist_max,
            });
        }

        Ok(())
    }

    /// Builds a configuration from command-line style flags, starting from
    /// [Config::default].
    ///
    /// Recognized flags are `--window <segments>`, `--max-pending <count>`,
    /// `--delayed-ack`, `--packet-mode` and `--message-mode`. A `--port`
    /// flag and its value are skipped so the binary can read it separately.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown flags, missing or unparsable values, or a
    /// configuration that fails [Config::validate].
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let flag = arg.as_ref();

            match flag {
                "--delayed-ack" => config.delayed_ack = true,
                "--packet-mode" => config.packet_mode = true,
                "--message-mode" => config.message_mode = true,
                "--window" => config.recv_window = parse_value(flag, args.next())?,
                "--max-pending" => config.max_pending = Some(parse_value(flag, args.next())?),
                "--port" => {
                    let _: u16 = parse_value(flag, args.next())?;
                }
                _ => return Err(ConfigError::UnknownFlag(flag.to_string())),
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_value<T, S>(flag: &str, value: Option<S>) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    S: AsRef<str>,
{
    let value = value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))?;

    value
        .as_ref()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            flag: flag.to_string(),
            provided: value.as_ref().to_string(),
        })
}
