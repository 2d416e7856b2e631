//! Retransmit and persist timer expiry.
//!
//! Timer values live in [super::Timers] and are counted down by whoever owns
//! the slow clock, normally through [SpxPcb::on_slow_tick].

use std::io;

use super::pcb::{SpxPcb, range_set};
use super::seq;
use super::sockbuf::SendBuffer;
use crate::{Error, Result};
use crate::{debug, error, warn};

/// Multipliers applied to the retransmit timeout on successive backoffs.
pub const BACKOFF: [i32; 13] = [1, 2, 4, 8, 16, 32, 64, 64, 64, 64, 64, 64, 64];

/// The per-connection timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Retransmit timer.
    Retransmit,
    /// Persist timer, probing a closed peer window.
    Persist,
}

impl SpxPcb {
    /// Advances the connection's timers by one slow tick, handling any that
    /// expire, and ages the round trip being timed.
    ///
    /// # Errors
    ///
    /// Returns [io::ErrorKind::TimedOut] once the retransmit timer has backed
    /// off the maximum number of times. The caller should drop the
    /// connection.
    pub fn on_slow_tick<S: SendBuffer>(&mut self, snd: &mut S) -> Result<()> {
        if self.current_rtt != 0 {
            self.current_rtt = self.current_rtt.saturating_add(1);
        }

        if self.timers.rexmt != 0 {
            self.timers.rexmt -= 1;
            if self.timers.rexmt == 0 {
                self.on_timeout(Timer::Retransmit, snd)?;
            }
        }

        if self.timers.persist != 0 {
            self.timers.persist -= 1;
            if self.timers.persist == 0 {
                self.on_timeout(Timer::Persist, snd)?;
            }
        }

        Ok(())
    }

    /// Handles the expiry of `timer`.
    ///
    /// # Errors
    ///
    /// Returns [io::ErrorKind::TimedOut] if retransmit backoff is exhausted.
    pub fn on_timeout<S: SendBuffer>(&mut self, timer: Timer, snd: &mut S) -> Result<()> {
        match timer {
            Timer::Retransmit => {
                self.rxt_shift += 1;

                if self.rxt_shift > self.config.max_rxt_shift {
                    self.rxt_shift = self.config.max_rxt_shift;
                    self.stats.timeout_drops += 1;
                    error!(
                        "giving up after {} retransmit backoffs (send_ack_point: {})",
                        self.rxt_shift, self.send_ack_point
                    );

                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connection timed out",
                    )));
                }

                self.stats.rexmt_timeouts += 1;

                let rexmt = self.rtt_base() * backoff(self.rxt_shift);
                self.rxt_cur = range_set(rexmt, self.config.rtt_min, self.config.rtt_max);
                self.timers.rexmt = self.rxt_cur;

                // Fold the smoothed estimate into the variance; the next
                // sample reseeds it.
                if self.rxt_shift > self.config.max_rxt_shift / 4 {
                    self.rtt_variance += self.smoothed_rtt >> 3;
                    self.smoothed_rtt = 0;
                }

                self.send_next = self.send_ack_point;
                self.current_rtt = 0;

                // Close the congestion window to one segment and remember
                // half the usable window as the slow-start threshold.
                let unit = self.config.congestion_unit.max(1);
                let win = (u32::from(self.send_window).min(self.congestion_window / unit) / 2).max(2);
                self.congestion_window = unit;
                self.ssthresh = win * unit;

                warn!(
                    "retransmit timeout {} (shift: {}, rto: {}), resending from {}",
                    self.stats.rexmt_timeouts, self.rxt_shift, self.rxt_cur, self.send_next
                );

                snd.retransmit(self.send_next);
            }
            Timer::Persist => {
                self.stats.persist_timeouts += 1;
                self.start_persist();

                debug!(
                    "persist timeout, probing peer window at {} (peer_alo: {})",
                    self.send_next, self.peer_alo
                );

                snd.retransmit(self.send_next);
            }
        }

        Ok(())
    }

    /// Arms the persist timer with the current backed-off timeout. Used when
    /// the peer's window is closed and nothing is outstanding.
    pub fn start_persist(&mut self) {
        let base = self.rtt_base() * backoff(self.rxt_shift);

        self.timers.persist = range_set(base, self.config.persist_min, self.config.persist_max);

        if self.rxt_shift < self.config.max_rxt_shift {
            self.rxt_shift += 1;
        }
    }

    /// Returns `true` if the peer's window admits no new segment.
    pub fn peer_window_closed(&self) -> bool {
        seq::gt(self.send_next, self.peer_alo)
    }
}

fn backoff(shift: u8) -> i32 {
    BACKOFF[usize::from(shift).min(BACKOFF.len() - 1)]
}
