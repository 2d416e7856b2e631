//! The SPX connection control block.

use bitflags::bitflags;

use super::reass::ReassemblyQueue;
use super::segment::Segment;
use super::seq;
use super::sockbuf::{ReceiveBuffer, SendBuffer};
use super::stats::Stats;
use crate::config::{Config, MAX_WINDOW_SPAN, RTT_DEFAULT};
use crate::parse::{ControlBits, SpxHeader};
use crate::{debug, warn};

bitflags! {
    /// Requests and conditions the engine raises for the output path.
    pub struct PcbFlags: u8 {
        /// Send an acknowledgment immediately.
        const ACK_NOW = 0x01;
        /// Send an acknowledgment on the next delayed-ack tick.
        const DEL_ACK = 0x02;
        /// The peer's window changed; output may be able to send.
        const WIN = 0x04;
        /// Everything outstanding was acknowledged; restart output.
        const RXT = 0x08;
        /// Out-of-band data announced but not yet delivered.
        const IOOB = 0x10;
    }
}

/// State of the reassembly queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
pub enum ReassemblyState {
    /// Nothing is held out of order.
    IDLE,
    /// Segments are held, waiting for a gap before them to fill.
    BACKLOGGED,
    /// Contiguous segments are being handed to the receive buffer.
    DRAINING,
}

/// What became of a segment handed to [SpxPcb::on_segment].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Fully handled from its header: a system packet, a window probe, or an
    /// ack that triggered a fast retransmit.
    Control,
    /// In sequence; this many segments were delivered, counting the ones it
    /// released from the queue.
    Delivered(usize),
    /// Ahead of sequence and held for later delivery.
    Queued,
    /// Already delivered or already queued; discarded.
    Duplicate,
    /// Beyond the advertised receive window; discarded.
    WindowViolation,
    /// No pending entry could be allocated; discarded as if lost in transit.
    AllocationFailed,
}

impl Disposition {
    /// Returns `true` if classification alone handled the segment.
    pub fn handled_as_control(&self) -> bool {
        matches!(self, Disposition::Control)
    }
}

/// Retransmit and persist timer values, in slow ticks. Zero means stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timers {
    /// Retransmit timer.
    pub rexmt: u16,
    /// Persist timer.
    pub persist: u16,
}

/// SPX connection control block.
///
/// Holds the send and receive sequence state, congestion control and RTT
/// estimation state, and the reassembly queue of one connection. All
/// sequence numbers count segments and wrap at 2^16.
///
/// ```text
///                  acknowledged    outstanding      allowed
///              ---------------|---------------|---------------|-----
///                      send_ack_point     send_next       peer_alo
///
///                  delivered       accepted        refused
///              ---------------|---------------|---------------
///                          recv_ack        recv_alo
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpxPcb {
    pub(crate) config: Config,
    /// Initial send sequence number.
    iss: u16,
    /// Initial receive sequence number.
    irs: u16,

    /// Next sequence number to send.
    pub(crate) send_next: u16,
    /// Highest sequence number sent.
    pub(crate) send_max: u16,
    /// Next sequence number the peer expects (everything before is acked).
    pub(crate) send_ack_point: u16,
    /// Highest sequence number the peer will accept.
    pub(crate) peer_alo: u16,
    /// Segment sequence number used for the last window update.
    pub(crate) wl1: u16,
    /// Segment ack number used for the last window update.
    pub(crate) wl2: u16,
    /// Send window advertised by the peer, in segments.
    pub(crate) send_window: u16,
    /// Largest send window ever advertised.
    pub(crate) max_send_window: u16,

    /// Next sequence number expected from the peer.
    pub(crate) recv_ack: u16,
    /// Highest sequence number this side will accept.
    pub(crate) recv_alo: u16,

    /// Congestion window, in `config.congestion_unit` units per segment.
    pub(crate) congestion_window: u32,
    /// Slow-start threshold, same units.
    pub(crate) ssthresh: u32,
    /// Ceiling for the congestion window, same units.
    pub(crate) cwnd_max: u32,
    /// Consecutive duplicate acks seen for the current ack point.
    pub(crate) duplicate_ack_count: u8,

    /// Smoothed round-trip time, scaled by 8.
    pub(crate) smoothed_rtt: i32,
    /// Round-trip time variance, scaled by 4.
    pub(crate) rtt_variance: i32,
    /// Ticks since the timed segment was sent; 0 when not timing.
    pub(crate) current_rtt: u16,
    /// Sequence number being timed.
    pub(crate) rtt_seq: u16,
    /// Current retransmit timeout, in slow ticks.
    pub(crate) rxt_cur: u16,
    /// Retransmit backoff exponent.
    pub(crate) rxt_shift: u8,
    pub(crate) timers: Timers,

    pub(crate) flags: PcbFlags,
    /// First byte of the most recently announced out-of-band segment.
    pub(crate) urgent_byte: Option<u8>,
    /// Header of the last segment delivered in stream mode.
    pub(crate) last_header: Option<SpxHeader>,

    pub(crate) state: ReassemblyState,
    pub(crate) queue: ReassemblyQueue,
    pub(crate) stats: Stats,
}

impl SpxPcb {
    /// Creates a control block whose send and receive sequences both start at
    /// 0.
    pub fn new(config: Config) -> Self {
        Self::with_sequence(config, 0, 0)
    }

    /// Creates a control block that will send starting at `iss` and expects
    /// the peer's first segment to be numbered `irs`.
    pub fn with_sequence(config: Config, iss: u16, irs: u16) -> Self {
        let unit = config.congestion_unit.max(1);
        let cwnd = u32::from(config.initial_window.max(1)) * unit;
        let cwnd_max = (u32::from(config.max_congestion_window) * unit).max(unit);
        let rtt_variance = i32::from(RTT_DEFAULT) << 2;
        let rxt_cur = range_set(rtt_variance >> 1, config.rtt_min, config.rtt_max);
        let space = config.recv_window.clamp(1, max_space(&config));
        let recv_alo = irs.wrapping_add(space).wrapping_sub(1);

        Self {
            iss,
            irs,
            send_next: iss,
            send_max: iss.wrapping_sub(1),
            send_ack_point: iss,
            peer_alo: iss,
            wl1: irs.wrapping_sub(1),
            wl2: iss,
            send_window: 1,
            max_send_window: 1,
            recv_ack: irs,
            recv_alo,
            congestion_window: cwnd,
            ssthresh: cwnd,
            cwnd_max,
            duplicate_ack_count: 0,
            smoothed_rtt: 0,
            rtt_variance,
            current_rtt: 0,
            rtt_seq: 0,
            rxt_cur,
            rxt_shift: 0,
            timers: Timers::default(),
            flags: PcbFlags::empty(),
            urgent_byte: None,
            last_header: None,
            state: ReassemblyState::IDLE,
            queue: ReassemblyQueue::default(),
            stats: Stats::default(),
            config,
        }
    }

    /// Resets the reassembly queue, counters, sequence cursors and congestion
    /// state to what a newly opened connection has.
    pub fn initialize(&mut self) {
        let released = self.flush_pending();
        if released > 0 {
            debug!("initialize released {released} pending segments");
        }

        *self = Self::with_sequence(self.config.clone(), self.iss, self.irs);
    }

    /// Releases every segment held for reassembly. Called when the connection
    /// closes, whether or not all data was delivered.
    pub fn flush_pending(&mut self) -> usize {
        let released = self.queue.clear();

        self.flags.remove(PcbFlags::IOOB);
        self.set_state(ReassemblyState::IDLE);

        if released > 0 {
            debug!(
                "released {released} undelivered segments (recv_ack: {})",
                self.recv_ack
            );
        }

        released
    }

    /// Processes one inbound segment: classifies its header, then admits its
    /// data to reassembly and delivers whatever became contiguous.
    pub fn on_segment<R, S>(&mut self, seg: Segment, rcv: &mut R, snd: &mut S) -> Disposition
    where
        R: ReceiveBuffer,
        S: SendBuffer,
    {
        log_segment(&seg);
        self.stats.rcv_total += 1;

        if self.classify(seg.header(), snd) {
            return Disposition::Control;
        }

        let header = seg.header();

        if seq::gt(header.seq(), self.recv_alo) {
            self.stats.rcv_pack_after_win += 1;

            let slack_edge = self.recv_alo.wrapping_add(self.config.oob_slack);
            if !header.ob() || seq::gt(header.seq(), slack_edge) {
                self.stats.window_violations += 1;
                warn!(
                    "segment {} beyond receive window (recv_alo: {}, out-of-band: {})",
                    header.seq(),
                    self.recv_alo,
                    header.ob()
                );

                return Disposition::WindowViolation;
            }
        }

        self.admit(seg, rcv)
    }

    /// Records that the segment numbered `seq` was handed to the network.
    ///
    /// Advances `send_next` and `send_max`, starts timing a round trip if none
    /// is being timed, and arms the retransmit timer if it is stopped.
    pub fn on_transmit(&mut self, seq: u16) {
        if seq::geq(seq, self.send_next) {
            self.send_next = seq.wrapping_add(1);
        }

        if seq::gt(seq, self.send_max) {
            self.send_max = seq;

            if self.current_rtt == 0 {
                self.current_rtt = 1;
                self.rtt_seq = seq;
            }
        }

        if self.timers.rexmt == 0 && self.send_next != self.send_ack_point {
            self.timers.rexmt = self.rxt_cur;
            if self.timers.persist != 0 {
                self.timers.persist = 0;
                self.rxt_shift = 0;
            }
        }
    }

    /// Moves the receive window's upper edge to `recv_ack + space - 1` if that
    /// is further than the current edge. Returns the resulting edge.
    ///
    /// `space` is capped so the window and out-of-band slack stay within half
    /// the sequence space.
    pub fn advertise_window(&mut self, space: u16) -> u16 {
        let space = space.min(max_space(&self.config));

        if space > 0 {
            let alo = self.recv_ack.wrapping_add(space - 1);
            if seq::gt(alo, self.recv_alo) {
                self.recv_alo = alo;
            }
        }

        self.recv_alo
    }

    /// Builds the system packet that acknowledges everything delivered so far
    /// and advertises the current receive window.
    pub fn ack_header(&self, sid: u16, did: u16) -> SpxHeader {
        let mut header = SpxHeader::new(sid, did, self.send_next, self.recv_ack, self.recv_alo);
        header.set_control(ControlBits::SP);
        header
    }

    /// Returns and clears the pending output requests. [PcbFlags::IOOB]
    /// reflects receive state and is left in place.
    pub fn take_flags(&mut self) -> PcbFlags {
        let taken = self.flags - PcbFlags::IOOB;
        self.flags &= PcbFlags::IOOB;
        taken
    }

    pub(crate) fn set_state(&mut self, next: ReassemblyState) {
        if self.state != next {
            debug!(
                "reassembly (recv_ack: {}, pending: {}): {:?} -> {:?}",
                self.recv_ack,
                self.queue.len(),
                self.state,
                next
            );
            self.state = next;
        }
    }

    /// Returns the configuration this connection runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the next sequence number to send.
    pub fn send_next(&self) -> u16 {
        self.send_next
    }

    /// Returns the highest sequence number sent.
    pub fn send_max(&self) -> u16 {
        self.send_max
    }

    /// Returns the peer's cumulative ack point.
    pub fn send_ack_point(&self) -> u16 {
        self.send_ack_point
    }

    /// Returns the highest sequence number the peer will accept.
    pub fn peer_alo(&self) -> u16 {
        self.peer_alo
    }

    /// Returns the send window advertised by the peer, in segments.
    pub fn send_window(&self) -> u16 {
        self.send_window
    }

    /// Returns the largest send window the peer has advertised.
    pub fn max_send_window(&self) -> u16 {
        self.max_send_window
    }

    /// Returns the next sequence number expected from the peer.
    pub fn recv_ack(&self) -> u16 {
        self.recv_ack
    }

    /// Returns the highest sequence number this side will accept.
    pub fn recv_alo(&self) -> u16 {
        self.recv_alo
    }

    /// Returns the congestion window in congestion units.
    pub fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    /// Returns the slow-start threshold in congestion units.
    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// Returns the number of consecutive duplicate acks seen.
    pub fn duplicate_ack_count(&self) -> u8 {
        self.duplicate_ack_count
    }

    /// Returns the smoothed round-trip time, scaled by 8.
    pub fn smoothed_rtt(&self) -> i32 {
        self.smoothed_rtt
    }

    /// Returns the round-trip time variance, scaled by 4.
    pub fn rtt_variance(&self) -> i32 {
        self.rtt_variance
    }

    /// Returns the ticks elapsed for the round trip being timed, or 0.
    pub fn current_rtt_sample(&self) -> u16 {
        self.current_rtt
    }

    /// Returns the current retransmit timeout, in slow ticks.
    pub fn retransmit_timeout(&self) -> u16 {
        self.rxt_cur
    }

    /// Returns the retransmit backoff exponent.
    pub fn backoff_shift(&self) -> u8 {
        self.rxt_shift
    }

    /// Returns the timer values.
    pub fn timers(&self) -> Timers {
        self.timers
    }

    /// Returns the pending output requests without clearing them.
    pub fn flags(&self) -> PcbFlags {
        self.flags
    }

    /// Returns the first byte of the last out-of-band segment announced.
    pub fn urgent_byte(&self) -> Option<u8> {
        self.urgent_byte
    }

    /// Returns the header of the last segment delivered in stream mode.
    pub fn last_header(&self) -> Option<&SpxHeader> {
        self.last_header.as_ref()
    }

    /// Returns the reassembly state.
    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    /// Returns the reassembly queue.
    pub fn pending(&self) -> &ReassemblyQueue {
        &self.queue
    }

    /// Returns the event counters.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Largest receive window, in segments, that leaves room for the
/// out-of-band slack.
fn max_space(config: &Config) -> u16 {
    MAX_WINDOW_SPAN.saturating_sub(config.oob_slack).max(1)
}

/// Clamps `value` into `[min, max]`.
#[inline]
pub(crate) fn range_set(value: i32, min: u16, max: u16) -> u16 {
    value.clamp(i32::from(min), i32::from(max.max(min))) as u16
}

/// Logs the header fields of an inbound segment.
#[inline]
fn log_segment(seg: &Segment) {
    let h = seg.header();

    debug!(
        "received spx segment | sid: {}, did: {}, seq: {}, ack: {}, alo: {}, sp: {}, sa: {}, ob: {}, em: {}, dt: {}, payload: {} bytes",
        h.sid(),
        h.did(),
        h.seq(),
        h.ack(),
        h.alo(),
        h.sp(),
        h.sa(),
        h.ob(),
        h.em(),
        h.datastream_type(),
        seg.payload().len(),
    );
}
