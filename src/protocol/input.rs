//! Header classification: acknowledgment, window and congestion updates
//! driven by each inbound segment's header.

use super::pcb::{PcbFlags, SpxPcb, range_set};
use super::seq;
use super::sockbuf::SendBuffer;
use crate::parse::SpxHeader;
use crate::{debug, warn};

impl SpxPcb {
    /// Applies the acknowledgment and window information carried by `header`.
    ///
    /// Returns `true` if the segment needs no further processing: a system
    /// packet, or a duplicate ack that triggered a fast retransmit.
    pub(crate) fn classify<S: SendBuffer>(&mut self, header: &SpxHeader, snd: &mut S) -> bool {
        if header.sa() {
            self.flags |= if self.config.delayed_ack {
                PcbFlags::DEL_ACK
            } else {
                PcbFlags::ACK_NOW
            };
        }

        if seq::gt(header.alo(), self.peer_alo) {
            self.flags |= PcbFlags::WIN;
        }

        let mut ack = header.ack();
        let mut counted_dup = false;

        if seq::leq(ack, self.send_ack_point) {
            if header.sp() && self.send_ack_point != self.send_max.wrapping_add(1) {
                self.stats.rcv_dup_ack += 1;
                counted_dup = true;

                if ack != self.send_ack_point || header.alo() != self.peer_alo {
                    self.duplicate_ack_count = 0;
                } else {
                    self.duplicate_ack_count = self.duplicate_ack_count.saturating_add(1);

                    if self.duplicate_ack_count == self.config.rexmt_threshold {
                        self.fast_retransmit(ack, snd);
                        return true;
                    }
                }
            } else {
                self.duplicate_ack_count = 0;
            }
        } else {
            self.duplicate_ack_count = 0;

            let limit = self.send_max.wrapping_add(1);
            if seq::gt(ack, limit) {
                self.stats.rcv_ack_too_much += 1;
                warn!("peer acknowledged {ack} but only sent through {}", self.send_max);
                ack = limit;
            }

            self.stats.rcv_ack_pack += 1;
            self.update_rtt(ack);

            if ack == limit {
                self.timers.rexmt = 0;
                self.flags |= PcbFlags::RXT;
            } else if self.timers.persist == 0 {
                self.timers.rexmt = self.rxt_cur;
            }

            self.open_congestion_window();

            snd.trim(ack);
            snd.notify_writable();
            self.send_ack_point = ack;
        }

        self.update_window(header, ack, counted_dup);

        if header.sp() {
            if seq::gt(header.seq(), self.recv_alo) {
                self.stats.rcv_win_probe += 1;
            }
            return true;
        }

        false
    }

    /// Resends from the ack point without waiting for the retransmit timer.
    fn fast_retransmit<S: SendBuffer>(&mut self, ack: u16, snd: &mut S) {
        let unit = self.config.congestion_unit.max(1);
        let prev_next = self.send_next;
        let prev_cwnd = self.congestion_window;

        self.send_next = ack;
        self.congestion_window = unit;
        self.ssthresh = (prev_cwnd / 2).max(2 * unit);

        snd.retransmit(self.send_next);

        self.timers.rexmt = self.rxt_cur;
        self.current_rtt = 0;
        self.stats.fast_retransmits += 1;

        if seq::gt(prev_next, self.send_next) {
            self.send_next = prev_next;
        }

        warn!(
            "fast retransmit from {ack} after {} duplicate acks (ssthresh: {})",
            self.duplicate_ack_count, self.ssthresh
        );
    }

    /// Folds a round-trip sample into the estimator if `ack` covers the
    /// segment being timed.
    fn update_rtt(&mut self, ack: u16) {
        if self.current_rtt == 0 || !seq::gt(ack, self.rtt_seq) {
            return;
        }

        self.stats.rtt_updated += 1;

        let sample = i32::from(self.current_rtt);

        if self.smoothed_rtt != 0 {
            let mut delta = sample - (self.smoothed_rtt >> 3);

            self.smoothed_rtt += delta;
            if self.smoothed_rtt <= 0 {
                self.smoothed_rtt = 1;
            }

            delta = delta.abs() - (self.rtt_variance >> 2);

            self.rtt_variance += delta;
            if self.rtt_variance <= 0 {
                self.rtt_variance = 1;
            }
        } else {
            // First measurement.
            self.smoothed_rtt = sample << 3;
            self.rtt_variance = sample << 1;
        }

        self.current_rtt = 0;
        self.rxt_shift = 0;
        self.rxt_cur = range_set(
            self.rtt_base(),
            self.config.rtt_min,
            self.config.rtt_max,
        );

        debug!(
            "rtt sample {sample} (srtt: {}, rttvar: {}, rto: {})",
            self.smoothed_rtt, self.rtt_variance, self.rxt_cur
        );
    }

    /// Unscaled retransmit timeout derived from the estimator.
    pub(crate) fn rtt_base(&self) -> i32 {
        ((self.smoothed_rtt >> 2) + self.rtt_variance) >> 1
    }

    /// Opens the congestion window by one segment per ack while at or below
    /// the slow-start threshold, and by roughly one segment per window after.
    fn open_congestion_window(&mut self) {
        let unit = u64::from(self.config.congestion_unit.max(1));
        let cwnd = u64::from(self.congestion_window);

        let incr = if cwnd > u64::from(self.ssthresh) {
            (unit * unit / cwnd).max(1)
        } else {
            unit
        };

        let grown = (cwnd + incr).min(u64::from(self.cwnd_max)) as u32;
        self.congestion_window = grown.max(unit as u32);
    }

    /// Takes the peer's window from `header` if it is newer than the last
    /// window update: a later sequence number, or the same one with a later
    /// ack or a larger allocation.
    fn update_window(&mut self, header: &SpxHeader, ack: u16, counted_dup: bool) {
        if seq::lt(self.send_next, self.send_ack_point) {
            self.send_next = self.send_ack_point;
        }

        let seq = header.seq();
        let alo = header.alo();

        let newer = seq::lt(self.wl1, seq)
            || (self.wl1 == seq
                && (seq::lt(self.wl2, ack) || (self.wl2 == ack && seq::lt(self.peer_alo, alo))));

        if !newer {
            return;
        }

        if counted_dup && self.wl2 == ack && seq::lt(self.peer_alo, alo) {
            // A pure window update, not a duplicate ack.
            self.stats.rcv_win_upd += 1;
            self.stats.rcv_dup_ack -= 1;
        }

        self.peer_alo = alo;
        self.wl1 = seq;
        self.wl2 = ack;
        self.send_window = 1u16.wrapping_add(alo).wrapping_sub(ack);
        if self.send_window > self.max_send_window {
            self.max_send_window = self.send_window;
        }
        self.flags |= PcbFlags::WIN;
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::protocol::pcb::{Disposition, PcbFlags, SpxPcb};
    use crate::protocol::segment::Segment;
    use crate::protocol::sockbuf::{RecvQueue, SendQueue};

    const UNIT: u32 = 1024;

    /// Connection that has sent segments 0..5 and heard nothing back.
    fn sender() -> (SpxPcb, RecvQueue, SendQueue) {
        let config = Config {
            recv_window: 10,
            initial_window: 2,
            ..Config::default()
        };
        let mut pcb = SpxPcb::with_sequence(config, 0, 1);
        let mut snd = SendQueue::new();

        for seq in 0..5 {
            snd.push(seq, vec![seq as u8]);
            pcb.on_transmit(seq);
        }

        (pcb, RecvQueue::new(), snd)
    }

    #[test]
    fn advancing_ack_trims_and_grows_window() {
        let (mut pcb, mut rcv, mut snd) = sender();

        let disp = pcb.on_segment(Segment::system(1, 2, 8), &mut rcv, &mut snd);

        assert_eq!(disp, Disposition::Control);
        assert_eq!(pcb.send_ack_point(), 2);
        assert_eq!(snd.first_seq(), Some(2));
        assert_eq!(snd.wakeups(), 1);
        // Slow start: one unit per ack.
        assert_eq!(pcb.congestion_window(), 3 * UNIT);
        assert_eq!(pcb.peer_alo(), 8);
        assert_eq!(pcb.send_window(), 7);
        assert_eq!(pcb.max_send_window(), 7);
        assert!(pcb.flags().contains(PcbFlags::WIN));
    }

    #[test]
    fn congestion_avoidance_grows_linearly() {
        let (mut pcb, mut rcv, mut snd) = sender();
        pcb.ssthresh = 2 * UNIT;
        pcb.congestion_window = 4 * UNIT;

        pcb.on_segment(Segment::system(1, 1, 8), &mut rcv, &mut snd);

        assert_eq!(pcb.congestion_window(), 4 * UNIT + UNIT / 4);
    }

    #[test]
    fn congestion_window_capped() {
        let (mut pcb, mut rcv, mut snd) = sender();
        pcb.cwnd_max = 2 * UNIT;

        pcb.on_segment(Segment::system(1, 1, 8), &mut rcv, &mut snd);

        assert_eq!(pcb.congestion_window(), 2 * UNIT);
    }

    #[test]
    fn ack_beyond_sent_is_clamped() {
        let (mut pcb, mut rcv, mut snd) = sender();

        pcb.on_segment(Segment::system(1, 40, 50), &mut rcv, &mut snd);

        assert_eq!(pcb.send_ack_point(), 5);
        assert_eq!(pcb.stats().rcv_ack_too_much, 1);
        assert_eq!(pcb.stats().anomalies(), 1);
        assert!(snd.is_empty());
        // Everything outstanding is acked: retransmit timer stops.
        assert_eq!(pcb.timers().rexmt, 0);
        assert!(pcb.flags().contains(PcbFlags::RXT));
    }

    #[test]
    fn first_rtt_sample_seeds_estimator() {
        let (mut pcb, mut rcv, mut snd) = sender();
        pcb.current_rtt = 4;

        pcb.on_segment(Segment::system(1, 1, 8), &mut rcv, &mut snd);

        assert_eq!(pcb.smoothed_rtt(), 32);
        assert_eq!(pcb.rtt_variance(), 8);
        assert_eq!(pcb.current_rtt_sample(), 0);
        // ((32 >> 2) + 8) >> 1
        assert_eq!(pcb.retransmit_timeout(), 8);
        assert_eq!(pcb.stats().rtt_updated, 1);
    }

    #[test]
    fn later_rtt_sample_smooths() {
        let (mut pcb, mut rcv, mut snd) = sender();
        pcb.smoothed_rtt = 32;
        pcb.rtt_variance = 8;
        pcb.rxt_shift = 3;
        pcb.current_rtt = 12;

        pcb.on_segment(Segment::system(1, 1, 8), &mut rcv, &mut snd);

        // delta = 12 - 4 = 8; srtt = 40; rttvar = 8 + (8 - 2) = 14.
        assert_eq!(pcb.smoothed_rtt(), 40);
        assert_eq!(pcb.rtt_variance(), 14);
        assert_eq!(pcb.backoff_shift(), 0);
        // ((40 >> 2) + 14) >> 1 = 12
        assert_eq!(pcb.retransmit_timeout(), 12);
    }

    #[test]
    fn rto_clamped_to_bounds() {
        let (mut pcb, mut rcv, mut snd) = sender();
        pcb.current_rtt = 1000;

        pcb.on_segment(Segment::system(1, 1, 8), &mut rcv, &mut snd);

        assert_eq!(pcb.retransmit_timeout(), pcb.config().rtt_max);
    }

    #[test]
    fn rtt_not_sampled_when_ack_misses_timed_segment() {
        let (mut pcb, mut rcv, mut snd) = sender();
        pcb.rtt_seq = 3;
        pcb.current_rtt = 4;

        pcb.on_segment(Segment::system(1, 3, 8), &mut rcv, &mut snd);

        assert_eq!(pcb.current_rtt_sample(), 4);
        assert_eq!(pcb.stats().rtt_updated, 0);
    }

    #[test]
    fn send_ack_request_sets_ack_flag() {
        let (mut pcb, mut rcv, mut snd) = sender();

        let seg = Segment::system(1, 0, 0).with_control(crate::parse::ControlBits::SA);
        pcb.on_segment(seg, &mut rcv, &mut snd);
        assert!(pcb.flags().contains(PcbFlags::ACK_NOW));

        pcb.config.delayed_ack = true;
        pcb.take_flags();
        let seg = Segment::system(1, 0, 0).with_control(crate::parse::ControlBits::SA);
        pcb.on_segment(seg, &mut rcv, &mut snd);
        assert!(pcb.flags().contains(PcbFlags::DEL_ACK));
        assert!(!pcb.flags().contains(PcbFlags::ACK_NOW));
    }

    #[test]
    fn stale_window_update_ignored() {
        let (mut pcb, mut rcv, mut snd) = sender();

        pcb.on_segment(Segment::system(3, 2, 9), &mut rcv, &mut snd);
        assert_eq!(pcb.peer_alo(), 9);

        // Older sequence number with a smaller allocation arrives late.
        pcb.on_segment(Segment::system(2, 2, 6), &mut rcv, &mut snd);
        assert_eq!(pcb.peer_alo(), 9);

        // Same sequence, same ack, larger allocation is taken.
        pcb.on_segment(Segment::system(3, 2, 11), &mut rcv, &mut snd);
        assert_eq!(pcb.peer_alo(), 11);
        assert_eq!(pcb.send_window(), 10);
        assert_eq!(pcb.stats().rcv_win_upd, 1);
    }

    #[test]
    fn three_duplicate_acks_fast_retransmit_once() {
        let (mut pcb, mut rcv, mut snd) = sender();
        pcb.congestion_window = 8 * UNIT;

        // Establish the peer's window at the current ack point.
        pcb.on_segment(Segment::system(1, 0, 7), &mut rcv, &mut snd);
        assert_eq!(pcb.duplicate_ack_count(), 0);

        for expected in 1..=2 {
            let disp = pcb.on_segment(Segment::system(1, 0, 7), &mut rcv, &mut snd);
            assert_eq!(disp, Disposition::Control);
            assert_eq!(pcb.duplicate_ack_count(), expected);
            assert!(snd.retransmits().is_empty());
        }

        pcb.on_segment(Segment::system(1, 0, 7), &mut rcv, &mut snd);

        assert_eq!(snd.retransmits(), &[0]);
        assert_eq!(pcb.congestion_window(), UNIT);
        assert_eq!(pcb.ssthresh(), 4 * UNIT);
        assert_eq!(pcb.timers().rexmt, pcb.retransmit_timeout());
        assert_eq!(pcb.current_rtt_sample(), 0);
        // Forward progress resumes where it left off.
        assert_eq!(pcb.send_next(), 5);
        assert_eq!(pcb.stats().fast_retransmits, 1);

        pcb.on_segment(Segment::system(1, 0, 7), &mut rcv, &mut snd);

        assert_eq!(pcb.duplicate_ack_count(), 4);
        assert_eq!(snd.retransmits(), &[0]);
        assert_eq!(pcb.stats().fast_retransmits, 1);
    }

    #[test]
    fn window_update_with_duplicate_ack_resets_count() {
        let (mut pcb, mut rcv, mut snd) = sender();

        pcb.on_segment(Segment::system(1, 0, 7), &mut rcv, &mut snd);
        pcb.on_segment(Segment::system(1, 0, 7), &mut rcv, &mut snd);
        pcb.on_segment(Segment::system(1, 0, 7), &mut rcv, &mut snd);
        assert_eq!(pcb.duplicate_ack_count(), 2);

        // Same ack point but a larger allocation: a window update, not a
        // third duplicate.
        let disp = pcb.on_segment(Segment::system(1, 0, 9), &mut rcv, &mut snd);

        assert_eq!(disp, Disposition::Control);
        assert_eq!(pcb.duplicate_ack_count(), 0);
        assert!(snd.retransmits().is_empty());
        assert_eq!(pcb.peer_alo(), 9);
        assert_eq!(pcb.stats().rcv_win_upd, 2);

        // Counting restarts against the new allocation.
        for _ in 0..3 {
            pcb.on_segment(Segment::system(1, 0, 9), &mut rcv, &mut snd);
        }
        assert_eq!(snd.retransmits(), &[0]);
    }

    #[test]
    fn no_duplicate_counting_when_nothing_outstanding() {
        let config = Config::default();
        let mut pcb = SpxPcb::new(config);
        let mut rcv = RecvQueue::new();
        let mut snd = SendQueue::new();

        for _ in 0..4 {
            pcb.on_segment(Segment::system(0, 0, 0), &mut rcv, &mut snd);
        }

        assert_eq!(pcb.duplicate_ack_count(), 0);
        assert_eq!(pcb.stats().rcv_dup_ack, 0);
        assert!(snd.retransmits().is_empty());
    }

    #[test]
    fn data_segment_acks_do_not_count_as_duplicates() {
        let (mut pcb, mut rcv, mut snd) = sender();

        for seq in 1..=4 {
            pcb.on_segment(Segment::data(seq, 0, 0, b"d"), &mut rcv, &mut snd);
        }

        assert_eq!(pcb.duplicate_ack_count(), 0);
        assert!(snd.retransmits().is_empty());
        assert_eq!(pcb.recv_ack(), 5);
    }

    #[test]
    fn window_probe_past_window_counted() {
        let (mut pcb, mut rcv, mut snd) = sender();

        let disp = pcb.on_segment(Segment::system(30, 0, 0), &mut rcv, &mut snd);

        assert_eq!(disp, Disposition::Control);
        assert_eq!(pcb.stats().rcv_win_probe, 1);
        assert_eq!(pcb.stats().window_violations, 0);
    }
}
