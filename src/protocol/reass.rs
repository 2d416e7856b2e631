//! Reassembly of out-of-order segments and in-order delivery.

use std::collections::VecDeque;

use super::pcb::{Disposition, PcbFlags, ReassemblyState, SpxPcb};
use super::segment::Segment;
use super::seq;
use super::sockbuf::ReceiveBuffer;
use crate::{debug, warn};

/// Result of inserting into a [ReassemblyQueue].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insert {
    Queued,
    Duplicate,
    AllocationFailed,
}

/// Segments that arrived ahead of the cumulative ack point, held in strictly
/// increasing sequence order.
///
/// Entries are searched by their distance from the ack point rather than by
/// raw sequence number, which keeps the order correct across wraparound.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReassemblyQueue {
    entries: VecDeque<Segment>,
}

impl ReassemblyQueue {
    /// Returns the number of held segments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no segments are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the sequence numbers held, in delivery order.
    pub fn seqs(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(Segment::seq)
    }

    /// Returns the sequence number at the head of the queue.
    pub fn front_seq(&self) -> Option<u16> {
        self.entries.front().map(Segment::seq)
    }

    /// Inserts `seg`, keeping the queue ordered relative to `base`.
    ///
    /// Every held segment, and `seg`, must be after `base`.
    pub(crate) fn insert(&mut self, seg: Segment, base: u16, limit: Option<usize>) -> Insert {
        let key = seg.seq().wrapping_sub(base);

        let idx = match self
            .entries
            .binary_search_by_key(&key, |held| held.seq().wrapping_sub(base))
        {
            Ok(_) => return Insert::Duplicate,
            Err(idx) => idx,
        };

        if limit.is_some_and(|limit| self.entries.len() >= limit) {
            return Insert::AllocationFailed;
        }

        if self.entries.try_reserve(1).is_err() {
            return Insert::AllocationFailed;
        }

        self.entries.insert(idx, seg);
        Insert::Queued
    }

    /// Removes the head segment if it is numbered `next`.
    pub(crate) fn pop_if_next(&mut self, next: u16) -> Option<Segment> {
        match self.entries.front() {
            Some(head) if head.seq() == next => self.entries.pop_front(),
            _ => None,
        }
    }

    /// Drops every held segment, returning how many were released.
    pub(crate) fn clear(&mut self) -> usize {
        let released = self.entries.len();
        self.entries.clear();
        released
    }
}

impl SpxPcb {
    /// Admits a data segment that has passed the window checks.
    ///
    /// The segment numbered `recv_ack` is delivered at once along with
    /// everything queued behind it. Later segments are queued. Earlier ones
    /// and repeats of queued ones are discarded.
    pub(crate) fn admit<R: ReceiveBuffer>(&mut self, seg: Segment, rcv: &mut R) -> Disposition {
        let seq = seg.seq();

        if seq::lt(seq, self.recv_ack) {
            self.stats.rcv_dup_pack += 1;
            if seq == self.recv_ack.wrapping_sub(1) {
                self.stats.last_dup += 1;
            }
            debug!(
                "discarding duplicate segment {seq} (recv_ack: {})",
                self.recv_ack
            );

            return Disposition::Duplicate;
        }

        let ob = seg.header().ob();
        let urgent = seg.payload().first().copied();

        if seq == self.recv_ack {
            if ob {
                self.note_out_of_band(urgent, rcv);
            }

            return Disposition::Delivered(self.present(Some(seg), rcv));
        }

        match self.queue.insert(seg, self.recv_ack, self.config.max_pending) {
            Insert::Queued => {
                self.stats.rcv_oo_pack += 1;
                if ob {
                    self.note_out_of_band(urgent, rcv);
                }
                self.set_state(ReassemblyState::BACKLOGGED);

                Disposition::Queued
            }
            Insert::Duplicate => {
                self.stats.rcv_dup_pack += 1;
                debug!("discarding segment {seq}: already queued");

                Disposition::Duplicate
            }
            Insert::AllocationFailed => {
                self.stats.alloc_failures += 1;
                warn!(
                    "dropping segment {seq}: no room for another pending segment ({} held)",
                    self.queue.len()
                );

                Disposition::AllocationFailed
            }
        }
    }

    /// Delivers `first`, if given, followed by every queued segment that is
    /// now contiguous with `recv_ack`. Wakes the reader once if anything was
    /// delivered. Returns the number of segments delivered.
    pub(crate) fn present<R: ReceiveBuffer>(&mut self, first: Option<Segment>, rcv: &mut R) -> usize {
        self.set_state(ReassemblyState::DRAINING);

        let mut next = first;
        let mut delivered = 0;

        loop {
            let seg = match next.take() {
                Some(seg) => seg,
                None => match self.queue.pop_if_next(self.recv_ack) {
                    Some(seg) => seg,
                    None => break,
                },
            };

            self.deliver(seg, rcv);
            delivered += 1;
        }

        if delivered > 0 {
            rcv.notify_readable();
        }

        if self.queue.is_empty() {
            self.set_state(ReassemblyState::IDLE);
        } else {
            self.set_state(ReassemblyState::BACKLOGGED);
        }

        delivered
    }

    fn deliver<R: ReceiveBuffer>(&mut self, seg: Segment, rcv: &mut R) {
        let header = *seg.header();

        self.recv_ack = self.recv_ack.wrapping_add(1);
        self.stats.rcv_pack += 1;

        if header.ob() {
            self.flags.remove(PcbFlags::IOOB);
            rcv.mark_urgent(rcv.len());
        }

        if self.config.packet_mode {
            rcv.append_record(seg.into_datagram());
            return;
        }

        if self.config.message_mode {
            let last_dt = self.last_header.map_or(0, |h| h.datastream_type());
            if header.datastream_type() != last_dt {
                rcv.datastream_changed(header.datastream_type());
            }
        }

        self.last_header = Some(header);

        let data = seg.into_payload();
        if self.config.message_mode && header.em() {
            rcv.append_record(data);
        } else {
            rcv.append(data);
        }
    }

    fn note_out_of_band<R: ReceiveBuffer>(&mut self, urgent: Option<u8>, rcv: &mut R) {
        self.urgent_byte = urgent;
        self.flags.insert(PcbFlags::IOOB);
        rcv.has_out_of_band(urgent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(seq: u16) -> Segment {
        Segment::data(seq, 0, 0, &[seq as u8])
    }

    #[test]
    fn insert_keeps_order_and_rejects_repeats() {
        let mut queue = ReassemblyQueue::default();

        for s in [5, 3, 9, 4] {
            assert_eq!(queue.insert(seg(s), 1, None), Insert::Queued);
        }
        assert_eq!(queue.insert(seg(4), 1, None), Insert::Duplicate);

        assert_eq!(queue.seqs().collect::<Vec<_>>(), vec![3, 4, 5, 9]);
    }

    #[test]
    fn insert_orders_across_wrap() {
        let mut queue = ReassemblyQueue::default();
        let base = 0xfffd;

        for s in [1, 0xffff, 0, 0xfffe] {
            assert_eq!(queue.insert(seg(s), base, None), Insert::Queued);
        }

        assert_eq!(
            queue.seqs().collect::<Vec<_>>(),
            vec![0xfffe, 0xffff, 0, 1]
        );
    }

    #[test]
    fn insert_past_limit_fails() {
        let mut queue = ReassemblyQueue::default();

        assert_eq!(queue.insert(seg(2), 0, Some(1)), Insert::Queued);
        assert_eq!(queue.insert(seg(3), 0, Some(1)), Insert::AllocationFailed);
        // A repeat is still reported as such when full.
        assert_eq!(queue.insert(seg(2), 0, Some(1)), Insert::Duplicate);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pop_only_matching_head() {
        let mut queue = ReassemblyQueue::default();
        queue.insert(seg(3), 1, None);

        assert!(queue.pop_if_next(2).is_none());
        assert_eq!(queue.pop_if_next(3).map(|s| s.seq()), Some(3));
        assert!(queue.is_empty());
    }
}
