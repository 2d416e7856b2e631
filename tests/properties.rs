use proptest::prelude::*;

use spx::Config;
use spx::protocol::{Disposition, RecvQueue, Segment, SendQueue, SpxPcb};

const WINDOW: u16 = 64;

fn receiver(irs: u16) -> (SpxPcb, RecvQueue, SendQueue) {
    let config = Config {
        recv_window: WINDOW,
        ..Config::default()
    };

    (
        SpxPcb::with_sequence(config, 0, irs),
        RecvQueue::new(),
        SendQueue::new(),
    )
}

/// A permutation of `0..n` for some `n` within the receive window.
fn arrival_order() -> impl Strategy<Value = Vec<u16>> {
    (1..=WINDOW).prop_flat_map(|n| Just((0..n).collect::<Vec<u16>>()).prop_shuffle())
}

/// Distance of every pending segment from the ack point, in queue order.
fn pending_offsets(pcb: &SpxPcb) -> Vec<u16> {
    pcb.pending()
        .seqs()
        .map(|seq| seq.wrapping_sub(pcb.recv_ack()))
        .collect()
}

proptest! {
    #[test]
    fn any_arrival_order_delivers_in_sequence(irs in any::<u16>(), order in arrival_order()) {
        let (mut pcb, mut rcv, mut snd) = receiver(irs);
        let mut delivered_through = 0u16;

        for idx in &order {
            let seg = Segment::data(irs.wrapping_add(*idx), 0, 0, &idx.to_be_bytes());
            let disposition = pcb.on_segment(seg, &mut rcv, &mut snd);
            prop_assert!(matches!(disposition, Disposition::Delivered(_) | Disposition::Queued));

            let offsets = pending_offsets(&pcb);
            prop_assert!(offsets.windows(2).all(|w| w[0] < w[1]));

            let progress = pcb.recv_ack().wrapping_sub(irs);
            prop_assert!(progress >= delivered_through);
            delivered_through = progress;
        }

        let n = order.len() as u16;
        let expected: Vec<u8> = (0..n).flat_map(u16::to_be_bytes).collect();

        prop_assert!(pcb.pending().is_empty());
        prop_assert_eq!(pcb.recv_ack(), irs.wrapping_add(n));
        prop_assert_eq!(rcv.read_all(), expected);
        prop_assert_eq!(pcb.stats().rcv_pack, u64::from(n));
    }

    #[test]
    fn old_segments_change_nothing(
        irs in any::<u16>(),
        delivered in 1..32u16,
        back in 1..32u16,
        ahead in 2..16u16,
    ) {
        let (mut pcb, mut rcv, mut snd) = receiver(irs);

        for idx in 0..delivered {
            pcb.on_segment(Segment::data(irs.wrapping_add(idx), 0, 0, b"d"), &mut rcv, &mut snd);
        }
        let ahead_seq = irs.wrapping_add(delivered + ahead - 1);
        pcb.on_segment(Segment::data(ahead_seq, 0, 0, b"q"), &mut rcv, &mut snd);

        let recv_ack = pcb.recv_ack();
        let queued = pcb.pending().len();
        let old = recv_ack.wrapping_sub(back.min(delivered));

        for _ in 0..2 {
            let disposition = pcb.on_segment(Segment::data(old, 0, 0, b"x"), &mut rcv, &mut snd);
            prop_assert_eq!(disposition, Disposition::Duplicate);
            prop_assert_eq!(pcb.recv_ack(), recv_ack);
            prop_assert_eq!(pcb.pending().len(), queued);
        }
    }

    #[test]
    fn repeated_segments_deliver_once(
        irs in any::<u16>(),
        n in 1..32u16,
        repeats in proptest::collection::vec(0..32u16, 0..64),
    ) {
        let (mut pcb, mut rcv, mut snd) = receiver(irs);

        // Every segment at least once, then arbitrary repeats, each copy with
        // its own payload.
        let arrivals = (0..n).rev().chain(repeats.into_iter().map(|r| r % n));

        for (copy, idx) in arrivals.enumerate() {
            let payload = [idx as u8, copy as u8];
            pcb.on_segment(Segment::data(irs.wrapping_add(idx), 0, 0, &payload), &mut rcv, &mut snd);
        }

        let stream = rcv.read_all();
        let order: Vec<u8> = stream.chunks(2).map(|chunk| chunk[0]).collect();
        let expected: Vec<u8> = (0..n).map(|idx| idx as u8).collect();

        prop_assert_eq!(order, expected);
        prop_assert_eq!(pcb.stats().rcv_pack, u64::from(n));
        prop_assert!(pcb.pending().is_empty());
    }
}
