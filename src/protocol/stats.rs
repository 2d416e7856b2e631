/// Per-connection event counters.
///
/// Every data segment handed to the engine lands in exactly one of
/// `rcv_pack` (eventually), `rcv_dup_pack`, `window_violations`,
/// `alloc_failures`, or stays queued.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Segments handed to the engine.
    pub rcv_total: u64,
    /// Data segments delivered to the receive buffer.
    pub rcv_pack: u64,
    /// Data segments discarded as already delivered or already queued.
    pub rcv_dup_pack: u64,
    /// Duplicates of the most recently delivered segment.
    pub last_dup: u64,
    /// Data segments queued out of order.
    pub rcv_oo_pack: u64,
    /// Segments that arrived past the advertised window.
    pub rcv_pack_after_win: u64,
    /// System packets past the advertised window.
    pub rcv_win_probe: u64,
    /// Pure window updates.
    pub rcv_win_upd: u64,
    /// Duplicate acknowledgments.
    pub rcv_dup_ack: u64,
    /// Segments that advanced the acknowledged point.
    pub rcv_ack_pack: u64,
    /// Acknowledgments for data never sent.
    pub rcv_ack_too_much: u64,
    /// Round-trip time estimator updates.
    pub rtt_updated: u64,
    /// Fast retransmits triggered by duplicate acks.
    pub fast_retransmits: u64,
    /// Data segments rejected for lying beyond the advertised window.
    pub window_violations: u64,
    /// Data segments dropped because no pending entry could be allocated.
    pub alloc_failures: u64,
    /// Retransmit timer expirations.
    pub rexmt_timeouts: u64,
    /// Persist timer expirations.
    pub persist_timeouts: u64,
    /// Connections given up after exhausting retransmit backoff.
    pub timeout_drops: u64,
}

impl Stats {
    /// Returns the total of every anomaly a supervising layer may act on.
    pub fn anomalies(&self) -> u64 {
        self.rcv_ack_too_much + self.window_violations + self.alloc_failures
    }
}
