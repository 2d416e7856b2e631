//! Socket buffer capabilities consumed by the engine.
//!
//! The engine never owns the application-facing buffers. It appends
//! delivered data through [ReceiveBuffer] and trims acknowledged data through
//! [SendBuffer]. [RecvQueue] and [SendQueue] are simple in-memory
//! implementations.

use std::collections::VecDeque;

use super::seq;

/// A buffer supporting SPX receive operations.
pub trait ReceiveBuffer {
    /// Returns the number of bytes currently buffered.
    fn len(&self) -> usize;

    /// Returns `true` if no bytes are buffered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `data` to the byte stream.
    fn append(&mut self, data: Vec<u8>);

    /// Appends `data` and ends the current record. Data appended afterwards
    /// starts a new record.
    fn append_record(&mut self, data: Vec<u8>);

    /// Sets the out-of-band mark `offset` bytes into the buffer. An offset
    /// of 0 means the reader is at the mark.
    fn mark_urgent(&mut self, offset: usize);

    /// Signals that out-of-band data has arrived, carrying its first byte if
    /// there is one.
    fn has_out_of_band(&mut self, byte: Option<u8>);

    /// Wakes any reader waiting for data.
    fn notify_readable(&mut self);

    /// Reports a change in datastream type ahead of the data that carries it.
    fn datastream_changed(&mut self, _dt: u8) {}
}

/// A buffer supporting SPX send operations.
pub trait SendBuffer {
    /// Drops every buffered segment whose sequence number is before `ack`.
    fn trim(&mut self, ack: u16);

    /// Wakes any writer waiting for buffer space.
    fn notify_writable(&mut self);

    /// Asks the output path to (re)transmit starting at `seq` immediately.
    fn retransmit(&mut self, seq: u16);
}

/// In-memory receive buffer made of records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecvQueue {
    records: VecDeque<Vec<u8>>,
    /// Whether the last record accepts more stream bytes.
    open: bool,
    len: usize,
    oob_mark: Option<usize>,
    at_mark: bool,
    oob_byte: Option<u8>,
    oob_signals: usize,
    datastream: Vec<u8>,
    wakeups: usize,
}

impl RecvQueue {
    /// Creates an empty receive queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buffered records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &[u8]> {
        self.records.iter().map(Vec::as_slice)
    }

    /// Removes and returns every buffered byte.
    pub fn read_all(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);

        for record in self.records.drain(..) {
            out.extend_from_slice(&record);
        }

        self.len = 0;
        self.open = false;
        self.oob_mark = None;

        out
    }

    /// Returns the offset of the out-of-band mark, if set.
    pub fn oob_mark(&self) -> Option<usize> {
        self.oob_mark
    }

    /// Returns `true` if the reader is at the out-of-band mark.
    pub fn at_mark(&self) -> bool {
        self.at_mark
    }

    /// Returns the last out-of-band byte announced.
    pub fn oob_byte(&self) -> Option<u8> {
        self.oob_byte
    }

    /// Returns how many times out-of-band data was announced.
    pub fn oob_signals(&self) -> usize {
        self.oob_signals
    }

    /// Returns every datastream type change reported, in order.
    pub fn datastream_changes(&self) -> &[u8] {
        &self.datastream
    }

    /// Returns how many times a waiting reader was woken.
    pub fn wakeups(&self) -> usize {
        self.wakeups
    }
}

impl ReceiveBuffer for RecvQueue {
    fn len(&self) -> usize {
        self.len
    }

    fn append(&mut self, data: Vec<u8>) {
        self.len += data.len();

        match self.records.back_mut() {
            Some(last) if self.open => last.extend_from_slice(&data),
            _ => {
                self.records.push_back(data);
                self.open = true;
            }
        }
    }

    fn append_record(&mut self, data: Vec<u8>) {
        self.len += data.len();

        match self.records.back_mut() {
            Some(last) if self.open => last.extend_from_slice(&data),
            _ => self.records.push_back(data),
        }
        self.open = false;
    }

    fn mark_urgent(&mut self, offset: usize) {
        if offset == 0 {
            self.at_mark = true;
        } else {
            self.oob_mark = Some(offset);
        }
    }

    fn has_out_of_band(&mut self, byte: Option<u8>) {
        self.oob_byte = byte;
        self.oob_signals += 1;
    }

    fn notify_readable(&mut self) {
        self.wakeups += 1;
    }

    fn datastream_changed(&mut self, dt: u8) {
        self.datastream.push(dt);
    }
}

/// In-memory send buffer holding one record per transmitted segment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendQueue {
    segments: VecDeque<(u16, Vec<u8>)>,
    retransmits: Vec<u16>,
    wakeups: usize,
}

impl SendQueue {
    /// Creates an empty send queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `data` as the segment numbered `seq` until it is acknowledged.
    pub fn push(&mut self, seq: u16, data: Vec<u8>) {
        self.segments.push_back((seq, data));
    }

    /// Returns the number of unacknowledged segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if every buffered segment has been acknowledged.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the sequence number of the oldest unacknowledged segment.
    pub fn first_seq(&self) -> Option<u16> {
        self.segments.front().map(|(seq, _)| *seq)
    }

    /// Returns the sequence numbers retransmission was requested from.
    pub fn retransmits(&self) -> &[u16] {
        &self.retransmits
    }

    /// Returns how many times a waiting writer was woken.
    pub fn wakeups(&self) -> usize {
        self.wakeups
    }
}

impl SendBuffer for SendQueue {
    fn trim(&mut self, ack: u16) {
        while let Some((seq, _)) = self.segments.front() {
            if seq::lt(*seq, ack) {
                self.segments.pop_front();
            } else {
                break;
            }
        }
    }

    fn notify_writable(&mut self) {
        self.wakeups += 1;
    }

    fn retransmit(&mut self, seq: u16) {
        self.retransmits.push(seq);
    }
}
