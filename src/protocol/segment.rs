//! Received SPX segments and their owned buffers.

use crate::Result;
use crate::parse::{ControlBits, SpxHeader};

/// A received SPX segment.
///
/// Owns the whole datagram, header bytes included, so it can be handed to
/// the receive buffer either intact (packet mode) or with the header
/// stripped in place (stream mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    header: SpxHeader,
    buf: Vec<u8>,
}

impl Segment {
    /// Parses the header at the front of `datagram` and takes ownership of it.
    ///
    /// # Errors
    ///
    /// Returns an error if `datagram` is shorter than an SPX header.
    pub fn parse(datagram: Vec<u8>) -> Result<Self> {
        let header = SpxHeader::try_from(&datagram[..])?;

        Ok(Self {
            header,
            buf: datagram,
        })
    }

    /// Builds a segment from a header and its data.
    pub fn new(header: SpxHeader, data: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(SpxHeader::HEADER_LEN + data.len());
        buf.extend_from_slice(&header.to_be_bytes());
        buf.extend_from_slice(data);

        Self { header, buf }
    }

    /// Shorthand for a data segment with sequence `seq` carrying `data`.
    pub fn data(seq: u16, ack: u16, alo: u16, data: &[u8]) -> Self {
        Self::new(SpxHeader::new(0, 0, seq, ack, alo), data)
    }

    /// Shorthand for a system packet (pure ack / probe).
    pub fn system(seq: u16, ack: u16, alo: u16) -> Self {
        let mut header = SpxHeader::new(0, 0, seq, ack, alo);
        header.set_control(ControlBits::SP);

        Self::new(header, &[])
    }

    /// Returns a copy of this segment with `bits` set in its header.
    pub fn with_control(self, bits: ControlBits) -> Self {
        let mut header = self.header;
        header.set_control(bits);

        Self::new(header, self.payload())
    }

    /// Returns the parsed header.
    pub fn header(&self) -> &SpxHeader {
        &self.header
    }

    /// Returns the sequence number.
    pub fn seq(&self) -> u16 {
        self.header.seq()
    }

    /// Returns the data following the header.
    pub fn payload(&self) -> &[u8] {
        &self.buf[SpxHeader::HEADER_LEN..]
    }

    /// Consumes the segment, returning the whole datagram.
    pub fn into_datagram(self) -> Vec<u8> {
        self.buf
    }

    /// Consumes the segment, returning only its data. The header bytes are
    /// removed from the front of the same allocation.
    pub fn into_payload(mut self) -> Vec<u8> {
        self.buf.drain(..SpxHeader::HEADER_LEN);
        self.buf
    }
}
