use std::io;

use bitflags::bitflags;

use crate::{Error, ParseError};

bitflags! {
    /// Connection control bits carried in the first byte of an SPX header.
    pub struct ControlBits: u8 {
        /// System packet: carries acknowledgment and window state only and
        /// does not consume a sequence number.
        const SP = 0x80;
        /// Send acknowledgment: the peer asks for an ack.
        const SA = 0x40;
        /// Attention: the segment carries out-of-band data.
        const OB = 0x20;
        /// End of message.
        const EM = 0x10;
    }
}

/// Representation of an SPX segment header.
///
/// ```text
///     0                   1                   2                   3
///     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |S|S|O|E|       |  Datastream   |    Source Connection Id       |
///    |P|A|B|M|       |     Type      |                               |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |   Destination Connection Id   |        Sequence Number        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |     Acknowledge Number        |      Allocation Number        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                             data                              |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpxHeader {
    /// Connection control bits. The low nibble is reserved and preserved.
    cc: u8,
    /// Datastream type, opaque to the protocol.
    dt: u8,
    /// Connection id chosen by the sender.
    sid: u16,
    /// Connection id chosen by the receiver.
    did: u16,
    /// Sequence number of this segment. Counts segments, not bytes.
    seq: u16,
    /// Sequence number of the next segment the sender expects to receive.
    ack: u16,
    /// Highest sequence number the sender is willing to accept.
    alo: u16,
}

impl SpxHeader {
    /// Length of an SPX header in bytes.
    pub const HEADER_LEN: usize = 12;

    /// Creates a header with no control bits and a datastream type of 0.
    pub fn new(sid: u16, did: u16, seq: u16, ack: u16, alo: u16) -> Self {
        Self {
            cc: 0,
            dt: 0,
            sid,
            did,
            seq,
            ack,
            alo,
        }
    }

    /// Returns the known control bits.
    pub fn control(&self) -> ControlBits {
        ControlBits::from_bits_truncate(self.cc)
    }

    /// Sets the given control bits, leaving others untouched.
    pub fn set_control(&mut self, bits: ControlBits) {
        self.cc |= bits.bits();
    }

    /// Returns `true` if this is a system packet.
    pub fn sp(&self) -> bool {
        self.control().contains(ControlBits::SP)
    }

    /// Returns `true` if the sender requests an acknowledgment.
    pub fn sa(&self) -> bool {
        self.control().contains(ControlBits::SA)
    }

    /// Returns `true` if the segment carries out-of-band data.
    pub fn ob(&self) -> bool {
        self.control().contains(ControlBits::OB)
    }

    /// Returns `true` if the segment ends a message.
    pub fn em(&self) -> bool {
        self.control().contains(ControlBits::EM)
    }

    /// Returns the `datastream type` field.
    pub fn datastream_type(&self) -> u8 {
        self.dt
    }

    /// Sets the `datastream type` field.
    pub fn set_datastream_type(&mut self, dt: u8) {
        self.dt = dt;
    }

    /// Returns the `source connection id` field.
    pub fn sid(&self) -> u16 {
        self.sid
    }

    /// Returns the `destination connection id` field.
    pub fn did(&self) -> u16 {
        self.did
    }

    /// Returns the `sequence number` field.
    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// Returns the `acknowledge number` field.
    pub fn ack(&self) -> u16 {
        self.ack
    }

    /// Returns the `allocation number` field.
    pub fn alo(&self) -> u16 {
        self.alo
    }

    /// Returns the memory representation of the header in big-endian
    /// (network) byte order.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> [u8; Self::HEADER_LEN] {
        let mut raw = [0u8; Self::HEADER_LEN];

        raw[0] = self.cc;
        raw[1] = self.dt;
        raw[2..4].copy_from_slice(&self.sid.to_be_bytes());
        raw[4..6].copy_from_slice(&self.did.to_be_bytes());
        raw[6..8].copy_from_slice(&self.seq.to_be_bytes());
        raw[8..10].copy_from_slice(&self.ack.to_be_bytes());
        raw[10..12].copy_from_slice(&self.alo.to_be_bytes());

        raw
    }

    /// Reads an SPX header from the given input stream.
    pub fn read<T: io::Read>(input: &mut T) -> crate::Result<Self> {
        let mut raw = [0u8; Self::HEADER_LEN];

        let nbytes = input.read(&mut raw[..])?;
        SpxHeader::try_from(&raw[..nbytes])
    }

    /// Writes the SPX header to the given output stream.
    pub fn write<T: io::Write>(&self, output: &mut T) -> crate::Result<()> {
        output.write_all(&self.to_be_bytes())?;

        Ok(())
    }
}

impl TryFrom<&[u8]> for SpxHeader {
    type Error = Error;

    /// Parses the leading [SpxHeader::HEADER_LEN] bytes. Anything after them
    /// is segment data and is ignored here.
    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        if raw.len() < Self::HEADER_LEN {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: raw.len(),
                min: Self::HEADER_LEN,
            }));
        }

        Ok(Self {
            cc: raw[0],
            dt: raw[1],
            sid: u16::from_be_bytes([raw[2], raw[3]]),
            did: u16::from_be_bytes([raw[4], raw[5]]),
            seq: u16::from_be_bytes([raw[6], raw[7]]),
            ack: u16::from_be_bytes([raw[8], raw[9]]),
            alo: u16::from_be_bytes([raw[10], raw[11]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spx_header_basic_valid() {
        let raw: [u8; 14] = [
            0xc0, 0x05, 0x12, 0x34, 0xab, 0xcd, 0x00, 0x07, 0x00, 0x03, 0x00, 0x0a, 0xde, 0xad,
        ];

        let header = SpxHeader::try_from(&raw[..]);
        assert!(header.is_ok());
        let header = header.unwrap();

        assert!(header.sp());
        assert!(header.sa());
        assert!(!header.ob());
        assert!(!header.em());
        assert_eq!(header.datastream_type(), 5);
        assert_eq!(header.sid(), 0x1234);
        assert_eq!(header.did(), 0xabcd);
        assert_eq!(header.seq(), 7);
        assert_eq!(header.ack(), 3);
        assert_eq!(header.alo(), 10);
    }

    #[test]
    fn spx_header_short_buffer_invalid() {
        let raw = [0x80u8, 0x00, 0x00];

        match SpxHeader::try_from(&raw[..]) {
            Err(Error::Parse(ParseError::InvalidBufferLength { provided, min })) => {
                assert_eq!(provided, 3);
                assert_eq!(min, SpxHeader::HEADER_LEN);
            }
            other => panic!("expected InvalidBufferLength, got {other:?}"),
        }
    }

    #[test]
    fn spx_header_reserved_bits_preserved() {
        let mut raw = [0u8; SpxHeader::HEADER_LEN];
        raw[0] = 0x2f;

        let header = SpxHeader::try_from(&raw[..]).unwrap();

        assert!(header.ob());
        assert_eq!(header.control(), ControlBits::OB);
        assert_eq!(header.to_be_bytes()[0], 0x2f);
    }

    #[test]
    fn spx_header_write_then_read() {
        let mut header = SpxHeader::new(1, 2, 0xfffe, 0xffff, 4);
        header.set_control(ControlBits::OB | ControlBits::EM);
        header.set_datastream_type(9);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), SpxHeader::HEADER_LEN);

        let read = SpxHeader::read(&mut &buf[..]).unwrap();
        assert_eq!(read, header);
        assert!(read.ob() && read.em());
    }
}
