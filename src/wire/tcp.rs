//! TCP header vocabulary and the option codec.
//!
//! The network collaborator parses and frames full packets. This module covers what the
//! connection core interprets itself: sequence arithmetic, control flags, and the variable
//! option block carried by SYN segments.
use core::{cmp, fmt, ops};

use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>.
/// Sequence numbers do not have a discontiguity when compared pairwise across a signed overflow.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl SeqNumber {
    /// Construct from the raw wire integer.
    pub fn from_u32(raw: u32) -> SeqNumber {
        SeqNumber(raw as i32)
    }

    /// The raw wire integer.
    pub fn to_u32(self) -> u32 {
        self.0 as u32
    }

    /// Whether the number lies in the half-open window `[begin, begin + len)`.
    pub fn in_window(self, begin: SeqNumber, len: usize) -> bool {
        self >= begin && self < begin + len
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        if rhs > i32::max_value() as usize {
            panic!("attempt to add to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_add(rhs as i32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        if rhs > i32::max_value() as usize {
            panic!("attempt to subtract to sequence number with unsigned overflow")
        }
        SeqNumber(self.0.wrapping_sub(rhs as i32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl ops::Sub for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        let result = self.0.wrapping_sub(rhs.0);
        if result < 0 {
            panic!("attempt to subtract sequence numbers with underflow")
        }
        result as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        self.0.wrapping_sub(other.0).partial_cmp(&0)
    }
}

/// A set of tcp flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags(pub u16);

mod field {
    pub(super) const FLG_FIN: u16 = 0x001;
    pub(super) const FLG_SYN: u16 = 0x002;
    pub(super) const FLG_RST: u16 = 0x004;
    pub(super) const FLG_PSH: u16 = 0x008;
    pub(super) const FLG_ACK: u16 = 0x010;

    pub(super) const OPT_END: u8 = 0x00;
    pub(super) const OPT_NOP: u8 = 0x01;
    pub(super) const OPT_MSS: u8 = 0x02;
    pub(super) const OPT_WS:  u8 = 0x03;
    pub(super) const OPT_SACKPERM: u8 = 0x04;
    pub(super) const OPT_SACKRNG: u8 = 0x05;
    pub(super) const OPT_TSTAMP: u8 = 0x08;

    /// Length of the fixed TCP header.
    pub(super) const HEADER_LEN: usize = 20;
}

impl Flags {
    /// A SYN segment without further control bits.
    pub const SYN: Flags = Flags(field::FLG_SYN);

    /// Return the FIN flag.
    #[inline]
    pub fn fin(&self) -> bool {
        self.0 & field::FLG_FIN != 0
    }

    /// Return the SYN flag.
    #[inline]
    pub fn syn(&self) -> bool {
        self.0 & field::FLG_SYN != 0
    }

    /// Return the RST flag.
    #[inline]
    pub fn rst(&self) -> bool {
        self.0 & field::FLG_RST != 0
    }

    /// Return the PSH flag.
    #[inline]
    pub fn psh(&self) -> bool {
        self.0 & field::FLG_PSH != 0
    }

    /// Return the ACK flag.
    #[inline]
    pub fn ack(&self) -> bool {
        self.0 & field::FLG_ACK != 0
    }

    /// Set the FIN flag.
    #[inline]
    pub fn set_fin(&mut self, value: bool) {
        let flag = if value { field::FLG_FIN } else { 0 };
        self.0 = (self.0 & !field::FLG_FIN) | flag;
    }

    /// Set the SYN flag.
    #[inline]
    pub fn set_syn(&mut self, value: bool) {
        let flag = if value { field::FLG_SYN } else { 0 };
        self.0 = (self.0 & !field::FLG_SYN) | flag;
    }

    /// Set the RST flag.
    #[inline]
    pub fn set_rst(&mut self, value: bool) {
        let flag = if value { field::FLG_RST } else { 0 };
        self.0 = (self.0 & !field::FLG_RST) | flag;
    }

    /// Set the PSH flag.
    #[inline]
    pub fn set_psh(&mut self, value: bool) {
        let flag = if value { field::FLG_PSH } else { 0 };
        self.0 = (self.0 & !field::FLG_PSH) | flag;
    }

    /// Set the ACK flag.
    #[inline]
    pub fn set_ack(&mut self, value: bool) {
        let flag = if value { field::FLG_ACK } else { 0 };
        self.0 = (self.0 & !field::FLG_ACK) | flag;
    }

    /// Return the length of the control flags, in terms of sequence space.
    pub fn sequence_len(self) -> usize {
        (if self.syn() { 1 } else { 0 })
        + (if self.fin() { 1 } else { 0 })
    }
}

/// A representation of a single TCP option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    /// End of the option list, remaining bytes are padding.
    EndOfList,
    /// A single padding byte.
    NoOperation,
    /// Maximum segment size, SYN segments only.
    MaxSegmentSize(u16),
    /// Receive window scale shift, SYN segments only.
    WindowScale(u8),
    /// Selective acknowledgement permitted, SYN segments only.
    SackPermitted,
    /// Selectively acknowledged ranges, at most three.
    SackRange([Option<(u32, u32)>; 3]),
    /// Timestamp value and echo reply.
    TimeStamp {
        /// The sender's timestamp clock value.
        value: u32,
        /// Echo of the most recent timestamp received from the peer.
        echo: u32,
    },
    /// An option this implementation does not interpret.
    Unknown {
        /// The option kind byte.
        kind: u8,
        /// The option body, without kind and length bytes.
        data: &'a [u8],
    },
}

impl<'a> TcpOption<'a> {
    /// Parse the first option of the buffer, returning it and the remaining bytes.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let (length, option);
        match *buffer.get(0).ok_or(Error::Truncated)? {
            field::OPT_END => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            field::OPT_NOP => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            kind => {
                length = *buffer.get(1).ok_or(Error::Truncated)? as usize;
                if length < 2 {
                    return Err(Error::Malformed);
                }
                let data = buffer.get(2..length).ok_or(Error::Truncated)?;
                match (kind, length) {
                    (field::OPT_MSS, 4) =>
                        option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
                    (field::OPT_MSS, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_WS, 3) =>
                        option = TcpOption::WindowScale(data[0]),
                    (field::OPT_WS, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_SACKPERM, 2) =>
                        option = TcpOption::SackPermitted,
                    (field::OPT_SACKPERM, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_SACKRNG, _) => {
                        if length < 10 || (length - 2) % 8 != 0 {
                            return Err(Error::Malformed);
                        }
                        // Blocks past the third are legal on the wire but dropped, three is
                        // all we track.
                        let mut ranges = [None; 3];
                        for (slot, chunk) in ranges.iter_mut().zip(data.chunks(8)) {
                            *slot = Some((
                                NetworkEndian::read_u32(&chunk[..4]),
                                NetworkEndian::read_u32(&chunk[4..]),
                            ));
                        }
                        option = TcpOption::SackRange(ranges);
                    }
                    (field::OPT_TSTAMP, 10) =>
                        option = TcpOption::TimeStamp {
                            value: NetworkEndian::read_u32(&data[..4]),
                            echo: NetworkEndian::read_u32(&data[4..]),
                        },
                    (field::OPT_TSTAMP, _) =>
                        return Err(Error::Malformed),
                    (_, _) =>
                        option = TcpOption::Unknown { kind, data },
                }
            }
        }
        Ok((&buffer[length..], option))
    }

    /// The number of bytes the emitted option occupies.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList => 1,
            TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::SackRange(ranges) =>
                2 + ranges.iter().filter(|range| range.is_some()).count() * 8,
            TcpOption::TimeStamp { .. } => 10,
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    /// Write the option to the front of the buffer, returning the rest.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length;
        match *self {
            TcpOption::EndOfList => {
                length = 1;
                // There may be padding space which also should be initialized.
                for p in buffer.iter_mut() {
                    *p = field::OPT_END;
                }
            }
            TcpOption::NoOperation => {
                length = 1;
                buffer[0] = field::OPT_NOP;
            }
            _ => {
                length = self.buffer_len();
                buffer[1] = length as u8;
                match *self {
                    TcpOption::EndOfList |
                    TcpOption::NoOperation =>
                        unreachable!(),
                    TcpOption::MaxSegmentSize(value) => {
                        buffer[0] = field::OPT_MSS;
                        NetworkEndian::write_u16(&mut buffer[2..], value)
                    }
                    TcpOption::WindowScale(value) => {
                        buffer[0] = field::OPT_WS;
                        buffer[2] = value;
                    }
                    TcpOption::SackPermitted => {
                        buffer[0] = field::OPT_SACKPERM;
                    }
                    TcpOption::SackRange(ranges) => {
                        buffer[0] = field::OPT_SACKRNG;
                        let mut at = 2;
                        for (begin, end) in ranges.iter().filter_map(|range| *range) {
                            NetworkEndian::write_u32(&mut buffer[at..at + 4], begin);
                            NetworkEndian::write_u32(&mut buffer[at + 4..at + 8], end);
                            at += 8;
                        }
                    }
                    TcpOption::TimeStamp { value, echo } => {
                        buffer[0] = field::OPT_TSTAMP;
                        NetworkEndian::write_u32(&mut buffer[2..6], value);
                        NetworkEndian::write_u32(&mut buffer[6..10], echo);
                    }
                    TcpOption::Unknown { kind, data } => {
                        buffer[0] = kind;
                        buffer[2..length].copy_from_slice(data)
                    }
                }
            }
        }
        &mut buffer[length..]
    }
}

/// A high-level representation of the TCP header fields this core interprets.
///
/// Ports and addresses are not part of the representation. They form the connection identity and
/// travel separately, see the connection module.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Repr {
    /// Control flags.
    pub flags: Flags,
    /// The sequence number of the first payload byte.
    pub seq_number: SeqNumber,
    /// The acknowledgement number, present when the ACK flag is set.
    pub ack_number: Option<SeqNumber>,
    /// The advertised receive window, unscaled.
    pub window_len: u16,
    /// Window scale shift from the option block, SYN segments only.
    pub window_scale: Option<u8>,
    /// Maximum segment size from the option block, SYN segments only.
    pub max_seg_size: Option<u16>,
    /// Whether the peer offered selective acknowledgements.
    pub sack_permitted: bool,
    /// Timestamp value and echo from the option block.
    pub timestamp: Option<(u32, u32)>,
    /// The number of payload bytes following the header.
    pub payload_len: u16,
}

impl Repr {
    /// Assemble a representation from pre-parsed header fields and the raw option block.
    pub fn parse(
        flags: Flags,
        seq_number: SeqNumber,
        ack_number: Option<SeqNumber>,
        window_len: u16,
        mut options: &[u8],
        payload_len: u16,
    ) -> Result<Repr> {
        let mut max_seg_size = None;
        let mut window_scale = None;
        let mut sack_permitted = false;
        let mut timestamp = None;

        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) =>
                    max_seg_size = Some(value),
                TcpOption::WindowScale(value) => {
                    // RFC 1323: Thus, the shift count must be limited to 14 (which allows windows
                    // of 2**30 = 1 Gbyte). If a Window Scale option is received with a shift.cnt
                    // value exceeding 14, the TCP should log the error but use 14 instead of the
                    // specified value.
                    window_scale = if value > 14 {
                        net_debug!("parsed window scaling factor {} > 14, clamping", value);
                        Some(14)
                    } else {
                        Some(value)
                    };
                }
                TcpOption::SackPermitted =>
                    sack_permitted = true,
                TcpOption::TimeStamp { value, echo } =>
                    timestamp = Some((value, echo)),
                _ => (),
            }
            options = next_options;
        }

        Ok(Repr {
            flags,
            seq_number,
            ack_number,
            window_len,
            window_scale,
            max_seg_size,
            sack_permitted,
            timestamp,
            payload_len,
        })
    }

    /// The length of the segment in terms of sequence space.
    pub fn sequence_len(&self) -> usize {
        usize::from(self.payload_len) + self.flags.sequence_len()
    }

    /// The length of the header that will be emitted from this representation.
    ///
    /// The TCP header length is a multiple of 4.
    pub fn header_len(&self) -> usize {
        let mut length = field::HEADER_LEN;
        if self.max_seg_size.is_some() {
            length += 4;
        }
        if self.window_scale.is_some() {
            length += 3;
        }
        if self.sack_permitted {
            length += 2;
        }
        if self.timestamp.is_some() {
            length += 10;
        }
        if length % 4 != 0 {
            length += 4 - length % 4;
        }
        length
    }

    /// Write the option block into the buffer, returning the number of bytes used.
    ///
    /// The buffer must hold at least `header_len() - 20` bytes.
    pub fn emit_options(&self, buffer: &mut [u8]) -> usize {
        let length = self.header_len() - field::HEADER_LEN;
        let mut rest = &mut buffer[..length];

        if let Some(value) = self.max_seg_size {
            rest = TcpOption::MaxSegmentSize(value).emit(rest);
        }
        if self.sack_permitted {
            rest = TcpOption::SackPermitted.emit(rest);
        }
        if let Some((value, echo)) = self.timestamp {
            rest = TcpOption::TimeStamp { value, echo }.emit(rest);
        }
        if let Some(value) = self.window_scale {
            rest = TcpOption::WindowScale(value).emit(rest);
        }
        if !rest.is_empty() {
            TcpOption::EndOfList.emit(rest);
        }

        length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_compare_across_overflow() {
        let before = SeqNumber::from_u32(u32::max_value() - 1);
        let after = before + 4;
        assert!(before < after);
        assert_eq!(after - before, 4);
        assert!(after.in_window(before, 8));
        assert!(!after.in_window(before, 4));
    }

    #[test]
    fn flag_accessors() {
        let mut flags = Flags::default();
        flags.set_syn(true);
        flags.set_ack(true);
        assert!(flags.syn() && flags.ack());
        assert!(!flags.fin());
        assert_eq!(flags.sequence_len(), 1);

        flags.set_syn(false);
        flags.set_fin(true);
        assert_eq!(flags.sequence_len(), 1);
    }

    static OPTION_BYTES: [u8; 20] = [
        0x02, 0x04, 0x05, 0xb4,                         // mss 1460
        0x04, 0x02,                                     // sack permitted
        0x08, 0x0a, 0x00, 0x00, 0x00, 0x2a,             // timestamp 42,
        0x00, 0x00, 0x00, 0x07,                         //           echo 7
        0x03, 0x03, 0x07,                               // window scale 7
        0x00,                                           // end of list
    ];

    #[test]
    fn parse_option_block() {
        let repr = Repr::parse(
            Flags::SYN, SeqNumber(100), None, 8192,
            &OPTION_BYTES[..], 0,
        ).unwrap();

        assert_eq!(repr.max_seg_size, Some(1460));
        assert!(repr.sack_permitted);
        assert_eq!(repr.timestamp, Some((42, 7)));
        assert_eq!(repr.window_scale, Some(7));
        assert_eq!(repr.sequence_len(), 1);
    }

    #[test]
    fn emit_option_block() {
        let repr = Repr {
            flags: Flags::SYN,
            seq_number: SeqNumber(100),
            window_len: 8192,
            window_scale: Some(7),
            max_seg_size: Some(1460),
            sack_permitted: true,
            timestamp: Some((42, 7)),
            ..Repr::default()
        };

        assert_eq!(repr.header_len(), 40);
        let mut buffer = [0xff; 20];
        assert_eq!(repr.emit_options(&mut buffer), 20);
        assert_eq!(buffer, OPTION_BYTES);
    }

    #[test]
    fn window_scale_clamped() {
        let options = [0x03, 0x03, 0x1f];
        let repr = Repr::parse(
            Flags::SYN, SeqNumber(0), None, 0, &options[..], 0,
        ).unwrap();
        assert_eq!(repr.window_scale, Some(14));
    }

    #[test]
    fn malformed_options() {
        assert_eq!(TcpOption::parse(&[0x02, 0x04, 0x05]), Err(Error::Truncated));
        assert_eq!(TcpOption::parse(&[0x02, 0x03, 0x05]), Err(Error::Malformed));
        assert_eq!(TcpOption::parse(&[0x03, 0x01]), Err(Error::Malformed));
    }

    #[test]
    fn sack_ranges_truncate_to_three() {
        // Four blocks on the wire, 2 + 4 * 8 bytes.
        let mut options = [0u8; 34];
        options[0] = 0x05;
        options[1] = 34;
        for block in 0..4u8 {
            options[2 + usize::from(block) * 8 + 3] = block + 1;
            options[2 + usize::from(block) * 8 + 7] = block + 2;
        }

        let (rest, option) = TcpOption::parse(&options[..]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(option, TcpOption::SackRange([
            Some((1, 2)),
            Some((2, 3)),
            Some((3, 4)),
        ]));

        // A block count that does not divide evenly is rejected.
        assert_eq!(TcpOption::parse(&[0x05, 0x0b, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(Error::Malformed));
    }

    #[test]
    fn sack_range_round_trip() {
        let option = TcpOption::SackRange([Some((100, 200)), None, None]);
        assert_eq!(option.buffer_len(), 10);

        let mut buffer = [0u8; 10];
        option.emit(&mut buffer);
        let (_, parsed) = TcpOption::parse(&buffer[..]).unwrap();
        assert_eq!(parsed, option);
    }

    #[test]
    fn unknown_option_skipped() {
        let options = [0x2a, 0x03, 0x99, 0x01, 0x00];
        let (rest, option) = TcpOption::parse(&options[..]).unwrap();
        assert_eq!(option, TcpOption::Unknown { kind: 0x2a, data: &[0x99] });
        assert_eq!(rest, &[0x01, 0x00]);
    }
}
