use core::fmt;

use crate::{Decode, Encode};

/// Start marker of every frame
pub const START: u8 = 0x7E;
/// Protocol version byte
pub const VERSION: u8 = 0xFF;
/// Payload length byte: version through parameter low
pub const LENGTH: u8 = 0x06;
/// End marker of every frame
pub const END: u8 = 0xEF;
/// Start: 1, Version: 1, Length: 1, Opcode: 1, Ack: 1, Parameter: 2, Checksum: 2, End: 1
pub const FRAME_LEN: usize = 10;

/// Contribution of the fixed version and length bytes to the checksum sum.
pub const PREAMBLE_SUM: u16 = VERSION as u16 + LENGTH as u16;

/// Byte positions within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Field {
    Start = 0,
    Version,
    Length,
    Opcode,
    Ack,
    ParamHigh,
    ParamLow,
    ChecksumHigh,
    ChecksumLow,
    End,
}

impl Field {
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The field that follows this one, `None` after the end marker.
    pub const fn next(self) -> Option<Field> {
        use Field::*;
        match self {
            Start => Some(Version),
            Version => Some(Length),
            Length => Some(Opcode),
            Opcode => Some(Ack),
            Ack => Some(ParamHigh),
            ParamHigh => Some(ParamLow),
            ParamLow => Some(ChecksumHigh),
            ChecksumHigh => Some(ChecksumLow),
            ChecksumLow => Some(End),
            End => None,
        }
    }
}

/// Two's complement of the byte sum, truncated to 16 bits.
///
/// `bytes` is everything between the start marker and the checksum field.
pub fn checksum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    0u16.wrapping_sub(sum)
}

/// A single frame, both directions.
///
/// Outgoing packets are built with [`Packet::fill`]; the checksum is kept
/// in sync with the other fields on every fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub opcode: u8,
    pub ack: bool,
    pub param_high: u8,
    pub param_low: u8,
    pub checksum: u16,
}

impl Default for Packet {
    fn default() -> Self {
        let mut p = Packet {
            opcode: 0,
            ack: true,
            param_high: 0,
            param_low: 0,
            checksum: 0,
        };
        p.fill_bytes(0, 0, 0);
        p
    }
}

impl Packet {
    pub fn new(opcode: u8, parameter: u16, ack: bool) -> Packet {
        let mut p = Packet {
            ack,
            ..Packet::default()
        };
        p.fill(opcode, parameter);
        p
    }

    /// Set opcode and a 16 bit parameter, high byte first on the wire.
    pub fn fill(&mut self, opcode: u8, parameter: u16) {
        let [high, low] = parameter.to_be_bytes();
        self.fill_bytes(opcode, high, low);
    }

    /// Set opcode and the two parameter bytes independently.
    pub fn fill_bytes(&mut self, opcode: u8, high: u8, low: u8) {
        self.opcode = opcode;
        self.param_high = high;
        self.param_low = low;
        self.checksum = checksum(&self.summed());
    }

    pub fn set_ack(&mut self, ack: bool) {
        self.ack = ack;
        self.checksum = checksum(&self.summed());
    }

    pub fn parameter(&self) -> u16 {
        u16::from_be_bytes([self.param_high, self.param_low])
    }

    /// Bytes covered by the checksum: version through parameter low.
    fn summed(&self) -> [u8; 6] {
        [
            VERSION,
            LENGTH,
            self.opcode,
            self.ack as u8,
            self.param_high,
            self.param_low,
        ]
    }

    pub fn bytes(&self) -> [u8; FRAME_LEN] {
        let [ck_high, ck_low] = self.checksum.to_be_bytes();
        [
            START,
            VERSION,
            LENGTH,
            self.opcode,
            self.ack as u8,
            self.param_high,
            self.param_low,
            ck_high,
            ck_low,
            END,
        ]
    }

    pub fn checksum_valid(&self) -> bool {
        let sum = self
            .summed()
            .iter()
            .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
        sum.wrapping_add(self.checksum) == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    BufferTooSmall { expected: usize, found: usize },
    BadStart(u8),
    BadVersion(u8),
    BadLength(u8),
    BadEnd(u8),
    ChecksumMismatch { calculated: u16, found: u16 },
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::BufferTooSmall { expected, found } => {
                write!(f, "buffer too small: need {expected} bytes, have {found}")
            }
            PacketError::BadStart(b) => write!(f, "expected start marker, found {b:#04X}"),
            PacketError::BadVersion(b) => write!(f, "expected version byte, found {b:#04X}"),
            PacketError::BadLength(b) => write!(f, "expected length byte, found {b:#04X}"),
            PacketError::BadEnd(b) => write!(f, "expected end marker, found {b:#04X}"),
            PacketError::ChecksumMismatch { calculated, found } => {
                write!(f, "checksum {found:#06X} does not match {calculated:#06X}")
            }
        }
    }
}

impl Encode for Packet {
    type Error = PacketError;

    fn encode(&self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        if buffer.len() < FRAME_LEN {
            return Err(PacketError::BufferTooSmall {
                expected: FRAME_LEN,
                found: buffer.len(),
            });
        }
        buffer[..FRAME_LEN].copy_from_slice(&self.bytes());
        Ok(FRAME_LEN)
    }
}

impl<'a> Decode<'a> for Packet {
    type Error = PacketError;

    /// Decode one whole frame from the front of `data`.
    fn decode(data: &'a [u8]) -> Result<Self, Self::Error> {
        if data.len() < FRAME_LEN {
            return Err(PacketError::BufferTooSmall {
                expected: FRAME_LEN,
                found: data.len(),
            });
        }
        let at = |field: Field| data[field.index()];
        if at(Field::Start) != START {
            return Err(PacketError::BadStart(at(Field::Start)));
        }
        if at(Field::Version) != VERSION {
            return Err(PacketError::BadVersion(at(Field::Version)));
        }
        if at(Field::Length) != LENGTH {
            return Err(PacketError::BadLength(at(Field::Length)));
        }
        if at(Field::End) != END {
            return Err(PacketError::BadEnd(at(Field::End)));
        }
        let packet = Packet {
            opcode: at(Field::Opcode),
            ack: at(Field::Ack) != 0,
            param_high: at(Field::ParamHigh),
            param_low: at(Field::ParamLow),
            checksum: u16::from_be_bytes([at(Field::ChecksumHigh), at(Field::ChecksumLow)]),
        };
        // The ack byte is summed as received, not as the decoded bool
        let calculated = checksum(&data[Field::Version.index()..Field::ChecksumHigh.index()]);
        if calculated != packet.checksum {
            return Err(PacketError::ChecksumMismatch {
                calculated,
                found: packet.checksum,
            });
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_five_with_ack() {
        let p = Packet::new(0x03, 5, true);
        assert_eq!(
            p.bytes(),
            [0x7E, 0xFF, 0x06, 0x03, 0x01, 0x00, 0x05, 0xFE, 0xF2, 0xEF]
        );
    }

    #[test]
    fn fill_splits_parameter_high_first() {
        let mut a = Packet::default();
        let mut b = Packet::default();
        a.fill(0x0F, 0x1234);
        b.fill_bytes(0x0F, 0x12, 0x34);
        assert_eq!(a, b);
        assert_eq!(a.param_high, 0x12);
        assert_eq!(a.param_low, 0x34);
        assert_eq!(a.parameter(), 0x1234);
    }

    #[test]
    fn checksum_wraps() {
        let p = Packet::new(0xFF, 0xFFFF, true);
        // FF + 06 + FF + 01 + FF + FF = 0x403
        assert_eq!(p.checksum, 0u16.wrapping_sub(0x403));
        assert!(p.checksum_valid());
    }

    #[test]
    fn toggling_ack_recomputes_checksum() {
        let mut p = Packet::new(0x06, 15, true);
        let before = p.checksum;
        p.set_ack(false);
        assert_eq!(p.checksum, before.wrapping_add(1));
        assert!(p.checksum_valid());
    }

    #[test]
    fn encode_rejects_short_buffer() {
        let p = Packet::new(0x01, 0, false);
        let mut buf = [0u8; 9];
        assert_eq!(
            p.encode(&mut buf),
            Err(PacketError::BufferTooSmall {
                expected: FRAME_LEN,
                found: 9
            })
        );
    }

    #[test]
    fn decode_whole_frame() {
        let p = Packet::new(0x3D, 0x0007, false);
        let mut buf = [0u8; 12];
        let n = p.encode(&mut buf).unwrap();
        assert_eq!(n, FRAME_LEN);
        let d = Packet::decode(&buf).unwrap();
        assert_eq!(d, p);
    }

    #[test]
    fn decode_reports_framing_and_checksum() {
        let mut bytes = Packet::new(0x43, 20, false).bytes();
        bytes[9] = 0x00;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::BadEnd(0x00)));

        let mut bytes = Packet::new(0x43, 20, false).bytes();
        bytes[6] ^= 0x01;
        assert!(matches!(
            Packet::decode(&bytes),
            Err(PacketError::ChecksumMismatch { .. })
        ));

        let mut bytes = Packet::new(0x43, 20, false).bytes();
        bytes[2] = 0x08;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::BadLength(0x08)));
    }

    #[test]
    fn decode_checks_start_then_version() {
        let mut bytes = Packet::new(0x3D, 1, false).bytes();
        bytes[0] = 0x7F;
        bytes[1] = 0x00;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::BadStart(0x7F)));

        bytes[0] = START;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::BadVersion(0x00)));
    }
}
