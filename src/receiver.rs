//! Byte at a time frame recognition.
//!
//! The receiver never blocks and never buffers more than one frame. Each
//! call to [`Receiver::feed`] advances a cursor through the fixed frame
//! layout; fixed bytes are verified, variable bytes are stored and summed.
//! A mismatch on a fixed byte drops the partial frame and resynchronizes.

use log::{trace, warn};

use crate::packet::{END, FRAME_LEN, Field, LENGTH, PREAMBLE_SUM, Packet, START, VERSION};

/// Running counters of everything the receiver has seen.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Every byte fed in
    pub bytes: u32,
    /// Frames whose end marker matched, valid checksum or not
    pub frames: u32,
    /// Fixed bytes that did not match their position
    pub framing_errors: u32,
    /// Complete frames with a bad checksum
    pub checksum_errors: u32,
}

#[derive(Debug, Clone)]
pub struct Receiver {
    cursor: Field,
    sum: u16,
    incoming: Packet,
    raw: [u8; FRAME_LEN],
    checksum_ok: bool,
    complete: bool,
    stats: Stats,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    pub fn new() -> Receiver {
        Receiver {
            cursor: Field::Start,
            sum: PREAMBLE_SUM,
            incoming: Packet::default(),
            raw: [0; FRAME_LEN],
            checksum_ok: false,
            complete: false,
            stats: Stats::default(),
        }
    }

    /// Drop any partial or completed frame and wait for a start marker.
    ///
    /// Must be called after a complete frame has been inspected.
    pub fn reset(&mut self) {
        self.cursor = Field::Start;
        self.sum = PREAMBLE_SUM;
        self.checksum_ok = false;
        self.complete = false;
    }

    /// Consume one byte. Returns true when this byte completed a frame.
    ///
    /// A complete frame may still carry a bad checksum; check
    /// [`Receiver::checksum_ok`] before trusting [`Receiver::packet`].
    pub fn feed(&mut self, byte: u8) -> bool {
        self.stats.bytes = self.stats.bytes.wrapping_add(1);
        if self.complete {
            // Previous frame was never released
            self.reset();
        }
        self.raw[self.cursor.index()] = byte;
        match self.cursor {
            Field::Start => self.verify(byte, START),
            Field::Version => self.verify(byte, VERSION),
            Field::Length => self.verify(byte, LENGTH),
            Field::Opcode => {
                self.incoming.opcode = byte;
                self.accept(byte);
            }
            Field::Ack => {
                self.incoming.ack = byte != 0;
                self.accept(byte);
            }
            Field::ParamHigh => {
                self.incoming.param_high = byte;
                self.accept(byte);
            }
            Field::ParamLow => {
                self.incoming.param_low = byte;
                self.accept(byte);
            }
            Field::ChecksumHigh => {
                self.sum = self.sum.wrapping_add(u16::from(byte) << 8);
                self.incoming.checksum = u16::from(byte) << 8;
                self.advance();
            }
            Field::ChecksumLow => {
                self.sum = self.sum.wrapping_add(u16::from(byte));
                self.incoming.checksum |= u16::from(byte);
                self.checksum_ok = self.sum == 0;
                self.advance();
            }
            Field::End => {
                if byte == END {
                    self.stats.frames = self.stats.frames.wrapping_add(1);
                    if !self.checksum_ok {
                        self.stats.checksum_errors = self.stats.checksum_errors.wrapping_add(1);
                        warn!(
                            "checksum mismatch on opcode {:#04X}, sum off by {:#06X}",
                            self.incoming.opcode, self.sum
                        );
                    } else {
                        trace!("received: {:02X?}", self.raw);
                    }
                    self.complete = true;
                    return true;
                }
                self.mismatch(byte);
            }
        }
        false
    }

    fn verify(&mut self, byte: u8, expected: u8) {
        if byte == expected {
            self.advance();
        } else {
            self.mismatch(byte);
        }
    }

    fn accept(&mut self, byte: u8) {
        self.sum = self.sum.wrapping_add(u16::from(byte));
        self.advance();
    }

    fn advance(&mut self) {
        match self.cursor.next() {
            Some(next) => self.cursor = next,
            None => self.reset(),
        }
    }

    fn mismatch(&mut self, byte: u8) {
        self.stats.framing_errors = self.stats.framing_errors.wrapping_add(1);
        warn!("framing error: {:#04X} at {:?}", byte, self.cursor);
        self.reset();
        // A stray start marker is most likely the next frame beginning
        if byte == START {
            self.raw[Field::Start.index()] = START;
            self.cursor = Field::Version;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn checksum_ok(&self) -> bool {
        self.checksum_ok
    }

    /// Fields of the frame being received, or of the one just completed.
    pub fn packet(&self) -> &Packet {
        &self.incoming
    }

    /// Bytes of the current frame exactly as they came off the wire.
    pub fn raw(&self) -> &[u8; FRAME_LEN] {
        &self.raw
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(r: &mut Receiver, bytes: &[u8]) -> usize {
        let mut completed = 0;
        for b in bytes {
            if r.feed(*b) {
                completed += 1;
            }
        }
        completed
    }

    #[test]
    fn play_finished_notification() {
        let bytes = Packet::new(0x3D, 0, false).bytes();
        let mut r = Receiver::new();
        for b in &bytes[..9] {
            assert!(!r.feed(*b));
        }
        assert!(r.feed(bytes[9]));
        assert!(r.checksum_ok());
        assert_eq!(r.packet().opcode, 0x3D);
        assert_eq!(r.packet().parameter(), 0);
        assert_eq!(
            r.stats(),
            Stats {
                bytes: 10,
                frames: 1,
                framing_errors: 0,
                checksum_errors: 0
            }
        );
    }

    #[test]
    fn complete_but_bad_checksum_is_distinguishable() {
        let mut bytes = Packet::new(0x43, 25, false).bytes();
        bytes[8] = bytes[8].wrapping_add(1);
        let mut r = Receiver::new();
        assert_eq!(feed_all(&mut r, &bytes), 1);
        assert!(r.is_complete());
        assert!(!r.checksum_ok());
        assert_eq!(r.stats().checksum_errors, 1);
        assert_eq!(r.stats().framing_errors, 0);
    }

    #[test]
    fn garbage_before_frame_counts_each_byte() {
        let mut r = Receiver::new();
        feed_all(&mut r, &[0x00, 0x13, 0xEF]);
        assert_eq!(r.stats().framing_errors, 3);
        assert_eq!(feed_all(&mut r, &Packet::new(0x41, 0, false).bytes()), 1);
        assert!(r.checksum_ok());
        assert_eq!(r.packet().opcode, 0x41);
    }

    #[test]
    fn truncated_frame_then_fresh_frame() {
        let good = Packet::new(0x3A, 2, false).bytes();
        let mut r = Receiver::new();
        feed_all(&mut r, &good[..3]);
        // Lands in opcode..checksum, then fails on the end marker
        feed_all(&mut r, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(r.stats().framing_errors, 1);
        assert!(!r.is_complete());
        assert_eq!(feed_all(&mut r, &good), 1);
        assert!(r.checksum_ok());
        assert_eq!(r.packet().parameter(), 2);
        assert_eq!(r.stats().framing_errors, 1);
    }

    #[test]
    fn stray_start_marker_resyncs_to_version() {
        let good = Packet::new(0x3F, 2, false).bytes();
        let mut r = Receiver::new();
        // Start, then a bad version byte that is itself a start marker
        feed_all(&mut r, &[START]);
        feed_all(&mut r, &good);
        // 7E 7E: the second 7E is a version mismatch but resyncs
        assert_eq!(r.stats().framing_errors, 1);
        assert!(r.is_complete());
        assert!(r.checksum_ok());
        assert_eq!(r.packet().opcode, 0x3F);
    }

    #[test]
    fn end_marker_mismatch_on_start_byte_resyncs() {
        let good = Packet::new(0x3B, 1, false).bytes();
        let mut r = Receiver::new();
        feed_all(&mut r, &good[..9]);
        // End marker replaced by the start of the next frame
        feed_all(&mut r, &good);
        assert_eq!(r.stats().framing_errors, 1);
        assert!(r.is_complete());
        assert_eq!(r.packet().opcode, 0x3B);
    }

    #[test]
    fn unreleased_frame_is_reset_on_next_byte() {
        let good = Packet::new(0x3D, 9, false).bytes();
        let mut r = Receiver::new();
        feed_all(&mut r, &good);
        assert!(r.is_complete());
        assert_eq!(feed_all(&mut r, &good), 1);
        assert_eq!(r.stats().frames, 2);
        assert_eq!(r.stats().framing_errors, 0);
    }

    #[test]
    fn raw_keeps_the_ack_byte_as_sent() {
        // Ack byte 0x02 with a checksum computed over it
        let mut bytes = Packet::new(0x41, 0, false).bytes();
        bytes[4] = 0x02;
        let [high, low] = crate::packet::checksum(&bytes[1..7]).to_be_bytes();
        bytes[7] = high;
        bytes[8] = low;
        let mut r = Receiver::new();
        assert_eq!(feed_all(&mut r, &bytes), 1);
        assert!(r.checksum_ok());
        assert!(r.packet().ack);
        assert_eq!(r.raw(), &bytes);
    }

    #[test]
    fn reset_between_frames() {
        let a = Packet::new(0x43, 10, false).bytes();
        let b = Packet::new(0x44, 3, false).bytes();
        let mut r = Receiver::new();
        assert_eq!(feed_all(&mut r, &a), 1);
        assert_eq!(r.packet().parameter(), 10);
        r.reset();
        assert!(!r.is_complete());
        assert_eq!(feed_all(&mut r, &b), 1);
        assert_eq!(r.packet().opcode, 0x44);
        assert_eq!(r.packet().parameter(), 3);
    }
}
