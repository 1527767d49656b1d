//! Driver for DFPlayer Mini style serial audio modules.
//!
//! Every exchange with the module is a fixed ten byte frame:
//! ```text
//! 7E FF 06 <opcode> <ack> <param hi> <param lo> <sum hi> <sum lo> EF
//! ```
//! where the 16 bit sum is the two's complement of the bytes from the
//! version byte through the parameter. [`DfPlayer`] owns the byte channel
//! and a millisecond clock, gates sends behind a busy window and turns
//! incoming frames into [`Event`]s.

#![no_std]

pub mod command;
pub mod config;
pub mod packet;
pub mod player;
pub mod receiver;
pub mod serial;
pub mod timer;

pub trait Encode {
    type Error;

    fn encode(&self, buffer: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Decode<'a> where Self: Sized {
    type Error;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error>;
}

pub use command::{
    DeviceError, Equalizer, Event, LoopMode, MediaMask, Medium, Opcode, TIMEOUT_OPCODE,
};
pub use config::{Config, Timing};
pub use packet::{FRAME_LEN, Packet, PacketError};
pub use player::{DfPlayer, QueryError};
pub use receiver::{Receiver, Stats};
pub use serial::{BufferedRx, BufferedTx, ByteChannel, ChannelError, SerialChannel};
pub use timer::{Clock, Deadline};
