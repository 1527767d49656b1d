#![allow(dead_code)]

use std::{cell::Cell, collections::VecDeque, convert::Infallible};

use dfmini_protocol::{Clock, Config, DfPlayer, Packet, SerialChannel};
use embedded_hal_nb::serial::{ErrorType, Read, Write};

#[derive(Debug, Default)]
pub struct TxBuffer(pub Vec<u8>);

impl ErrorType for TxBuffer {
    type Error = Infallible;
}

impl Write for TxBuffer {
    fn write(&mut self, c: u8) -> nb::Result<(), Self::Error> {
        self.0.push(c);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ReadBuffer(pub VecDeque<u8>);

impl ErrorType for ReadBuffer {
    type Error = Infallible;
}

impl Read for ReadBuffer {
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.0.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

#[derive(Debug, Default)]
pub struct FakeClock(Cell<u32>);

impl FakeClock {
    pub fn at(ms: u32) -> FakeClock {
        FakeClock(Cell::new(ms))
    }

    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

pub type Channel<const N: usize = 64> = SerialChannel<TxBuffer, ReadBuffer, N>;
pub type Player<'c, const N: usize = 64> = DfPlayer<Channel<N>, &'c FakeClock>;

pub fn player<const N: usize>(clock: &FakeClock, config: Config) -> Player<'_, N> {
    DfPlayer::new(
        SerialChannel::new(TxBuffer::default(), ReadBuffer::default()),
        clock,
        config,
    )
}

/// Frame as the module would send it: acknowledgement byte clear.
pub fn frame(opcode: u8, parameter: u16) -> [u8; 10] {
    Packet::new(opcode, parameter, false).bytes()
}

pub fn inject<const N: usize>(player: &mut Player<'_, N>, bytes: &[u8]) {
    player.channel_mut().rx_mut().0.extend(bytes.iter().copied());
}

pub fn sent<const N: usize>(player: &Player<'_, N>) -> Vec<u8> {
    player.channel().tx().0.clone()
}

pub fn clear_sent<const N: usize>(player: &mut Player<'_, N>) {
    player.channel_mut().tx_mut().0.clear();
}
