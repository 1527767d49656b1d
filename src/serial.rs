use core::fmt;

use embedded_hal_nb::serial::{Error, Read, Write};
use heapless::Deque;

/// The duplex byte stream the player talks over.
///
/// Nothing here may block. `available` reports how many bytes can be
/// read right now without waiting.
pub trait ByteChannel {
    type Error: fmt::Debug;

    fn available(&mut self) -> Result<usize, Self::Error>;

    fn read_byte(&mut self) -> nb::Result<u8, Self::Error>;

    /// Queue a whole frame for transmission. Either all of `data` is
    /// accepted or none of it is.
    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Push queued output further down the wire, if the channel queues.
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Room for a handful of frames each way.
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct BufferedRx<Rx: Read, const N: usize = DEFAULT_CAPACITY> {
    pub rx: Rx,
    buf: Deque<u8, N>,
}

impl<Rx: Read, const N: usize> BufferedRx<Rx, N> {
    pub fn new(rx: Rx) -> BufferedRx<Rx, N> {
        BufferedRx {
            rx,
            buf: Deque::new(),
        }
    }

    /// Load as much as we can from rx into the internal buf, stopping
    /// early once the buf is full. Bytes left in rx stay there until the
    /// next call.
    pub fn buffer(&mut self) -> Result<usize, Rx::Error> {
        while !self.buf.is_full() {
            match self.rx.read() {
                Ok(c) => {
                    // Checked is_full above
                    let _ = self.buf.push_back(c);
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        Ok(self.buf.len())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.buf.pop_front()
    }
}

#[derive(Debug)]
pub struct BufferedTx<Tx: Write, const N: usize = DEFAULT_CAPACITY> {
    pub tx: Tx,
    buf: Deque<u8, N>,
}

impl<Tx: Write, const N: usize> BufferedTx<Tx, N> {
    pub fn new(tx: Tx) -> BufferedTx<Tx, N> {
        BufferedTx {
            tx,
            buf: Deque::new(),
        }
    }

    /// Queue `data` then push out whatever the Tx accepts right now.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError<Tx::Error>> {
        if N - self.buf.len() < data.len() {
            // Make room before giving up
            self.flush()?;
            if N - self.buf.len() < data.len() {
                return Err(ChannelError::Overflow);
            }
        }
        for b in data {
            let _ = self.buf.push_back(*b);
        }
        self.flush()
    }

    /// Write queued bytes until the Tx would block or the queue is empty.
    pub fn flush(&mut self) -> Result<(), ChannelError<Tx::Error>> {
        while let Some(b) = self.buf.front().copied() {
            match self.tx.write(b) {
                Ok(()) => {
                    self.buf.pop_front();
                }
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(ChannelError::Serial(e)),
            }
        }
        match self.tx.flush() {
            Ok(()) | Err(nb::Error::WouldBlock) => Ok(()),
            Err(nb::Error::Other(e)) => Err(ChannelError::Serial(e)),
        }
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Errors from a [`SerialChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError<E> {
    /// The serial half reported an error
    Serial(E),
    /// The transmit queue had no room for a whole frame
    Overflow,
}

impl<E: Error> embedded_io::Error for ChannelError<E> {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_hal_nb::serial::ErrorKind::*;
        match self {
            ChannelError::Overflow => embedded_io::ErrorKind::OutOfMemory,
            ChannelError::Serial(e) => match e.kind() {
                Overrun => embedded_io::ErrorKind::OutOfMemory,
                FrameFormat => embedded_io::ErrorKind::InvalidData,
                Parity => embedded_io::ErrorKind::InvalidData,
                Noise => embedded_io::ErrorKind::Other,
                _ => embedded_io::ErrorKind::Other,
            },
        }
    }
}

impl<E: fmt::Debug> fmt::Display for ChannelError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Serial(e) => write!(f, "serial error: {e:?}"),
            ChannelError::Overflow => f.write_str("transmit queue full"),
        }
    }
}

impl<E: Error> From<E> for ChannelError<E> {
    fn from(value: E) -> Self {
        ChannelError::Serial(value)
    }
}

/// A [`ByteChannel`] over the two halves of an `embedded-hal-nb` UART.
#[derive(Debug)]
pub struct SerialChannel<Tx: Write, Rx: Read, const N: usize = DEFAULT_CAPACITY> {
    tx: BufferedTx<Tx, N>,
    rx: BufferedRx<Rx, N>,
}

impl<Tx: Write, Rx: Read, const N: usize> SerialChannel<Tx, Rx, N> {
    pub fn new(tx: Tx, rx: Rx) -> SerialChannel<Tx, Rx, N> {
        SerialChannel {
            tx: BufferedTx::new(tx),
            rx: BufferedRx::new(rx),
        }
    }

    pub fn split(self) -> (BufferedTx<Tx, N>, BufferedRx<Rx, N>) {
        (self.tx, self.rx)
    }

    /// Borrow the transmit half, e.g. to inspect what was written.
    pub fn tx(&self) -> &Tx {
        &self.tx.tx
    }

    pub fn tx_mut(&mut self) -> &mut Tx {
        &mut self.tx.tx
    }

    pub fn rx_mut(&mut self) -> &mut Rx {
        &mut self.rx.rx
    }
}

impl<Tx, Rx, const N: usize> ByteChannel for SerialChannel<Tx, Rx, N>
where
    Tx: Write,
    Rx: Read<Error = Tx::Error>,
{
    type Error = ChannelError<Tx::Error>;

    fn available(&mut self) -> Result<usize, Self::Error> {
        Ok(self.rx.buffer()?)
    }

    fn read_byte(&mut self) -> nb::Result<u8, Self::Error> {
        if self.rx.is_empty() {
            self.rx
                .buffer()
                .map_err(|e| nb::Error::Other(ChannelError::Serial(e)))?;
        }
        self.rx.pop().ok_or(nb::Error::WouldBlock)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.tx.write_all(data)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.tx.flush()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::convert::Infallible;
    use std::collections::VecDeque;
    use std::vec::Vec;

    use embedded_hal_nb::serial::ErrorType;

    use super::*;

    /// Accepts `room` bytes, then blocks until the test opens it up again.
    #[derive(Debug, Default)]
    struct Slow {
        written: Vec<u8>,
        room: usize,
    }

    impl ErrorType for Slow {
        type Error = Infallible;
    }

    impl Write for Slow {
        fn write(&mut self, c: u8) -> nb::Result<(), Self::Error> {
            if self.room == 0 {
                return Err(nb::Error::WouldBlock);
            }
            self.room -= 1;
            self.written.push(c);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), Self::Error> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Fifo(VecDeque<u8>);

    impl ErrorType for Fifo {
        type Error = Infallible;
    }

    impl Read for Fifo {
        fn read(&mut self) -> nb::Result<u8, Self::Error> {
            self.0.pop_front().ok_or(nb::Error::WouldBlock)
        }
    }

    #[test]
    fn tx_queues_what_would_block() {
        let mut tx: BufferedTx<Slow, 16> = BufferedTx::new(Slow {
            room: 4,
            ..Default::default()
        });
        tx.write_all(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(tx.tx.written, [1, 2, 3, 4]);
        assert_eq!(tx.pending(), 2);
        tx.tx.room = 10;
        tx.flush().unwrap();
        assert_eq!(tx.tx.written, [1, 2, 3, 4, 5, 6]);
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn tx_rejects_frame_that_does_not_fit() {
        let mut tx: BufferedTx<Slow, 8> = BufferedTx::new(Slow::default());
        tx.write_all(&[0; 6]).unwrap();
        assert_eq!(tx.write_all(&[0; 6]), Err(ChannelError::Overflow));
        assert_eq!(tx.pending(), 6);
    }

    #[test]
    fn rx_buffer_is_bounded() {
        let mut rx: BufferedRx<Fifo, 4> = BufferedRx::new(Fifo((0..10).collect()));
        assert_eq!(rx.buffer().unwrap(), 4);
        assert_eq!(rx.pop(), Some(0));
        assert_eq!(rx.buffer().unwrap(), 4);
        assert_eq!(rx.rx.0.len(), 5);
    }

    #[test]
    fn channel_counts_and_reads() {
        let mut ch: SerialChannel<Slow, Fifo, 16> = SerialChannel::new(
            Slow {
                room: 100,
                ..Default::default()
            },
            Fifo([7, 8, 9].into_iter().collect()),
        );
        assert_eq!(ch.available().unwrap(), 3);
        assert_eq!(ch.read_byte().unwrap(), 7);
        assert_eq!(ch.read_byte().unwrap(), 8);
        assert_eq!(ch.read_byte().unwrap(), 9);
        assert!(matches!(ch.read_byte(), Err(nb::Error::WouldBlock)));
        ch.write_all(&[1, 2]).unwrap();
        assert_eq!(ch.tx().written, [1, 2]);
    }

    #[test]
    fn error_kind_maps_overflow() {
        use embedded_io::Error as _;
        let e: ChannelError<Infallible> = ChannelError::Overflow;
        assert_eq!(e.kind(), embedded_io::ErrorKind::OutOfMemory);
    }
}
