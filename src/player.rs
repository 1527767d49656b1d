//! The player engine: gated transmit, polled receive, blocking queries.
//!
//! Nothing here spawns or sleeps. The caller drives [`DfPlayer::poll`]
//! every few milliseconds and sends commands whenever
//! [`DfPlayer::is_ready`] says the link is free. A send attempted while
//! the module is still busy returns `nb::Error::WouldBlock` and puts
//! nothing on the wire.

use core::fmt;

use heapless::Deque;
use log::{debug, trace, warn};

use crate::command::{DeviceError, Equalizer, Event, Medium, Opcode};
use crate::config::Config;
use crate::packet::Packet;
use crate::receiver::{Receiver, Stats};
use crate::serial::ByteChannel;
use crate::timer::{Clock, Deadline};

/// Events that arrived while a query was waiting for its reply.
const PENDING_EVENTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryError<E> {
    /// The link stayed busy for the whole timeout, nothing was sent
    Busy,
    /// The query went out but no matching reply came back
    Timeout,
    /// The module answered with an error
    Device(DeviceError),
    /// No medium given and none selected yet
    NoMedium,
    /// The medium has no files to count
    UnsupportedMedium(Medium),
    Channel(E),
}

impl<E: fmt::Debug> fmt::Display for QueryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Busy => f.write_str("link busy"),
            QueryError::Timeout => f.write_str("no reply before timeout"),
            QueryError::Device(e) => write!(f, "{e}"),
            QueryError::NoMedium => f.write_str("no medium selected"),
            QueryError::UnsupportedMedium(m) => write!(f, "{m:?} holds no files"),
            QueryError::Channel(e) => write!(f, "channel error: {e:?}"),
        }
    }
}

pub struct DfPlayer<C: ByteChannel, K: Clock> {
    channel: C,
    clock: K,
    config: Config,
    outgoing: Packet,
    receiver: Receiver,
    busy: Deadline,
    overdue: Deadline,
    medium: Option<Medium>,
    pending: Deque<Event, PENDING_EVENTS>,
}

impl<C: ByteChannel, K: Clock> DfPlayer<C, K> {
    pub fn new(channel: C, clock: K, config: Config) -> DfPlayer<C, K> {
        let mut outgoing = Packet::default();
        outgoing.set_ack(config.ack);
        DfPlayer {
            channel,
            clock,
            config,
            outgoing,
            receiver: Receiver::new(),
            busy: Deadline::new(),
            overdue: Deadline::new(),
            medium: None,
            pending: Deque::new(),
        }
    }

    /// Optionally reset the module. The reset keeps the link busy until
    /// the module has booted.
    pub fn begin(&mut self, reset: bool) -> nb::Result<(), C::Error> {
        if reset { self.reset() } else { Ok(()) }
    }

    pub fn release(self) -> (C, K) {
        (self.channel, self.clock)
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> Stats {
        self.receiver.stats()
    }

    /// Last medium selected, by [`DfPlayer::select_medium`] or a raw send
    /// of [`Opcode::SelectMedium`].
    pub fn medium(&self) -> Option<Medium> {
        self.medium
    }

    pub fn is_ready(&self) -> bool {
        self.busy.expired(self.clock.now_ms())
    }

    /// Milliseconds until a send will be accepted.
    pub fn busy_remaining(&self) -> u32 {
        self.busy.remaining(self.clock.now_ms())
    }

    pub fn set_ack(&mut self, ack: bool) {
        self.config.ack = ack;
        self.outgoing.set_ack(ack);
    }

    pub fn send(&mut self, opcode: impl Into<u8>, parameter: u16) -> nb::Result<(), C::Error> {
        let [high, low] = parameter.to_be_bytes();
        self.send_bytes(opcode, high, low)
    }

    /// Send with the two parameter bytes given separately.
    pub fn send_bytes(
        &mut self,
        opcode: impl Into<u8>,
        high: u8,
        low: u8,
    ) -> nb::Result<(), C::Error> {
        let opcode = opcode.into();
        let now = self.clock.now_ms();
        if !self.busy.expired(now) {
            trace!(
                "link busy for {} ms, holding {:#04X}",
                self.busy.remaining(now),
                opcode
            );
            return Err(nb::Error::WouldBlock);
        }
        self.outgoing.fill_bytes(opcode, high, low);
        let bytes = self.outgoing.bytes();
        trace!("sending: {:02X?}", bytes);
        self.channel.write_all(&bytes).map_err(nb::Error::Other)?;
        self.arm_after_send(opcode, low, now);
        Ok(())
    }

    fn arm_after_send(&mut self, opcode: u8, low: u8, now: u32) {
        let timing = self.config.timing;
        let op = Opcode::try_from(opcode).ok();
        match op {
            Some(Opcode::Reset) => {
                self.busy.arm(now, timing.reset_busy);
                self.overdue.arm(now, timing.reset_response);
                // The module forgets its medium across a reset
                self.medium = None;
            }
            Some(Opcode::SelectMedium) => {
                self.busy.arm(now, timing.medium_select_busy);
                self.medium = Medium::try_from(low).ok();
            }
            // With acks on, the reply rather than a timer frees the link
            _ if self.config.ack => self.busy.arm(now, 0),
            _ => self.busy.arm(now, timing.settle),
        }
        let replies = self.config.ack || op.is_some_and(Opcode::expects_reply);
        if replies && op != Some(Opcode::Reset) {
            self.overdue.arm(now, timing.response);
        }
        debug!(
            "sent {:#04X}, busy {} ms, reply due {}",
            opcode,
            self.busy.remaining(now),
            self.overdue.is_armed()
        );
    }

    /// Drive the link. Call every few milliseconds.
    ///
    /// Decodes the bytes available on entry, hands each valid frame to
    /// `handler`, then reports a missed reply at most once as
    /// [`Event::Timeout`]. Bytes arriving meanwhile wait for the next call.
    pub fn poll<F: FnMut(Event)>(&mut self, mut handler: F) -> Result<(), C::Error> {
        self.channel.flush()?;
        while let Some(event) = self.pending.pop_front() {
            handler(event);
        }
        let few = self.channel.available()?;
        for _ in 0..few {
            let byte = match self.channel.read_byte() {
                Ok(b) => b,
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e),
            };
            if let Some(event) = self.take_frame(byte) {
                handler(event);
            }
        }
        let now = self.clock.now_ms();
        if self.overdue.is_armed() && self.overdue.expired(now) {
            let elapsed = self.overdue.elapsed(now);
            self.overdue.disarm();
            warn!("no reply after {} ms", elapsed);
            handler(Event::Timeout {
                elapsed_ms: u16::try_from(elapsed).unwrap_or(u16::MAX),
            });
        }
        Ok(())
    }

    /// Feed one byte, returning the event for a completed valid frame.
    fn take_frame(&mut self, byte: u8) -> Option<Event> {
        if !self.receiver.feed(byte) {
            return None;
        }
        let valid = self.receiver.checksum_ok();
        let packet = *self.receiver.packet();
        self.receiver.reset();
        if !valid {
            return None;
        }
        self.overdue.disarm();
        let event = Event::classify(packet.opcode, packet.parameter());
        if Opcode::try_from(packet.opcode).is_ok_and(Opcode::is_media_notice) {
            let now = self.clock.now_ms();
            self.busy.extend(now, self.config.timing.notification_busy);
            debug!("{:?}, link busy for {} ms", event, self.busy.remaining(now));
        }
        Some(event)
    }

    /// Wait up to `timeout_ms` for the next event, calling `yield_now`
    /// between attempts so other work can run.
    pub fn wait_event<Y: FnMut()>(
        &mut self,
        timeout_ms: u32,
        mut yield_now: Y,
    ) -> Result<Option<Event>, C::Error> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        let mut window = Deadline::new();
        window.arm(self.clock.now_ms(), timeout_ms);
        self.next_frame(&window, &mut yield_now)
    }

    fn next_frame<Y: FnMut()>(
        &mut self,
        window: &Deadline,
        yield_now: &mut Y,
    ) -> Result<Option<Event>, C::Error> {
        loop {
            self.channel.flush()?;
            let few = self.channel.available()?;
            for _ in 0..few {
                match self.channel.read_byte() {
                    Ok(b) => {
                        if let Some(event) = self.take_frame(b) {
                            return Ok(Some(event));
                        }
                    }
                    Err(nb::Error::WouldBlock) => break,
                    Err(nb::Error::Other(e)) => return Err(e),
                }
            }
            if window.expired(self.clock.now_ms()) {
                return Ok(None);
            }
            yield_now();
        }
    }

    fn hold(&mut self, event: Event) {
        if self.pending.is_full() {
            if let Some(dropped) = self.pending.pop_front() {
                warn!("event queue full, dropping {:?}", dropped);
            }
        }
        let _ = self.pending.push_back(event);
    }

    /// Send `opcode` and wait for the module to answer with the same
    /// opcode. Unrelated events received meanwhile are handed out by the
    /// next [`DfPlayer::poll`].
    pub fn query<Y: FnMut()>(
        &mut self,
        opcode: impl Into<u8>,
        parameter: u16,
        mut yield_now: Y,
    ) -> Result<u16, QueryError<C::Error>> {
        let opcode = opcode.into();
        let mut window = Deadline::new();
        window.arm(self.clock.now_ms(), self.config.query_timeout);
        loop {
            match self.send(opcode, parameter) {
                Ok(()) => break,
                Err(nb::Error::Other(e)) => return Err(QueryError::Channel(e)),
                Err(nb::Error::WouldBlock) => {
                    if window.expired(self.clock.now_ms()) {
                        return Err(QueryError::Busy);
                    }
                    yield_now();
                }
            }
        }
        loop {
            match self.next_frame(&window, &mut yield_now) {
                Err(e) => return Err(QueryError::Channel(e)),
                Ok(None) => {
                    // Already reported to the caller
                    self.overdue.disarm();
                    return Err(QueryError::Timeout);
                }
                Ok(Some(event)) if event.opcode() == opcode => return Ok(event.parameter()),
                Ok(Some(Event::DeviceError(e))) => return Err(QueryError::Device(e)),
                Ok(Some(Event::Ack)) => {}
                Ok(Some(event)) => self.hold(event),
            }
        }
    }

    fn query_medium<Y: FnMut()>(
        &mut self,
        base: Opcode,
        medium: Option<Medium>,
        yield_now: Y,
    ) -> Result<u16, QueryError<C::Error>> {
        let medium = medium.or(self.medium).ok_or(QueryError::NoMedium)?;
        let offset = medium
            .query_offset()
            .ok_or(QueryError::UnsupportedMedium(medium))?;
        self.query(u8::from(base) + offset, 0, yield_now)
    }

    pub fn read_state<Y: FnMut()>(&mut self, yield_now: Y) -> Result<u16, QueryError<C::Error>> {
        self.query(Opcode::QueryState, 0, yield_now)
    }

    pub fn read_volume<Y: FnMut()>(&mut self, yield_now: Y) -> Result<u16, QueryError<C::Error>> {
        self.query(Opcode::QueryVolume, 0, yield_now)
    }

    pub fn read_eq<Y: FnMut()>(&mut self, yield_now: Y) -> Result<u16, QueryError<C::Error>> {
        self.query(Opcode::QueryEq, 0, yield_now)
    }

    /// Raw playback mode, see [`LoopMode`](crate::command::LoopMode).
    pub fn read_playback_mode<Y: FnMut()>(
        &mut self,
        yield_now: Y,
    ) -> Result<u16, QueryError<C::Error>> {
        self.query(Opcode::QueryPlaybackMode, 0, yield_now)
    }

    /// Number of files on `medium`, or on the selected medium for `None`.
    pub fn read_file_counts<Y: FnMut()>(
        &mut self,
        medium: Option<Medium>,
        yield_now: Y,
    ) -> Result<u16, QueryError<C::Error>> {
        self.query_medium(Opcode::QueryFileCountUDisk, medium, yield_now)
    }

    pub fn read_current_file_number<Y: FnMut()>(
        &mut self,
        medium: Option<Medium>,
        yield_now: Y,
    ) -> Result<u16, QueryError<C::Error>> {
        self.query_medium(Opcode::QueryCurrentUDisk, medium, yield_now)
    }

    pub fn read_file_counts_in_folder<Y: FnMut()>(
        &mut self,
        folder: u8,
        yield_now: Y,
    ) -> Result<u16, QueryError<C::Error>> {
        self.query(Opcode::QueryFolderFileCount, u16::from(folder), yield_now)
    }

    pub fn read_folder_counts<Y: FnMut()>(
        &mut self,
        yield_now: Y,
    ) -> Result<u16, QueryError<C::Error>> {
        self.query(Opcode::QueryFolderCount, 0, yield_now)
    }

    /// Select the medium to play from. Nothing is sent if it is already
    /// selected.
    pub fn select_medium(&mut self, medium: Medium) -> nb::Result<(), C::Error> {
        if self.medium == Some(medium) {
            return Ok(());
        }
        self.send(Opcode::SelectMedium, medium as u16)
    }

    pub fn next(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Next, 0)
    }

    pub fn previous(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Previous, 0)
    }

    pub fn play(&mut self, file: u16) -> nb::Result<(), C::Error> {
        self.send(Opcode::Play, file)
    }

    pub fn volume_up(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::VolumeUp, 0)
    }

    pub fn volume_down(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::VolumeDown, 0)
    }

    /// 0 to 30, larger values are clamped.
    pub fn volume(&mut self, volume: u8) -> nb::Result<(), C::Error> {
        self.send(Opcode::Volume, u16::from(volume.min(30)))
    }

    pub fn eq(&mut self, eq: Equalizer) -> nb::Result<(), C::Error> {
        self.send(Opcode::SetEq, eq as u16)
    }

    pub fn loop_track(&mut self, file: u16) -> nb::Result<(), C::Error> {
        self.send(Opcode::LoopTrack, file)
    }

    pub fn sleep(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Sleep, 0)
    }

    pub fn reset(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Reset, 0)
    }

    pub fn start(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Start, 0)
    }

    pub fn pause(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Pause, 0)
    }

    pub fn play_folder(&mut self, folder: u8, file: u8) -> nb::Result<(), C::Error> {
        self.send_bytes(Opcode::PlayFolder, folder, file)
    }

    pub fn output_setting(&mut self, enable: bool, gain: u8) -> nb::Result<(), C::Error> {
        self.send_bytes(Opcode::OutputSetting, enable as u8, gain)
    }

    pub fn enable_loop_all(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::LoopAll, 1)
    }

    pub fn disable_loop_all(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::LoopAll, 0)
    }

    pub fn play_mp3_folder(&mut self, file: u16) -> nb::Result<(), C::Error> {
        self.send(Opcode::PlayMp3Folder, file)
    }

    pub fn advertise(&mut self, file: u16) -> nb::Result<(), C::Error> {
        self.send(Opcode::Advertise, file)
    }

    /// Folders 1-15 with up to 3000 files each; folder in the top nibble.
    pub fn play_large_folder(&mut self, folder: u8, file: u16) -> nb::Result<(), C::Error> {
        self.send(
            Opcode::PlayLargeFolder,
            (u16::from(folder) << 12) | (file & 0x0FFF),
        )
    }

    pub fn stop_advertise(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::StopAdvertise, 0)
    }

    pub fn stop(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Stop, 0)
    }

    pub fn loop_folder(&mut self, folder: u16) -> nb::Result<(), C::Error> {
        self.send(Opcode::LoopFolder, folder)
    }

    pub fn random_all(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::RandomAll, 0)
    }

    // 0x19 and 0x1A take 0 to enable and 1 to disable

    pub fn enable_loop(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::LoopCurrent, 0)
    }

    pub fn disable_loop(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::LoopCurrent, 1)
    }

    pub fn enable_dac(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Dac, 0)
    }

    pub fn disable_dac(&mut self) -> nb::Result<(), C::Error> {
        self.send(Opcode::Dac, 1)
    }
}
