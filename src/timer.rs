//! Millisecond clock and monostable deadlines.

/// Monotonic millisecond clock. Free running and allowed to wrap.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<C: Clock> Clock for &C {
    fn now_ms(&self) -> u32 {
        (*self).now_ms()
    }
}

/// A one-shot deadline captured as a start time plus a duration.
///
/// The remaining time is recomputed from the clock on every query, so
/// nothing needs to tick it. Once expired it stays expired until armed
/// again. Durations must stay below `u32::MAX / 2` for wrapping
/// subtraction to hold.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: u32,
    duration: u32,
    armed: bool,
}

impl Deadline {
    pub const fn new() -> Deadline {
        Deadline {
            start: 0,
            duration: 0,
            armed: false,
        }
    }

    pub fn arm(&mut self, now: u32, duration: u32) {
        self.start = now;
        self.duration = duration;
        self.armed = true;
    }

    /// Push the deadline out to at least `duration` from now, never
    /// shortening what is already pending.
    pub fn extend(&mut self, now: u32, duration: u32) {
        if self.remaining(now) < duration {
            self.arm(now, duration);
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Time since the deadline was last armed.
    pub fn elapsed(&self, now: u32) -> u32 {
        now.wrapping_sub(self.start)
    }

    /// Time left, zero when expired or never armed.
    pub fn remaining(&self, now: u32) -> u32 {
        if !self.armed {
            return 0;
        }
        self.duration.saturating_sub(self.elapsed(now))
    }

    pub fn expired(&self, now: u32) -> bool {
        self.remaining(now) == 0
    }
}
