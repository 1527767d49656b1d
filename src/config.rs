//! Player timing and options.
//!
//! Module firmware revisions disagree on how long a reset or a medium
//! change keeps the module deaf to commands, so every window is
//! adjustable. The defaults suit the common DFPlayer Mini clones.

/// Durations in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Busy window after a reset while the module boots
    pub reset_busy: u32,
    /// How long to wait for the module to announce itself after a reset
    pub reset_response: u32,
    /// Busy window after a medium select while files are indexed
    pub medium_select_busy: u32,
    /// Busy window after an unacknowledged command, enough to drain the UART
    pub settle: u32,
    /// How long to wait for a reply to any other command
    pub response: u32,
    /// Busy window after the module reports a media change
    pub notification_busy: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            reset_busy: 2000,
            reset_response: 3000,
            medium_select_busy: 200,
            settle: 10,
            response: 500,
            notification_busy: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Ask the module to acknowledge every command
    pub ack: bool,
    pub timing: Timing,
    /// Upper bound for the blocking query helpers
    pub query_timeout: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ack: true,
            timing: Timing::default(),
            query_timeout: 500,
        }
    }
}

impl Config {
    pub fn with_ack(mut self, ack: bool) -> Self {
        self.ack = ack;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_query_timeout(mut self, ms: u32) -> Self {
        self.query_timeout = ms;
        self
    }
}
