use core::fmt;

use bilge::prelude::*;

/// Opcodes understood or emitted by the module.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Next = 0x01,
    Previous = 0x02,
    Play = 0x03,
    VolumeUp = 0x04,
    VolumeDown = 0x05,
    Volume = 0x06,
    SetEq = 0x07,
    LoopTrack = 0x08,
    SelectMedium = 0x09,
    Sleep = 0x0A,
    Wake = 0x0B,
    Reset = 0x0C,
    Start = 0x0D,
    Pause = 0x0E,
    PlayFolder = 0x0F,
    OutputSetting = 0x10,
    LoopAll = 0x11,
    PlayMp3Folder = 0x12,
    Advertise = 0x13,
    PlayLargeFolder = 0x14,
    StopAdvertise = 0x15,
    Stop = 0x16,
    LoopFolder = 0x17,
    RandomAll = 0x18,
    LoopCurrent = 0x19,
    Dac = 0x1A,
    MediaInserted = 0x3A,
    MediaRemoved = 0x3B,
    FinishedUDisk = 0x3C,
    FinishedSd = 0x3D,
    FinishedFlash = 0x3E,
    MediaOnline = 0x3F,
    ErrorReport = 0x40,
    Ack = 0x41,
    QueryState = 0x42,
    QueryVolume = 0x43,
    QueryEq = 0x44,
    QueryPlaybackMode = 0x45,
    QueryVersion = 0x46,
    QueryFileCountUDisk = 0x47,
    QueryFileCountSd = 0x48,
    QueryFileCountFlash = 0x49,
    QueryKeepOn = 0x4A,
    QueryCurrentUDisk = 0x4B,
    QueryCurrentSd = 0x4C,
    QueryCurrentFlash = 0x4D,
    QueryFolderFileCount = 0x4E,
    QueryFolderCount = 0x4F,
}

impl Opcode {
    /// Does the module answer this opcode even with acknowledgements off?
    pub fn expects_reply(self) -> bool {
        matches!(self as u8, 0x3F | 0x42..=0x4F)
    }

    /// Module-originated notices that leave it briefly unable to take
    /// commands.
    pub fn is_media_notice(self) -> bool {
        matches!(
            self,
            Opcode::MediaInserted | Opcode::MediaRemoved | Opcode::MediaOnline
        )
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use Opcode::*;
        let op = match value {
            0x01 => Next,
            0x02 => Previous,
            0x03 => Play,
            0x04 => VolumeUp,
            0x05 => VolumeDown,
            0x06 => Volume,
            0x07 => SetEq,
            0x08 => LoopTrack,
            0x09 => SelectMedium,
            0x0A => Sleep,
            0x0B => Wake,
            0x0C => Reset,
            0x0D => Start,
            0x0E => Pause,
            0x0F => PlayFolder,
            0x10 => OutputSetting,
            0x11 => LoopAll,
            0x12 => PlayMp3Folder,
            0x13 => Advertise,
            0x14 => PlayLargeFolder,
            0x15 => StopAdvertise,
            0x16 => Stop,
            0x17 => LoopFolder,
            0x18 => RandomAll,
            0x19 => LoopCurrent,
            0x1A => Dac,
            0x3A => MediaInserted,
            0x3B => MediaRemoved,
            0x3C => FinishedUDisk,
            0x3D => FinishedSd,
            0x3E => FinishedFlash,
            0x3F => MediaOnline,
            0x40 => ErrorReport,
            0x41 => Ack,
            0x42 => QueryState,
            0x43 => QueryVolume,
            0x44 => QueryEq,
            0x45 => QueryPlaybackMode,
            0x46 => QueryVersion,
            0x47 => QueryFileCountUDisk,
            0x48 => QueryFileCountSd,
            0x49 => QueryFileCountFlash,
            0x4A => QueryKeepOn,
            0x4B => QueryCurrentUDisk,
            0x4C => QueryCurrentSd,
            0x4D => QueryCurrentFlash,
            0x4E => QueryFolderFileCount,
            0x4F => QueryFolderCount,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// Storage or output selected with [`Opcode::SelectMedium`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    UDisk = 0,
    Sd = 1,
    Aux = 2,
    Sleep = 3,
    Flash = 4,
}

impl Medium {
    /// Offset added to a per-medium query opcode, `None` for media that
    /// hold no files.
    pub fn query_offset(self) -> Option<u8> {
        match self {
            Medium::UDisk => Some(0),
            Medium::Sd => Some(1),
            Medium::Flash => Some(2),
            Medium::Aux | Medium::Sleep => None,
        }
    }
}

impl TryFrom<u8> for Medium {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Medium::UDisk),
            1 => Ok(Medium::Sd),
            2 => Ok(Medium::Aux),
            3 => Ok(Medium::Sleep),
            4 => Ok(Medium::Flash),
            other => Err(other),
        }
    }
}

/// Playback mode reported by [`Opcode::QueryPlaybackMode`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Repeat = 0,
    FolderRepeat,
    SingleRepeat,
    Random,
}

impl TryFrom<u16> for LoopMode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0 => Ok(LoopMode::Repeat),
            1 => Ok(LoopMode::FolderRepeat),
            2 => Ok(LoopMode::SingleRepeat),
            3 => Ok(LoopMode::Random),
            other => Err(other),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equalizer {
    Normal = 0,
    Pop,
    Rock,
    Jazz,
    Classic,
    Bass,
}

/// Which media a notice refers to. Several bits may be set at once.
#[bitsize(16)]
#[derive(DebugBits, Clone, Copy, PartialEq, FromBits)]
pub struct MediaMask {
    pub usb_flash: bool,
    pub sd_card: bool,
    pub usb_host: bool,
    _reserved: u13,
}

/// Error codes carried by [`Opcode::ErrorReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    Busy,
    Sleeping,
    SerialWrongStack,
    ChecksumNotMatch,
    FileIndexOut,
    FileMismatch,
    Advertise,
    Other(u16),
}

impl DeviceError {
    pub fn code(self) -> u16 {
        match self {
            DeviceError::Busy => 1,
            DeviceError::Sleeping => 2,
            DeviceError::SerialWrongStack => 3,
            DeviceError::ChecksumNotMatch => 4,
            DeviceError::FileIndexOut => 5,
            DeviceError::FileMismatch => 6,
            DeviceError::Advertise => 7,
            DeviceError::Other(code) => code,
        }
    }
}

impl From<u16> for DeviceError {
    fn from(value: u16) -> Self {
        match value {
            1 => DeviceError::Busy,
            2 => DeviceError::Sleeping,
            3 => DeviceError::SerialWrongStack,
            4 => DeviceError::ChecksumNotMatch,
            5 => DeviceError::FileIndexOut,
            6 => DeviceError::FileMismatch,
            7 => DeviceError::Advertise,
            other => DeviceError::Other(other),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Busy => f.write_str("module busy"),
            DeviceError::Sleeping => f.write_str("module sleeping"),
            DeviceError::SerialWrongStack => f.write_str("module received a malformed frame"),
            DeviceError::ChecksumNotMatch => f.write_str("module saw a checksum mismatch"),
            DeviceError::FileIndexOut => f.write_str("file index out of range"),
            DeviceError::FileMismatch => f.write_str("file not found"),
            DeviceError::Advertise => f.write_str("advertisement not allowed now"),
            DeviceError::Other(code) => write!(f, "module error {code}"),
        }
    }
}

/// Opcode used for [`Event::Timeout`]; never sent by the module.
pub const TIMEOUT_OPCODE: u8 = 0;

/// A classified frame from the module, or a missed reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// No reply arrived in time after the last send
    Timeout { elapsed_ms: u16 },
    MediaInserted(MediaMask),
    MediaRemoved(MediaMask),
    MediaOnline(MediaMask),
    PlayFinished { medium: Medium, track: u16 },
    DeviceError(DeviceError),
    Ack,
    /// Answer to a query opcode
    Reply { opcode: Opcode, value: u16 },
    Unknown { opcode: u8, parameter: u16 },
}

impl Event {
    pub fn classify(opcode: u8, parameter: u16) -> Event {
        let Ok(op) = Opcode::try_from(opcode) else {
            return Event::Unknown { opcode, parameter };
        };
        match op {
            Opcode::MediaInserted => Event::MediaInserted(MediaMask::from(parameter)),
            Opcode::MediaRemoved => Event::MediaRemoved(MediaMask::from(parameter)),
            Opcode::MediaOnline => Event::MediaOnline(MediaMask::from(parameter)),
            Opcode::FinishedUDisk => Event::PlayFinished {
                medium: Medium::UDisk,
                track: parameter,
            },
            Opcode::FinishedSd => Event::PlayFinished {
                medium: Medium::Sd,
                track: parameter,
            },
            Opcode::FinishedFlash => Event::PlayFinished {
                medium: Medium::Flash,
                track: parameter,
            },
            Opcode::ErrorReport => Event::DeviceError(DeviceError::from(parameter)),
            Opcode::Ack => Event::Ack,
            op if op.expects_reply() => Event::Reply {
                opcode: op,
                value: parameter,
            },
            _ => Event::Unknown { opcode, parameter },
        }
    }

    /// Raw opcode this event was decoded from.
    pub fn opcode(&self) -> u8 {
        match self {
            Event::Timeout { .. } => TIMEOUT_OPCODE,
            Event::MediaInserted(_) => Opcode::MediaInserted as u8,
            Event::MediaRemoved(_) => Opcode::MediaRemoved as u8,
            Event::MediaOnline(_) => Opcode::MediaOnline as u8,
            Event::PlayFinished { medium, .. } => match medium {
                Medium::Sd => Opcode::FinishedSd as u8,
                Medium::Flash => Opcode::FinishedFlash as u8,
                _ => Opcode::FinishedUDisk as u8,
            },
            Event::DeviceError(_) => Opcode::ErrorReport as u8,
            Event::Ack => Opcode::Ack as u8,
            Event::Reply { opcode, .. } => *opcode as u8,
            Event::Unknown { opcode, .. } => *opcode,
        }
    }

    /// Raw parameter this event was decoded from.
    pub fn parameter(&self) -> u16 {
        match self {
            Event::Timeout { elapsed_ms } => *elapsed_ms,
            Event::MediaInserted(mask) | Event::MediaRemoved(mask) | Event::MediaOnline(mask) => {
                mask.value
            }
            Event::PlayFinished { track, .. } => *track,
            Event::DeviceError(e) => e.code(),
            Event::Ack => 0,
            Event::Reply { value, .. } => *value,
            Event::Unknown { parameter, .. } => *parameter,
        }
    }
}
