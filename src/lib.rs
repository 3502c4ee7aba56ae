pub mod audio;
pub mod error;
pub mod pattern;
pub mod pcm;
pub mod protocol;
pub mod transmitter;
pub mod usb;

pub use audio::*;
pub use error::*;
pub use pattern::*;
pub use pcm::*;
pub use protocol::*;
pub use transmitter::*;
pub use usb::*;

pub const SAMPLE_RATE: u32 = 48000;
pub const MIN_CARRIER_HZ: u32 = 15000;
pub const MAX_CARRIER_HZ: u32 = 60000;
pub const PCM_AMPLITUDE: f64 = 32000.0;

pub const BULK_WRITE_TIMEOUT_MS: u64 = 400;
pub const READER_WINDOW_MS: u64 = 1000;
pub const READER_IO_TIMEOUT_MS: u64 = 300;

/// Wiring of the headphone-jack LED adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// One LED across a single channel.
    Mono,
    /// Two LEDs driven differentially: right channel is the inverted left.
    Stereo,
}

impl ChannelMode {
    pub fn channel_count(&self) -> usize {
        match self {
            ChannelMode::Mono => 1,
            ChannelMode::Stereo => 2,
        }
    }

    pub fn from_count(count: u16) -> Self {
        if count == 2 {
            ChannelMode::Stereo
        } else {
            ChannelMode::Mono
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub channels: ChannelMode,
    pub pre_pad_frames: u64,
    pub sample_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: ChannelMode::Mono,
            pre_pad_frames: 0,
            sample_rate: SAMPLE_RATE,
        }
    }
}
