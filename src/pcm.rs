use crate::{ChannelMode, Config, PCM_AMPLITUDE};
use std::f64::consts::TAU;

/// Largest sample count a buffer may hold; longer patterns are truncated.
pub const MAX_SAMPLES: u64 = i32::MAX as u64;

/// Interleaved signed 16-bit PCM ready for a playback device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub channels: ChannelMode,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.channel_count()
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 * 1000 / self.sample_rate.max(1) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Synthesizes the carrier gated by an ON/OFF pulse pattern.
///
/// The LED adapter rectifies the tone, so the tone runs at half the IR carrier.
pub struct PcmBuilder {
    config: Config,
    phase_inc: f64,
    max_samples: u64,
}

impl PcmBuilder {
    pub fn new(config: Config, carrier_hz: u32) -> Self {
        let tone_hz = (carrier_hz / 2).max(1);
        let phase_inc = tone_hz as f64 * TAU / config.sample_rate as f64;
        Self {
            config,
            phase_inc,
            max_samples: MAX_SAMPLES,
        }
    }

    /// Lowers the sample cap below [`MAX_SAMPLES`].
    pub fn with_max_samples(mut self, max_samples: u64) -> Self {
        self.max_samples = max_samples.min(MAX_SAMPLES);
        self
    }

    fn frames_for(&self, duration_us: u32) -> u64 {
        (duration_us as f64 * self.config.sample_rate as f64 / 1_000_000.0).round() as u64
    }

    pub fn total_frames(&self, pattern: &[u32]) -> u64 {
        pattern
            .iter()
            .fold(self.config.pre_pad_frames, |acc, &d| acc.saturating_add(self.frames_for(d)))
    }

    pub fn build(&self, pattern: &[u32]) -> AudioBuffer {
        let channels = self.config.channels.channel_count() as u64;
        let total = self
            .total_frames(pattern)
            .saturating_mul(channels)
            .min(self.max_samples) as usize;
        let mut writer = FrameWriter {
            samples: vec![0i16; total],
            idx: 0,
            channels: self.config.channels,
        };

        for _ in 0..self.config.pre_pad_frames {
            if !writer.push(0) {
                break;
            }
        }

        let mut on = true;
        for &duration in pattern {
            if writer.is_full() {
                break;
            }
            let frames = self.frames_for(duration);

            if on {
                let mut phase = 0.0f64;
                for _ in 0..frames {
                    let s = (phase.sin() * PCM_AMPLITUDE) as i16;
                    if !writer.push(s) {
                        break;
                    }
                    phase += self.phase_inc;
                    if phase >= TAU {
                        phase -= TAU;
                    }
                }
            } else {
                for _ in 0..frames {
                    if !writer.push(0) {
                        break;
                    }
                }
            }

            on = !on;
        }

        AudioBuffer {
            samples: writer.samples,
            channels: self.config.channels,
            sample_rate: self.config.sample_rate,
        }
    }
}

struct FrameWriter {
    samples: Vec<i16>,
    idx: usize,
    channels: ChannelMode,
}

impl FrameWriter {
    fn is_full(&self) -> bool {
        self.idx >= self.samples.len()
    }

    /// Writes one frame; returns false once the buffer has no room left.
    fn push(&mut self, s: i16) -> bool {
        if self.is_full() {
            return false;
        }
        self.samples[self.idx] = s;
        self.idx += 1;
        if self.channels == ChannelMode::Stereo && self.idx < self.samples.len() {
            self.samples[self.idx] = s.wrapping_neg();
            self.idx += 1;
        }
        !self.is_full()
    }
}

pub fn build_pcm(config: Config, carrier_hz: u32, pattern: &[u32]) -> AudioBuffer {
    PcmBuilder::new(config, carrier_hz).build(pattern)
}
