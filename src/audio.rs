use crate::error::{IrBlasterError, Result};
use crate::pcm::{AudioBuffer, PcmBuilder};
use crate::transmitter::IrTransmitter;
use crate::{Config, MAX_CARRIER_HZ, MIN_CARRIER_HZ};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scales 16-bit PCM into the [-1.0, 1.0) float range the output stream is fed with.
pub fn to_f32_samples(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Consumer of finished PCM buffers.
pub trait PcmSink {
    fn play(&self, buffer: &AudioBuffer) -> Result<()>;
}

pub struct AudioOutput {
    device: Device,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| IrBlasterError::AudioDevice("No output device found".into()))?;

        Ok(Self { device })
    }
}

impl PcmSink for AudioOutput {
    /// Plays the whole buffer and blocks until the device has consumed it.
    fn play(&self, buffer: &AudioBuffer) -> Result<()> {
        let config = StreamConfig {
            channels: buffer.channels.channel_count() as u16,
            sample_rate: cpal::SampleRate(buffer.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let samples: Arc<Vec<f32>> = Arc::new(to_f32_samples(&buffer.samples));
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let samples_clone = Arc::clone(&samples);
        let position_clone = Arc::clone(&position);
        let finished_clone = Arc::clone(&finished);

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position_clone.load(Ordering::Relaxed);
                    for sample in data.iter_mut() {
                        if pos < samples_clone.len() {
                            *sample = samples_clone[pos];
                            pos += 1;
                        } else {
                            *sample = 0.0;
                            finished_clone.store(true, Ordering::Release);
                        }
                    }
                    position_clone.store(pos, Ordering::Relaxed);
                },
                |err| warn!("Audio output error: {}", err),
                None,
            )
            .map_err(|e| IrBlasterError::AudioDevice(e.to_string()))?;

        stream
            .play()
            .map_err(|e| IrBlasterError::AudioDevice(e.to_string()))?;

        let start = Instant::now();
        let timeout = Duration::from_millis(buffer.duration_ms() + 1000);
        while !finished.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(10));
            if start.elapsed() > timeout {
                return Err(IrBlasterError::AudioDevice("Playback did not finish".into()));
            }
        }

        // let the device flush its last period before the stream is dropped
        std::thread::sleep(Duration::from_millis(100));
        debug!("Played {} frames", buffer.frames());

        Ok(())
    }
}

/// Sends IR through a headphone-jack LED adapter.
pub struct AudioTransmitter<S: PcmSink> {
    sink: S,
    config: Config,
}

impl<S: PcmSink> AudioTransmitter<S> {
    pub fn new(sink: S, config: Config) -> Self {
        Self { sink, config }
    }

    pub fn build(&self, frequency_hz: u32, pattern: &[u32]) -> AudioBuffer {
        let carrier = frequency_hz.clamp(MIN_CARRIER_HZ, MAX_CARRIER_HZ);
        PcmBuilder::new(self.config.clone(), carrier).build(pattern)
    }
}

impl<S: PcmSink> IrTransmitter for AudioTransmitter<S> {
    fn transmit_raw(&self, frequency_hz: u32, pattern: &[u32]) -> Result<()> {
        let buffer = self.build(frequency_hz, pattern);
        if buffer.is_empty() {
            return Err(IrBlasterError::TransmitFailed("Pattern produced no audio".into()));
        }
        self.sink.play(&buffer)
    }
}

pub fn list_audio_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                devices.push(format!("Output: {}", name));
            }
        }
    }

    devices
}
