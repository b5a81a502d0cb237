//! Hardware output through cpal
//!
//! Opens the default output device at its default sample rate and renders
//! stereo, deinterleaving into pre-allocated scratch buffers. Extra device
//! channels are silenced; mono devices get the average of both channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, Device, SampleFormat, Stream, StreamConfig};
use pl_core::{MAX_NUM_FRAMES, StereoBuffer};
use pl_realtime::{AudioWorkgroup, host_time_now};

use crate::{Driver, DriverError, DriverResult, DriverStatus, RenderCallback};

/// Driver for the system's default output device
pub struct CpalDriver {
    device: Device,
    channels: u16,
    sample_rate: u32,
    preferred_buffer_size: usize,
    stream: Option<Stream>,
    is_invalid: Arc<AtomicBool>,
}

impl CpalDriver {
    pub fn new(preferred_buffer_size: usize) -> DriverResult<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DriverError::NoDevice)?;

        let default_config = device
            .default_output_config()
            .map_err(|e| DriverError::Config(e.to_string()))?;
        let sample_rate = default_config.sample_rate();

        let supported = device
            .supported_output_configs()
            .map_err(|e| DriverError::Config(e.to_string()))?
            .find(|supported| {
                supported.sample_format() == SampleFormat::F32
                    && supported.min_sample_rate() <= sample_rate
                    && supported.max_sample_rate() >= sample_rate
            })
            .ok_or_else(|| {
                DriverError::Config(format!("No f32 output config @ {}Hz", sample_rate.0))
            })?;

        log::info!(
            "Output device: {} ({} channels @ {}Hz)",
            device.name().unwrap_or_else(|_| "<unknown>".to_string()),
            supported.channels(),
            sample_rate.0
        );

        Ok(Self {
            device,
            channels: supported.channels(),
            sample_rate: sample_rate.0,
            preferred_buffer_size,
            stream: None,
            is_invalid: Arc::new(AtomicBool::new(false)),
        })
    }

    fn build_stream(&self, mut callback: RenderCallback) -> DriverResult<Stream> {
        let channels = self.channels as usize;
        let config = StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: CpalBufferSize::Fixed(self.preferred_buffer_size as u32),
        };

        let mut scratch = StereoBuffer::new(MAX_NUM_FRAMES);
        let is_invalid = Arc::clone(&self.is_invalid);

        self.device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let host_time = host_time_now();

                    for block in data.chunks_mut(MAX_NUM_FRAMES * channels) {
                        let num_frames = block.len() / channels;
                        scratch.clear(num_frames);
                        callback(&mut scratch.as_mut(num_frames), host_time);

                        for (i, frame) in block.chunks_mut(channels).enumerate() {
                            match frame {
                                [mono] => *mono = 0.5 * (scratch.left[i] + scratch.right[i]),
                                [left, right, rest @ ..] => {
                                    *left = scratch.left[i];
                                    *right = scratch.right[i];
                                    rest.fill(0.0);
                                }
                                [] => {}
                            }
                        }
                    }
                },
                move |err| {
                    log::error!("Audio output stream error: {}", err);
                    is_invalid.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| DriverError::StreamBuild(e.to_string()))
    }
}

impl Driver for CpalDriver {
    fn start(&mut self, callback: RenderCallback) -> DriverResult<()> {
        if self.stream.is_some() {
            return Err(DriverError::AlreadyStarted);
        }

        self.is_invalid.store(false, Ordering::Release);
        let stream = self.build_stream(callback)?;
        stream
            .play()
            .map_err(|e| DriverError::Stream(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause output stream: {}", e);
            }
            // Dropping the stream releases the callback
            drop(stream);
        }
    }

    fn status(&self) -> DriverStatus {
        if self.is_invalid.load(Ordering::Acquire) {
            DriverStatus::Invalid
        } else if self.stream.is_some() {
            DriverStatus::Started
        } else {
            DriverStatus::Stopped
        }
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate as f64
    }

    fn nominal_buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.preferred_buffer_size as f64 / self.sample_rate as f64)
    }

    fn preferred_buffer_size(&self) -> usize {
        self.preferred_buffer_size
    }

    fn set_preferred_buffer_size(&mut self, preferred_buffer_size: usize) -> DriverResult<()> {
        if self.stream.is_some() {
            return Err(DriverError::Busy);
        }
        if preferred_buffer_size == 0 || preferred_buffer_size > MAX_NUM_FRAMES {
            return Err(DriverError::UnsupportedBufferSize(preferred_buffer_size));
        }
        self.preferred_buffer_size = preferred_buffer_size;
        Ok(())
    }

    fn audio_workgroup(&self) -> Option<Arc<dyn AudioWorkgroup>> {
        None
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
