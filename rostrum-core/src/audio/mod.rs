//! Microphone capture via cpal.
//!
//! The cpal input callback runs on an OS audio thread at elevated priority
//! and must not block on a lock or perform I/O. The callback here only
//! converts to mono f32 into a reused scratch buffer and writes into the
//! lock-free ring producer.
//!
//! Device choice favors real microphones: without an explicit preference the
//! system default input is used unless it is a playback monitor, in which
//! case the [`device`] scoring picks the most voice-like endpoint instead.
//!
//! `cpal::Stream` is `!Send` on Windows and macOS (COM / CoreAudio thread
//! affinity), so `AudioCapture` must be created and dropped on the same
//! thread. The session accomplishes this by opening the device inside its
//! `spawn_blocking` closure.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::AudioProducer,
    error::{Result, RostrumError},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active capture stream. Not `Send`; see the module doc.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: cpal::Stream,
    running: Arc<AtomicBool>,
    /// Native capture rate reported by the device (Hz).
    pub sample_rate: u32,
}

/// Average interleaved frames down to mono into `dst`.
#[cfg(feature = "audio-cpal")]
fn mix_to_mono<T: Copy>(dst: &mut Vec<f32>, data: &[T], channels: usize, to_f32: impl Fn(T) -> f32) {
    let frames = data.len() / channels;
    dst.resize(frames, 0.0);
    for (frame, slot) in dst.iter_mut().enumerate() {
        let base = frame * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += to_f32(data[base + c]);
        }
        *slot = sum / channels as f32;
    }
}

#[cfg(feature = "audio-cpal")]
fn push_mono(producer: &mut AudioProducer, samples: &[f32]) {
    let written = producer.push_slice(samples);
    if written < samples.len() {
        warn!(dropped = samples.len() - written, "capture ring full");
    }
}

/// Resolve the capture device when no explicit preference is set: the system
/// default input, unless that endpoint records system playback, in which case
/// the highest-scoring enumerated microphone wins.
#[cfg(feature = "audio-cpal")]
fn pick_capture_device(host: &cpal::Host) -> Result<cpal::Device> {
    use cpal::traits::HostTrait;

    let default = host.default_input_device();
    let default_name = default.as_ref().and_then(|d| d.name().ok());
    let default_is_monitor = default_name
        .as_deref()
        .map(device::is_monitor_name)
        .unwrap_or(false);

    match default {
        Some(dev) if !default_is_monitor => Ok(dev),
        fallback => {
            if let Some(name) = &default_name {
                warn!(
                    name = name.as_str(),
                    "default input records system playback, scanning for a microphone"
                );
            }
            let devices = host
                .input_devices()
                .map_err(|e| RostrumError::CaptureFault(e.to_string()))?;
            devices
                .max_by_key(|d| {
                    d.name()
                        .map(|n| device::speech_score(&n))
                        .unwrap_or(i32::MIN)
                })
                .or(fallback)
                .ok_or_else(|| {
                    RostrumError::CaptureFault("no audio input device available".into())
                })
        }
    }
}

impl AudioCapture {
    /// Open an input device by preferred name. Without a preference (or when
    /// the preferred name is missing) the choice falls to
    /// [`pick_capture_device`], which steers away from playback monitors.
    ///
    /// # Errors
    /// `CaptureFault` when no usable device exists or the stream cannot be
    /// built or started.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected = None;

        if let Some(preferred) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected = devices
                        .find(|d| d.name().map(|n| n == preferred).unwrap_or(false));
                    if selected.is_none() {
                        warn!(preferred, "preferred input device not found, falling back");
                    }
                }
                Err(e) => warn!("could not enumerate input devices: {e}"),
            }
        }

        let device = match selected {
            Some(device) => device,
            None => pick_capture_device(&host)?,
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| RostrumError::CaptureFault(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let ch = channels as usize;

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);
        let running_u8 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        if ch == 1 {
                            push_mono(&mut producer, data);
                        } else {
                            mix_to_mono(&mut mix_buf, data, ch, |s| s);
                            push_mono(&mut producer, &mix_buf);
                        }
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_to_mono(&mut mix_buf, data, ch, |s| s as f32 / 32768.0);
                        push_mono(&mut producer, &mix_buf);
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }

            SampleFormat::U8 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !running_u8.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_to_mono(&mut mix_buf, data, ch, |s| (s as f32 - 128.0) / 128.0);
                        push_mono(&mut producer, &mix_buf);
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(RostrumError::CaptureFault(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| RostrumError::CaptureFault(e.to_string()))?;

        stream
            .play()
            .map_err(|e| RostrumError::CaptureFault(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Open the system default microphone.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when built without the `audio-cpal` feature: live capture is
/// unavailable, but sample feeds and file replay still work.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(RostrumError::CaptureFault(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }
}
