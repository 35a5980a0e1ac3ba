//! Device-sink slice pipeline (spec §4.7): the boundary between the engine
//! and the platform audio backend.
//!
//! The platform backend is modeled as a pull: it repeatedly asks the engine
//! to fill a byte buffer of a given frame count. [`Sink`] is the trait both
//! the live `cpal`-backed [`DeviceSink`] and the offline, explicitly-serviced
//! [`OfflineSink`] implement, so the facade's call site doesn't care which
//! is active (spec §4.8 `Mixer_StartOutputToFile`).

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use crate::{thread_priority, AudioError, AudioResult};

/// Callback invoked once per slice to fill `out` (interleaved, in the
/// engine's native sample format) with `frames` frames. Must not allocate,
/// must not block on a non-RT lock, must not perform I/O.
pub type FillCallback = Box<dyn FnMut(&mut [i16], usize) + Send>;

/// Picks a slice size of roughly 5-11ms at `sample_rate`, rounded to a
/// whole number of frames such that `frames * channels * 2 bytes` (16-bit
/// output) is a multiple of 64 bytes, per spec §4.7.
pub fn slice_frames_for(sample_rate: u32, channels: u16) -> usize {
    let target_ms = 8.0;
    let mut frames = ((sample_rate as f64) * target_ms / 1000.0).round() as usize;
    frames = frames.max(1);
    let bytes_per_frame = channels as usize * 2;
    loop {
        if (frames * bytes_per_frame) % 64 == 0 {
            break;
        }
        frames += 1;
    }
    frames
}

/// Common interface for anything that drives the engine's slice pipeline.
pub trait Sink {
    /// Begin delivering fill requests (or, for an offline sink, become
    /// ready to be serviced).
    fn engage(&mut self) -> AudioResult<()>;
    /// Stop delivering fill requests.
    fn disengage(&mut self);
    fn is_engaged(&self) -> bool;
    /// Post-mix gain, `0..512` (256 = unity), applied immediately before
    /// the buffer reaches the device (spec §4.7).
    fn set_gain(&self, gain: i32);
    /// Balance, `-256..256`.
    fn set_balance(&self, balance: i32);
}

fn apply_gain_balance(buffer: &mut [i16], channels: u16, gain: i32, balance: i32) {
    let gain = gain as f64 / 256.0;
    let (gain_l, gain_r) = balance_gains(balance);
    if channels == 2 {
        for frame in buffer.chunks_exact_mut(2) {
            frame[0] = clamp_i16(frame[0] as f64 * gain * gain_l);
            frame[1] = clamp_i16(frame[1] as f64 * gain * gain_r);
        }
    } else {
        for s in buffer.iter_mut() {
            *s = clamp_i16(*s as f64 * gain);
        }
    }
}

fn balance_gains(balance: i32) -> (f64, f64) {
    let b = (balance.clamp(-256, 256) as f64) / 256.0;
    if b >= 0.0 {
        (1.0 - b, 1.0)
    } else {
        (1.0, 1.0 + b)
    }
}

#[inline]
fn clamp_i16(value: f64) -> i16 {
    value.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// A live `cpal`-backed output sink. Reconfigures to the device's native
/// sample rate on open so no per-callback rate conversion is needed (spec
/// §4.7).
pub struct DeviceSink {
    stream: Option<Stream>,
    sample_rate: u32,
    channels: u16,
    gain: Arc<AtomicI32>,
    balance: Arc<AtomicI32>,
    engaged: Arc<AtomicBool>,
}

impl DeviceSink {
    pub fn open(
        sample_rate: u32,
        channels: u16,
        mut fill: FillCallback,
    ) -> AudioResult<Self> {
        let host = crate::device::get_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoDevice)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let supported_format = device
            .default_output_config()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .sample_format();

        let gain = Arc::new(AtomicI32::new(256));
        let balance = Arc::new(AtomicI32::new(0));
        let engaged = Arc::new(AtomicBool::new(false));

        let gain_cb = gain.clone();
        let balance_cb = balance.clone();
        let frame_buf: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));

        let err_fn = |err| log::warn!("audio stream error: {err}");

        let stream = match supported_format {
            SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _| {
                        thread_priority::set_realtime_priority();
                        let frames = data.len() / channels as usize;
                        fill(data, frames);
                        apply_gain_balance(
                            data,
                            channels,
                            gain_cb.load(Ordering::Relaxed),
                            balance_cb.load(Ordering::Relaxed),
                        );
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::StreamBuildError(e.to_string()))?,
            _ => {
                // Non-i16 device formats: render into a scratch i16 buffer
                // and convert, so the fill callback only ever sees i16.
                device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _| {
                            thread_priority::set_realtime_priority();
                            let frames = data.len() / channels as usize;
                            let mut scratch = frame_buf.lock().unwrap();
                            scratch.resize(data.len(), 0);
                            fill(&mut scratch, frames);
                            apply_gain_balance(
                                &mut scratch,
                                channels,
                                gain_cb.load(Ordering::Relaxed),
                                balance_cb.load(Ordering::Relaxed),
                            );
                            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                                *dst = *src as f32 / i16::MAX as f32;
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| AudioError::StreamBuildError(e.to_string()))?
            }
        };

        Ok(Self {
            stream: Some(stream),
            sample_rate,
            channels,
            gain,
            balance,
            engaged,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Sink for DeviceSink {
    fn engage(&mut self) -> AudioResult<()> {
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            self.engaged.store(true, Ordering::Release);
            Ok(())
        } else {
            Err(AudioError::DeviceNotFound("stream not built".into()))
        }
    }

    fn disengage(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.pause();
        }
        self.engaged.store(false, Ordering::Release);
    }

    fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    fn set_gain(&self, gain: i32) {
        self.gain.store(gain.clamp(0, 512), Ordering::Relaxed);
    }

    fn set_balance(&self, balance: i32) {
        self.balance
            .store(balance.clamp(-256, 256), Ordering::Relaxed);
    }
}

/// Offline render sink used by `Mixer_StartOutputToFile`: fills are driven
/// by explicit `service()` calls from the host (`ServiceAudioOutputToFile`)
/// rather than a device callback thread (spec §4.8).
pub struct OfflineSink {
    fill: FillCallback,
    sample_rate: u32,
    channels: u16,
    slice_frames: usize,
    gain: AtomicI32,
    balance: AtomicI32,
    engaged: AtomicBool,
}

impl OfflineSink {
    pub fn new(sample_rate: u32, channels: u16, fill: FillCallback) -> Self {
        Self {
            fill,
            sample_rate,
            channels,
            slice_frames: slice_frames_for(sample_rate, channels),
            gain: AtomicI32::new(256),
            balance: AtomicI32::new(0),
            engaged: AtomicBool::new(false),
        }
    }

    /// Render exactly one slice into `out` (interleaved i16), applying
    /// post-mix gain/balance. Returns the number of frames written.
    pub fn service(&mut self, out: &mut Vec<i16>) -> usize {
        out.clear();
        out.resize(self.slice_frames * self.channels as usize, 0);
        (self.fill)(out, self.slice_frames);
        apply_gain_balance(
            out,
            self.channels,
            self.gain.load(Ordering::Relaxed),
            self.balance.load(Ordering::Relaxed),
        );
        self.slice_frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Sink for OfflineSink {
    fn engage(&mut self) -> AudioResult<()> {
        self.engaged.store(true, Ordering::Release);
        Ok(())
    }

    fn disengage(&mut self) {
        self.engaged.store(false, Ordering::Release);
    }

    fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    fn set_gain(&self, gain: i32) {
        self.gain.store(gain.clamp(0, 512), Ordering::Relaxed);
    }

    fn set_balance(&self, balance: i32) {
        self.balance
            .store(balance.clamp(-256, 256), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_size_is_multiple_of_64_bytes() {
        for &rate in &[22050u32, 44100, 48000, 96000] {
            let frames = slice_frames_for(rate, 2);
            assert_eq!((frames * 2 * 2) % 64, 0, "rate={rate}");
        }
    }

    #[test]
    fn offline_sink_service_reports_frame_count() {
        let mut sink = OfflineSink::new(44100, 2, Box::new(|buf, _frames| buf.fill(123)));
        let mut out = Vec::new();
        let frames = sink.service(&mut out);
        assert_eq!(out.len(), frames * 2);
        assert!(out.iter().all(|&s| s == 123));
    }

    #[test]
    fn balance_hard_left_mutes_right_channel() {
        let mut buf = vec![1000i16, 1000i16];
        apply_gain_balance(&mut buf, 2, 256, -256);
        assert_eq!(buf[1], 0);
        assert_eq!(buf[0], 1000);
    }
}
