//! Export-to-file recorder: the device-sink side tap (spec §4.7/§4.8).
//!
//! `Mixer_StartOutputToFile` installs an [`ExportRecorder`] that receives a
//! copy of every rendered slice. WAV export writes PCM directly; compressed
//! export (MP3, Vorbis) hands interleaved `i16` frames to a bounded ring
//! that a dedicated encoder thread drains, so the audio thread never blocks
//! on codec work. Ring overflow increments a counter surfaced when the
//! caller stops the recording (`Platform_Recorder_Stop`).

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{FileError, FileResult};

/// Export container/codec requested by `Mixer_StartOutputToFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Wav,
    Mp3 { bitrate_kbps: u32 },
    Vorbis { quality: i32 },
}

/// Cumulative result reported by `Platform_Recorder_Stop`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderStats {
    pub frames_written: u64,
    pub dropped_frames: u64,
}

/// A side tap that consumes interleaved stereo `f32` slices from the
/// device-sink fill callback (spec §4.7 step 8). Implementations must not
/// block the calling (audio) thread for longer than a bounded ring push.
pub trait RecorderSink: Send {
    fn push_slice(&mut self, interleaved: &[f32], channels: u16);
    fn stats(&self) -> RecorderStats;
    fn finish(self: Box<Self>) -> FileResult<()>;
}

/// Direct WAV writer — the simple, always-available export path.
pub struct WavRecorder {
    writer: hound::WavWriter<BufWriter<File>>,
    frames_written: u64,
    channels: u16,
}

impl WavRecorder {
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> FileResult<Self> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer,
            frames_written: 0,
            channels,
        })
    }
}

impl RecorderSink for WavRecorder {
    fn push_slice(&mut self, interleaved: &[f32], channels: u16) {
        debug_assert_eq!(channels, self.channels);
        for &sample in interleaved {
            let clamped = sample.clamp(-1.0, 1.0);
            let _ = self.writer.write_sample((clamped * i16::MAX as f32) as i16);
        }
        self.frames_written += interleaved.len() as u64 / self.channels.max(1) as u64;
    }

    fn stats(&self) -> RecorderStats {
        RecorderStats {
            frames_written: self.frames_written,
            dropped_frames: 0,
        }
    }

    fn finish(self: Box<Self>) -> FileResult<()> {
        self.writer
            .finalize()
            .map_err(|e| FileError::WriteError(e.to_string()))
    }
}

/// Ring buffer capacity (in frames) for the compressed-export handoff
/// between the audio thread and the encoder thread.
const ENCODER_RING_CAPACITY_FRAMES: usize = 1 << 16;

pub struct EncoderRing {
    queue: Mutex<VecDeque<i16>>,
    dropped: AtomicU64,
    channels: u16,
}

/// Compressed export (MP3/Vorbis): the audio thread only ever touches
/// [`push_slice`], which converts to `i16` and pushes into a bounded ring;
/// a background thread owned by this recorder drains the ring and feeds an
/// external encoder. Overflow never blocks — it increments `dropped`.
pub struct CompressedRecorder {
    ring: Arc<EncoderRing>,
    encoder_thread: Option<std::thread::JoinHandle<FileResult<()>>>,
    frames_pushed: u64,
}

impl CompressedRecorder {
    /// `encode_fn` runs on the encoder thread, pulling frames from the
    /// ring until told to stop, and owns writing the bitstream to `path`.
    pub fn spawn(
        path: PathBuf,
        channels: u16,
        sample_rate: u32,
        format: ExportFormat,
        encode_fn: impl FnOnce(PathBuf, u16, u32, ExportFormat, Arc<EncoderRing>) -> FileResult<()>
            + Send
            + 'static,
    ) -> Self {
        let ring = Arc::new(EncoderRing {
            queue: Mutex::new(VecDeque::with_capacity(ENCODER_RING_CAPACITY_FRAMES)),
            dropped: AtomicU64::new(0),
            channels,
        });
        let ring_for_thread = Arc::clone(&ring);
        let handle = std::thread::spawn(move || {
            encode_fn(path, channels, sample_rate, format, ring_for_thread)
        });
        Self {
            ring,
            encoder_thread: Some(handle),
            frames_pushed: 0,
        }
    }
}

impl RecorderSink for CompressedRecorder {
    fn push_slice(&mut self, interleaved: &[f32], channels: u16) {
        debug_assert_eq!(channels, self.ring.channels);
        let mut queue = self.ring.queue.lock().unwrap();
        for &sample in interleaved {
            if queue.len() >= ENCODER_RING_CAPACITY_FRAMES {
                self.ring.dropped.fetch_add(1, Ordering::Relaxed);
                queue.pop_front();
            }
            queue.push_back((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
        }
        self.frames_pushed += interleaved.len() as u64 / self.ring.channels.max(1) as u64;
    }

    fn stats(&self) -> RecorderStats {
        RecorderStats {
            frames_written: self.frames_pushed,
            dropped_frames: self.ring.dropped.load(Ordering::Relaxed),
        }
    }

    fn finish(mut self: Box<Self>) -> FileResult<()> {
        // Signal end-of-stream by dropping the ring's last strong
        // reference held here; the encoder thread's `Arc::clone` keeps it
        // alive until it drains the remainder and exits.
        if let Some(handle) = self.encoder_thread.take() {
            handle
                .join()
                .map_err(|_| FileError::EncodeError("encoder thread panicked".into()))??;
        }
        Ok(())
    }
}

/// Pull frames queued by the audio thread. Used by an `encode_fn` passed to
/// [`CompressedRecorder::spawn`]. Returns `None` once the ring is starved
/// *and* the caller has been told to stop (callers track their own
/// stop flag; this only reports "nothing available right now").
pub fn drain_ring(ring: &EncoderRing, max_samples: usize) -> Vec<i16> {
    let mut queue = ring.queue.lock().unwrap();
    let n = max_samples.min(queue.len());
    queue.drain(..n).collect()
}
