//! Standalone PCM playback (spec §3.3 `Sound`): a decoded buffer plus a
//! playback cursor, independent of the MIDI/bank machinery `Song` uses.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use rf_core::Q16_16;
use rf_file::{read_audio, AudioData};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// A loaded, independently playable PCM clip.
pub struct Sound {
    data: Arc<AudioData>,
    /// Current read position, audio-thread-visible (spec §5).
    position_frames: AtomicU64,
    state_lock: parking_lot::Mutex<PlaybackState>,
    volume: AtomicU32,
    loops_remaining: AtomicU32,
    loop_forever: AtomicBool,
    /// Drop-sample/repeat-sample resampler state, used when the mixer's
    /// output rate differs from this clip's native rate (spec §4.7: the
    /// engine reconfigures to match the device on open, but a standalone
    /// `Sound` keeps its own decoded rate regardless).
    resample: parking_lot::Mutex<ResampleState>,
}

#[derive(Default)]
struct ResampleState {
    primed: bool,
    frac: f64,
    cur: (f64, f64),
    next: (f64, f64),
}

const LOOP_FOREVER_SENTINEL: u32 = u32::MAX;

impl Sound {
    pub fn load_file(path: &str) -> EngineResult<Self> {
        let data = read_audio(path)?;
        Ok(Self::from_audio_data(data))
    }

    pub fn load_memory_wav(bytes: &[u8]) -> EngineResult<Self> {
        let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes))
            .map_err(|e| EngineError::BadFile(e.to_string()))?;
        let spec = reader.spec();
        let num_channels = spec.channels as usize;
        let samples: Vec<f64> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.unwrap_or(0.0) as f64)
                .collect(),
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f64;
                reader
                    .samples::<i32>()
                    .map(|s| s.unwrap_or(0) as f64 / max_value)
                    .collect()
            }
        };
        let data = AudioData::from_interleaved(&samples, num_channels.max(1), spec.sample_rate);
        Ok(Self::from_audio_data(data))
    }

    fn from_audio_data(data: AudioData) -> Self {
        Self {
            data: Arc::new(data),
            position_frames: AtomicU64::new(0),
            state_lock: parking_lot::Mutex::new(PlaybackState::Stopped),
            volume: AtomicU32::new(Q16_16::ONE.raw() as u32),
            loops_remaining: AtomicU32::new(0),
            loop_forever: AtomicBool::new(false),
            resample: parking_lot::Mutex::new(ResampleState::default()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.data.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.data.num_channels()
    }

    pub fn num_frames(&self) -> usize {
        self.data.num_frames()
    }

    pub fn duration_secs(&self) -> f64 {
        self.data.duration()
    }

    pub fn state(&self) -> PlaybackState {
        *self.state_lock.lock()
    }

    /// `Sound_Start`: begin playback from `start_frame` with `loop_count`
    /// (0 = play once, `u32::MAX` = loop forever).
    pub fn start(&self, volume: Q16_16, start_frame: u64, loop_count: u32) -> EngineResult<()> {
        let mut state = self.state_lock.lock();
        if *state == PlaybackState::Playing {
            return Err(EngineError::StillPlaying);
        }
        self.position_frames.store(start_frame.min(self.num_frames() as u64), Ordering::Release);
        self.volume.store(volume.raw() as u32, Ordering::Release);
        self.loop_forever.store(loop_count == LOOP_FOREVER_SENTINEL, Ordering::Release);
        self.loops_remaining.store(loop_count, Ordering::Release);
        *state = PlaybackState::Playing;
        *self.resample.lock() = ResampleState::default();
        Ok(())
    }

    pub fn stop(&self) {
        *self.state_lock.lock() = PlaybackState::Stopped;
        self.position_frames.store(0, Ordering::Release);
    }

    pub fn pause(&self) -> EngineResult<()> {
        let mut state = self.state_lock.lock();
        if *state != PlaybackState::Playing {
            return Err(EngineError::ParamErr("sound is not playing".into()));
        }
        *state = PlaybackState::Paused;
        Ok(())
    }

    pub fn resume(&self) -> EngineResult<()> {
        let mut state = self.state_lock.lock();
        if *state != PlaybackState::Paused {
            return Err(EngineError::ParamErr("sound is not paused".into()));
        }
        *state = PlaybackState::Playing;
        Ok(())
    }

    pub fn set_volume(&self, volume: Q16_16) {
        self.volume.store(volume.raw() as u32, Ordering::Release);
    }

    /// Render one stereo frame, advancing the position cursor. Returns
    /// silence (and marks the sound stopped) once playback has ended with
    /// no loops remaining.
    pub fn render_frame(&self) -> (f64, f64) {
        if self.state() != PlaybackState::Playing {
            return (0.0, 0.0);
        }
        let frames = self.num_frames();
        if frames == 0 {
            return (0.0, 0.0);
        }
        let pos = self.position_frames.load(Ordering::Acquire) as usize;
        if pos >= frames {
            if self.loop_forever.load(Ordering::Acquire) {
                self.position_frames.store(0, Ordering::Release);
                return self.render_frame();
            }
            let remaining = self.loops_remaining.load(Ordering::Acquire);
            if remaining > 0 {
                self.loops_remaining.store(remaining - 1, Ordering::Release);
                self.position_frames.store(0, Ordering::Release);
                return self.render_frame();
            }
            self.stop();
            return (0.0, 0.0);
        }

        let volume = Q16_16::from_raw(self.volume.load(Ordering::Acquire) as i32).to_f64();
        let channels = self.data.num_channels();
        let (l, r) = if channels == 1 {
            let s = self.data.channels[0][pos] * volume;
            (s, s)
        } else {
            (self.data.channels[0][pos] * volume, self.data.channels[1][pos] * volume)
        };
        self.position_frames.store(pos as u64 + 1, Ordering::Release);
        (l, r)
    }

    /// Render one frame at the mixer's `output_rate`, linearly
    /// interpolating between native-rate samples when the rates differ
    /// (drop/repeat resampling; spec §4.7's "simple rate conversion on
    /// exit" fallback, applied per-`Sound` since each clip keeps its own
    /// decoded rate).
    pub fn render_frame_at_rate(&self, output_rate: u32) -> (f64, f64) {
        if self.state() != PlaybackState::Playing {
            return (0.0, 0.0);
        }
        let ratio = self.sample_rate() as f64 / output_rate.max(1) as f64;
        let mut rs = self.resample.lock();
        if !rs.primed {
            rs.cur = self.render_frame();
            rs.next = self.render_frame();
            rs.frac = 0.0;
            rs.primed = true;
        }
        let (cl, cr) = rs.cur;
        let (nl, nr) = rs.next;
        let out = (cl + (nl - cl) * rs.frac, cr + (nr - cr) * rs.frac);
        rs.frac += ratio;
        while rs.frac >= 1.0 {
            rs.frac -= 1.0;
            rs.cur = rs.next;
            rs.next = self.render_frame();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_sound(frames: usize) -> Sound {
        Sound::from_audio_data(AudioData::new(2, frames, 44100))
    }

    #[test]
    fn stops_after_playing_once_by_default() {
        let sound = silent_sound(4);
        sound.start(Q16_16::ONE, 0, 0).unwrap();
        for _ in 0..4 {
            sound.render_frame();
        }
        assert_eq!(sound.state(), PlaybackState::Stopped);
    }

    #[test]
    fn loop_forever_never_stops_on_its_own() {
        let sound = silent_sound(2);
        sound.start(Q16_16::ONE, 0, u32::MAX).unwrap();
        for _ in 0..20 {
            sound.render_frame();
        }
        assert_eq!(sound.state(), PlaybackState::Playing);
    }

    #[test]
    fn pause_then_resume_continues_from_position() {
        let sound = silent_sound(10);
        sound.start(Q16_16::ONE, 0, 0).unwrap();
        sound.render_frame();
        sound.pause().unwrap();
        assert_eq!(sound.state(), PlaybackState::Paused);
        sound.resume().unwrap();
        assert_eq!(sound.state(), PlaybackState::Playing);
    }

    #[test]
    fn starting_twice_while_playing_errs() {
        let sound = silent_sound(10);
        sound.start(Q16_16::ONE, 0, 0).unwrap();
        assert!(matches!(sound.start(Q16_16::ONE, 0, 0), Err(EngineError::StillPlaying)));
    }
}
