//! Time-related types for audio and MIDI processing

use serde::{Deserialize, Serialize};

/// Sample position in the timeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SamplePosition(pub u64);

impl SamplePosition {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: f64) -> Self {
        Self((seconds * sample_rate) as u64)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: f64) -> f64 {
        self.0 as f64 / sample_rate
    }

    #[inline]
    pub fn advance(&mut self, samples: u64) {
        self.0 += samples;
    }
}

impl std::ops::Add<u64> for SamplePosition {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub for SamplePosition {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// Time duration in samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleDuration(pub u64);

impl SampleDuration {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: f64) -> Self {
        Self((seconds * sample_rate) as u64)
    }

    #[inline]
    pub fn from_ms(ms: f64, sample_rate: f64) -> Self {
        Self::from_seconds(ms / 1000.0, sample_rate)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: f64) -> f64 {
        self.0 as f64 / sample_rate
    }

    #[inline]
    pub fn to_ms(self, sample_rate: f64) -> f64 {
        self.to_seconds(sample_rate) * 1000.0
    }
}

/// Tempo in BPM, as carried by a MIDI `SetTempo` meta-event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo(pub f64);

impl Tempo {
    pub const DEFAULT: Self = Self(120.0);

    /// Construct from the raw microseconds-per-quarter-note value carried by
    /// an SMF `SetTempo` meta-event.
    #[inline]
    pub fn from_micros_per_quarter(micros: u32) -> Self {
        if micros == 0 {
            Self::DEFAULT
        } else {
            Self(60_000_000.0 / micros as f64)
        }
    }

    #[inline]
    pub fn micros_per_quarter(self) -> u32 {
        if self.0 <= 0.0 {
            500_000
        } else {
            (60_000_000.0 / self.0).round() as u32
        }
    }

    #[inline]
    pub fn beat_duration_samples(self, sample_rate: f64) -> f64 {
        (60.0 / self.0) * sample_rate
    }

    /// Samples per MIDI tick, given pulses-per-quarter-note (PPQN)
    #[inline]
    pub fn samples_per_tick(self, sample_rate: f64, ppqn: u16) -> f64 {
        self.beat_duration_samples(sample_rate) / ppqn as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_round_trip_120_bpm() {
        let tempo = Tempo::from_micros_per_quarter(500_000);
        assert!((tempo.0 - 120.0).abs() < 1e-9);
        assert_eq!(tempo.micros_per_quarter(), 500_000);
    }

    #[test]
    fn samples_per_tick_at_44100() {
        let tempo = Tempo(120.0);
        let spt = tempo.samples_per_tick(44100.0, 480);
        // one quarter note = 0.5s = 22050 samples, / 480 ticks
        assert!((spt - 22050.0 / 480.0).abs() < 1e-6);
    }
}
