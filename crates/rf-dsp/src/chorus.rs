//! Stereo chorus for the mixer's chorus send bus (CC93): a modulated delay
//! line per channel, with left/right LFOs in quadrature for width.

use std::f64::consts::TAU;

use rf_core::Sample;

use crate::interp::linear;
use crate::{Processor, ProcessorConfig, StereoProcessor};

/// A single modulated delay line: a write head plus an LFO-swept read head.
#[derive(Debug, Clone)]
struct ModulatedDelay {
    buffer: Vec<Sample>,
    write_pos: usize,
    lfo_phase: f64,
    lfo_rate_hz: f64,
    depth_samples: f64,
    center_samples: f64,
    sample_rate: f64,
}

impl ModulatedDelay {
    fn new(sample_rate: f64, center_ms: f64, depth_ms: f64, lfo_rate_hz: f64, lfo_phase: f64) -> Self {
        let center_samples = center_ms * 0.001 * sample_rate;
        let depth_samples = depth_ms * 0.001 * sample_rate;
        let capacity = (center_samples + depth_samples).ceil() as usize + 4;
        Self {
            buffer: vec![0.0; capacity.max(4)],
            write_pos: 0,
            lfo_phase,
            lfo_rate_hz,
            depth_samples,
            center_samples,
            sample_rate,
        }
    }

    #[inline]
    fn process(&mut self, input: Sample) -> Sample {
        self.buffer[self.write_pos] = input;

        let lfo = (self.lfo_phase * TAU).sin();
        self.lfo_phase += self.lfo_rate_hz / self.sample_rate;
        if self.lfo_phase >= 1.0 {
            self.lfo_phase -= 1.0;
        }

        let delay = (self.center_samples + lfo * self.depth_samples).max(1.0);
        let read_pos = self.write_pos as f64 - delay;
        let len = self.buffer.len() as f64;
        let read_pos = if read_pos < 0.0 { read_pos + len } else { read_pos };

        let i0 = read_pos.floor() as usize % self.buffer.len();
        let i1 = (i0 + 1) % self.buffer.len();
        let frac = read_pos.fract();
        let out = linear(self.buffer[i0], self.buffer[i1], frac);

        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        out
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Stereo chorus built from one modulated delay per channel.
pub struct Chorus {
    left: ModulatedDelay,
    right: ModulatedDelay,
    mix: f64,
}

impl Chorus {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            left: ModulatedDelay::new(sample_rate, 15.0, 4.0, 0.5, 0.0),
            right: ModulatedDelay::new(sample_rate, 15.0, 4.0, 0.5, 0.25),
            mix: 0.5,
        }
    }

    /// Wet/dry mix in `[0, 1]` within the send's own output (the channel
    /// mixer applies the CC93 send level on top of this).
    pub fn set_mix(&mut self, mix: f64) {
        self.mix = mix.clamp(0.0, 1.0);
    }
}

impl Processor for Chorus {
    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

impl StereoProcessor for Chorus {
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        let wet_l = self.left.process(left);
        let wet_r = self.right.process(right);
        (
            left * (1.0 - self.mix) + wet_l * self.mix,
            right * (1.0 - self.mix) + wet_r * self.mix,
        )
    }
}

impl ProcessorConfig for Chorus {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        *self = Self::new(sample_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_mix_is_passthrough() {
        let mut chorus = Chorus::new(44100.0);
        chorus.set_mix(0.0);
        let (l, r) = chorus.process_sample(0.3, -0.2);
        assert!((l - 0.3).abs() < 1e-9);
        assert!((r - (-0.2)).abs() < 1e-9);
    }

    #[test]
    fn fully_wet_moves_away_from_dry_after_warmup() {
        let mut chorus = Chorus::new(44100.0);
        chorus.set_mix(1.0);
        let mut last = (0.0, 0.0);
        for i in 0..2000 {
            let input = if i % 50 == 0 { 1.0 } else { 0.0 };
            last = chorus.process_sample(input, input);
        }
        assert!(last.0.is_finite() && last.1.is_finite());
    }

    #[test]
    fn reset_clears_delay_buffers() {
        let mut chorus = Chorus::new(44100.0);
        chorus.process_sample(1.0, 1.0);
        chorus.reset();
        let (l, r) = chorus.process_sample(0.0, 0.0);
        assert_eq!(l, 0.0);
        assert_eq!(r, 0.0);
    }
}
