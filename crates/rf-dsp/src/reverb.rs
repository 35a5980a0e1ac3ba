//! Algorithmic reverb for the mixer's reverb send bus (CC91).
//!
//! A classic Schroeder/Moorer topology: four parallel comb filters feeding
//! two series allpass filters per channel, with slightly detuned comb
//! lengths between left and right for stereo decorrelation.

use rf_core::Sample;

use crate::{Processor, ProcessorConfig, StereoProcessor};

/// A feedback comb filter with a one-pole damping filter in the loop, so
/// the reverb tail darkens as it decays (as real rooms do).
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<Sample>,
    pos: usize,
    feedback: f64,
    damp: f64,
    filter_state: f64,
}

impl CombFilter {
    fn new(delay_samples: usize, feedback: f64, damp: f64) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            pos: 0,
            feedback,
            damp,
            filter_state: 0.0,
        }
    }

    #[inline(always)]
    fn process(&mut self, input: Sample) -> Sample {
        let output = self.buffer[self.pos];
        self.filter_state = output * (1.0 - self.damp) + self.filter_state * self.damp;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.pos = 0;
    }
}

/// Allpass filter used for diffusion after the comb bank.
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<Sample>,
    pos: usize,
    feedback: f64,
}

impl AllpassFilter {
    fn new(delay_samples: usize, feedback: f64) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            pos: 0,
            feedback,
        }
    }

    #[inline(always)]
    fn process(&mut self, input: Sample) -> Sample {
        let delayed = self.buffer[self.pos];
        let output = delayed - input * self.feedback;
        self.buffer[self.pos] = input + delayed * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

/// Comb delay lengths in samples at 44100 Hz (scaled for other rates);
/// mutually prime-ish to avoid periodic reinforcement.
const COMB_LENGTHS_L: [usize; 4] = [1557, 1617, 1491, 1422];
const COMB_LENGTHS_R: [usize; 4] = [1640, 1700, 1557, 1500];
const ALLPASS_LENGTHS_L: [usize; 2] = [225, 556];
const ALLPASS_LENGTHS_R: [usize; 2] = [241, 579];

/// Schroeder/Moorer-style algorithmic reverb, used as the engine's single
/// shared reverb send effect.
pub struct SchroederReverb {
    combs_l: Vec<CombFilter>,
    combs_r: Vec<CombFilter>,
    allpasses_l: Vec<AllpassFilter>,
    allpasses_r: Vec<AllpassFilter>,
    sample_rate: f64,
    room_size: f64,
    damping: f64,
}

impl SchroederReverb {
    pub fn new(sample_rate: f64) -> Self {
        let mut reverb = Self {
            combs_l: Vec::new(),
            combs_r: Vec::new(),
            allpasses_l: Vec::new(),
            allpasses_r: Vec::new(),
            sample_rate,
            room_size: 0.5,
            damping: 0.5,
        };
        reverb.rebuild();
        reverb
    }

    fn scale(&self, samples_at_44100: usize) -> usize {
        ((samples_at_44100 as f64) * self.sample_rate / 44100.0).round() as usize
    }

    fn rebuild(&mut self) {
        let feedback = 0.70 + self.room_size * 0.28;
        let damp = self.damping.clamp(0.0, 1.0);

        self.combs_l = COMB_LENGTHS_L
            .iter()
            .map(|&len| CombFilter::new(self.scale(len), feedback, damp))
            .collect();
        self.combs_r = COMB_LENGTHS_R
            .iter()
            .map(|&len| CombFilter::new(self.scale(len), feedback, damp))
            .collect();
        self.allpasses_l = ALLPASS_LENGTHS_L
            .iter()
            .map(|&len| AllpassFilter::new(self.scale(len), 0.5))
            .collect();
        self.allpasses_r = ALLPASS_LENGTHS_R
            .iter()
            .map(|&len| AllpassFilter::new(self.scale(len), 0.5))
            .collect();
    }

    /// Room size in `[0, 1]`; larger values lengthen the decay tail.
    pub fn set_room_size(&mut self, size: f64) {
        self.room_size = size.clamp(0.0, 1.0);
        self.rebuild();
    }

    /// High-frequency damping in `[0, 1]`.
    pub fn set_damping(&mut self, damping: f64) {
        self.damping = damping.clamp(0.0, 1.0);
        self.rebuild();
    }
}

impl Processor for SchroederReverb {
    fn reset(&mut self) {
        for c in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            c.reset();
        }
        for a in self.allpasses_l.iter_mut().chain(self.allpasses_r.iter_mut()) {
            a.reset();
        }
    }
}

impl StereoProcessor for SchroederReverb {
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        let input = (left + right) * 0.5;

        let mut wet_l = 0.0;
        for comb in &mut self.combs_l {
            wet_l += comb.process(input);
        }
        let mut wet_r = 0.0;
        for comb in &mut self.combs_r {
            wet_r += comb.process(input);
        }

        for ap in &mut self.allpasses_l {
            wet_l = ap.process(wet_l);
        }
        for ap in &mut self.allpasses_r {
            wet_r = ap.process(wet_r);
        }

        (wet_l * 0.25, wet_r * 0.25)
    }
}

impl ProcessorConfig for SchroederReverb {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.rebuild();
    }
}

/// The closed set of 12 reverb presets the mixer's reverb type setting
/// selects from (spec §4.1 step 5). Each maps onto a `(room_size, damping)`
/// pair for [`SchroederReverb`] — the spec does not mandate the exact
/// algorithm, only that the preset set is closed at 12 entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ReverbPreset {
    #[default]
    Room1 = 0,
    Room2 = 1,
    Room3 = 2,
    Hall1 = 3,
    Hall2 = 4,
    Plate = 5,
    Delay = 6,
    Panning = 7,
    SmallRoom = 8,
    MediumRoom = 9,
    LargeRoom = 10,
    Chamber = 11,
}

impl ReverbPreset {
    pub const COUNT: u8 = 12;

    pub fn from_index(index: u8) -> Option<Self> {
        Some(match index {
            0 => Self::Room1,
            1 => Self::Room2,
            2 => Self::Room3,
            3 => Self::Hall1,
            4 => Self::Hall2,
            5 => Self::Plate,
            6 => Self::Delay,
            7 => Self::Panning,
            8 => Self::SmallRoom,
            9 => Self::MediumRoom,
            10 => Self::LargeRoom,
            11 => Self::Chamber,
            _ => return None,
        })
    }

    /// `(room_size, damping)` fed to [`SchroederReverb::set_room_size`]/
    /// [`SchroederReverb::set_damping`].
    pub fn params(self) -> (f64, f64) {
        match self {
            ReverbPreset::Room1 => (0.2, 0.6),
            ReverbPreset::Room2 => (0.3, 0.55),
            ReverbPreset::Room3 => (0.35, 0.5),
            ReverbPreset::Hall1 => (0.7, 0.3),
            ReverbPreset::Hall2 => (0.8, 0.25),
            ReverbPreset::Plate => (0.5, 0.1),
            ReverbPreset::Delay => (0.9, 0.8),
            ReverbPreset::Panning => (0.6, 0.4),
            ReverbPreset::SmallRoom => (0.15, 0.65),
            ReverbPreset::MediumRoom => (0.4, 0.5),
            ReverbPreset::LargeRoom => (0.6, 0.45),
            ReverbPreset::Chamber => (0.45, 0.35),
        }
    }
}

impl SchroederReverb {
    /// Apply one of the 12 closed reverb presets.
    pub fn set_preset(&mut self, preset: ReverbPreset) {
        let (room_size, damping) = preset.params();
        self.room_size = room_size.clamp(0.0, 1.0);
        self.damping = damping.clamp(0.0, 1.0);
        self.rebuild();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_produces_decaying_silence() {
        let mut reverb = SchroederReverb::new(44100.0);
        for _ in 0..8192 {
            let (l, r) = reverb.process_sample(0.0, 0.0);
            assert_eq!(l, 0.0);
            assert_eq!(r, 0.0);
        }
    }

    #[test]
    fn impulse_produces_a_tail() {
        let mut reverb = SchroederReverb::new(44100.0);
        reverb.process_sample(1.0, 1.0);
        let mut energy = 0.0;
        for _ in 0..4000 {
            let (l, r) = reverb.process_sample(0.0, 0.0);
            energy += l.abs() + r.abs();
        }
        assert!(energy > 0.0);
    }

    #[test]
    fn reset_clears_state() {
        let mut reverb = SchroederReverb::new(44100.0);
        reverb.process_sample(1.0, 1.0);
        reverb.reset();
        let (l, r) = reverb.process_sample(0.0, 0.0);
        assert_eq!(l, 0.0);
        assert_eq!(r, 0.0);
    }
}
