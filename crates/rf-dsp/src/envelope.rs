//! Voice amplitude envelope (attack/decay/sustain/release + quick-fade kill).
//!
//! Rates are expressed in Q16.16 gain-per-frame and are pre-scaled at
//! note-on from the instrument's attack/decay/release time constants for
//! the mixer's current output sample rate, so the per-frame `advance` call
//! never needs to touch the sample rate again.

use rf_core::Q16_16;

/// Current stage of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Decay,
    Sustain,
    Release,
    /// Fast fade applied on voice steal or `kill_*`, a few hundred
    /// microseconds long, to avoid an audible click.
    QuickFade,
    Idle,
}

/// Time constants for one voice's envelope, as resolved from the
/// instrument/preset at note-on.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeParams {
    /// Frames to go from 0 to full scale.
    pub attack_frames: u32,
    /// Frames to go from full scale down to `sustain_level`.
    pub decay_frames: u32,
    /// Level held during the sustain stage, in `[0, 1]`.
    pub sustain_level: f64,
    /// Frames to go from the current level to 0 once released.
    pub release_frames: u32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            attack_frames: 64,
            decay_frames: 0,
            sustain_level: 1.0,
            release_frames: 1024,
        }
    }
}

/// Duration of the quick-fade applied when a voice is stolen or killed.
/// 64 frames at 44100 Hz is ~1.45ms, comfortably under "a few hundred
/// microseconds" worth of audible click suppression while staying short
/// enough that stolen voices free promptly.
pub const QUICK_FADE_FRAMES: u32 = 64;

/// A running ADSR envelope, advanced one frame (one sample) at a time.
#[derive(Debug, Clone)]
pub struct Envelope {
    stage: EnvelopeStage,
    level: Q16_16,
    attack_rate: Q16_16,
    decay_rate: Q16_16,
    release_rate: Q16_16,
    sustain_level: Q16_16,
    quick_fade_rate: Q16_16,
}

impl Envelope {
    pub fn new(params: EnvelopeParams) -> Self {
        let mut env = Self {
            stage: EnvelopeStage::Attack,
            level: Q16_16::ZERO,
            attack_rate: Q16_16::ZERO,
            decay_rate: Q16_16::ZERO,
            release_rate: Q16_16::ZERO,
            sustain_level: Q16_16::from_f64(params.sustain_level.clamp(0.0, 1.0)),
            quick_fade_rate: Q16_16::from_f64(1.0 / QUICK_FADE_FRAMES as f64),
        };
        env.retrigger(params);
        env
    }

    /// Reconfigure and restart the envelope for a fresh note-on (voice
    /// reuse after being freed).
    pub fn retrigger(&mut self, params: EnvelopeParams) {
        self.stage = if params.attack_frames == 0 {
            EnvelopeStage::Decay
        } else {
            EnvelopeStage::Attack
        };
        self.level = Q16_16::ZERO;
        self.attack_rate = rate_per_frame(params.attack_frames);
        self.decay_rate = rate_per_frame(params.decay_frames);
        self.release_rate = rate_per_frame(params.release_frames);
        self.sustain_level = Q16_16::from_f64(params.sustain_level.clamp(0.0, 1.0));
    }

    /// Move the envelope into its release stage (note-off / sustain pedal
    /// release). A no-op if already releasing or fading out.
    pub fn release(&mut self) {
        if matches!(self.stage, EnvelopeStage::Release | EnvelopeStage::QuickFade | EnvelopeStage::Idle) {
            return;
        }
        self.stage = EnvelopeStage::Release;
    }

    /// Force a fast fade-to-silence, used by voice stealing and
    /// `kill_all_voices`/`kill_channel_voices`.
    pub fn kill(&mut self) {
        self.stage = EnvelopeStage::QuickFade;
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    /// Advance by one frame and return the current gain in `[0, 1]`.
    pub fn advance(&mut self) -> Q16_16 {
        match self.stage {
            EnvelopeStage::Attack => {
                self.level = self.level + self.attack_rate;
                if self.level.raw() >= Q16_16::ONE.raw() {
                    self.level = Q16_16::ONE;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                if self.level.raw() <= self.sustain_level.raw() || self.decay_rate.raw() == 0 {
                    self.level = self.sustain_level;
                    self.stage = EnvelopeStage::Sustain;
                } else {
                    self.level = self.level - self.decay_rate;
                    if self.level.raw() <= self.sustain_level.raw() {
                        self.level = self.sustain_level;
                        self.stage = EnvelopeStage::Sustain;
                    }
                }
            }
            EnvelopeStage::Sustain => {}
            EnvelopeStage::Release => {
                if self.release_rate.raw() == 0 {
                    self.level = Q16_16::ZERO;
                    self.stage = EnvelopeStage::Idle;
                } else {
                    self.level = self.level - self.release_rate;
                    if self.level.raw() <= 0 {
                        self.level = Q16_16::ZERO;
                        self.stage = EnvelopeStage::Idle;
                    }
                }
            }
            EnvelopeStage::QuickFade => {
                self.level = self.level - self.quick_fade_rate;
                if self.level.raw() <= 0 {
                    self.level = Q16_16::ZERO;
                    self.stage = EnvelopeStage::Idle;
                }
            }
            EnvelopeStage::Idle => {
                self.level = Q16_16::ZERO;
            }
        }

        self.level
    }
}

#[inline]
fn rate_per_frame(frames: u32) -> Q16_16 {
    if frames == 0 {
        Q16_16::ONE
    } else {
        Q16_16::from_f64(1.0 / frames as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attack_reaches_full_scale() {
        let mut env = Envelope::new(EnvelopeParams {
            attack_frames: 10,
            decay_frames: 0,
            sustain_level: 1.0,
            release_frames: 100,
        });
        let mut last = Q16_16::ZERO;
        for _ in 0..10 {
            last = env.advance();
        }
        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert!((last.to_f64() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn release_reaches_silence_and_finishes() {
        let mut env = Envelope::new(EnvelopeParams {
            attack_frames: 1,
            decay_frames: 0,
            sustain_level: 1.0,
            release_frames: 20,
        });
        env.advance();
        env.release();
        for _ in 0..25 {
            env.advance();
        }
        assert!(env.is_finished());
    }

    #[test]
    fn kill_fades_out_quickly() {
        let mut env = Envelope::new(EnvelopeParams::default());
        for _ in 0..env.attack_rate.raw().max(1) as usize {
            env.advance();
        }
        env.kill();
        for _ in 0..QUICK_FADE_FRAMES as usize + 1 {
            env.advance();
        }
        assert!(env.is_finished());
    }

    #[test]
    fn release_is_idempotent_once_releasing() {
        let mut env = Envelope::new(EnvelopeParams::default());
        env.release();
        let stage_after_first = env.stage();
        env.release();
        assert_eq!(env.stage(), stage_after_first);
    }
}
