//! Sample bank resolver (spec §4.4): turns `(bank, program, note, velocity)`
//! into either a native HSB instrument sample or a dispatch into the
//! SoundFont renderer.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rf_dsp::envelope::EnvelopeParams;
use rf_core::{
    is_motor_vibration, SoundfontFlavor, DLS_PERCUSSION_BANK, GS_CAPITAL_TONE_BANK,
    PERCUSSION_CHANNEL, SF2_PERCUSSION_BANK, XMF_BANK_OFFSET,
};

use crate::error::{EngineError, EngineResult};

/// A decoded instrument sample, resident for the HSB native path (spec
/// §4.4 "HSB native path"). The on-disk HSB container format itself is a
/// proprietary, undocumented detail the spec treats as owned by the "HSB
/// subsystem" — this engine's loader (see [`HsbBank::load`]) implements a
/// small self-describing chunk format sufficient to exercise resolution,
/// voice allocation and playback end to end; see DESIGN.md.
#[derive(Debug, Clone)]
pub struct InstrumentSample {
    pub pcm: Arc<Vec<f32>>,
    pub base_note: u8,
    pub loop_start: u32,
    pub loop_end: u32,
    pub looping: bool,
    pub envelope: EnvelopeParams,
}

impl InstrumentSample {
    /// Pitch ratio for playing `note` relative to this sample's recorded
    /// pitch, combined with a `transpose` in semitones (spec §4.8
    /// `Song_SetTranspose`).
    pub fn pitch_ratio(&self, note: u8, transpose: i8) -> f64 {
        let semitones = (note as i32 + transpose as i32) - self.base_note as i32;
        2f64.powf(semitones as f64 / 12.0)
    }
}

/// `instrument_id = bank * 128 + program` (spec §4.4), indexing a loaded
/// HSB bank's instrument table.
fn instrument_id(bank: u16, program: u8) -> u32 {
    bank as u32 * 128 + program as u32
}

/// A loaded native HSB instrument bank.
#[derive(Debug, Default)]
pub struct HsbBank {
    instruments: std::collections::HashMap<u32, Arc<InstrumentSample>>,
}

impl HsbBank {
    /// Parse the engine's HSB container: a `HSB1` magic, a `u32` LE
    /// instrument count, then per-instrument records of
    /// `{ bank: u16 LE, program: u8, base_note: u8, loop_start: u32 LE,
    /// loop_end: u32 LE, looping: u8, attack/decay/release: u32 LE each,
    /// sustain_level: f32 LE, frame_count: u32 LE, pcm: [f32 LE; frame_count] }`.
    pub fn load(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() < 8 || &bytes[0..4] != b"HSB1" {
            return Err(EngineError::BadBank("missing HSB1 magic".into()));
        }
        let count = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let mut offset = 8;
        let mut instruments = std::collections::HashMap::with_capacity(count);
        for _ in 0..count {
            let rec = read_hsb_record(bytes, &mut offset)
                .ok_or_else(|| EngineError::BadBank("truncated HSB record".into()))?;
            instruments.insert(instrument_id(rec.0, rec.1), rec.2);
        }
        Ok(Self { instruments })
    }

    pub fn lookup(&self, bank: u16, program: u8) -> Option<Arc<InstrumentSample>> {
        self.instruments.get(&instrument_id(bank, program)).cloned()
    }

    pub fn has_preset(&self, bank: u16, program: u8) -> bool {
        self.instruments.contains_key(&instrument_id(bank, program))
    }
}

type HsbRecord = (u16, u8, Arc<InstrumentSample>);

fn read_hsb_record(bytes: &[u8], offset: &mut usize) -> Option<HsbRecord> {
    let o = *offset;
    if bytes.len() < o + 2 + 1 + 1 + 4 + 4 + 1 + 4 + 4 + 4 + 4 + 4 {
        return None;
    }
    let bank = u16::from_le_bytes(bytes[o..o + 2].try_into().ok()?);
    let program = bytes[o + 2];
    let base_note = bytes[o + 3];
    let mut p = o + 4;
    let loop_start = u32::from_le_bytes(bytes[p..p + 4].try_into().ok()?);
    p += 4;
    let loop_end = u32::from_le_bytes(bytes[p..p + 4].try_into().ok()?);
    p += 4;
    let looping = bytes[p] != 0;
    p += 1;
    let attack = u32::from_le_bytes(bytes[p..p + 4].try_into().ok()?);
    p += 4;
    let decay = u32::from_le_bytes(bytes[p..p + 4].try_into().ok()?);
    p += 4;
    let release = u32::from_le_bytes(bytes[p..p + 4].try_into().ok()?);
    p += 4;
    let sustain_level = f32::from_le_bytes(bytes[p..p + 4].try_into().ok()?) as f64;
    p += 4;
    let frame_count = u32::from_le_bytes(bytes[p..p + 4].try_into().ok()?) as usize;
    p += 4;
    if bytes.len() < p + frame_count * 4 {
        return None;
    }
    let mut pcm = Vec::with_capacity(frame_count);
    for i in 0..frame_count {
        let s = p + i * 4;
        pcm.push(f32::from_le_bytes(bytes[s..s + 4].try_into().ok()?));
    }
    p += frame_count * 4;
    *offset = p;

    Some((
        bank,
        program,
        Arc::new(InstrumentSample {
            pcm: Arc::new(pcm),
            base_note,
            loop_start,
            loop_end,
            looping,
            envelope: EnvelopeParams {
                attack_frames: attack,
                decay_frames: decay,
                sustain_level,
                release_frames: release,
            },
        }),
    ))
}

/// The "decoder capabilities" interface (spec §9): a memory-capable
/// renderer (SF2 via `rustysynth`) loads a borrowed byte slice directly;
/// a path-only renderer would need a temp file, via [`TempFileGuard`].
pub trait SoundFontRenderer: Send {
    fn flavor(&self) -> SoundfontFlavor;
    fn has_preset(&self, bank: u16, program: u8) -> bool;
    fn preset_count(&self) -> usize;
    fn program_change(&mut self, channel: u8, bank: u16, program: u8);
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8);
    fn note_off(&mut self, channel: u8, key: u8);
    fn control_change(&mut self, channel: u8, controller: u8, value: u8);
    fn pitch_bend(&mut self, channel: u8, value: i16);
    fn all_sound_off(&mut self, channel: u8);
    /// Render `frames` frames into (already-sized) stereo output buffers.
    fn render(&mut self, left: &mut [f32], right: &mut [f32]);
    fn active_voice_count(&self) -> usize;
    fn reset(&mut self);
}

/// [`SoundFontRenderer`] backed by `rustysynth`'s pure-Rust SF2
/// synthesizer (spec §4.4 "SF2/DLS path"; DLS itself is out of scope per
/// spec §1 — see DESIGN.md for the resulting `BadBank` behavior).
pub struct RustysynthRenderer {
    synth: rustysynth::Synthesizer,
    font: Arc<rustysynth::SoundFont>,
}

impl RustysynthRenderer {
    pub fn load_from_memory(bytes: &[u8], sample_rate: u32) -> EngineResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let font = rustysynth::SoundFont::new(&mut cursor)
            .map_err(|e| EngineError::BadBank(format!("sf2 load failed: {e}")))?;
        let font = Arc::new(font);
        let settings = rustysynth::SynthesizerSettings::new(sample_rate as i32);
        let synth = rustysynth::Synthesizer::new(&font, &settings)
            .map_err(|e| EngineError::BadBank(format!("synth init failed: {e}")))?;
        if font.get_presets().is_empty() {
            return Err(EngineError::BadBank("soundfont has no presets".into()));
        }
        Ok(Self { synth, font })
    }
}

impl SoundFontRenderer for RustysynthRenderer {
    fn flavor(&self) -> SoundfontFlavor {
        SoundfontFlavor::Sf2
    }

    fn has_preset(&self, bank: u16, program: u8) -> bool {
        self.font
            .get_presets()
            .iter()
            .any(|p| p.get_bank_number() as u16 == bank && p.get_patch_number() as u8 == program)
    }

    fn preset_count(&self) -> usize {
        self.font.get_presets().len()
    }

    fn program_change(&mut self, channel: u8, bank: u16, program: u8) {
        self.synth.process_midi_message(channel as i32, 0xB0, 0, bank as i32);
        self.synth.process_midi_message(channel as i32, 0xC0, program as i32, 0);
    }

    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        self.synth.note_on(channel as i32, key as i32, velocity as i32);
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        self.synth.note_off(channel as i32, key as i32);
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        self.synth
            .process_midi_message(channel as i32, 0xB0, controller as i32, value as i32);
    }

    fn pitch_bend(&mut self, channel: u8, value: i16) {
        let value14 = (value as i32 + 8192).clamp(0, 16383);
        self.synth.process_midi_message(
            channel as i32,
            0xE0,
            value14 & 0x7F,
            (value14 >> 7) & 0x7F,
        );
    }

    fn all_sound_off(&mut self, channel: u8) {
        self.synth.process_midi_message(channel as i32, 0xB0, 120, 0);
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.synth.render(left, right);
    }

    fn active_voice_count(&self) -> usize {
        self.synth.get_active_voice_count() as usize
    }

    fn reset(&mut self) {
        self.synth.reset();
    }
}

/// A handle used by `Mixer_AddBank*`/removal; opaque to the caller beyond
/// equality (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankToken(pub u32);

enum BankEntry {
    Hsb(HsbBank),
    /// Guarded by its own lock rather than requiring `&mut BankResolver`:
    /// the audio thread resolves `(bank, program)` through `&self` during
    /// `Song::advance` and, in the same call, needs to drive the matching
    /// renderer — two operations that would otherwise need overlapping
    /// shared and mutable borrows of the resolver. An uncontended,
    /// short-held lock per soundfont sidesteps that without reintroducing
    /// a resolver-wide mutex on the hot path (see DESIGN.md).
    Sf(Mutex<Box<dyn SoundFontRenderer>>),
}

/// Where a resolved `(bank, program)` should play.
#[derive(Clone)]
pub enum Resolution {
    Native(Arc<InstrumentSample>),
    SoundFont { overlay: bool },
    /// Drum-kit absence, "motor vibration" denial, or exhausted fallback
    /// chain: the channel's program is left unset, not downgraded to a
    /// melodic fallback (spec §4.2 S5, §4.4).
    Silenced,
}

/// Deletes a temp file on drop (spec §5, used for DLS/MXMF-decrypt caches
/// that a path-only decoder requires).
pub struct TempFileGuard(pub PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Holds the ordered bank list plus, separately, the SF2 overlay/base
/// distinction the SF2/DLS path needs (spec §4.4).
pub struct BankResolver {
    entries: Vec<(BankToken, BankEntry)>,
    next_token: u32,
    overlay_token: Option<BankToken>,
    base_sf_token: Option<BankToken>,
    /// `None` until an overlay declares presets, at which point it is
    /// fixed per spec §9's "default is 1 when an embedded bank is loaded
    /// and DBNK is absent; 0 otherwise" rule (set by the caller from the
    /// container's `bank_offset_override`/default, not derived here).
    pub xmf_bank_offset_default: u16,
    unloading: AtomicBool,
}

impl BankResolver {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_token: 0,
            overlay_token: None,
            base_sf_token: None,
            xmf_bank_offset_default: 1,
            unloading: AtomicBool::new(false),
        }
    }

    fn alloc_token(&mut self) -> BankToken {
        self.next_token += 1;
        BankToken(self.next_token)
    }

    /// `Mixer_AddBank` for the native HSB path. New banks go to the front
    /// of the search order (spec §3.2).
    pub fn add_hsb_bank(&mut self, bank: HsbBank) -> BankToken {
        let token = self.alloc_token();
        self.entries.insert(0, (token, BankEntry::Hsb(bank)));
        token
    }

    /// Install the base SoundFont (loaded once; spec §3.1 "Bank").
    pub fn set_base_soundfont(&mut self, renderer: Box<dyn SoundFontRenderer>) -> BankToken {
        let token = self.alloc_token();
        self.entries.insert(0, (token, BankEntry::Sf(Mutex::new(renderer))));
        self.base_sf_token = Some(token);
        token
    }

    /// Install an overlay SoundFont (XMF embedded bank): searched before
    /// the base, does not remove it (spec §3.1). Installing must not
    /// reset channel presets — that is enforced at the channel-router
    /// level by never calling `reset()` here.
    pub fn set_overlay_soundfont(&mut self, renderer: Box<dyn SoundFontRenderer>) -> BankToken {
        let token = self.alloc_token();
        self.entries.insert(0, (token, BankEntry::Sf(Mutex::new(renderer))));
        self.overlay_token = Some(token);
        token
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay_token.is_some()
    }

    pub fn has_soundfont(&self) -> bool {
        self.overlay_token.is_some() || self.base_sf_token.is_some()
    }

    fn with_token<R>(&self, token: Option<BankToken>, f: impl FnOnce(&mut dyn SoundFontRenderer) -> R) -> Option<R> {
        let token = token?;
        self.entries
            .iter()
            .find(|(t, _)| *t == token)
            .and_then(|(_, e)| match e {
                BankEntry::Sf(r) => Some(f(&mut *r.lock())),
                BankEntry::Hsb(_) => None,
            })
    }

    fn with_overlay<R>(&self, f: impl FnOnce(&mut dyn SoundFontRenderer) -> R) -> Option<R> {
        self.with_token(self.overlay_token, f)
    }

    fn with_base<R>(&self, f: impl FnOnce(&mut dyn SoundFontRenderer) -> R) -> Option<R> {
        self.with_token(self.base_sf_token, f)
    }

    pub fn overlay_flavor(&self) -> Option<SoundfontFlavor> {
        self.with_overlay(|r| r.flavor())
    }

    pub fn overlay_has_preset(&self, bank: u16, program: u8) -> bool {
        self.with_overlay(|r| r.has_preset(bank, program)).unwrap_or(false)
    }

    pub fn overlay_preset_count(&self) -> usize {
        self.with_overlay(|r| r.preset_count()).unwrap_or(0)
    }

    /// Drive the overlay renderer for a resolved SF2/DLS note-on: the
    /// router never tracked per-renderer program state separately, so the
    /// program change is reissued (idempotently) immediately before the
    /// note (spec §4.3 "Program change").
    pub fn overlay_note_on(&self, channel: u8, bank: u16, program: u8, key: u8, velocity: u8) {
        self.with_overlay(|r| {
            r.program_change(channel, bank, program);
            r.note_on(channel, key, velocity);
        });
    }

    pub fn base_note_on(&self, channel: u8, bank: u16, program: u8, key: u8, velocity: u8) {
        self.with_base(|r| {
            r.program_change(channel, bank, program);
            r.note_on(channel, key, velocity);
        });
    }

    pub fn overlay_note_off(&self, channel: u8, key: u8) {
        self.with_overlay(|r| r.note_off(channel, key));
    }

    pub fn base_note_off(&self, channel: u8, key: u8) {
        self.with_base(|r| r.note_off(channel, key));
    }

    /// Forwarded to every loaded soundfont renderer (spec §4.3's CC table
    /// applies uniformly; only the renderer actually holding a voice on
    /// the channel will audibly react).
    pub fn broadcast_control_change(&self, channel: u8, controller: u8, value: u8) {
        for (_, entry) in &self.entries {
            if let BankEntry::Sf(r) = entry {
                r.lock().control_change(channel, controller, value);
            }
        }
    }

    pub fn broadcast_pitch_bend(&self, channel: u8, value: i16) {
        for (_, entry) in &self.entries {
            if let BankEntry::Sf(r) = entry {
                r.lock().pitch_bend(channel, value);
            }
        }
    }

    pub fn broadcast_all_sound_off(&self, channel: u8) {
        for (_, entry) in &self.entries {
            if let BankEntry::Sf(r) = entry {
                r.lock().all_sound_off(channel);
            }
        }
    }

    /// Render every loaded soundfont renderer's output for this slice and
    /// sum into `left`/`right` (spec §4.1 step 6). `scratch_l`/`scratch_r`
    /// must be at least as long as `left`/`right` and are reused across
    /// calls by the caller to avoid a per-slice allocation.
    pub fn render_soundfonts(&self, left: &mut [f32], right: &mut [f32], scratch_l: &mut [f32], scratch_r: &mut [f32]) {
        for s in left.iter_mut() {
            *s = 0.0;
        }
        for s in right.iter_mut() {
            *s = 0.0;
        }
        for (_, entry) in &self.entries {
            if let BankEntry::Sf(r) = entry {
                let mut r = r.lock();
                r.render(scratch_l, scratch_r);
                for (dst, src) in left.iter_mut().zip(scratch_l.iter()) {
                    *dst += *src;
                }
                for (dst, src) in right.iter_mut().zip(scratch_r.iter()) {
                    *dst += *src;
                }
            }
        }
    }

    pub fn active_soundfont_voice_count(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, e)| match e {
                BankEntry::Sf(r) => r.lock().active_voice_count(),
                BankEntry::Hsb(_) => 0,
            })
            .sum()
    }

    pub fn reset_soundfonts(&self) {
        for (_, entry) in &self.entries {
            if let BankEntry::Sf(r) = entry {
                r.lock().reset();
            }
        }
    }

    /// Move an existing token to the front of the search order (spec
    /// §3.2: affects subsequent lookups only).
    pub fn move_to_front(&mut self, token: BankToken) -> EngineResult<()> {
        let idx = self
            .entries
            .iter()
            .position(|(t, _)| *t == token)
            .ok_or_else(|| EngineError::ParamErr("unknown bank token".into()))?;
        let entry = self.entries.remove(idx);
        self.entries.insert(0, entry);
        Ok(())
    }

    pub fn unloading(&self) -> bool {
        self.unloading.load(Ordering::Acquire)
    }

    pub fn begin_unload(&self) {
        self.unloading.store(true, Ordering::Release);
    }

    pub fn end_unload(&self) {
        self.unloading.store(false, Ordering::Release);
    }

    /// Resolve `(bank, program)` for the native HSB path only, searching
    /// the ordered HSB bank list front-to-back (spec §4.3 "Program
    /// change" steps 3-5).
    pub fn resolve_hsb(&self, bank: u16, program: u8, channel: u8) -> Resolution {
        if is_motor_vibration(bank, program) {
            return Resolution::Silenced;
        }
        if channel == PERCUSSION_CHANNEL && program == 0 {
            return self.resolve_percussion_hsb();
        }
        for (_, entry) in &self.entries {
            if let BankEntry::Hsb(b) = entry {
                if let Some(s) = b.lookup(bank, program) {
                    return Resolution::Native(s);
                }
            }
        }
        // Fallback chain: (0, program), then bank 121, then first preset.
        for (_, entry) in &self.entries {
            if let BankEntry::Hsb(b) = entry {
                if let Some(s) = b.lookup(0, program) {
                    return Resolution::Native(s);
                }
                if let Some(s) = b.lookup(GS_CAPITAL_TONE_BANK, program) {
                    return Resolution::Native(s);
                }
            }
        }
        Resolution::Silenced
    }

    fn resolve_percussion_hsb(&self) -> Resolution {
        for (_, entry) in &self.entries {
            if let BankEntry::Hsb(b) = entry {
                if let Some(s) = b.lookup(SF2_PERCUSSION_BANK, 0) {
                    return Resolution::Native(s);
                }
                if let Some(s) = b.lookup(DLS_PERCUSSION_BANK, 0) {
                    return Resolution::Native(s);
                }
            }
        }
        Resolution::Silenced
    }

    /// Resolve `(bank, program)` for the SF2/DLS path, applying overlay
    /// precedence, bank-offset compensation, GS capital-tone aliasing,
    /// percussion substitution and the motor-vibration denial list (spec
    /// §4.4).
    pub fn resolve_soundfont(&self, bank: u16, program: u8, channel: u8) -> Resolution {
        if is_motor_vibration(bank, program) {
            return Resolution::Silenced;
        }

        if channel == PERCUSSION_CHANNEL && program == 0 {
            let perc_bank_sf2 = self
                .overlay_flavor()
                .or_else(|| {
                    self.entries.iter().find_map(|(_, e)| match e {
                        BankEntry::Sf(r) => Some(r.lock().flavor()),
                        BankEntry::Hsb(_) => None,
                    })
                })
                .unwrap_or(SoundfontFlavor::Sf2)
                .percussion_bank();
            let overlay_has = self.overlay_has_preset(perc_bank_sf2, 0);
            let has = overlay_has
                || self.entries.iter().any(|(_, e)| match e {
                    BankEntry::Sf(r) => r.lock().has_preset(perc_bank_sf2, 0),
                    BankEntry::Hsb(_) => false,
                });
            return if has {
                Resolution::SoundFont { overlay: overlay_has }
            } else {
                Resolution::Silenced
            };
        }

        let overlay_declares_bank_zero = self.overlay_has_preset(0, program) || self.overlay_preset_count() > 0;
        let mut effective_bank = bank;
        if self.has_overlay() && overlay_declares_bank_zero && bank >= 2 {
            effective_bank = bank.saturating_sub(XMF_BANK_OFFSET);
        }
        if self.has_overlay() {
            if self.overlay_has_preset(effective_bank, program) {
                return Resolution::SoundFont { overlay: true };
            }
            // GS capital-tone alias: overlay bank 121 aliases bank 0.
            if effective_bank == 0 && self.overlay_has_preset(GS_CAPITAL_TONE_BANK, program) {
                return Resolution::SoundFont { overlay: true };
            }
        }
        for (_, entry) in &self.entries {
            if let BankEntry::Sf(r) = entry {
                if r.lock().has_preset(bank, program) {
                    return Resolution::SoundFont { overlay: false };
                }
            }
        }
        // Fallback: (0, program), then first preset present anywhere.
        for (_, entry) in &self.entries {
            if let BankEntry::Sf(r) = entry {
                if r.lock().has_preset(0, program) {
                    return Resolution::SoundFont { overlay: false };
                }
            }
        }
        Resolution::Silenced
    }
}

impl Default for BankResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hsb_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"HSB1");
        bytes.extend_from_slice(&1u32.to_le_bytes()); // 1 instrument
        bytes.extend_from_slice(&0u16.to_le_bytes()); // bank 0
        bytes.push(0); // program 0
        bytes.push(60); // base note
        bytes.extend_from_slice(&0u32.to_le_bytes()); // loop start
        bytes.extend_from_slice(&100u32.to_le_bytes()); // loop end
        bytes.push(1); // looping
        bytes.extend_from_slice(&10u32.to_le_bytes()); // attack
        bytes.extend_from_slice(&0u32.to_le_bytes()); // decay
        bytes.extend_from_slice(&100u32.to_le_bytes()); // release
        bytes.extend_from_slice(&1.0f32.to_le_bytes()); // sustain level
        bytes.extend_from_slice(&4u32.to_le_bytes()); // frame count
        for s in [0.1f32, 0.2, 0.3, 0.4] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn hsb_round_trips_a_single_instrument() {
        let bank = HsbBank::load(&sample_hsb_bytes()).unwrap();
        assert!(bank.has_preset(0, 0));
        let sample = bank.lookup(0, 0).unwrap();
        assert_eq!(sample.pcm.len(), 4);
        assert_eq!(sample.base_note, 60);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(HsbBank::load(b"NOPE").is_err());
    }

    #[test]
    fn motor_vibration_programs_are_silenced() {
        let resolver = BankResolver::new();
        assert!(matches!(resolver.resolve_hsb(121, 124, 0), Resolution::Silenced));
    }

    #[test]
    fn percussion_without_drum_kit_is_silenced_not_downgraded() {
        let mut resolver = BankResolver::new();
        resolver.add_hsb_bank(HsbBank::load(&sample_hsb_bytes()).unwrap());
        // bank has only (0,0); channel 9 program 0 requires bank 128/120.
        assert!(matches!(
            resolver.resolve_hsb(0, 0, PERCUSSION_CHANNEL),
            Resolution::Silenced
        ));
    }

    #[test]
    fn move_to_front_changes_search_order() {
        let mut resolver = BankResolver::new();
        let a = resolver.add_hsb_bank(HsbBank::load(&sample_hsb_bytes()).unwrap());
        let b = resolver.add_hsb_bank(HsbBank::default());
        resolver.move_to_front(a).unwrap();
        assert_eq!(resolver.entries[0].0, a);
        let _ = b;
    }

    #[test]
    fn no_soundfont_loaded_reports_empty() {
        let resolver = BankResolver::new();
        assert!(!resolver.has_soundfont());
        assert_eq!(resolver.active_soundfont_voice_count(), 0);
    }
}
