//! The `Mixer` facade (spec §3.1, §4.1, §4.8): process-wide playback
//! context. Owns the voice table, the bank resolver, the effects sends,
//! the active Song/Sound sets, and the device-sink slice pipeline entry
//! point (`process_slice`).

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rf_audio::{DeviceSink, FillCallback, MidiRing, OfflineSink, Sink};
use rf_core::{MidiEventData, Q16_16, Sample};
use rf_dsp::chorus::Chorus;
use rf_dsp::interp::InterpolationMode;
use rf_dsp::reverb::{ReverbPreset, SchroederReverb};
use rf_dsp::StereoProcessor;
use rf_file::{ExportFormat, RecorderSink, RecorderStats, WavRecorder};

use crate::bank::{BankResolver, BankToken, HsbBank, Resolution, RustysynthRenderer};
use crate::channel::{route_event, ChannelState, ChannelType, NoteAction, CHANNELS_PER_SONG};
use crate::error::{EngineError, EngineResult};
use crate::sequencer::decode_channel_message;
use crate::song::{Song, VoiceSink};
use crate::sound::Sound;
use crate::voice::{VoiceKey, VoiceTable};

/// `Mixer_Open` arguments (spec §4.8).
#[derive(Debug, Clone, Copy)]
pub struct OpenConfig {
    pub sample_rate: u32,
    pub interpolation: InterpolationMode,
    pub channels: u16,
    /// Capped against the compiled `MAX_VOICES` by `Mixer::open`.
    pub midi_voices: usize,
    pub sound_voices: usize,
    /// Master volume at open time, `0..100` percent (spec §6 `-v`).
    pub mix_level_percent: u32,
    pub engage_audio: bool,
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            interpolation: InterpolationMode::Linear,
            channels: 2,
            midi_voices: 48,
            sound_voices: 16,
            mix_level_percent: 100,
            engage_audio: true,
        }
    }
}

/// Scratch buffers reused across slices so the render path never
/// allocates (spec §5 "preallocated on open at peak slice size").
struct MixBuffers {
    dry_l: Vec<Sample>,
    dry_r: Vec<Sample>,
    rev_l: Vec<Sample>,
    rev_r: Vec<Sample>,
    cho_l: Vec<Sample>,
    cho_r: Vec<Sample>,
    sf_l: Vec<f32>,
    sf_r: Vec<f32>,
    sf_scratch_l: Vec<f32>,
    sf_scratch_r: Vec<f32>,
    interleaved: Vec<Sample>,
}

impl MixBuffers {
    fn new(capacity: usize) -> Self {
        Self {
            dry_l: vec![0.0; capacity],
            dry_r: vec![0.0; capacity],
            rev_l: vec![0.0; capacity],
            rev_r: vec![0.0; capacity],
            cho_l: vec![0.0; capacity],
            cho_r: vec![0.0; capacity],
            sf_l: vec![0.0; capacity],
            sf_r: vec![0.0; capacity],
            sf_scratch_l: vec![0.0; capacity],
            sf_scratch_r: vec![0.0; capacity],
            interleaved: vec![0.0; capacity * 2],
        }
    }

    fn ensure_capacity(&mut self, frames: usize) {
        if self.dry_l.len() >= frames {
            return;
        }
        *self = MixBuffers::new(frames);
    }
}

/// A mixer-owned handle the caller gets back from `add_bank_*`, wrapping
/// the resolver's [`BankToken`] plus which list it was inserted into (all
/// HSB/SF banks currently share one resolver, per spec §3.1 "ordered
/// list").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerBankToken(pub BankToken);

/// Process-wide playback context (spec §3.1 `Mixer`).
pub struct Mixer {
    sample_rate: AtomicU32,
    channels: u16,
    interp: Mutex<InterpolationMode>,
    voices: Mutex<VoiceTable>,
    resolver: RwLock<BankResolver>,
    songs: Mutex<HashMap<u32, Arc<Song>>>,
    sounds: Mutex<HashMap<u32, Arc<Sound>>>,
    next_song_id: AtomicU32,
    next_sound_id: AtomicU32,
    /// Cap on simultaneously started standalone `Sound`s, the other half
    /// of the `midi_voices`/`sound_voices` partition `Mixer::open` reads
    /// from `OpenConfig` (spec §4.8).
    sound_voice_limit: AtomicUsize,
    /// Negotiated output bit depth (spec §3.1 "8/16 bit"); `process_slice`
    /// always renders through the 16-bit path, `process_slice_8bit`
    /// requantizes the same mix for 8-bit consumers.
    output_bits: AtomicU32,

    master_volume: AtomicU32,
    /// `-256..256`.
    master_balance: AtomicI32,
    max_overdrive_percent: AtomicU32,

    reverb: Mutex<SchroederReverb>,
    chorus: Mutex<Chorus>,
    reverb_enabled: AtomicBool,
    chorus_enabled: AtomicBool,

    midi_ring: MidiRing,
    /// 16-channel GM state for device-sourced live MIDI, independent of
    /// any loaded `Song` (spec §4.1 step 2's "live" input path).
    live_channels: Mutex<[ChannelState; CHANNELS_PER_SONG]>,

    buffers: Mutex<MixBuffers>,
    recorder: Mutex<Option<Box<dyn RecorderSink>>>,

    sink: Mutex<Option<Box<dyn Sink>>>,
    offline: Mutex<Option<OfflineSink>>,
}

/// Device-thread-fed ring capacity (spec §4.6: "device-thread-fed ring
/// uses 16384").
const LIVE_RING_CAPACITY: usize = 16_384;

/// Pseudo-song id used to tag voices allocated from live device-sourced
/// MIDI (step 2 of the slice pipeline), distinct from any real `Song`
/// since those are assigned starting at 1.
const LIVE_INPUT_SONG_ID: u32 = u32::MAX;

/// Decode one short MIDI message pulled off the live ring into a channel
/// number plus its event body. Device-sourced messages always carry a
/// full status byte (no running status to track here, unlike file
/// playback), so anything starting with a data byte or too short for
/// its message type is dropped.
fn decode_live_midi_message(bytes: &[u8]) -> Option<(u8, MidiEventData)> {
    let &status = bytes.first()?;
    if status & 0x80 == 0 {
        return None;
    }
    let channel = status & 0x0F;
    let msg_type = status & 0xF0;
    let needed = match msg_type {
        rf_core::status::PROGRAM_CHANGE | rf_core::status::CHANNEL_PRESSURE => 1,
        _ => 2,
    };
    let data = bytes.get(1..1 + needed)?;
    Some((channel, decode_channel_message(msg_type, data)))
}

impl Mixer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sample_rate: AtomicU32::new(44_100),
            channels: 2,
            interp: Mutex::new(InterpolationMode::Linear),
            voices: Mutex::new(VoiceTable::new()),
            resolver: RwLock::new(BankResolver::new()),
            songs: Mutex::new(HashMap::new()),
            sounds: Mutex::new(HashMap::new()),
            next_song_id: AtomicU32::new(1),
            next_sound_id: AtomicU32::new(1),
            sound_voice_limit: AtomicUsize::new(crate::voice::MAX_VOICES),
            output_bits: AtomicU32::new(16),
            master_volume: AtomicU32::new(Q16_16::ONE.raw() as u32),
            master_balance: AtomicI32::new(0),
            max_overdrive_percent: AtomicU32::new(100),
            reverb: Mutex::new(SchroederReverb::new(44_100.0)),
            chorus: Mutex::new(Chorus::new(44_100.0)),
            reverb_enabled: AtomicBool::new(true),
            chorus_enabled: AtomicBool::new(true),
            midi_ring: MidiRing::new(LIVE_RING_CAPACITY),
            live_channels: Mutex::new(std::array::from_fn(|_| ChannelState::new(ChannelType::Midi))),
            buffers: Mutex::new(MixBuffers::new(4096)),
            recorder: Mutex::new(None),
            sink: Mutex::new(None),
            offline: Mutex::new(None),
        })
    }

    /// `Mixer_Open`. Caps `midi_voices + sound_voices` against the
    /// compiled `MAX_VOICES` (spec §4.8), partitioning the native voice
    /// table's pool between native-sample voices and standalone `Sound`
    /// playback proportionally to the requested split.
    pub fn open(self: &Arc<Self>, config: OpenConfig) -> EngineResult<()> {
        if self.is_engaged() {
            return Err(EngineError::Busy);
        }
        let requested_total = config.midi_voices + config.sound_voices;
        let capped_total = requested_total.min(crate::voice::MAX_VOICES).max(1);
        let midi_limit = if requested_total == 0 {
            capped_total
        } else {
            ((config.midi_voices * capped_total) / requested_total).clamp(1, capped_total)
        };
        let sound_limit = capped_total - midi_limit;
        self.voices.lock().set_pool_limit(midi_limit);
        self.sound_voice_limit.store(sound_limit.max(1), Ordering::Release);
        self.sample_rate.store(config.sample_rate, Ordering::Release);
        *self.interp.lock() = config.interpolation;
        self.max_overdrive_percent.store(200, Ordering::Release);
        self.set_master_volume_percent(config.mix_level_percent);
        *self.reverb.lock() = SchroederReverb::new(config.sample_rate as f64);
        *self.chorus.lock() = Chorus::new(config.sample_rate as f64);
        self.buffers.lock().ensure_capacity(rf_audio::slice_frames_for(config.sample_rate, config.channels) * 4);

        if config.engage_audio {
            self.engage()?;
        }
        Ok(())
    }

    /// `set_output_format`: only while no audio is engaged (spec §4.1).
    /// `bits` must be 8 (unsigned, centered at `0x80`) or 16 (signed) per
    /// spec §3.1's "8/16 bit" output formats; anything else is rejected
    /// rather than silently ignored.
    pub fn set_output_format(self: &Arc<Self>, sample_rate: u32, _channels: u16, bits: u8) -> EngineResult<()> {
        if self.is_engaged() {
            return Err(EngineError::Busy);
        }
        if bits != 8 && bits != 16 {
            return Err(EngineError::ParamErr(format!("unsupported output bit depth: {bits}")));
        }
        self.output_bits.store(bits as u32, Ordering::Release);
        self.sample_rate.store(sample_rate, Ordering::Release);
        *self.reverb.lock() = SchroederReverb::new(sample_rate as f64);
        *self.chorus.lock() = Chorus::new(sample_rate as f64);
        Ok(())
    }

    /// Negotiated output bit depth (spec §3.1), 8 or 16.
    pub fn output_bits(&self) -> u8 {
        self.output_bits.load(Ordering::Acquire) as u8
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn is_engaged(&self) -> bool {
        self.sink.lock().as_ref().map(|s| s.is_engaged()).unwrap_or(false)
            || self.offline.lock().is_some()
    }

    /// Begins live playback through the platform device sink.
    pub fn engage(self: &Arc<Self>) -> EngineResult<()> {
        let callback = self.fill_callback();
        let mut sink = DeviceSink::open(self.sample_rate(), self.channels, callback)?;
        sink.engage()?;
        *self.sink.lock() = Some(Box::new(sink));
        Ok(())
    }

    pub fn disengage(&self) {
        if let Some(sink) = self.sink.lock().as_mut() {
            sink.disengage();
        }
    }

    /// `Mixer_Close`: wait for active voices to drain with a bounded
    /// timeout, then force a hard stop (spec §5).
    pub fn close(&self) {
        self.disengage();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        while self.voices.lock().active_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        self.voices.lock().kill_all();
        *self.sink.lock() = None;
        *self.offline.lock() = None;
    }

    fn fill_callback(self: &Arc<Self>) -> FillCallback {
        let mixer = Arc::clone(self);
        Box::new(move |out, frames| mixer.process_slice(out, frames))
    }

    // ---- Bank management (spec §4.4, §4.8) ----------------------------

    pub fn add_hsb_bank_memory(&self, bytes: &[u8]) -> EngineResult<MixerBankToken> {
        let bank = HsbBank::load(bytes)?;
        let token = self.resolver.write().add_hsb_bank(bank);
        Ok(MixerBankToken(token))
    }

    pub fn add_hsb_bank_file(&self, path: impl AsRef<Path>) -> EngineResult<MixerBankToken> {
        let bytes = std::fs::read(path).map_err(|e| EngineError::BadFile(e.to_string()))?;
        self.add_hsb_bank_memory(&bytes)
    }

    pub fn add_soundfont_memory(&self, bytes: &[u8], overlay: bool) -> EngineResult<MixerBankToken> {
        let renderer = RustysynthRenderer::load_from_memory(bytes, self.sample_rate())?;
        let mut resolver = self.resolver.write();
        let token = if overlay {
            resolver.set_overlay_soundfont(Box::new(renderer))
        } else {
            resolver.set_base_soundfont(Box::new(renderer))
        };
        Ok(MixerBankToken(token))
    }

    pub fn add_soundfont_file(&self, path: impl AsRef<Path>, overlay: bool) -> EngineResult<MixerBankToken> {
        let bytes = std::fs::read(path).map_err(|e| EngineError::BadFile(e.to_string()))?;
        self.add_soundfont_memory(&bytes, overlay)
    }

    pub fn move_bank_to_front(&self, token: MixerBankToken) -> EngineResult<()> {
        self.resolver.write().move_to_front(token.0)
    }

    pub fn set_default_reverb(&self, preset: ReverbPreset) {
        self.reverb.lock().set_preset(preset);
    }

    pub fn set_reverb_enabled(&self, enabled: bool) {
        self.reverb_enabled.store(enabled, Ordering::Release);
    }

    pub fn set_chorus_enabled(&self, enabled: bool) {
        self.chorus_enabled.store(enabled, Ordering::Release);
    }

    // ---- Master volume/balance (spec §4.1) -----------------------------

    pub fn set_master_volume(&self, volume: Q16_16) {
        let max = self.max_overdrive_percent.load(Ordering::Acquire) as f64 / 100.0;
        let clamped = volume.to_f64().clamp(0.0, max);
        self.master_volume.store(Q16_16::from_f64(clamped).raw() as u32, Ordering::Release);
    }

    pub fn master_volume(&self) -> Q16_16 {
        Q16_16::from_raw(self.master_volume.load(Ordering::Acquire) as i32)
    }

    /// `-v <percent>` from the CLI (spec §6), capped at the configured
    /// overdrive percent.
    pub fn set_master_volume_percent(&self, percent: u32) {
        self.set_master_volume(Q16_16::from_f64(percent as f64 / 100.0));
    }

    pub fn set_master_balance(&self, balance: i16) {
        self.master_balance.store(balance.clamp(-256, 256) as i32, Ordering::Release);
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.set_balance(balance as i32);
        }
    }

    pub fn set_max_overdrive_percent(&self, percent: u32) {
        self.max_overdrive_percent.store(percent.max(100), Ordering::Release);
    }

    // ---- Voice control (spec §4.1) -------------------------------------

    pub fn kill_all_voices(&self) {
        self.voices.lock().kill_all();
    }

    pub fn kill_channel_voices(&self, song: u32, channel: u8) {
        self.voices.lock().kill_channel(song, channel);
        self.resolver.read().broadcast_all_sound_off(channel);
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.lock().active_count() + self.resolver.read().active_soundfont_voice_count()
    }

    // ---- Song / Sound lifecycle (spec §3.3, §4.8) -----------------------

    /// `Song_LoadFromMemory`. Installs any embedded soundfont (XMF/RMI)
    /// as the resolver's overlay bank before returning (spec §4.4
    /// "Overlay install").
    pub fn load_song_from_memory(self: &Arc<Self>, bytes: &[u8]) -> EngineResult<Arc<Song>> {
        let id = self.next_song_id.fetch_add(1, Ordering::AcqRel);
        let mut song = Song::load_from_memory(id, bytes, self.sample_rate() as f64)?;
        if let Some(bank_bytes) = song.embedded_bank.take() {
            if let Ok(renderer) = RustysynthRenderer::load_from_memory(&bank_bytes, self.sample_rate()) {
                let mut resolver = self.resolver.write();
                resolver.set_overlay_soundfont(Box::new(renderer));
                // spec §9: default bank offset is 1 when an embedded bank
                // is loaded and DBNK is absent; 0 otherwise.
                resolver.xmf_bank_offset_default = song.bank_offset_override.unwrap_or(1);
            }
        } else if let Some(offset) = song.bank_offset_override {
            self.resolver.write().xmf_bank_offset_default = offset;
        }
        let song = Arc::new(song);
        self.songs.lock().insert(id, Arc::clone(&song));
        Ok(song)
    }

    pub fn load_song_from_file(self: &Arc<Self>, path: impl AsRef<Path>) -> EngineResult<Arc<Song>> {
        let bytes = std::fs::read(path).map_err(|e| EngineError::BadFile(e.to_string()))?;
        self.load_song_from_memory(&bytes)
    }

    /// `Song_Preroll`.
    pub fn preroll_song(&self, song: &Song) -> u64 {
        song.preroll(&self.resolver.read())
    }

    pub fn start_song(&self, song: &Song) -> EngineResult<()> {
        song.start()
    }

    pub fn seek_song(&self, song: &Song, target_us: u64) {
        song.seek(target_us, &self.resolver.read());
    }

    pub fn delete_song(&self, song_id: u32) {
        self.songs.lock().remove(&song_id);
        self.voices.lock().kill_song(song_id);
    }

    pub fn load_sound_from_file(&self, path: impl AsRef<Path>) -> EngineResult<Arc<Sound>> {
        let sound = Arc::new(Sound::load_file(path.as_ref().to_str().unwrap_or_default())?);
        let id = self.next_sound_id.fetch_add(1, Ordering::AcqRel);
        self.sounds.lock().insert(id, Arc::clone(&sound));
        Ok(sound)
    }

    pub fn load_sound_from_memory_wav(&self, bytes: &[u8]) -> EngineResult<Arc<Sound>> {
        let sound = Arc::new(Sound::load_memory_wav(bytes)?);
        let id = self.next_sound_id.fetch_add(1, Ordering::AcqRel);
        self.sounds.lock().insert(id, Arc::clone(&sound));
        Ok(sound)
    }

    pub fn delete_sound(&self, sound: &Arc<Sound>) {
        self.sounds.lock().retain(|_, s| !Arc::ptr_eq(s, sound));
    }

    /// `Sound_Start`, mediated so the `sound_voices` partition set by
    /// `Mixer::open` (spec §4.8) is actually enforced against the count
    /// of currently-playing standalone Sounds.
    pub fn start_sound(&self, sound: &Arc<Sound>, volume: Q16_16, start_frame: u64, loop_count: u32) -> EngineResult<()> {
        let limit = self.sound_voice_limit.load(Ordering::Acquire);
        let playing = self
            .sounds
            .lock()
            .values()
            .filter(|s| s.state() == crate::sound::PlaybackState::Playing)
            .count();
        if playing >= limit {
            return Err(EngineError::NoFreeVoices);
        }
        sound.start(volume, start_frame, loop_count)
    }

    // ---- MIDI ring producer side (spec §4.6) ----------------------------

    pub fn push_midi_message(&self, timestamp: f64, bytes: &[u8]) {
        self.midi_ring.push(timestamp, bytes);
    }

    pub fn midi_drop_count(&self) -> u64 {
        self.midi_ring.drop_count()
    }

    // ---- Export-to-file (spec §4.7/§4.8) --------------------------------

    pub fn start_output_to_file(self: &Arc<Self>, path: impl AsRef<Path>, format: ExportFormat) -> EngineResult<()> {
        if !matches!(format, ExportFormat::Wav) {
            return Err(EngineError::UnsupportedFormat("only WAV export is bundled".into()));
        }
        let recorder = WavRecorder::create(path.as_ref(), self.sample_rate(), self.channels)?;
        *self.recorder.lock() = Some(Box::new(recorder));
        let callback = self.fill_callback();
        let mut offline = OfflineSink::new(self.sample_rate(), self.channels, callback);
        offline.engage()?;
        *self.offline.lock() = Some(offline);
        Ok(())
    }

    /// `ServiceAudioOutputToFile`: drives one slice of offline rendering.
    /// Returns `true` while any song/sound is still active.
    pub fn service_audio_output_to_file(&self) -> bool {
        let mut guard = self.offline.lock();
        let Some(offline) = guard.as_mut() else { return false };
        let mut scratch = Vec::new();
        offline.service(&mut scratch);
        self.any_active()
    }

    fn any_active(&self) -> bool {
        let songs = self.songs.lock();
        songs.values().any(|s| s.transport_state() == crate::song::TransportState::Playing)
            || self.sounds.lock().values().any(|s| s.state() == crate::sound::PlaybackState::Playing)
    }

    pub fn stop_output_to_file(&self) -> RecorderStats {
        let recorder = self.recorder.lock().take();
        *self.offline.lock() = None;
        match recorder {
            Some(r) => {
                let stats = r.stats();
                let _ = r.finish();
                stats
            }
            None => RecorderStats::default(),
        }
    }

    // ---- The slice pipeline (spec §4.1) ----------------------------------

    /// The pull-model entry point. Must be called from the audio thread
    /// only. Never panics; substitutes silence on internal error (spec
    /// §4.1 "Failure semantics").
    pub fn process_slice(&self, out: &mut [i16], frames: usize) {
        if frames == 0 {
            return;
        }
        let channels = self.channels as usize;
        let mut bufs = self.buffers.lock();
        bufs.ensure_capacity(frames);

        for buf in [
            &mut bufs.dry_l,
            &mut bufs.dry_r,
            &mut bufs.rev_l,
            &mut bufs.rev_r,
            &mut bufs.cho_l,
            &mut bufs.cho_r,
        ] {
            buf[..frames].fill(0.0);
        }

        // Step 2: drain the MIDI ring and dispatch every message into the
        // channel router (spec §4.3), which may allocate/release voices.
        // Device-sourced MIDI isn't tied to a particular Song, so it is
        // routed against a dedicated live channel bank under a reserved
        // pseudo-song id rather than any loaded Song's own state.
        let sample_rate = self.sample_rate();
        let resolver = self.resolver.read();
        let drained = self.midi_ring.drain();
        if !drained.is_empty() {
            let mut live_channels = self.live_channels.lock();
            let mut voices = self.voices.lock();
            let mut sink = MixerVoiceSink { voices: &mut voices, resolver: &resolver };
            for msg in &drained {
                let Some((channel, data)) = decode_live_midi_message(&msg.bytes) else { continue };
                let channel_state = &mut live_channels[channel as usize];
                if let Some(action) = route_event(channel_state, channel, &data, &resolver) {
                    if let (
                        MidiEventData::NoteOn { note, velocity },
                        NoteAction::Play { resolution, bank, program, pitch_bend_semitones, pan, volume_gain },
                    ) = (data, action)
                    {
                        sink.note_on(
                            LIVE_INPUT_SONG_ID,
                            channel,
                            note,
                            velocity,
                            resolution,
                            bank,
                            program,
                            pitch_bend_semitones,
                            pan,
                            volume_gain,
                            channel_state.reverb_send as f64 / 127.0,
                            channel_state.chorus_send as f64 / 127.0,
                        );
                    }
                }
                if let MidiEventData::NoteOff { note, .. } = data {
                    sink.note_off(LIVE_INPUT_SONG_ID, channel, note);
                }
                if let MidiEventData::ControlChange { controller, value } = data {
                    if matches!(controller, rf_core::cc::ALL_SOUND_OFF | rf_core::cc::ALL_NOTES_OFF) {
                        sink.kill_channel(LIVE_INPUT_SONG_ID, channel);
                    }
                }
            }
        }

        // Step 3: sequencer advance for every running Song.
        let songs: Vec<Arc<Song>> = self.songs.lock().values().cloned().collect();
        {
            let mut voices = self.voices.lock();
            for song in &songs {
                let mut sink = MixerVoiceSink { voices: &mut voices, resolver: &resolver };
                song.advance(frames as u32, &resolver, &mut sink);
            }
        }

        // Step 4: voice rendering.
        let interp = *self.interp.lock();
        {
            let songs_by_id: HashMap<u32, Arc<Song>> = songs.iter().map(|s| (s.id, Arc::clone(s))).collect();
            let mut voices = self.voices.lock();
            for i in 0..frames {
                let (l, r, rl, rr, cl, cr) = voices.render_frame(interp, |song_id, channel| {
                    if song_id == LIVE_INPUT_SONG_ID {
                        return Q16_16::ONE;
                    }
                    songs_by_id
                        .get(&song_id)
                        .map(|s| s.channel_effective_gain(channel))
                        .unwrap_or(Q16_16::ZERO)
                });
                bufs.dry_l[i] += l;
                bufs.dry_r[i] += r;
                bufs.rev_l[i] += rl;
                bufs.rev_r[i] += rr;
                bufs.cho_l[i] += cl;
                bufs.cho_r[i] += cr;
            }
        }

        // Standalone Sounds mix straight into the dry bus (spec §3.1
        // "Sound"; no sends, no voice-table interaction).
        {
            let sounds: Vec<Arc<Sound>> = self.sounds.lock().values().cloned().collect();
            for i in 0..frames {
                for sound in &sounds {
                    let (l, r) = sound.render_frame_at_rate(sample_rate);
                    bufs.dry_l[i] += l;
                    bufs.dry_r[i] += r;
                }
            }
        }

        // Step 5: effects.
        if self.reverb_enabled.load(Ordering::Acquire) {
            let mut reverb = self.reverb.lock();
            for i in 0..frames {
                let (l, r) = reverb.process_sample(bufs.rev_l[i], bufs.rev_r[i]);
                bufs.dry_l[i] += l;
                bufs.dry_r[i] += r;
            }
        }
        if self.chorus_enabled.load(Ordering::Acquire) {
            let mut chorus = self.chorus.lock();
            for i in 0..frames {
                let (l, r) = chorus.process_sample(bufs.cho_l[i], bufs.cho_r[i]);
                bufs.dry_l[i] += l;
                bufs.dry_r[i] += r;
            }
        }

        // Step 6: SoundFont rendering, scaled by song volume only (per
        // song/channel state is driven into the renderer directly via CC
        // forwarding — see DESIGN.md).
        if resolver.has_soundfont() {
            let (sf_l, sf_r, scratch_l, scratch_r) = (
                &mut bufs.sf_l[..frames],
                &mut bufs.sf_r[..frames],
                &mut bufs.sf_scratch_l[..frames],
                &mut bufs.sf_scratch_r[..frames],
            );
            resolver.render_soundfonts(sf_l, sf_r, scratch_l, scratch_r);
            let sf_song_gain = songs
                .iter()
                .find(|s| !s.is_muted())
                .map(|s| s.volume().to_f64())
                .unwrap_or(1.0);
            for i in 0..frames {
                bufs.dry_l[i] += bufs.sf_l[i] as f64 * sf_song_gain;
                bufs.dry_r[i] += bufs.sf_r[i] as f64 * sf_song_gain;
            }
        }
        drop(resolver);

        // Step 7: master stage — volume, balance, saturation, int16.
        let master = self.master_volume().to_f64();
        let balance = self.master_balance.load(Ordering::Acquire) as f64 / 256.0;
        let (bal_l, bal_r) = if balance >= 0.0 { (1.0 - balance, 1.0) } else { (1.0, 1.0 + balance) };
        let frames_to_write = frames.min(out.len() / channels.max(1));
        for i in 0..frames_to_write {
            let l = (bufs.dry_l[i] * master * bal_l).clamp(-1.0, 1.0);
            let r = (bufs.dry_r[i] * master * bal_r).clamp(-1.0, 1.0);
            let base = i * channels;
            if channels >= 2 {
                out[base] = (l * i16::MAX as f64) as i16;
                out[base + 1] = (r * i16::MAX as f64) as i16;
                for c in out.iter_mut().skip(base + 2).take(channels.saturating_sub(2)) {
                    *c = 0;
                }
            } else if channels == 1 {
                out[base] = (((l + r) * 0.5) * i16::MAX as f64) as i16;
            }
        }

        // Step 8: side tap to the export recorder.
        if let Some(recorder) = self.recorder.lock().as_mut() {
            let interleaved = &mut bufs.interleaved[..frames_to_write * channels];
            for i in 0..frames_to_write {
                let base = i * channels;
                interleaved[base] = (bufs.dry_l[i] * master * bal_l) as Sample;
                if channels >= 2 {
                    interleaved[base + 1] = (bufs.dry_r[i] * master * bal_r) as Sample;
                }
            }
            let f32_buf: Vec<f32> = interleaved.iter().map(|&s| s as f32).collect();
            recorder.push_slice(&f32_buf, self.channels);
        }
    }

    /// Renders one slice as 8-bit unsigned PCM centered at `0x80` (spec
    /// §4.1 step 7's alternate output format, negotiated via
    /// `set_output_format`). Shares `process_slice`'s internal mix and
    /// just requantizes its 16-bit output; callers driving a 16-bit
    /// device should call `process_slice` directly instead.
    pub fn process_slice_8bit(&self, out: &mut [u8], frames: usize) {
        if frames == 0 {
            return;
        }
        let channels = self.channels as usize;
        let mut scratch = vec![0i16; frames * channels];
        self.process_slice(&mut scratch, frames);
        let n = scratch.len().min(out.len());
        for (dst, &src) in out[..n].iter_mut().zip(scratch[..n].iter()) {
            *dst = ((src as i32 + 0x8000) >> 8) as u8;
        }
    }
}

/// Bridges `Song::advance`'s resolved note actions into the voice table
/// and the SoundFont renderers (spec §4.1 step 3/step 4's allocation
/// side, folding §4.3's routing decision).
struct MixerVoiceSink<'a> {
    voices: &'a mut VoiceTable,
    resolver: &'a BankResolver,
}

impl VoiceSink for MixerVoiceSink<'_> {
    fn note_on(
        &mut self,
        song: u32,
        channel: u8,
        note: u8,
        velocity: u16,
        resolution: Resolution,
        bank: u16,
        program: u8,
        pitch_bend_semitones: f64,
        pan: f64,
        _volume_gain: f64,
        reverb_send: f64,
        chorus_send: f64,
    ) {
        match resolution {
            Resolution::Native(sample) => {
                let ratio = sample.pitch_ratio(note, 0) * 2f64.powf(pitch_bend_semitones / 12.0);
                let key = VoiceKey { song, channel, note };
                self.voices.note_on(key, sample, ratio, velocity, pan, reverb_send, chorus_send);
            }
            Resolution::SoundFont { overlay } => {
                let velocity_u8 = velocity.min(127) as u8;
                if overlay {
                    self.resolver.overlay_note_on(channel, bank, program, note, velocity_u8);
                } else {
                    self.resolver.base_note_on(channel, bank, program, note, velocity_u8);
                }
            }
            Resolution::Silenced => {}
        }
    }

    fn note_off(&mut self, song: u32, channel: u8, note: u8) {
        self.voices.note_off(VoiceKey { song, channel, note });
        self.resolver.overlay_note_off(channel, note);
        self.resolver.base_note_off(channel, note);
    }

    fn sustain_hold(&mut self, _song: u32, _channel: u8, _note: u8) {
        // Native voices stay in their current envelope stage until
        // `sustain_release_all` arrives; nothing to do here. SF2/DLS
        // renderers already saw the raw sustain CC via
        // `broadcast_control_change` (spec §4.3 CC table).
    }

    fn sustain_release_all(&mut self, song: u32, channel: u8, notes: &[u8]) {
        for &note in notes {
            self.note_off(song, channel, note);
        }
    }

    fn kill_channel(&mut self, song: u32, channel: u8) {
        self.voices.kill_channel(song, channel);
        self.resolver.broadcast_all_sound_off(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_frame_slice_is_a_no_op() {
        let mixer = Mixer::new();
        mixer.open(OpenConfig { engage_audio: false, ..Default::default() }).unwrap();
        let mut out = vec![123i16; 8];
        mixer.process_slice(&mut out, 0);
        assert!(out.iter().all(|&s| s == 123));
    }

    #[test]
    fn slice_never_overruns_requested_frame_count() {
        let mixer = Mixer::new();
        mixer.open(OpenConfig { engage_audio: false, sample_rate: 44_100, channels: 2, ..Default::default() }).unwrap();
        let mut out = vec![0i16; 64 * 2];
        mixer.process_slice(&mut out, 64);
        assert_eq!(out.len(), 128);
    }

    #[test]
    fn set_then_get_master_volume_round_trips() {
        let mixer = Mixer::new();
        mixer.open(OpenConfig { engage_audio: false, ..Default::default() }).unwrap();
        mixer.set_master_volume(Q16_16::from_f64(0.5));
        assert!((mixer.master_volume().to_f64() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn silent_slice_stays_silent_with_no_songs_loaded() {
        let mixer = Mixer::new();
        mixer.open(OpenConfig { engage_audio: false, ..Default::default() }).unwrap();
        let mut out = vec![1i16; 32 * 2];
        mixer.process_slice(&mut out, 32);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn open_partitions_voice_pool_and_caps_it_at_max_voices() {
        let mixer = Mixer::new();
        mixer
            .open(OpenConfig {
                engage_audio: false,
                midi_voices: crate::voice::MAX_VOICES,
                sound_voices: crate::voice::MAX_VOICES,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(mixer.voices.lock().pool_limit(), crate::voice::MAX_VOICES / 2);
        assert_eq!(mixer.sound_voice_limit.load(Ordering::Acquire), crate::voice::MAX_VOICES / 2);
    }

    #[test]
    fn starting_sounds_past_the_partitioned_limit_is_rejected() {
        let mixer = Mixer::new();
        mixer
            .open(OpenConfig { engage_audio: false, midi_voices: 63, sound_voices: 1, ..Default::default() })
            .unwrap();
        let a = Arc::new(Sound::load_memory_wav(&silent_wav()).unwrap());
        let b = Arc::new(Sound::load_memory_wav(&silent_wav()).unwrap());
        mixer.sounds.lock().insert(1, Arc::clone(&a));
        mixer.sounds.lock().insert(2, Arc::clone(&b));
        mixer.start_sound(&a, Q16_16::ONE, 0, 0).unwrap();
        assert!(matches!(mixer.start_sound(&b, Q16_16::ONE, 0, 0), Err(EngineError::NoFreeVoices)));
    }

    fn silent_wav() -> Vec<u8> {
        let spec = hound::WavSpec { channels: 1, sample_rate: 44_100, bits_per_sample: 16, sample_format: hound::SampleFormat::Int };
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
            for _ in 0..16 {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn set_output_format_rejects_unsupported_bit_depth() {
        let mixer = Mixer::new();
        mixer.open(OpenConfig { engage_audio: false, ..Default::default() }).unwrap();
        assert!(matches!(mixer.set_output_format(44_100, 2, 24), Err(EngineError::ParamErr(_))));
        assert!(mixer.set_output_format(44_100, 2, 8).is_ok());
        assert_eq!(mixer.output_bits(), 8);
    }

    #[test]
    fn process_slice_8bit_centers_silence_at_0x80() {
        let mixer = Mixer::new();
        mixer.open(OpenConfig { engage_audio: false, ..Default::default() }).unwrap();
        let mut out = vec![0u8; 32 * 2];
        mixer.process_slice_8bit(&mut out, 32);
        assert!(out.iter().all(|&s| s == 0x80));
    }

    #[test]
    fn live_midi_ring_messages_are_routed_instead_of_discarded() {
        let mixer = Mixer::new();
        mixer.open(OpenConfig { engage_audio: false, ..Default::default() }).unwrap();
        mixer.push_midi_message(0.0, &[0xB0, rf_core::cc::VOLUME, 77]);
        let mut out = vec![0i16; 16 * 2];
        mixer.process_slice(&mut out, 16);
        assert_eq!(mixer.live_channels.lock()[0].volume, 77);
    }
}
