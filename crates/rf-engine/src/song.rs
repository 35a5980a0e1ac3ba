//! `Song`: a sequencer, 16 channels of GM state and lifecycle control
//! bundled behind one handle (spec §3.3, §4.2, §4.3).

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use parking_lot::Mutex;
use rf_core::MetaEvent;
use rf_file::container::{sniff, ContainerKind};
use rf_file::{parse_any, SongMeta};

use crate::bank::{BankResolver, Resolution};
use crate::channel::{route_event, ChannelState, ChannelType, NoteAction, CHANNELS_PER_SONG};
use crate::error::{EngineError, EngineResult};
use crate::sequencer::{RunMode, RunOutcome, Sequencer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// Implemented by whatever owns the voice pool (the `Mixer`); lets `Song`
/// dispatch sequencer output without depending on `VoiceTable` directly.
pub trait VoiceSink {
    #[allow(clippy::too_many_arguments)]
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
        volume_gain: f64,
        reverb_send: f64,
        chorus_send: f64,
    );
    fn note_off(&mut self, song: u32, channel: u8, note: u8);
    fn sustain_hold(&mut self, song: u32, channel: u8, note: u8);
    fn sustain_release_all(&mut self, song: u32, channel: u8, notes: &[u8]);
    fn kill_channel(&mut self, song: u32, channel: u8);
}

const TRANSPOSE_LIMIT: i32 = 12;

/// One loaded, independently transported song.
pub struct Song {
    pub id: u32,
    sequencer: Mutex<Sequencer>,
    channels: Mutex<[ChannelState; CHANNELS_PER_SONG]>,
    transport: Mutex<TransportState>,
    preserve_position_on_next_start: AtomicBool,
    /// Q16.16 master-for-this-song volume.
    volume: AtomicU32,
    transpose: AtomicI32,
    mute: AtomicBool,
    last_error: Mutex<Option<String>>,
    /// Invoked for Lyric (`FF 05`), Text (`FF 01`) and Marker (`FF 06`)
    /// meta-events as playback reaches them (spec §3.1/§4.2's karaoke/
    /// meta-event hook).
    meta_callback: Mutex<Option<Box<dyn FnMut(&MetaEvent) + Send>>>,
    pub meta: SongMeta,
    /// A soundfont bundled in the container (XMF/RMI embedded bank), if
    /// any was found during parsing. Consumed by the caller (the mixer
    /// facade) immediately after load to install it as the overlay bank
    /// (spec §4.4 "Overlay install"); left `None` afterward.
    pub embedded_bank: Option<Vec<u8>>,
    /// `DBNK`/container-declared bank-offset override (spec §4.4/§9).
    pub bank_offset_override: Option<u16>,
    /// RMF instrument resource IDs, used by the resolver to know whether
    /// this song's instruments are all embedded (spec §4.3 routing).
    pub instrument_ids: Vec<u32>,
}

impl Song {
    pub fn load_from_memory(id: u32, bytes: &[u8], sample_rate: f64) -> EngineResult<Self> {
        let kind = sniff(bytes)?;
        let parsed = parse_any(bytes)?;
        let channel_type = match kind {
            ContainerKind::Rmf => ChannelType::Rmf,
            _ => ChannelType::Midi,
        };
        let sequencer = Sequencer::new(parsed.tracks, parsed.ppqn, sample_rate);
        let channels = std::array::from_fn(|_| ChannelState::new(channel_type));
        Ok(Self {
            id,
            sequencer: Mutex::new(sequencer),
            channels: Mutex::new(channels),
            transport: Mutex::new(TransportState::Stopped),
            preserve_position_on_next_start: AtomicBool::new(false),
            volume: AtomicU32::new(rf_core::Q16_16::ONE.raw() as u32),
            transpose: AtomicI32::new(0),
            mute: AtomicBool::new(false),
            last_error: Mutex::new(None),
            meta_callback: Mutex::new(None),
            meta: parsed.meta,
            embedded_bank: parsed.embedded_bank,
            bank_offset_override: parsed.bank_offset_override,
            instrument_ids: parsed.instrument_ids,
        })
    }

    pub fn transport_state(&self) -> TransportState {
        *self.transport.lock()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn record_error(&self, err: &EngineError) {
        *self.last_error.lock() = Some(err.to_string());
    }

    /// `Song_Preroll`: runs the full track set once with no time pacing so
    /// instrument state (bank/program/controller changes) is warmed up
    /// before playback starts, and so the caller can learn the song's
    /// total duration. Produces no voice activity.
    pub fn preroll(&self, resolver: &BankResolver) -> u64 {
        let mut seq = self.sequencer.lock();
        let mut channels = self.channels.lock();
        let outcome = seq.run(
            RunMode::Preroll,
            |ch, data| {
                let _ = route_event(&mut channels[ch as usize], ch, data, resolver);
            },
            |_| {},
        );
        seq.rewind();
        outcome.position_us
    }

    /// `Song_Start`. Clears `preserve_position_on_next_start` (spec §9):
    /// a prior seek's position survives exactly one `start` call.
    pub fn start(&self) -> EngineResult<()> {
        let mut transport = self.transport.lock();
        if *transport == TransportState::Playing {
            return Err(EngineError::StillPlaying);
        }
        if !self.preserve_position_on_next_start.swap(false, Ordering::AcqRel) {
            self.sequencer.lock().rewind();
        }
        *transport = TransportState::Playing;
        Ok(())
    }

    pub fn stop(&self) {
        *self.transport.lock() = TransportState::Stopped;
        self.sequencer.lock().rewind();
    }

    pub fn pause(&self) -> EngineResult<()> {
        let mut transport = self.transport.lock();
        if *transport != TransportState::Playing {
            return Err(EngineError::ParamErr("song is not playing".into()));
        }
        *transport = TransportState::Paused;
        Ok(())
    }

    pub fn resume(&self) -> EngineResult<()> {
        let mut transport = self.transport.lock();
        if *transport != TransportState::Paused {
            return Err(EngineError::ParamErr("song is not paused".into()));
        }
        *transport = TransportState::Playing;
        Ok(())
    }

    /// `Song_Seek`: fast-forwards silently (applying controller/program
    /// state along the way) to `target_us`, then marks the resulting
    /// position to survive exactly the next `start` call.
    pub fn seek(&self, target_us: u64, resolver: &BankResolver) {
        let mut seq = self.sequencer.lock();
        seq.rewind();
        let mut channels = self.channels.lock();
        seq.run(
            RunMode::Scan { target_us },
            |ch, data| {
                let _ = route_event(&mut channels[ch as usize], ch, data, resolver);
            },
            |_| {},
        );
        drop(channels);
        drop(seq);
        self.preserve_position_on_next_start.store(true, Ordering::Release);
    }

    pub fn position_us(&self) -> u64 {
        self.sequencer.lock().position_us()
    }

    pub fn set_loops(&self, count: u32) {
        self.sequencer.lock().set_loops(count);
    }

    /// Registers (or clears, with `None`) the lyric/meta-event callback
    /// dispatched from `advance` for Lyric/Text/Marker events.
    pub fn set_meta_callback(&self, callback: Option<Box<dyn FnMut(&MetaEvent) + Send>>) {
        *self.meta_callback.lock() = callback;
    }

    pub fn set_tempo_scale(&self, scale: f64) {
        self.sequencer.lock().set_tempo_scale(scale);
    }

    pub fn set_transpose(&self, semitones: i8) {
        let clamped = (semitones as i32).clamp(-TRANSPOSE_LIMIT, TRANSPOSE_LIMIT);
        self.transpose.store(clamped, Ordering::Release);
    }

    pub fn transpose(&self) -> i8 {
        self.transpose.load(Ordering::Acquire) as i8
    }

    pub fn set_volume(&self, volume: rf_core::Q16_16) {
        self.volume.store(volume.raw() as u32, Ordering::Release);
    }

    pub fn volume(&self) -> rf_core::Q16_16 {
        rf_core::Q16_16::from_raw(self.volume.load(Ordering::Acquire) as i32)
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Acquire)
    }

    pub fn mute_channel(&self, channel: u8, mute: bool) {
        self.channels.lock()[channel as usize].mute = mute;
    }

    pub fn solo_channel(&self, channel: u8, solo: bool) {
        self.channels.lock()[channel as usize].solo = solo;
    }

    /// Combined song-level x channel-level (volume x expression) gain a
    /// voice on `channel` should render at this slice (spec §3.2
    /// `effective = master x (CC7/127) x (CC11/127)`, folded with the
    /// song's own volume and mute/solo state). Applied at render time
    /// rather than baked in at note-on so live CC7/CC11/mute changes are
    /// heard immediately (spec §4.3 "Volume ... updates in real time").
    pub fn channel_effective_gain(&self, channel: u8) -> rf_core::Q16_16 {
        if self.mute.load(Ordering::Acquire) {
            return rf_core::Q16_16::ZERO;
        }
        let channels = self.channels.lock();
        let any_solo = channels.iter().any(|c| c.solo);
        let ch = &channels[channel as usize];
        if ch.mute || (any_solo && !ch.solo) {
            return rf_core::Q16_16::ZERO;
        }
        rf_core::Q16_16::from_f64(ch.volume_gain()).mul_q(self.volume())
    }

    /// Advance playback by one audio slice's worth of frames, dispatching
    /// resolved voice activity into `sink` (spec §4.1 step 3 "sequencer
    /// advance", folded into the mixer's per-slice algorithm).
    pub fn advance(&self, frames: u32, resolver: &BankResolver, sink: &mut dyn VoiceSink) -> RunOutcome {
        if self.transport_state() != TransportState::Playing {
            return RunOutcome { finished: false, position_us: self.position_us() };
        }
        let mut seq = self.sequencer.lock();
        let mut channels = self.channels.lock();
        let transpose = self.transpose();
        let song_id = self.id;
        let song_muted = self.mute.load(Ordering::Acquire);
        let outcome = seq.run(
            RunMode::Normal { frames },
            |ch, data| {
                let channel_state = &mut channels[ch as usize];
                if let Some(action) = route_event(channel_state, ch, data, resolver) {
                    match (*data, action) {
                        (
                            rf_core::MidiEventData::NoteOn { note, velocity },
                            NoteAction::Play { resolution, bank, program, pitch_bend_semitones, pan, volume_gain },
                        ) if !song_muted && !channel_state.mute => {
                            let shifted_note = (note as i32 + transpose as i32).clamp(0, 127) as u8;
                            if channel_state.sustain {
                                channel_state.held_notes.push(shifted_note);
                            }
                            sink.note_on(
                                song_id,
                                ch,
                                shifted_note,
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
                        (rf_core::MidiEventData::NoteOn { .. }, NoteAction::Silenced) => {}
                        _ => {}
                    }
                }
                if let rf_core::MidiEventData::NoteOff { note, .. } = data {
                    let shifted_note = (*note as i32 + transpose as i32).clamp(0, 127) as u8;
                    let channel_state = &mut channels[ch as usize];
                    if channel_state.sustain {
                        sink.sustain_hold(song_id, ch, shifted_note);
                    } else {
                        sink.note_off(song_id, ch, shifted_note);
                    }
                }
                if let rf_core::MidiEventData::ControlChange { controller, value } = data {
                    if *controller == rf_core::cc::SUSTAIN && *value < 64 {
                        let channel_state = &mut channels[ch as usize];
                        let notes = std::mem::take(&mut channel_state.held_notes);
                        sink.sustain_release_all(song_id, ch, &notes);
                    }
                    if matches!(*controller, rf_core::cc::ALL_SOUND_OFF | rf_core::cc::ALL_NOTES_OFF) {
                        sink.kill_channel(song_id, ch);
                    }
                }
            },
            |meta_event: &MetaEvent| {
                if matches!(meta_event, MetaEvent::Lyric(_) | MetaEvent::Text(_) | MetaEvent::Marker(_)) {
                    if let Some(callback) = self.meta_callback.lock().as_mut() {
                        callback(meta_event);
                    }
                }
            },
        );
        if outcome.finished {
            *self.transport.lock() = TransportState::Stopped;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        note_ons: StdMutex<Vec<(u32, u8, u8)>>,
        note_offs: StdMutex<Vec<(u32, u8, u8)>>,
    }

    impl VoiceSink for RecordingSink {
        #[allow(clippy::too_many_arguments)]
        fn note_on(
            &mut self,
            song: u32,
            channel: u8,
            note: u8,
            _velocity: u16,
            _resolution: Resolution,
            _bank: u16,
            _program: u8,
            _pb: f64,
            _pan: f64,
            _vol: f64,
            _rev: f64,
            _cho: f64,
        ) {
            self.note_ons.lock().unwrap().push((song, channel, note));
        }
        fn note_off(&mut self, song: u32, channel: u8, note: u8) {
            self.note_offs.lock().unwrap().push((song, channel, note));
        }
        fn sustain_hold(&mut self, _song: u32, _channel: u8, _note: u8) {}
        fn sustain_release_all(&mut self, _song: u32, _channel: u8, _notes: &[u8]) {}
        fn kill_channel(&mut self, _song: u32, _channel: u8) {}
    }

    fn smf_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&96u16.to_be_bytes());
        let mut track = Vec::new();
        track.push(0x00);
        track.extend_from_slice(&[0x90, 60, 100]);
        track.push(0x60);
        track.extend_from_slice(&[0x80, 60, 0]);
        track.push(0x00);
        track.extend_from_slice(&[0xFF, 0x2F, 0x00]);
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&track);
        bytes
    }

    #[test]
    fn start_dispatches_note_on_through_sink() {
        let song = Song::load_from_memory(1, &smf_bytes(), 44100.0).unwrap();
        let resolver = BankResolver::new();
        song.start().unwrap();
        let mut sink = RecordingSink::default();
        song.advance(8192, &resolver, &mut sink);
        assert!(!sink.note_ons.lock().unwrap().is_empty());
    }

    #[test]
    fn seek_then_start_preserves_position_once() {
        let song = Song::load_from_memory(1, &smf_bytes(), 44100.0).unwrap();
        let resolver = BankResolver::new();
        song.seek(500_000, &resolver);
        song.start().unwrap();
        assert!(song.position_us() >= 400_000);
        song.stop();
        song.start().unwrap();
        assert_eq!(song.position_us(), 0);
    }

    #[test]
    fn transpose_is_clamped_to_one_octave() {
        let song = Song::load_from_memory(1, &smf_bytes(), 44100.0).unwrap();
        song.set_transpose(120);
        assert_eq!(song.transpose(), 12);
        song.set_transpose(-120);
        assert_eq!(song.transpose(), -12);
    }

    #[test]
    fn starting_twice_while_playing_errs() {
        let song = Song::load_from_memory(1, &smf_bytes(), 44100.0).unwrap();
        song.start().unwrap();
        assert!(matches!(song.start(), Err(EngineError::StillPlaying)));
    }

    fn smf_bytes_with_lyric() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&96u16.to_be_bytes());
        let mut track = Vec::new();
        track.push(0x00);
        track.extend_from_slice(&[0xFF, 0x05, 0x03, b'l', b'a', b'h']);
        track.push(0x00);
        track.extend_from_slice(&[0xFF, 0x2F, 0x00]);
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&track);
        bytes
    }

    #[test]
    fn lyric_meta_event_reaches_registered_callback() {
        let song = Song::load_from_memory(1, &smf_bytes_with_lyric(), 44100.0).unwrap();
        let resolver = BankResolver::new();
        let seen: std::sync::Arc<StdMutex<Vec<String>>> = std::sync::Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = std::sync::Arc::clone(&seen);
        song.set_meta_callback(Some(Box::new(move |event: &MetaEvent| {
            if let MetaEvent::Lyric(text) = event {
                seen_clone.lock().unwrap().push(text.clone());
            }
        })));
        song.start().unwrap();
        let mut sink = RecordingSink::default();
        song.advance(8192, &resolver, &mut sink);
        assert_eq!(seen.lock().unwrap().as_slice(), ["lah"]);
    }
}
