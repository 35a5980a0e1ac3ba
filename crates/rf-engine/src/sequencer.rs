//! The sequencer (spec §4.2): one cursor per `MTrk`-style track, a shared
//! tempo map, and a single `run` loop that normal playback, preroll and
//! seek all drive (spec §9 resolution of the preroll/seek ambiguity).

use rf_core::{meta, status, MetaEvent, MidiEventData};

/// Default MIDI tempo (120 BPM) used until a `SetTempo` meta-event is seen.
const DEFAULT_TEMPO_MICROS_PER_QUARTER: u32 = 500_000;

/// The spec's public "loop indefinitely" loop-count sentinel (distinct
/// from `Sound`'s own `u32::MAX` sentinel — `Song`/`Sequencer` translate
/// it to `u32::MAX` internally so `run`'s decrement logic never special
/// cases it twice).
pub const LOOP_FOREVER_SENTINEL: u32 = 32767;

fn read_vlq(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let mut value: u32 = 0;
    for _ in 0..4 {
        let b = *bytes.get(*pos)?;
        *pos += 1;
        value = (value << 7) | (b & 0x7f) as u32;
        if b & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

/// One parsed track event: either a channel-voice message or a meta-event.
enum TrackEvent {
    Midi { channel: u8, data: MidiEventData },
    Meta(MetaEvent),
}

/// Walks one track's raw bytes, decoding delta-time + event pairs with
/// running-status carried across note/CC messages.
struct TrackCursor {
    data: Vec<u8>,
    pos: usize,
    running_status: u8,
    /// Absolute tick of the next not-yet-consumed event, or `None` once
    /// the track has hit end-of-track.
    pending_tick: Option<u64>,
    finished: bool,
}

impl TrackCursor {
    fn new(data: Vec<u8>) -> Self {
        let mut cursor = Self {
            data,
            pos: 0,
            running_status: 0,
            pending_tick: Some(0),
            finished: false,
        };
        cursor.advance_pending(0);
        cursor
    }

    fn rewind(&mut self) {
        self.pos = 0;
        self.running_status = 0;
        self.pending_tick = Some(0);
        self.finished = false;
        self.advance_pending(0);
    }

    /// Compute the tick of the next pending event by reading its delta
    /// from the current read position, without consuming the event body.
    fn advance_pending(&mut self, base_tick: u64) {
        if self.finished {
            self.pending_tick = None;
            return;
        }
        match read_vlq(&self.data, &mut self.pos) {
            Some(delta) => self.pending_tick = Some(base_tick + delta as u64),
            None => {
                self.finished = true;
                self.pending_tick = None;
            }
        }
    }

    /// Consume the event the delta just read points to (the byte cursor
    /// is positioned right after the delta), returning it and priming
    /// `pending_tick` for the following event.
    fn consume(&mut self) -> Option<TrackEvent> {
        let tick = self.pending_tick?;
        let Some(&status_byte) = self.data.get(self.pos) else {
            self.finished = true;
            self.pending_tick = None;
            return None;
        };

        // A truncated event (short read anywhere below) marks the track
        // finished rather than returning `None` with `pending_tick` still
        // set — otherwise `Sequencer::run` would keep re-selecting this
        // same track forever on malformed/short input.
        macro_rules! bail {
            () => {{
                self.finished = true;
                self.pending_tick = None;
                return None;
            }};
        }

        let result = if status_byte == status::META {
            self.pos += 1;
            let Some(&kind) = self.data.get(self.pos) else { bail!() };
            self.pos += 1;
            let Some(len) = read_vlq(&self.data, &mut self.pos) else { bail!() };
            let len = len as usize;
            let Some(body) = self.data.get(self.pos..self.pos + len) else { bail!() };
            self.pos += len;
            if kind == meta::END_OF_TRACK {
                self.finished = true;
                self.pending_tick = None;
                return Some(TrackEvent::Meta(MetaEvent::decode(kind, body)));
            }
            TrackEvent::Meta(MetaEvent::decode(kind, body))
        } else if status_byte == status::SYSEX_START || status_byte == status::SYSEX_END {
            self.pos += 1;
            let Some(len) = read_vlq(&self.data, &mut self.pos) else { bail!() };
            let len = len as usize;
            if self.data.get(self.pos..self.pos + len).is_none() {
                bail!()
            }
            self.pos += len;
            self.advance_pending(tick);
            return self.consume();
        } else {
            let (status_for_msg, data_start) = if status_byte & 0x80 != 0 {
                self.running_status = status_byte;
                (status_byte, self.pos + 1)
            } else {
                (self.running_status, self.pos)
            };
            let channel = status_for_msg & 0x0F;
            let msg_type = status_for_msg & 0xF0;
            let data_len = match msg_type {
                status::PROGRAM_CHANGE | status::CHANNEL_PRESSURE => 1,
                _ => 2,
            };
            let Some(slice) = self.data.get(data_start..data_start + data_len) else { bail!() };
            self.pos = data_start + data_len;
            let data = decode_channel_message(msg_type, slice);
            TrackEvent::Midi { channel, data }
        };

        self.advance_pending(tick);
        Some(result)
    }
}

/// Decode a 1- or 2-byte channel-voice message body. Shared with the
/// live device-sourced MIDI path (`Mixer::process_slice` step 2), which
/// has no running status to carry and always supplies a full status
/// byte per message.
pub(crate) fn decode_channel_message(msg_type: u8, data: &[u8]) -> MidiEventData {
    match msg_type {
        status::NOTE_OFF => MidiEventData::NoteOff { note: data[0] & 0x7F, velocity: (data[1] & 0x7F) as u16 },
        status::NOTE_ON => {
            let velocity = (data[1] & 0x7F) as u16;
            if velocity == 0 {
                MidiEventData::NoteOff { note: data[0] & 0x7F, velocity: 64 }
            } else {
                MidiEventData::NoteOn { note: data[0] & 0x7F, velocity }
            }
        }
        status::POLY_PRESSURE => MidiEventData::PolyPressure { note: data[0] & 0x7F, pressure: (data[1] & 0x7F) as u16 },
        status::CONTROL_CHANGE => MidiEventData::ControlChange { controller: data[0] & 0x7F, value: (data[1] & 0x7F) as u16 },
        status::PROGRAM_CHANGE => MidiEventData::ProgramChange { program: data[0] & 0x7F },
        status::CHANNEL_PRESSURE => MidiEventData::ChannelPressure { pressure: (data[0] & 0x7F) as u16 },
        status::PITCH_BEND => {
            let value14 = ((data[1] as i32 & 0x7F) << 7) | (data[0] as i32 & 0x7F);
            MidiEventData::PitchBend { value: (value14 - 8192) as i16 }
        }
        _ => MidiEventData::ChannelPressure { pressure: 0 },
    }
}

/// How [`Sequencer::run`] should pace and when it should stop.
pub enum RunMode {
    /// Advance by exactly the ticks corresponding to `frames` audio
    /// frames at the current tempo (normal playback within one slice).
    Normal { frames: u32 },
    /// Run to end of song with no time pacing, to determine length and
    /// warm up instrument state (`Song_Preroll`).
    Preroll,
    /// Run with no time pacing until reaching the tick position
    /// corresponding to `target_us` microseconds (`Song_Seek`).
    Scan { target_us: u64 },
}

pub struct RunOutcome {
    pub finished: bool,
    pub position_us: u64,
}

/// Owns every track cursor plus the tempo map for one `Song`.
pub struct Sequencer {
    tracks: Vec<TrackCursor>,
    ppqn: u16,
    sample_rate: f64,
    tempo_micros_per_quarter: u32,
    position_ticks: u64,
    /// Microseconds elapsed as of `position_ticks`, recomputed whenever
    /// tempo changes so later tick->time conversions stay correct across
    /// a tempo map with multiple `SetTempo` events.
    position_us_at_last_tempo: u64,
    ticks_at_last_tempo: u64,
    fractional_ticks: f64,
    loop_count: u32,
    loops_remaining: u32,
    /// Real-time-only multiplier on top of the file's tempo map
    /// (`Song::set_tempo`); does not affect `Scan`/`Preroll` pacing since
    /// those ignore wall-clock time entirely.
    tempo_scale: f64,
}

impl Sequencer {
    pub fn new(tracks: Vec<Vec<u8>>, ppqn: u16, sample_rate: f64) -> Self {
        let tracks = tracks.into_iter().map(TrackCursor::new).collect();
        Self {
            tracks,
            ppqn: ppqn.max(1),
            sample_rate,
            tempo_micros_per_quarter: DEFAULT_TEMPO_MICROS_PER_QUARTER,
            position_ticks: 0,
            position_us_at_last_tempo: 0,
            ticks_at_last_tempo: 0,
            fractional_ticks: 0.0,
            loop_count: 0,
            loops_remaining: 0,
            tempo_scale: 1.0,
        }
    }

    pub fn set_loops(&mut self, count: u32) {
        let count = if count == LOOP_FOREVER_SENTINEL { u32::MAX } else { count };
        self.loop_count = count;
        self.loops_remaining = count;
    }

    /// `Song::set_tempo`: a real-time multiplier on top of the file's
    /// tempo map (1.0 = unscaled, 2.0 = double speed).
    pub fn set_tempo_scale(&mut self, scale: f64) {
        self.tempo_scale = scale.max(0.01);
    }

    fn samples_per_tick(&self) -> f64 {
        self.sample_rate * (self.tempo_micros_per_quarter as f64 / 1_000_000.0) / self.ppqn as f64 / self.tempo_scale
    }

    fn ticks_for_micros(&self, target_us: u64) -> u64 {
        if target_us <= self.position_us_at_last_tempo {
            return self.ticks_at_last_tempo;
        }
        let elapsed_us = (target_us - self.position_us_at_last_tempo) as f64;
        let ticks = elapsed_us / self.tempo_micros_per_quarter as f64 * self.ppqn as f64;
        self.ticks_at_last_tempo + ticks.round() as u64
    }

    fn micros_for_ticks(&self, tick: u64) -> u64 {
        let delta_ticks = tick.saturating_sub(self.ticks_at_last_tempo);
        let delta_us = delta_ticks as f64 * self.tempo_micros_per_quarter as f64 / self.ppqn as f64;
        self.position_us_at_last_tempo + delta_us.round() as u64
    }

    pub fn position_us(&self) -> u64 {
        self.micros_for_ticks(self.position_ticks)
    }

    /// Reset to the start of the song (used by loop wraparound and
    /// `Song::start` after a stop).
    pub fn rewind(&mut self) {
        for t in self.tracks.iter_mut() {
            t.rewind();
        }
        self.position_ticks = 0;
        self.position_us_at_last_tempo = 0;
        self.ticks_at_last_tempo = 0;
        self.fractional_ticks = 0.0;
        self.tempo_micros_per_quarter = DEFAULT_TEMPO_MICROS_PER_QUARTER;
        self.loops_remaining = self.loop_count;
    }

    fn all_finished(&self) -> bool {
        self.tracks.iter().all(|t| t.finished)
    }

    /// Advance, dispatching channel-voice events to `on_event` and
    /// meta-events to `on_meta`, per `mode`'s pacing and stop condition.
    /// Returns whether the song reached end-of-track with no loops left.
    pub fn run(
        &mut self,
        mode: RunMode,
        mut on_event: impl FnMut(u8, &MidiEventData),
        mut on_meta: impl FnMut(&MetaEvent),
    ) -> RunOutcome {
        let stop_tick = match mode {
            RunMode::Normal { frames } => {
                let spt = self.samples_per_tick().max(1e-9);
                self.fractional_ticks += frames as f64 / spt;
                let whole = self.fractional_ticks.floor();
                self.fractional_ticks -= whole;
                self.position_ticks + whole as u64
            }
            RunMode::Preroll => u64::MAX,
            RunMode::Scan { target_us } => self.ticks_for_micros(target_us),
        };

        loop {
            let next = self
                .tracks
                .iter()
                .enumerate()
                .filter_map(|(i, t)| t.pending_tick.map(|tick| (tick, i)))
                .min();

            match next {
                Some((tick, idx)) if tick <= stop_tick => {
                    self.position_ticks = tick;
                    if let Some(event) = self.tracks[idx].consume() {
                        match event {
                            TrackEvent::Midi { channel, data } => on_event(channel, &data),
                            TrackEvent::Meta(meta_event) => {
                                if let MetaEvent::SetTempo(micros) = meta_event {
                                    if micros > 0 {
                                        self.position_us_at_last_tempo = self.micros_for_ticks(tick);
                                        self.ticks_at_last_tempo = tick;
                                        self.tempo_micros_per_quarter = micros;
                                    }
                                }
                                on_meta(&meta_event);
                            }
                        }
                    }
                }
                _ => break,
            }
        }

        if stop_tick != u64::MAX {
            self.position_ticks = stop_tick;
        }

        let finished_tracks = self.all_finished();
        let mut finished = false;
        if finished_tracks {
            if self.loop_count == 0 {
                finished = true;
            } else if self.loops_remaining == 0 {
                finished = true;
            } else {
                if self.loops_remaining != u32::MAX {
                    self.loops_remaining -= 1;
                }
                self.rewind_for_loop();
            }
        }

        RunOutcome { finished, position_us: self.position_us() }
    }

    /// Loop wraparound: identical to [`Sequencer::rewind`] but does not
    /// reset the remaining-loop counter (that is decremented by the
    /// caller before this runs).
    fn rewind_for_loop(&mut self) {
        for t in self.tracks.iter_mut() {
            t.rewind();
        }
        self.position_ticks = 0;
        self.position_us_at_last_tempo = 0;
        self.ticks_at_last_tempo = 0;
        self.fractional_ticks = 0.0;
        self.tempo_micros_per_quarter = DEFAULT_TEMPO_MICROS_PER_QUARTER;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on_track(note: u8) -> Vec<u8> {
        let mut track = Vec::new();
        track.push(0x00); // delta 0
        track.extend_from_slice(&[0x90, note, 100]); // note on ch0
        track.push(0x60); // delta 96 ticks
        track.extend_from_slice(&[0x80, note, 0]); // note off
        track.push(0x00);
        track.extend_from_slice(&[0xFF, 0x2F, 0x00]); // end of track
        track
    }

    #[test]
    fn dispatches_note_on_and_off_in_order() {
        let mut seq = Sequencer::new(vec![note_on_track(60)], 96, 44100.0);
        let mut seen = Vec::new();
        loop {
            let outcome = seq.run(
                RunMode::Normal { frames: 4096 },
                |_, data| seen.push(format!("{data:?}")),
                |_| {},
            );
            if outcome.finished {
                break;
            }
        }
        assert!(seen.iter().any(|s| s.contains("NoteOn")));
        assert!(seen.iter().any(|s| s.contains("NoteOff")));
    }

    #[test]
    fn preroll_runs_to_completion_without_time_pacing() {
        let mut seq = Sequencer::new(vec![note_on_track(60)], 96, 44100.0);
        let outcome = seq.run(RunMode::Preroll, |_, _| {}, |_| {});
        assert!(outcome.finished);
    }

    #[test]
    fn tempo_meta_event_changes_tick_to_time_conversion() {
        let mut track = Vec::new();
        track.push(0x00);
        track.extend_from_slice(&[0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40]); // 1,000,000 us/qtr = 60 BPM
        track.push(0x60);
        track.extend_from_slice(&[0xFF, 0x2F, 0x00]);
        let mut seq = Sequencer::new(vec![track], 96, 44100.0);
        let mut tempos = Vec::new();
        seq.run(RunMode::Preroll, |_, _| {}, |m| {
            if let MetaEvent::SetTempo(us) = m {
                tempos.push(*us);
            }
        });
        assert_eq!(tempos, vec![1_000_000]);
    }

    #[test]
    fn loop_wraparound_replays_from_start() {
        let mut seq = Sequencer::new(vec![note_on_track(60)], 96, 44100.0);
        seq.set_loops(1);
        let mut note_ons = 0;
        for _ in 0..4 {
            seq.run(RunMode::Normal { frames: 8192 }, |_, data| {
                if matches!(data, MidiEventData::NoteOn { .. }) {
                    note_ons += 1;
                }
            }, |_| {});
        }
        assert_eq!(note_ons, 2);
    }

    #[test]
    fn loop_count_sentinel_loops_indefinitely() {
        let mut seq = Sequencer::new(vec![note_on_track(60)], 96, 44100.0);
        seq.set_loops(LOOP_FOREVER_SENTINEL);
        for _ in 0..40 {
            let outcome = seq.run(RunMode::Normal { frames: 8192 }, |_, _| {}, |_| {});
            assert!(!outcome.finished);
        }
    }

    #[test]
    fn truncated_channel_message_stops_cleanly_instead_of_hanging() {
        let mut track = Vec::new();
        track.push(0x00);
        track.push(0x90); // note-on status with no data bytes following
        let mut seq = Sequencer::new(vec![track], 96, 44100.0);
        let outcome = seq.run(RunMode::Preroll, |_, _| {}, |_| {});
        assert!(outcome.finished);
    }
}
