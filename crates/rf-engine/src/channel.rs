//! Per-channel General MIDI state and controller routing (spec §4.3).

use rf_core::{cc, ControllerNumber, ControllerValue, MidiEventData, PERCUSSION_CHANNEL};

use crate::bank::{BankResolver, Resolution};

pub const CHANNELS_PER_SONG: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Midi,
    Rmf,
}

/// How a channel picks its percussion preset when program 0 plays on the
/// percussion channel (spec §4.3/§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankMode {
    UseGmDefault,
    UseGmPercBank,
}

/// The result of dispatching a note-on through [`route_event`]: either a
/// resolved instrument to allocate a voice for, or a silenced request
/// (spec §4.4's "silenced, not downgraded" rule).
#[derive(Debug, Clone)]
pub enum NoteAction {
    Play {
        resolution: Resolution,
        bank: u16,
        program: u8,
        pitch_bend_semitones: f64,
        pan: f64,
        volume_gain: f64,
    },
    Silenced,
}

/// One of the 16 channels a `Song` carries.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub program: u8,
    pub bank_msb: u8,
    pub bank_lsb: u8,
    /// CC7, `0..=127`.
    pub volume: u8,
    /// CC11, `0..=127`.
    pub expression: u8,
    /// CC10, `0..=127` (64 = center).
    pub pan: u8,
    /// `-8192..=8191`, center 0.
    pub pitch_bend: i16,
    pub pitch_bend_range_semitones: f64,
    pub sustain: bool,
    /// CC1, `0..=127`.
    pub modulation: u8,
    /// CC91, `0..=127`.
    pub reverb_send: u8,
    /// CC93, `0..=127`.
    pub chorus_send: u8,
    pub mute: bool,
    pub solo: bool,
    pub channel_type: ChannelType,
    pub bank_mode: BankMode,
    /// Set when channel 9 takes a note-on without an intervening explicit
    /// non-percussion program change; cleared by any program change
    /// naming a non-percussion bank. Single source of truth for whether
    /// this channel is "in drum mode" (resolves spec §9 open question 1).
    pub drum_bank_latched: bool,
    /// Notes currently held down by the sustain pedal, released as a
    /// batch when CC64 lifts (spec §4.1).
    pub held_notes: Vec<u8>,
}

impl ChannelState {
    pub fn new(channel_type: ChannelType) -> Self {
        Self {
            program: 0,
            bank_msb: 0,
            bank_lsb: 0,
            volume: 100,
            expression: 127,
            pan: 64,
            pitch_bend: 0,
            pitch_bend_range_semitones: 2.0,
            sustain: false,
            modulation: 0,
            reverb_send: 0,
            chorus_send: 0,
            mute: false,
            solo: false,
            channel_type,
            bank_mode: BankMode::UseGmDefault,
            drum_bank_latched: false,
            held_notes: Vec::new(),
        }
    }

    /// `(bank, program)` this channel currently targets, accounting for
    /// drum-bank latching and the SF2/DLS percussion bank substitution.
    pub fn effective_bank_program(&self, sf2_flavor_bank: u16) -> (u16, u8) {
        let bank = ((self.bank_msb as u16) << 7) | self.bank_lsb as u16;
        if self.drum_bank_latched {
            (sf2_flavor_bank, 0)
        } else {
            (bank, self.program)
        }
    }

    pub fn pan_unit(&self) -> f64 {
        (self.pan as f64 - 64.0) / 64.0
    }

    pub fn volume_gain(&self) -> f64 {
        (self.volume as f64 / 127.0) * (self.expression as f64 / 127.0)
    }

    pub fn pitch_bend_semitones(&self) -> f64 {
        (self.pitch_bend as f64 / 8192.0) * self.pitch_bend_range_semitones
    }

    fn all_notes_off(&mut self) {
        self.held_notes.clear();
    }

    fn reset_controllers(&mut self) {
        self.expression = 127;
        self.pitch_bend = 0;
        self.sustain = false;
        self.modulation = 0;
    }
}

/// Dispatch one decoded MIDI event to `channel`'s state, resolving
/// program changes against `resolver` and reporting what a following
/// note-on should do.
///
/// Percussion latching (spec §4.3): a program change naming a
/// non-percussion bank clears `drum_bank_latched`; a note-on on channel 9
/// with `program == 0` sets it. `channel_number` must be the 0-based MIDI
/// channel `channel` belongs to — it is not stored on `ChannelState`
/// itself so the struct stays index-agnostic.
pub fn route_event(
    channel: &mut ChannelState,
    channel_number: u8,
    event: &MidiEventData,
    resolver: &BankResolver,
) -> Option<NoteAction> {
    match *event {
        MidiEventData::ControlChange { controller, value } => {
            apply_control_change(channel, controller, value);
            // Forwarded unconditionally (spec §4.3 CC table): a no-op
            // when no soundfont is loaded, and lets the SF2 renderer
            // track its own per-channel volume/expression/pan/sustain
            // rather than the mixer trying to post-hoc scale a buffer
            // that already sums every channel (see DESIGN.md).
            resolver.broadcast_control_change(channel_number, controller, value as u8);
            None
        }
        MidiEventData::ProgramChange { program } => {
            channel.program = program;
            if !(channel_number == PERCUSSION_CHANNEL && program == 0) {
                channel.drum_bank_latched = false;
            }
            None
        }
        MidiEventData::PitchBend { value } => {
            channel.pitch_bend = value;
            resolver.broadcast_pitch_bend(channel_number, value);
            None
        }
        MidiEventData::NoteOn { note: _, velocity } if velocity == 0 => None,
        MidiEventData::NoteOn { .. } => {
            if channel_number == PERCUSSION_CHANNEL && channel.program == 0 {
                channel.drum_bank_latched = true;
            }
            let perc_bank = resolver
                .overlay_flavor()
                .map(|f| f.percussion_bank())
                .unwrap_or(rf_core::SF2_PERCUSSION_BANK);
            let (bank, program) = channel.effective_bank_program(perc_bank);
            let resolution = if resolver.has_soundfont() {
                resolver.resolve_soundfont(bank, program, channel_number)
            } else {
                resolver.resolve_hsb(bank, program, channel_number)
            };
            match resolution {
                Resolution::Silenced => Some(NoteAction::Silenced),
                resolution => Some(NoteAction::Play {
                    resolution,
                    bank,
                    program,
                    pitch_bend_semitones: channel.pitch_bend_semitones(),
                    pan: channel.pan_unit(),
                    volume_gain: channel.volume_gain(),
                }),
            }
        }
        _ => None,
    }
}

fn apply_control_change(channel: &mut ChannelState, controller: ControllerNumber, value: ControllerValue) {
    let value = value as u8;
    match controller {
        cc::BANK_SELECT_MSB => channel.bank_msb = value,
        cc::BANK_SELECT_LSB => channel.bank_lsb = value,
        cc::VOLUME => channel.volume = value,
        cc::EXPRESSION => channel.expression = value,
        cc::PAN => channel.pan = value,
        cc::MOD_WHEEL => channel.modulation = value,
        cc::SUSTAIN => {
            let was_held = channel.sustain;
            channel.sustain = value >= 64;
            if was_held && !channel.sustain {
                channel.held_notes.clear();
            }
        }
        cc::REVERB_SEND => channel.reverb_send = value,
        cc::CHORUS_SEND => channel.chorus_send = value,
        cc::ALL_SOUND_OFF | cc::ALL_NOTES_OFF => channel.all_notes_off(),
        cc::RESET_ALL_CONTROLLERS => channel.reset_controllers(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_change_to_non_percussion_clears_latch() {
        let mut channel = ChannelState::new(ChannelType::Midi);
        channel.drum_bank_latched = true;
        let resolver = BankResolver::new();
        route_event(
            &mut channel,
            PERCUSSION_CHANNEL,
            &MidiEventData::ProgramChange { program: 5 },
            &resolver,
        );
        assert!(!channel.drum_bank_latched);
    }

    #[test]
    fn note_on_channel_nine_program_zero_latches_drums() {
        let mut channel = ChannelState::new(ChannelType::Midi);
        let resolver = BankResolver::new();
        route_event(
            &mut channel,
            PERCUSSION_CHANNEL,
            &MidiEventData::NoteOn { note: 36, velocity: 100 },
            &resolver,
        );
        assert!(channel.drum_bank_latched);
    }

    #[test]
    fn sustain_release_clears_held_notes() {
        let mut channel = ChannelState::new(ChannelType::Midi);
        let resolver = BankResolver::new();
        apply_control_change(&mut channel, cc::SUSTAIN, 127);
        channel.held_notes.push(60);
        route_event(
            &mut channel,
            0,
            &MidiEventData::ControlChange { controller: cc::SUSTAIN, value: 0 },
            &resolver,
        );
        assert!(channel.held_notes.is_empty());
    }

    #[test]
    fn volume_and_expression_combine_multiplicatively() {
        let mut channel = ChannelState::new(ChannelType::Midi);
        channel.volume = 127;
        channel.expression = 64;
        assert!((channel.volume_gain() - (64.0 / 127.0)).abs() < 1e-6);
    }
}
