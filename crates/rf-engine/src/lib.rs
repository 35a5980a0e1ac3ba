//! rf-engine: the GM synthesis engine's facade (spec §3/§4).
//!
//! - `bank`: sample bank resolution (HSB native, SF2/DLS overlay/base).
//! - `channel`: per-channel GM controller state and event routing.
//! - `voice`: the fixed-size HSB-native voice table.
//! - `sequencer`: MIDI track playback (delta-time/tempo/preroll/seek).
//! - `song`: a loaded, independently transported container.
//! - `sound`: standalone PCM clip playback.
//! - `mixer`: the process-wide facade tying all of the above to the
//!   device-sink slice pipeline (`Mixer_Open`/`process_slice`/etc.).

pub mod bank;
pub mod channel;
pub mod error;
pub mod mixer;
pub mod sequencer;
pub mod song;
pub mod sound;
pub mod voice;

pub use bank::{BankResolver, BankToken, HsbBank, Resolution, RustysynthRenderer, SoundFontRenderer};
pub use channel::{BankMode, ChannelState, ChannelType, NoteAction, CHANNELS_PER_SONG};
pub use error::{EngineError, EngineResult};
pub use mixer::{Mixer, MixerBankToken, OpenConfig};
pub use sequencer::{RunMode, RunOutcome, Sequencer};
pub use song::{Song, TransportState, VoiceSink};
pub use sound::{PlaybackState, Sound};
pub use voice::{Voice, VoiceKey, VoiceTable, MAX_VOICES};
