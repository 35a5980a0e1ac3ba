//! rf-file: song containers and standalone sample decoding.
//!
//! - `container`: the accepted song containers — SMF, RMF, RMI, XMF/MXMF —
//!   normalized to one `ParsedSong` shape (§4.5/§6).
//! - `audio_file`: standalone `Sound` decoding (WAV/AIFF/AU/MP3/FLAC/Ogg)
//!   via `hound`/`symphonia`, magic-first extension-second sniffing (§6).
//! - `recorder`: the export-to-file side tap used by the device-sink slice
//!   pipeline (§4.7/§4.8) — direct WAV, or a ring-fed encoder thread for
//!   compressed formats.
#![allow(dead_code)]

mod audio_file;
pub mod container;
mod error;
mod recorder;

pub use audio_file::*;
pub use container::{parse_any, ContainerKind, ParsedSong, SongMeta};
pub use error::*;
pub use recorder::*;
