//! Song container parsers.
//!
//! Every accepted song format (SMF, RMF, RMI, XMF/MXMF) is reduced to the
//! same [`ParsedSong`] shape so the sequencer and bank resolver never need
//! to know which container the bytes originally came from.

mod bank_discovery;
mod rmf;
mod rmi;
mod smf;
mod sniff;
mod xmf;

pub use bank_discovery::discover_embedded_bank;
pub use rmf::parse_rmf;
pub use rmi::parse_rmi;
pub use smf::parse_smf;
pub use sniff::{sniff, ContainerKind};
pub use xmf::parse_xmf;

use crate::FileResult;

/// Free-standing metadata a container may carry alongside its MIDI payload.
///
/// Populated from RMI `LIST INFO` tags or XMF node metadata; not all
/// containers supply all fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongMeta {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub copyright: Option<String>,
    pub encoding: Option<String>,
}

/// The normalized result of parsing any accepted container format.
#[derive(Debug, Clone)]
pub struct ParsedSong {
    /// Raw `MTrk`-style track payloads (delta-time + event bytes), one per track.
    pub tracks: Vec<Vec<u8>>,
    /// Pulses per quarter note.
    pub ppqn: u16,
    /// SMF format number (0, 1, or 2). Containers that have no native notion
    /// of this (RMF) report 1 since they are always multi-track.
    pub format: u16,
    /// A soundfont (SF2/DLS) bundled in the container, if any was found.
    pub embedded_bank: Option<Vec<u8>>,
    /// RMF instrument resource IDs, when the container is RMF and declares
    /// them. Used by the bank resolver to detect "all instruments embedded".
    pub instrument_ids: Vec<u32>,
    /// Bank-offset override for overlay bank mapping (RMI `DBNK`, see
    /// spec §4.4/§9). `None` means "use the container-format default".
    pub bank_offset_override: Option<u16>,
    pub meta: SongMeta,
}

/// Parse any of the four accepted container formats, sniffing the format
/// from the leading bytes (spec §4.8 `Song_LoadFromMemory`).
pub fn parse_any(bytes: &[u8]) -> FileResult<ParsedSong> {
    match sniff(bytes)? {
        ContainerKind::Smf => parse_smf(bytes),
        ContainerKind::Rmf => parse_rmf(bytes),
        ContainerKind::Rmi => parse_rmi(bytes),
        ContainerKind::Xmf => parse_xmf(bytes),
    }
}

/// Read a big-endian variable-length quantity (MIDI delta-time encoding).
/// Returns the decoded value and the number of bytes consumed.
pub(crate) fn read_vlq(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &b) in bytes.iter().enumerate().take(4) {
        value = (value << 7) | (b & 0x7f) as u32;
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
