//! Standard MIDI File parsing (spec §4.5/§6).
//!
//! `MThd` header (14 bytes: 6-byte length field that must read 6, format,
//! track count, division) followed by `MTrk` chunks. Each track's payload
//! (delta-time + event bytes) is handed through unparsed — the sequencer
//! decodes deltas and events itself during playback so preroll and normal
//! play share one decoder (see `rf_engine::sequencer`).

use super::{ParsedSong, SongMeta};
use crate::{FileError, FileResult};

const MIN_HEADER_LEN: usize = 14;

pub fn parse_smf(bytes: &[u8]) -> FileResult<ParsedSong> {
    if bytes.len() < MIN_HEADER_LEN {
        return Err(FileError::BadFile("SMF shorter than MThd header".into()));
    }
    if &bytes[0..4] != b"MThd" {
        return Err(FileError::BadFile("missing MThd magic".into()));
    }
    let header_len = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    if header_len != 6 {
        return Err(FileError::BadFile(format!(
            "MThd length field must be 6, got {header_len}"
        )));
    }
    let format = u16::from_be_bytes(bytes[8..10].try_into().unwrap());
    let declared_tracks = u16::from_be_bytes(bytes[10..12].try_into().unwrap());
    let division = u16::from_be_bytes(bytes[12..14].try_into().unwrap());
    if division & 0x8000 != 0 {
        // SMPTE time division (frames/ticks) is not a pulses-per-quarter-note
        // value; the core only implements the PPQN timebase (spec §6).
        return Err(FileError::UnsupportedFormat(
            "SMPTE time division is not supported".into(),
        ));
    }
    let ppqn = division;

    let mut tracks = Vec::with_capacity(declared_tracks as usize);
    let mut offset = MIN_HEADER_LEN;
    while offset + 8 <= bytes.len() && tracks.len() < declared_tracks as usize {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_len = u32::from_be_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let payload_start = offset + 8;
        let payload_end = payload_start
            .checked_add(chunk_len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| FileError::BadFile("MTrk chunk length out of bounds".into()))?;
        if chunk_id == b"MTrk" {
            tracks.push(bytes[payload_start..payload_end].to_vec());
        }
        // Unknown chunk types between tracks are skipped, matching the SMF
        // spec's forward-compatibility rule.
        offset = payload_end;
    }
    if tracks.len() != declared_tracks as usize {
        return Err(FileError::BadFile(format!(
            "declared {declared_tracks} tracks, found {}",
            tracks.len()
        )));
    }

    Ok(ParsedSong {
        tracks,
        ppqn,
        format,
        embedded_bank: None,
        instrument_ids: Vec::new(),
        bank_offset_override: None,
        meta: SongMeta::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_smf() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes()); // format 0
        bytes.extend_from_slice(&1u16.to_be_bytes()); // 1 track
        bytes.extend_from_slice(&480u16.to_be_bytes()); // 480 ppqn
        let track: &[u8] = &[
            0x00, 0x90, 0x3C, 0x64, // t=0 note-on C4 vel 100
            0x60, 0x80, 0x3C, 0x40, // delta 96 note-off
            0x00, 0xFF, 0x2F, 0x00, // EOT
        ];
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(track);
        bytes
    }

    #[test]
    fn parses_spec_s1_fixture() {
        let parsed = parse_smf(&sample_smf()).unwrap();
        assert_eq!(parsed.format, 0);
        assert_eq!(parsed.ppqn, 480);
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(
            parsed.tracks[0],
            vec![0x00, 0x90, 0x3C, 0x64, 0x60, 0x80, 0x3C, 0x40, 0x00, 0xFF, 0x2F, 0x00]
        );
    }

    #[test]
    fn rejects_truncated_header() {
        let err = parse_smf(b"MThd\0\0\0").unwrap_err();
        assert!(matches!(err, FileError::BadFile(_)));
    }

    #[test]
    fn rejects_wrong_header_length_field() {
        let mut bytes = sample_smf();
        bytes[4..8].copy_from_slice(&7u32.to_be_bytes());
        assert!(matches!(parse_smf(&bytes), Err(FileError::BadFile(_))));
    }

    #[test]
    fn rejects_track_count_mismatch() {
        let mut bytes = sample_smf();
        bytes[10..12].copy_from_slice(&2u16.to_be_bytes());
        assert!(matches!(parse_smf(&bytes), Err(FileError::BadFile(_))));
    }
}
