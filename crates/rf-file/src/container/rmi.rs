//! RMI (RIFF-MIDI) parsing (spec §4.5/§6).
//!
//! `RIFF` + `RMID` wrapper around a `data` chunk (the SMF payload), an
//! optional `LIST INFO` tag chunk, and an optional nested `RIFF sfbk`/`RIFF
//! DLS ` chunk carrying an embedded soundfont.

use super::{smf::parse_smf, ParsedSong, SongMeta};
use crate::{FileError, FileResult};

pub fn parse_rmi(bytes: &[u8]) -> FileResult<ParsedSong> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"RMID" {
        return Err(FileError::BadFile("missing RIFF/RMID wrapper".into()));
    }
    let mut midi_payload: Option<&[u8]> = None;
    let mut meta = SongMeta::default();
    let mut bank_offset_override = None;
    let mut embedded_bank = None;

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_len = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let payload_start = offset + 8;
        let payload_end = payload_start
            .checked_add(chunk_len)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| FileError::BadFile("RMI chunk length out of bounds".into()))?;
        let payload = &bytes[payload_start..payload_end];

        match chunk_id {
            b"data" => midi_payload = Some(payload),
            b"LIST" => {
                if payload.len() >= 4 && &payload[0..4] == b"INFO" {
                    parse_info_list(&payload[4..], &mut meta, &mut bank_offset_override);
                }
            }
            b"RIFF" => {
                if payload.len() >= 4 && (&payload[0..4] == b"sfbk" || &payload[0..4] == b"DLS ") {
                    embedded_bank = Some(bytes[offset..payload_end].to_vec());
                }
            }
            _ => {}
        }

        // RIFF chunks are word-aligned: a chunk with an odd length is
        // followed by a single pad byte.
        offset = payload_end + (chunk_len & 1);
    }

    let midi_payload =
        midi_payload.ok_or_else(|| FileError::BadFile("RMI container has no data chunk".into()))?;
    let mut parsed =
        parse_smf(midi_payload).map_err(|_| FileError::BadFile("RMI data chunk is not valid SMF".into()))?;
    parsed.meta = meta;
    parsed.bank_offset_override = bank_offset_override;
    parsed.embedded_bank = embedded_bank;
    Ok(parsed)
}

fn parse_info_list(bytes: &[u8], meta: &mut SongMeta, bank_offset: &mut Option<u16>) {
    let mut offset = 0;
    while offset + 8 <= bytes.len() {
        let tag = &bytes[offset..offset + 4];
        let len = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let start = offset + 8;
        let Some(end) = start.checked_add(len).filter(|&e| e <= bytes.len()) else {
            break;
        };
        let value = &bytes[start..end];
        match tag {
            b"INAM" => meta.title = Some(text_value(value)),
            b"IART" => meta.artist = Some(text_value(value)),
            b"ICOP" => meta.copyright = Some(text_value(value)),
            b"IENC" => meta.encoding = Some(text_value(value)),
            b"DBNK" => {
                if value.len() >= 2 {
                    let raw = u16::from_le_bytes([value[0], value[1]]);
                    if raw <= 127 {
                        *bank_offset = Some(raw);
                    }
                }
            }
            _ => {}
        }
        offset = end + (len & 1);
    }
}

fn text_value(bytes: &[u8]) -> String {
    let trimmed = bytes.split(|&b| b == 0).next().unwrap_or(bytes);
    String::from_utf8_lossy(trimmed).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_midi() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&480u16.to_be_bytes());
        let track: &[u8] = &[0x00, 0xFF, 0x2F, 0x00];
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(track);
        bytes
    }

    fn wrap_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn sample_rmi_with_dbnk() -> Vec<u8> {
        let midi = sample_midi();
        let data_chunk = wrap_chunk(b"data", &midi);

        let mut info_payload = b"INFO".to_vec();
        let mut dbnk = b"DBNK".to_vec();
        dbnk.extend_from_slice(&4u32.to_le_bytes());
        dbnk.extend_from_slice(&5u16.to_le_bytes());
        dbnk.extend_from_slice(&0u16.to_le_bytes());
        info_payload.extend_from_slice(&dbnk);
        let list_chunk = wrap_chunk(b"LIST", &info_payload);

        let mut riff_body = b"RMID".to_vec();
        riff_body.extend_from_slice(&data_chunk);
        riff_body.extend_from_slice(&list_chunk);

        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&(riff_body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&riff_body);
        bytes
    }

    #[test]
    fn extracts_dbnk_bank_offset() {
        // spec S2: DBNK 02 00 00 00 05 00 -> bank offset 5
        let parsed = parse_rmi(&sample_rmi_with_dbnk()).unwrap();
        assert_eq!(parsed.bank_offset_override, Some(5));
        assert_eq!(parsed.ppqn, 480);
    }

    #[test]
    fn missing_data_chunk_is_bad_file() {
        let bytes = b"RIFFxxxxRMID".to_vec();
        assert!(matches!(parse_rmi(&bytes), Err(FileError::BadFile(_))));
    }
}
