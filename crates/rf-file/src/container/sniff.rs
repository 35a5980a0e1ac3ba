//! Magic-byte container sniffing (spec §4.8 `Song_LoadFromMemory`).

use crate::{FileError, FileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Smf,
    Rmf,
    Rmi,
    Xmf,
}

/// Classify a song container by its leading bytes. Extension is never
/// consulted here — callers that have a path should try sniffing first and
/// fall back to extension only for the raw-audio `Sound` loaders.
pub fn sniff(bytes: &[u8]) -> FileResult<ContainerKind> {
    if bytes.len() >= 4 && &bytes[0..4] == b"MThd" {
        return Ok(ContainerKind::Smf);
    }
    if bytes.len() >= 4 && &bytes[0..4] == b"IREZ" {
        return Ok(ContainerKind::Rmf);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"RMID" {
        return Ok(ContainerKind::Rmi);
    }
    if bytes.len() >= 8 && (&bytes[0..8] == b"XMF_1.00" || &bytes[0..8] == b"XMF_2.00") {
        return Ok(ContainerKind::Xmf);
    }
    Err(FileError::BadFileType(
        "unrecognized song container magic".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_smf() {
        assert_eq!(sniff(b"MThd\0\0\0\x06\0\0\0\x01\x01\xe0").unwrap(), ContainerKind::Smf);
    }

    #[test]
    fn sniffs_rmf() {
        let mut bytes = b"IREZ".to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        assert_eq!(sniff(&bytes).unwrap(), ContainerKind::Rmf);
    }

    #[test]
    fn sniffs_rmi() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(b"RMID");
        assert_eq!(sniff(&bytes).unwrap(), ContainerKind::Rmi);
    }

    #[test]
    fn sniffs_xmf_both_versions() {
        assert_eq!(sniff(b"XMF_1.00").unwrap(), ContainerKind::Xmf);
        assert_eq!(sniff(b"XMF_2.00").unwrap(), ContainerKind::Xmf);
    }

    #[test]
    fn rejects_unknown_magic() {
        assert!(matches!(sniff(b"bogus!!!"), Err(FileError::BadFileType(_))));
    }

    #[test]
    fn rejects_too_short() {
        assert!(sniff(b"MT").is_err());
    }
}
