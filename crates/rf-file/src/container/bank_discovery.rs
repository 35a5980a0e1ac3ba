//! Nested-RIFF soundfont discovery shared by RMI and XMF/MXMF parsing
//! (spec §4.5).
//!
//! Scans a container for a `RIFF sfbk` (SF2) or `RIFF DLS ` (DLS) chunk.
//! When more than one candidate exists, the largest wins; a DLS candidate
//! is only preferred over an SF2 one of similar size if it carries a
//! `wvpl` (waveform pool) chunk and exceeds 32 KiB.

const MIN_DLS_SIZE: usize = 32 * 1024;

struct Candidate {
    bytes: Vec<u8>,
    is_dls: bool,
    has_wvpl: bool,
}

/// Scan `container` for every top-level-or-nested `RIFF sfbk`/`RIFF DLS `
/// chunk and return the best candidate's raw bytes, if any.
pub fn discover_embedded_bank(container: &[u8]) -> Option<Vec<u8>> {
    let candidates = scan_riff_chunks(container);
    best_candidate(candidates).map(|c| c.bytes)
}

fn best_candidate(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.into_iter().fold(None, |best, cand| match best {
        None => Some(cand),
        Some(prev) => Some(pick_better(prev, cand)),
    })
}

fn pick_better(a: Candidate, b: Candidate) -> Candidate {
    let b_preferred_dls =
        b.is_dls && b.has_wvpl && b.bytes.len() > MIN_DLS_SIZE && b.bytes.len() >= a.bytes.len();
    let a_preferred_dls =
        a.is_dls && a.has_wvpl && a.bytes.len() > MIN_DLS_SIZE && a.bytes.len() >= b.bytes.len();
    if b_preferred_dls && !a_preferred_dls {
        b
    } else if a_preferred_dls && !b_preferred_dls {
        a
    } else if b.bytes.len() > a.bytes.len() {
        b
    } else {
        a
    }
}

fn scan_riff_chunks(bytes: &[u8]) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset + 12 <= bytes.len() {
        if &bytes[offset..offset + 4] == b"RIFF" {
            let len = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
            if let Some(end) = offset.checked_add(8 + len).filter(|&e| e <= bytes.len()) {
                let form = &bytes[offset + 8..offset + 12];
                if form == b"sfbk" {
                    out.push(Candidate {
                        bytes: bytes[offset..end].to_vec(),
                        is_dls: false,
                        has_wvpl: false,
                    });
                } else if form == b"DLS " {
                    let body = &bytes[offset + 12..end];
                    out.push(Candidate {
                        bytes: bytes[offset..end].to_vec(),
                        is_dls: true,
                        has_wvpl: contains_chunk_id(body, b"wvpl"),
                    });
                }
            }
        }
        offset += 1;
    }
    out
}

fn contains_chunk_id(bytes: &[u8], id: &[u8; 4]) -> bool {
    bytes.windows(4).any(|w| w == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riff_chunk(form: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut payload = form.to_vec();
        payload.extend_from_slice(body);
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn finds_sf2_candidate() {
        let sf2 = riff_chunk(b"sfbk", &[0u8; 32]);
        let mut container = b"noise....".to_vec();
        container.extend_from_slice(&sf2);
        let found = discover_embedded_bank(&container).unwrap();
        assert_eq!(&found[8..12], b"sfbk");
    }

    #[test]
    fn prefers_larger_of_two_sf2_candidates() {
        let small = riff_chunk(b"sfbk", &[0u8; 16]);
        let big = riff_chunk(b"sfbk", &[0u8; 4096]);
        let mut container = small.clone();
        container.extend_from_slice(&big);
        let found = discover_embedded_bank(&container).unwrap();
        assert_eq!(found.len(), big.len());
    }

    #[test]
    fn dls_needs_wvpl_and_min_size_to_win_over_sf2() {
        let sf2 = riff_chunk(b"sfbk", &[0u8; 40 * 1024]);
        let mut dls_body = vec![0u8; 40 * 1024];
        dls_body[0..4].copy_from_slice(b"wvpl");
        let dls = riff_chunk(b"DLS ", &dls_body);
        let mut container = sf2.clone();
        container.extend_from_slice(&dls);
        let found = discover_embedded_bank(&container).unwrap();
        assert_eq!(&found[8..12], b"DLS ");
    }

    #[test]
    fn no_riff_chunk_returns_none() {
        assert!(discover_embedded_bank(b"just some bytes").is_none());
    }
}
