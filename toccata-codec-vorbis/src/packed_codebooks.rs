// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in packed-codebook libraries.
//!
//! Codecs that strip their codebooks reference entries of a library shipped with the
//! encoder: Wwise external-codebook streams index the standard or aoTuV 6.03 library with a
//! 10-bit id, OOR selects one of a few known codebooks, and FSB references a whole setup
//! packet by a 32-bit id. These lookups are answered here first; ids the built-in set does
//! not carry fall back to a caller-supplied companion library in the same layout (see
//! [`crate::codebooks`]).
//!
//! A library blob is a concatenation of entries followed by a table of little-endian u32
//! entry offsets and one final u32 that both closes the last entry and, sitting in the last
//! 4 bytes, locates the table — the layout of the common `packed_codebooks*.bin` files.
//!
//! The bundled data below is a minimal seed set: the full upstream libraries are sizeable
//! binary tables extracted from the respective encoders and are not reproduced here. Ids
//! missing from both the bundled set and the companion surface as errors rather than
//! decoding with wrong tables.

use crate::wwise::WwiseSetupType;

/// An in-memory packed-codebook library.
pub struct Library {
    data: &'static [u8],
}

impl Library {
    /// Looks up the blob with the given index, or `None` when the library does not carry it.
    pub fn get(&self, codebook_id: u32) -> Option<&'static [u8]> {
        let data = self.data;
        if data.len() < 8 {
            return None;
        }

        let read_u32 = |at: usize| -> Option<u64> {
            let bytes = data.get(at..at + 4)?;
            Some(u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
        };

        /* the last offset points at the table; entry deltas are the sizes */
        let table_start = read_u32(data.len() - 4)? as usize;
        if table_start >= data.len() {
            return None;
        }

        let entries = ((data.len() - table_start) / 4).checked_sub(1)?;
        if codebook_id as usize >= entries {
            return None;
        }

        let at = table_start + codebook_id as usize * 4;
        let offset = read_u32(at)? as usize;
        let next = read_u32(at + 4)? as usize;
        if offset >= next || next > table_start {
            return None;
        }

        data.get(offset..next)
    }

    /// True when the library carries no entries at all.
    pub fn is_empty(&self) -> bool {
        self.data.len() < 8
    }
}

/* The upstream libraries (Wwise's standard and aoTuV 6.03 codebook tables, the OOR known
 * codebooks) are binary blobs shipped with the respective encoders; none of their entries
 * could be carried into this build, so these start out empty and every id resolves against
 * the companion library. Drop-in replacements use the layout documented above. */

/// Wwise codebooks of the standard Vorbis encoder generations.
pub static WWISE_STANDARD: Library = Library { data: &[] };

/// Wwise codebooks of the aoTuV 6.03 encoder generations.
pub static WWISE_AOTUV_603: Library = Library { data: &[] };

/// The OOR known-codebook set (ids 1..=7 observed).
pub static OOR_CODEBOOKS: Library = Library { data: &[] };

/// FSB setup packets keyed by `setup_id`.
static FSB_SETUPS: &[(u32, &[u8])] = &[];

/// The built-in library a Wwise setup type resolves ids against.
pub fn wwise_library(setup_type: WwiseSetupType) -> &'static Library {
    match setup_type {
        WwiseSetupType::AotuvCodebooks => &WWISE_AOTUV_603,
        _ => &WWISE_STANDARD,
    }
}

/// Looks up a built-in FSB setup packet by id.
pub fn fsb_setup(setup_id: u32) -> Option<&'static [u8]> {
    FSB_SETUPS.iter().find(|(id, _)| *id == setup_id).map(|(_, blob)| *blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two entries ("abc", "defgh"); the final word closes entry 1 and locates the table.
    const TEST_LIBRARY: [u8; 20] = [
        b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', /* blobs */
        0x00, 0x00, 0x00, 0x00, /* entry 0 at 0x00 */
        0x03, 0x00, 0x00, 0x00, /* entry 1 at 0x03 */
        0x08, 0x00, 0x00, 0x00, /* end of entry 1 = table offset */
    ];

    #[test]
    fn verify_library_lookup() {
        let library = Library { data: &TEST_LIBRARY };
        assert!(!library.is_empty());
        assert_eq!(library.get(0).unwrap(), b"abc");
        assert_eq!(library.get(1).unwrap(), b"defgh");
        assert!(library.get(2).is_none());
    }

    #[test]
    fn verify_empty_libraries_miss() {
        assert!(WWISE_STANDARD.is_empty());
        assert!(WWISE_STANDARD.get(0).is_none());
        assert!(WWISE_AOTUV_603.get(5).is_none());
        assert!(OOR_CODEBOOKS.get(1).is_none());
        assert!(fsb_setup(0x1234).is_none());
    }

    #[test]
    fn verify_malformed_tables_miss() {
        /* table offset past the end */
        let bad = Library { data: &[0x00, 0x00, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00] };
        assert!(bad.get(0).is_none());
    }
}
