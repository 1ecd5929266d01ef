// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Codebook libraries for setups that strip theirs.
//!
//! Wwise external-codebook streams reference entries of a codebook library shipped with the
//! encoder; FSB streams reference a whole setup packet by a 32-bit id. Both come from a
//! caller-supplied companion source:
//!
//! - codebook libraries (`.wvc`) are a concatenation of packed codebooks followed by an
//!   offset table, with the table's own offset in the last 4 bytes;
//! - FSB setup libraries (`.fvs`) are a `VFVS` header plus an id/offset/size entry table.

use toccata_core::errors::{missing_companion_error, decode_error, Result};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

/// An arbitrary ceiling for one codebook/setup blob; real ones are far smaller.
const MAX_BLOB_SIZE: u32 = 0x8000;

/// A by-index library of packed codebooks (the Wwise `.wvc` layout).
pub struct CodebookLibrary {
    src: Option<Box<dyn ByteSource>>,
}

impl CodebookLibrary {
    /// A library backed by a companion source.
    pub fn new(src: Box<dyn ByteSource>) -> CodebookLibrary {
        CodebookLibrary { src: Some(src) }
    }

    /// An empty library: every lookup reports the companion as missing.
    pub fn empty() -> CodebookLibrary {
        CodebookLibrary { src: None }
    }

    /// Loads the packed codebook blob with the given index.
    pub fn load(&self, codebook_id: u32) -> Result<Vec<u8>> {
        let src = match &self.src {
            Some(src) => src,
            None => return missing_companion_error("codebook library"),
        };
        let mut src = src.reopen()?;
        let len = src.byte_len();
        if len < 8 {
            return decode_error("vorbis: codebook library too small");
        }

        /* the last offset points at the table; entries are offsets, the delta is the size */
        let mut reader = SourceReader::new_at(src.as_mut(), len - 4);
        let table_start = u64::from(reader.read_u32()?);
        if table_start >= len {
            return decode_error("vorbis: bad codebook table offset");
        }

        let codebook_count = ((len - table_start) / 4).saturating_sub(1);
        if u64::from(codebook_id) >= codebook_count {
            return decode_error("vorbis: codebook id out of range");
        }

        reader.seek_to(table_start + u64::from(codebook_id) * 4);
        let offset = reader.read_u32()?;
        let next = reader.read_u32()?;
        let size = next.saturating_sub(offset);
        if size == 0 || size > MAX_BLOB_SIZE {
            return decode_error("vorbis: bad codebook size");
        }

        let mut blob = vec![0u8; size as usize];
        src.read_exact_at(u64::from(offset), &mut blob)?;
        Ok(blob)
    }
}

/// Loads an FSB setup packet by id from a `VFVS` companion library.
pub fn load_fsb_setup(src: &mut dyn ByteSource, setup_id: u32) -> Result<Vec<u8>> {
    let mut reader = SourceReader::new(src);

    let mut magic = [0u8; 4];
    reader.read_buf_exact(&mut magic)?;
    if &magic != b"VFVS" {
        return decode_error("vorbis: missing VFVS signature");
    }

    let _version = reader.read_u32()?;
    let entries = reader.read_u32()?;
    if entries == 0 {
        return decode_error("vorbis: empty setup library");
    }

    for i in 0..entries {
        reader.seek_to(0x20 + u64::from(i) * 0x10);
        let id = reader.read_u32()?;
        if id != setup_id {
            continue;
        }
        let offset = reader.read_u32()?;
        let size = reader.read_u32()?;
        if offset == 0 || size == 0 || size > MAX_BLOB_SIZE {
            return decode_error("vorbis: bad setup entry");
        }

        let mut blob = vec![0u8; size as usize];
        reader.seek_to(u64::from(offset));
        reader.read_buf_exact(&mut blob)?;
        return Ok(blob);
    }

    decode_error("vorbis: setup id not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_codebook_library_lookup() {
        // Two blobs then the offset table: [0x00, 0x03, 0x08] with the table offset last.
        let mut data = Vec::new();
        data.extend_from_slice(b"abc");
        data.extend_from_slice(b"defgh");
        let table_start = data.len() as u32;
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&8u32.to_le_bytes());
        data.extend_from_slice(&table_start.to_le_bytes());

        let lib = CodebookLibrary::new(Box::new(MemSource::new(data)));
        assert_eq!(lib.load(0).unwrap(), b"abc");
        assert_eq!(lib.load(1).unwrap(), b"defgh");
        assert!(lib.load(2).is_err());
    }

    #[test]
    fn verify_empty_library_reports_missing_companion() {
        let lib = CodebookLibrary::empty();
        assert!(matches!(
            lib.load(1),
            Err(toccata_core::errors::Error::MissingCompanion(_))
        ));
    }

    #[test]
    fn verify_fsb_setup_lookup() {
        let mut data = vec![0u8; 0x40];
        data[0..4].copy_from_slice(b"VFVS");
        data[8..12].copy_from_slice(&1u32.to_le_bytes()); /* entries */
        data[0x20..0x24].copy_from_slice(&0x1234u32.to_le_bytes()); /* id */
        data[0x24..0x28].copy_from_slice(&0x30u32.to_le_bytes()); /* offset */
        data[0x28..0x2c].copy_from_slice(&4u32.to_le_bytes()); /* size */
        data[0x30..0x34].copy_from_slice(b"stup");

        let mut src = MemSource::new(data);
        assert_eq!(load_fsb_setup(&mut src, 0x1234).unwrap(), b"stup");
        assert!(load_fsb_setup(&mut src, 0x9999).is_err());
    }
}
