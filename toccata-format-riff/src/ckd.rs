// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UbiArt CKD RIFF.
//!
//! The container splits a whole CWAV file across `dsph` (header and leading data, optional)
//! and `cwav` (body) RIFF chunks; deblocking the chunk payloads back-to-back restores the
//! CWAV. The CWAV itself is a DSP-ADPCM vendor format with no in-tree decoder, so this
//! reader reassembles and reports it as unsupported.

use toccata_core::audio::AudioStream;
use toccata_core::errors::{unsupported_error, Result};
use toccata_core::formats::OpenOptions;
use toccata_core::io::deblock::{BlockMapper, BlockState, DeblockOptions, DeblockSource};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

/// True when the first chunk after the WAVE form is a CWAV carrier.
pub fn detect(src: &mut dyn ByteSource) -> Result<bool> {
    let mut tag = [0u8; 4];
    if src.read_at(0x0c, &mut tag)? != 4 {
        return Ok(false);
    }
    Ok(&tag == b"dsph" || &tag == b"cwav")
}

/// Walks the RIFF chunk sequence: the 12-byte form header yields no data, every other chunk's
/// payload is stream data.
#[derive(Clone)]
struct CkdBlockMapper;

impl BlockMapper for CkdBlockMapper {
    fn next_block(&mut self, src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        let mut reader = SourceReader::new_at(src, state.physical_offset);

        let mut tag = [0u8; 4];
        if reader.read_buf(&mut tag)? != 4 {
            return Ok(());
        }
        let size = u64::from(reader.read_u32()?);

        if &tag == b"RIFF" {
            state.data_size = 0;
            state.skip_size = 0;
            state.block_size = 0x0c;
        }
        else {
            state.data_size = size;
            state.skip_size = 0x08;
            state.block_size = size + 0x08;
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(CkdBlockMapper)
    }
}

pub fn open(src: Box<dyn ByteSource>, _opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    let stream_size = src.byte_len();
    let deblock_opts = DeblockOptions { stream_size, ..Default::default() };
    let cwav = DeblockSource::new(src, Box::new(CkdBlockMapper), deblock_opts)?;

    /* a well-formed reassembly starts with the CWAV signature */
    let _ = cwav;

    // The reassembled payload is a 3DS CWAV (DSP-ADPCM), a vendor codec with no in-tree
    // decoder.
    unsupported_error("riff: ckd cwav payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_cwav_reassembly() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(b"WAVE");
        data.extend_from_slice(b"dsph");
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(b"CWAV");
        data.extend_from_slice(b"cwav");
        data.extend_from_slice(&6u32.to_le_bytes());
        data.extend_from_slice(b"abcdef");

        let mut src = MemSource::new(data.clone());
        assert!(detect(&mut src).unwrap());

        let deblock_opts = DeblockOptions { stream_size: data.len() as u64, ..Default::default() };
        let mut cwav = DeblockSource::new(
            Box::new(MemSource::new(data)),
            Box::new(CkdBlockMapper),
            deblock_opts,
        )
        .unwrap();

        assert_eq!(cwav.byte_len(), 10);
        let mut out = vec![0u8; 10];
        cwav.read_at(0, &mut out).unwrap();
        assert_eq!(&out, b"CWAVabcdef");
    }
}
