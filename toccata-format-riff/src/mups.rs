// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MUPS disguised Ogg.
//!
//! A plain Ogg Vorbis stream whose "OggS" capture patterns were renamed to "PssH" and, on the
//! first page, "vorbis" to "psolar". The deblocker walks pages (so rewrites see page-aligned
//! positions) and patches both words back while reading; page checksums stay valid since they
//! were computed over the original words.

use toccata_core::audio::AudioStream;
use toccata_core::errors::{decode_error, Result};
use toccata_core::formats::{read_magic, OpenOptions};
use toccata_core::io::deblock::{BlockMapper, BlockState, DeblockOptions, DeblockSource};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

use toccata_codec_vorbis::{VorbisConfig, VorbisStream, VorbisVariant};

pub fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<12>(src)?;
    Ok(if &magic[0..4] == b"MUPS" && &magic[8..12] == b"PssH" { 200 } else { 0 })
}

/// Each block is one "PssH" page: base header plus segment table plus laced data.
#[derive(Clone)]
struct MupsBlockMapper;

impl MupsBlockMapper {
    fn page_size(src: &mut dyn ByteSource, offset: u64) -> Result<u64> {
        let mut reader = SourceReader::new_at(src, offset);

        let mut magic = [0u8; 4];
        if reader.read_buf(&mut magic)? != 4 || &magic != b"PssH" {
            return decode_error("mups: missing PssH page");
        }

        reader.seek_to(offset + 0x1a);
        let segments = u64::from(reader.read_u8()?);

        let mut size = 0x1b + segments;
        for _ in 0..segments {
            size += u64::from(reader.read_u8()?);
        }
        Ok(size)
    }
}

impl BlockMapper for MupsBlockMapper {
    fn next_block(&mut self, src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        match Self::page_size(src, state.physical_offset) {
            Ok(size) => {
                state.block_size = size;
                state.skip_size = 0;
                state.data_size = size;
            }
            Err(_) => state.block_size = 0, /* trailing garbage ends the stream */
        }
        Ok(())
    }

    fn patch(&mut self, buf: &mut [u8], state: &BlockState, block_pos: u64) {
        /* restore "OggS" at every page head */
        for (i, &byte) in b"OggS".iter().enumerate() {
            let i = i as u64;
            if i >= block_pos && i < block_pos + buf.len() as u64 {
                buf[(i - block_pos) as usize] = byte;
            }
        }

        /* the first page also holds "psolar" where "vorbis" belongs (0x1d..0x23) */
        if state.logical_offset == 0 {
            for (i, &byte) in b"vorbis".iter().enumerate() {
                let i = i as u64 + 0x1d;
                if i >= block_pos && i < block_pos + buf.len() as u64 {
                    buf[(i - block_pos) as usize] = byte;
                }
            }
        }
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(MupsBlockMapper)
    }
}

pub fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    if score(src.as_mut())? == 0 {
        return decode_error("mups: missing MUPS signature");
    }
    if opts.subsong() != 1 {
        return decode_error("mups: subsong out of range");
    }

    /* the Ogg begins after the 8-byte MUPS header */
    let deblock_opts = DeblockOptions { stream_start: 0x08, ..Default::default() };
    let ogg = DeblockSource::new(src, Box::new(MupsBlockMapper), deblock_opts)?;

    let cfg = VorbisConfig::default();
    Ok(Box::new(VorbisStream::try_new(Box::new(ogg), VorbisVariant::Ogg, cfg, opts)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    fn build_page(first: bool, payload: &[u8]) -> Vec<u8> {
        let mut page = Vec::new();
        page.extend_from_slice(b"PssH");
        page.extend_from_slice(&[0u8; 0x16]);
        page.push(1); /* one segment */
        page.push(payload.len() as u8);
        page.extend_from_slice(payload);
        if first {
            /* place "psolar" where the id packet's "vorbis" would sit (0x1d..0x23) */
            page[0x1d..0x23].copy_from_slice(b"psolar");
        }
        page
    }

    #[test]
    fn verify_page_patching() {
        let mut data = vec![0u8; 8];
        data[0..4].copy_from_slice(b"MUPS");
        data[4..8].copy_from_slice(&0u32.to_le_bytes());
        /* payload large enough to cover the 0x1d..0x23 patch window */
        data.extend_from_slice(&build_page(true, &[0x01u8; 0x10]));
        data.extend_from_slice(&build_page(false, b"page2data"));

        let mut src = MemSource::new(data);
        assert_eq!(score(&mut src).unwrap(), 200);

        let deblock_opts = DeblockOptions { stream_start: 0x08, ..Default::default() };
        let mut ogg = DeblockSource::new(
            Box::new(src),
            Box::new(MupsBlockMapper),
            deblock_opts,
        )
        .unwrap();

        let mut head = vec![0u8; 0x23];
        ogg.read_at(0, &mut head).unwrap();
        assert_eq!(&head[0..4], b"OggS");
        assert_eq!(&head[0x1d..0x23], b"vorbis");

        /* the second page head is patched too, reading at an unaligned position */
        let second_page = 0x1b + 1 + 0x10;
        let mut tail = vec![0u8; 8];
        ogg.read_at(second_page as u64 + 2, &mut tail).unwrap();
        assert_eq!(&tail[0..2], b"gS");
    }
}
