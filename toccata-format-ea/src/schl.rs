// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SCHl stream headers and SCDl data blocks.
//!
//! An `SCHl` block wraps a `PT` platform header: a sequence of one-byte-tagged fields, each a
//! one-byte length plus a big-endian value, closed by 0xFF. Audio follows in `SCDl` blocks
//! (count, per-channel data offsets, payload) until the `SCEl` end marker; `SCCl`/`SCLl`
//! markers in-between carry loop bookkeeping and no audio.

use toccata_core::errors::{decode_error, Result};
use toccata_core::io::deblock::{BlockMapper, BlockState};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

/* PT field tags */
const PT_CHANNELS: u8 = 0x82;
const PT_CODEC: u8 = 0x83;
const PT_SAMPLE_RATE: u8 = 0x84;
const PT_NUM_SAMPLES: u8 = 0x85;
const PT_LOOP_START: u8 = 0x86;
const PT_LOOP_END: u8 = 0x87;
const PT_DATA_OFFSET: u8 = 0x88;
const PT_END: u8 = 0xff;

/* codec field values dispatched in-tree */
pub const CODEC_PCM16_LE: u32 = 0x02;
pub const CODEC_MICROTALK: u32 = 0x09;

/// A parsed SCHl stream header.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchlHeader {
    pub channels: usize,
    pub codec: u32,
    pub sample_rate: u32,
    pub num_samples: u32,
    pub loop_start: Option<u32>,
    pub loop_end: Option<u32>,
    /// First SCDl block.
    pub data_offset: u64,
}

impl SchlHeader {
    pub fn parse(src: &mut dyn ByteSource, offset: u64) -> Result<SchlHeader> {
        let mut reader = SourceReader::new_at(src, offset);

        let mut magic = [0u8; 4];
        reader.read_buf_exact(&mut magic)?;
        if &magic != b"SCHl" {
            return decode_error("ea: missing SCHl block");
        }
        let header_size = u64::from(reader.read_u32()?);
        if header_size < 0x10 {
            return decode_error("ea: SCHl block too small");
        }

        let mut pt = [0u8; 2];
        reader.read_buf_exact(&mut pt)?;
        if &pt != b"PT" {
            return decode_error("ea: missing PT header");
        }
        let _platform = reader.read_u16()?;

        let mut header = SchlHeader {
            channels: 1,
            sample_rate: 22050,
            data_offset: offset + header_size,
            ..Default::default()
        };

        /* tagged fields until the terminator or the block's end */
        let end = offset + header_size;
        while reader.pos() < end {
            let tag = reader.read_u8()?;
            if tag == PT_END {
                break;
            }

            let len = usize::from(reader.read_u8()?);
            if len > 4 || reader.pos() + len as u64 > end {
                return decode_error("ea: bad PT field");
            }
            let mut value = 0u32;
            for _ in 0..len {
                value = (value << 8) | u32::from(reader.read_u8()?);
            }

            match tag {
                PT_CHANNELS => header.channels = value as usize,
                PT_CODEC => header.codec = value,
                PT_SAMPLE_RATE => header.sample_rate = value,
                PT_NUM_SAMPLES => header.num_samples = value,
                PT_LOOP_START => header.loop_start = Some(value),
                PT_LOOP_END => header.loop_end = Some(value),
                PT_DATA_OFFSET => header.data_offset = offset + u64::from(value),
                _ => (),
            }
        }

        if header.channels == 0 || header.channels > 8 {
            return decode_error("ea: invalid channel count");
        }
        if header.sample_rate == 0 {
            return decode_error("ea: invalid sample rate");
        }

        Ok(header)
    }
}

/// Walks SCDl data blocks; loop markers pass through data-less, `SCEl` ends the stream.
#[derive(Clone)]
pub struct SchlBlockMapper {
    pub channels: usize,
}

impl BlockMapper for SchlBlockMapper {
    fn next_block(&mut self, src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        let mut reader = SourceReader::new_at(src, state.physical_offset);

        let mut tag = [0u8; 4];
        if reader.read_buf(&mut tag)? != 4 {
            return Ok(()); /* end of stream */
        }
        let block_size = u64::from(reader.read_u32()?);
        if block_size < 8 {
            return Ok(());
        }

        match &tag {
            b"SCDl" => {
                /* 08: sample count, 0c: per-channel data offsets, then payload */
                let head = 0x08u64 + 0x04 + 0x04 * self.channels as u64;
                state.block_size = block_size;
                state.skip_size = head;
                state.data_size = block_size.saturating_sub(head);
            }
            b"SCEl" => {
                /* end marker terminates the walk */
                state.block_size = 0;
            }
            _ => {
                /* SCCl/SCLl and friends: bookkeeping only */
                state.block_size = block_size;
                state.skip_size = 0;
                state.data_size = 0;
            }
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::deblock::{DeblockOptions, DeblockSource};
    use toccata_core::io::MemSource;

    fn put_field(out: &mut Vec<u8>, tag: u8, value: u32, len: u8) {
        out.push(tag);
        out.push(len);
        out.extend_from_slice(&value.to_be_bytes()[4 - len as usize..]);
    }

    fn build_schl() -> Vec<u8> {
        let mut pt = Vec::new();
        pt.extend_from_slice(b"PT\x00\x00");
        put_field(&mut pt, PT_CHANNELS, 1, 1);
        put_field(&mut pt, PT_CODEC, CODEC_MICROTALK, 1);
        put_field(&mut pt, PT_SAMPLE_RATE, 22050, 2);
        put_field(&mut pt, PT_NUM_SAMPLES, 864, 4);
        pt.push(PT_END);

        let header_size = 8 + pt.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"SCHl");
        out.extend_from_slice(&header_size.to_le_bytes());
        out.extend_from_slice(&pt);
        out
    }

    #[test]
    fn verify_header_fields() {
        let data = build_schl();
        let mut src = MemSource::new(data.clone());
        let header = SchlHeader::parse(&mut src, 0).unwrap();

        assert_eq!(header.channels, 1);
        assert_eq!(header.codec, CODEC_MICROTALK);
        assert_eq!(header.sample_rate, 22050);
        assert_eq!(header.num_samples, 864);
        assert_eq!(header.data_offset, data.len() as u64);
    }

    #[test]
    fn verify_scdl_walk() {
        let mut data = Vec::new();
        /* one data block of 0x10 payload, a loop marker, another block, then the end */
        for (tag, payload) in [(b"SCDl", 0x10usize), (b"SCCl", 0usize), (b"SCDl", 0x08)] {
            let head = 8 + 4 + 4; /* mono: one offset entry */
            let size = if tag == b"SCDl" { head + payload } else { 12 };
            data.extend_from_slice(tag);
            data.extend_from_slice(&(size as u32).to_le_bytes());
            data.resize(data.len() + size - 8, 0xaa);
        }
        data.extend_from_slice(b"SCEl");
        data.extend_from_slice(&8u32.to_le_bytes());

        let mapper = SchlBlockMapper { channels: 1 };
        let deblock = DeblockSource::new(
            Box::new(MemSource::new(data)),
            Box::new(mapper),
            DeblockOptions::default(),
        )
        .unwrap();

        assert_eq!(deblock.byte_len(), 0x18);
    }
}
