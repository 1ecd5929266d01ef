// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sony LRMD (LocoRoco music data), a paired `.lrmh` header + `.lrmb` body.
//!
//! One body interleaves N named layers sharing a 44100 Hz config in fixed chunks; the
//! de-interleave takes each chunk's slice for the selected layer. Layers are surfaced as
//! subsongs with combined base/layer names. The payload is raw ATRAC3, located and carved but
//! without an in-tree decoder.

use toccata_core::audio::{AudioStream, LoopPoints, StreamInfo};
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::{read_magic, CompanionRole, FormatDescriptor, OpenOptions};
use toccata_core::io::deblock::{BlockMapper, BlockState, DeblockOptions, DeblockSource};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

pub const LRMD_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "lrmd",
    description: "Sony LRMD",
    score: score,
    open: open,
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<0x14>(src)?;
    Ok(if &magic[0..4] == b"LRMD" && &magic[0x10..0x14] == b"REQD" { 190 } else { 0 })
}

/// One layer's slice of every interleaved chunk.
#[derive(Clone)]
struct LrmdBlockMapper {
    chunk_size: u64,
    chunk_start: u64,
    frame_size: u64,
}

impl BlockMapper for LrmdBlockMapper {
    fn next_block(&mut self, _src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        state.data_size = self.frame_size;
        state.skip_size = self.chunk_start;
        state.block_size = self.chunk_size;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(self.clone())
    }
}

fn read_name(src: &mut dyn ByteSource, offset: u64) -> Option<String> {
    let mut buf = [0u8; 64];
    let got = src.read_at(offset, &mut buf).ok()?;
    let end = buf[..got].iter().position(|&b| b == 0)?;
    if end == 0 {
        return None;
    }
    Some(buf[..end].iter().map(|&b| char::from(b)).collect())
}

fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    if score(src.as_mut())? == 0 {
        return decode_error("lrmd: missing LRMD signature");
    }

    let mut reader = SourceReader::new_at(src.as_mut(), 0x24);
    let basename_offset = u64::from(reader.read_u32()?);
    if reader.read_u16()? != 0x4000 {
        return decode_error("lrmd: unexpected pitch value");
    }
    let max_chunk = u64::from(reader.read_u16()?);
    let num_samples = u64::from(reader.read_u32()?);
    reader.seek_to(0x38);
    let layers = reader.read_u32()? as usize;
    let section1_offset = u64::from(reader.read_u32()?);
    reader.seek_to(0x4c);
    let section2_offset = u64::from(reader.read_u32()?);

    if layers == 0 || layers > 16 {
        return decode_error("lrmd: invalid layer count");
    }

    let subsong = opts.subsong();
    if subsong as usize > layers {
        return decode_error("lrmd: subsong out of range");
    }

    /* layer configs: channel flag plus a name; frame slots are equal-sized per layer even
     * when some layers are mono */
    let frame_size = max_chunk / layers as u64 / 2;
    let mut chunk_start = 0u64;
    let mut chunk_size = 0u64;
    let mut block_size = 0u64;
    let mut channels = 0usize;
    let mut subname_offset = 0u64;

    for i in 0..layers {
        let header_offset = section1_offset + i as u64 * 0x18;
        let mut flag = [0u8; 1];
        src.read_exact_at(header_offset + 0x0d, &mut flag)?;
        let layer_channels = if flag[0] != 0 { 1 } else { 2 };

        if i + 1 == subsong as usize {
            let mut name_bytes = [0u8; 4];
            src.read_exact_at(header_offset + 0x04, &mut name_bytes)?;
            subname_offset = u64::from(u32::from_le_bytes(name_bytes));

            chunk_start = chunk_size;
            block_size = frame_size * layer_channels as u64;
            channels = layer_channels;
        }

        chunk_size += frame_size * layer_channels as u64;
    }
    if block_size == 0 {
        return decode_error("lrmd: empty layer");
    }

    /* loops */
    let loops = if section2_offset > 0 {
        let mut reader = SourceReader::new_at(src.as_mut(), section2_offset + 0x04);
        let loop_end = u64::from(reader.read_u32()?);
        let loop_start = u64::from(reader.read_u32()?);
        let loop_flag = reader.read_u32()?;
        (loop_flag != 0).then_some(LoopPoints { start: loop_start, end: loop_end })
    }
    else {
        None
    };

    let mut info = StreamInfo::new(channels, 44100, num_samples);
    info.subsong = subsong;
    info.subsong_count = layers as u32;
    info.loops = loops;

    /* base and layer names combine */
    let base = read_name(src.as_mut(), basename_offset);
    let layer = read_name(src.as_mut(), subname_offset);
    info.name = match (base, layer) {
        (Some(base), Some(layer)) => Some(format!("{}/{}", base, layer)),
        (base, layer) => base.or(layer),
    };

    /* de-interleave the body */
    let body = opts.companion(CompanionRole::Paired)?;
    let mapper = LrmdBlockMapper { chunk_size, chunk_start, frame_size: block_size };
    let _layer_data = DeblockSource::new(body, Box::new(mapper), DeblockOptions::default())?;

    // The carved layer is raw ATRAC3, a vendor codec with no in-tree decoder.
    unsupported_error("lrmd: atrac3 payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_layer_deinterleave_geometry() {
        /* two stereo layers, chunks of 0x40 split evenly */
        let body: Vec<u8> = (0..0x100u32).map(|i| (i / 0x20) as u8).collect();
        let mapper = LrmdBlockMapper { chunk_size: 0x40, chunk_start: 0x20, frame_size: 0x20 };
        let mut lane = DeblockSource::new(
            Box::new(MemSource::new(body)),
            Box::new(mapper),
            DeblockOptions::default(),
        )
        .unwrap();

        /* layer 1 holds the second 0x20 of every 0x40 chunk */
        assert_eq!(lane.byte_len(), 0x80);
        let mut bytes = vec![0u8; 0x40];
        lane.read_at(0, &mut bytes).unwrap();
        assert!(bytes[..0x20].iter().all(|&b| b == 1));
        assert!(bytes[0x20..].iter().all(|&b| b == 3));
    }

    #[test]
    fn verify_probe() {
        let mut head = vec![0u8; 0x14];
        head[0..4].copy_from_slice(b"LRMD");
        head[0x10..0x14].copy_from_slice(b"REQD");
        let mut src = MemSource::new(head);
        assert_eq!(score(&mut src).unwrap(), 190);
    }
}
