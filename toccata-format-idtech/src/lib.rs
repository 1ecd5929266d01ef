// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! id Software audio containers.
//!
//! `mzrt` (id Tech 4.5, version 0) is a curiously mis-aligned header with an embedded wave
//! format, an internal filename, and sample data cut into `(samples, size)`-headed blocks.
//! `bsnf` (id Tech 5 voice banks) keys one subsong per language, with the sample data in a
//! paired `.bsnd` body file. PCM and Vorbis payloads decode in-tree.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use toccata_core::audio::{AudioStream, LoopPoints, StreamInfo};
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::{read_magic, CompanionRole, FormatDescriptor, OpenOptions};
use toccata_core::io::deblock::{BlockMapper, BlockState, DeblockOptions, DeblockSource};
use toccata_core::io::{ByteSource, ReadBytes, SliceSource, SourceReader};

use toccata_codec_pcm::{PcmFormat, PcmStream};
use toccata_codec_vorbis::{VorbisConfig, VorbisStream, VorbisVariant};

/// The registry descriptor for mzrt headers.
pub const MZRT_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "mzrt",
    description: "id Tech mzrt",
    score: score_mzrt,
    open: open_mzrt,
};

/// The registry descriptor for bsnf voice banks.
pub const BSNF_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "bsnf",
    description: "id Tech bsnf",
    score: score_bsnf,
    open: open_bsnf,
};

fn score_mzrt(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<8>(src)?;
    let version = u32::from_be_bytes([magic[4], magic[5], magic[6], magic[7]]);
    Ok(if &magic[0..4] == b"mzrt" && version == 0 { 190 } else { 0 })
}

fn score_bsnf(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<4>(src)?;
    Ok(if &magic == b"bsnf" { 190 } else { 0 })
}

/// Streamed mzrt blocks: a samples count and a byte size prefix each block.
#[derive(Clone)]
struct MzrtBlockMapper;

impl BlockMapper for MzrtBlockMapper {
    fn next_block(&mut self, src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        let mut reader = SourceReader::new_at(src, state.physical_offset);

        /* 0x00: samples in this block, 0x04: data size */
        let _samples = reader.read_be_u32()?;
        let data_size = u64::from(reader.read_be_u32()?);

        state.data_size = data_size;
        state.skip_size = 0x08;
        state.block_size = 0x08 + data_size;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(MzrtBlockMapper)
    }
}

fn open_mzrt(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    if opts.subsong() != 1 {
        return decode_error("idtech: subsong out of range");
    }

    let mut reader = SourceReader::new(src.as_mut());
    let mut magic = [0u8; 4];
    reader.read_buf_exact(&mut magic)?;
    if &magic != b"mzrt" {
        return decode_error("idtech: missing mzrt signature");
    }
    if reader.read_be_u32()? != 0 {
        return unsupported_error("idtech: unknown mzrt version");
    }

    /* the header is byte-misaligned: a big-endian sample count at 0x11, then a
     * little-endian wave format at 0x15 */
    reader.seek_to(0x11);
    let num_samples = u64::from(reader.read_be_u32()?);
    let codec = reader.read_u16()?;

    let (channels, sample_rate, mut start_offset) = match codec {
        0x0001 | 0x0002 | 0x0166 => {
            let channels = reader.read_u16()? as usize;
            let sample_rate = reader.read_u32()?;
            /* 0x1d: avg rate, 0x21: block size, 0x23: bps */
            (channels, sample_rate, 0x25u64)
        }
        0x0000 => {
            reader.seek_to(0x1d);
            let sample_rate = reader.read_be_u32()?;
            let channels = reader.read_be_u32()? as usize;
            (channels, sample_rate, 0x29u64)
        }
        _ => return unsupported_error("idtech: unknown mzrt codec"),
    };

    if channels == 0 || channels > 8 {
        return decode_error("idtech: invalid channel count");
    }

    /* codec-specific extra tables precede the filename */
    match codec {
        0x0002 | 0x0166 => {
            reader.seek_to(start_offset);
            start_offset += 0x02 + u64::from(reader.read_u16()?);
        }
        0x0000 => {
            reader.seek_to(start_offset);
            start_offset += 0x04 + u64::from(reader.read_be_u32()?) * 0x04;
        }
        _ => (),
    }

    /* internal filename */
    reader.seek_to(start_offset);
    start_offset += 0x04 + u64::from(reader.read_be_u32()?);

    let mut info = StreamInfo::new(channels, sample_rate, num_samples);
    info.name = src.name().map(|n| n.to_string());

    match codec {
        0x0001 => {
            /* streamed PCM: the data region is blocked */
            start_offset += 0x08;
            let deblock_opts = DeblockOptions { stream_start: start_offset, ..Default::default() };
            let pcm = DeblockSource::new(src, Box::new(MzrtBlockMapper), deblock_opts)?;
            let len = pcm.byte_len();
            Ok(Box::new(PcmStream::new(Box::new(pcm), info, PcmFormat::S16Le, 0, len)))
        }
        _ => unsupported_error("idtech: mzrt payload codec"),
    }
}

/* bsnf stream codecs */
const BSNF_CODEC_VORBIS: u16 = 0x674f;

fn open_bsnf(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    let mut reader = SourceReader::new(src.as_mut());
    let mut magic = [0u8; 4];
    reader.read_buf_exact(&mut magic)?;
    if &magic != b"bsnf" {
        return decode_error("idtech: missing bsnf signature");
    }

    let num_languages = reader.read_be_u32()?;
    if num_languages == 0 || num_languages > 64 {
        return decode_error("idtech: invalid language count");
    }

    let subsong = opts.subsong();
    if subsong > num_languages {
        return decode_error("idtech: subsong out of range");
    }

    /* one 0x18 entry per language: a name, the stream size, and the header offset */
    let entry = 0x08 + u64::from(subsong - 1) * 0x18;
    reader.seek_to(entry);
    let mut language = [0u8; 0x10];
    reader.read_buf_exact(&mut language)?;
    let stream_size = u64::from(reader.read_be_u32()?);
    let offset = u64::from(reader.read_be_u32()?);

    /* stream header: samples, loop, then a little-endian wave format */
    reader.seek_to(offset + 0x08);
    let num_samples = u64::from(reader.read_be_u32()?);
    let loop_start = u64::from(reader.read_be_u32()?);
    reader.seek_to(offset + 0x14);
    let codec = reader.read_u16()?;
    let channels = reader.read_u16()? as usize;
    let sample_rate = reader.read_u32()?;

    if channels == 0 || channels > 8 {
        return decode_error("idtech: invalid channel count");
    }

    let mut info = StreamInfo::new(channels, sample_rate, num_samples);
    info.subsong = subsong;
    info.subsong_count = num_languages;
    let name: String =
        language.iter().take_while(|&&b| b != 0).map(|&b| char::from(b)).collect();
    if !name.is_empty() {
        info.name = Some(name);
    }
    if loop_start > 0 {
        info.loops = Some(LoopPoints { start: loop_start, end: num_samples });
    }

    /* the body lives in the paired .bsnd file */
    let body = opts.companion(CompanionRole::Paired)?;
    let body = SliceSource::new(body, 0, stream_size);

    match codec {
        BSNF_CODEC_VORBIS => {
            let cfg = VorbisConfig {
                channels: channels as u8,
                sample_rate,
                num_frames: num_samples,
                loops: info.loops,
                ..Default::default()
            };
            Ok(Box::new(VorbisStream::try_new(
                Box::new(body),
                VorbisVariant::Ogg,
                cfg,
                opts,
            )?))
        }
        _ => unsupported_error("idtech: bsnf payload codec"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    fn build_mzrt_pcm(samples: &[i16]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"mzrt");
        out.extend_from_slice(&0u32.to_be_bytes());
        out.resize(0x11, 0);
        out.extend_from_slice(&(samples.len() as u32).to_be_bytes());
        out.extend_from_slice(&0x0001u16.to_le_bytes()); /* codec */
        out.extend_from_slice(&1u16.to_le_bytes()); /* channels */
        out.extend_from_slice(&22050u32.to_le_bytes());
        out.resize(0x25, 0);
        /* filename */
        out.extend_from_slice(&4u32.to_be_bytes());
        out.extend_from_slice(b"name");
        /* stream size marker before the blocks */
        out.extend_from_slice(&0u64.to_be_bytes());
        /* one block with all samples */
        out.extend_from_slice(&(samples.len() as u32).to_be_bytes());
        out.extend_from_slice(&((samples.len() * 2) as u32).to_be_bytes());
        for &sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    #[test]
    fn verify_mzrt_pcm_roundtrip() {
        let samples = [100i16, -200, 300, -400];
        let data = build_mzrt_pcm(&samples);
        let mut src = MemSource::new(data);
        assert_eq!(score_mzrt(&mut src).unwrap(), 190);

        let mut stream =
            open_mzrt(Box::new(src), &OpenOptions::default()).unwrap();
        assert_eq!(stream.info().sample_rate, 22050);
        assert_eq!(stream.info().num_frames, 4);

        let mut out = [0i16; 4];
        assert_eq!(stream.decode(&mut out).unwrap(), 4);
        assert_eq!(out, samples);
    }

    #[test]
    fn verify_bsnf_requires_companion() {
        let mut data = Vec::new();
        data.extend_from_slice(b"bsnf");
        data.extend_from_slice(&1u32.to_be_bytes());
        /* language entry */
        data.extend_from_slice(b"english\0\0\0\0\0\0\0\0\0");
        data.extend_from_slice(&0x100u32.to_be_bytes()); /* stream size */
        let header_offset = (data.len() + 4) as u32;
        data.extend_from_slice(&header_offset.to_be_bytes());
        /* stream header */
        let base = data.len();
        data.resize(base + 0x24, 0);
        data[base + 0x08..base + 0x0c].copy_from_slice(&48000u32.to_be_bytes());
        data[base + 0x14..base + 0x16].copy_from_slice(&BSNF_CODEC_VORBIS.to_le_bytes());
        data[base + 0x16..base + 0x18].copy_from_slice(&2u16.to_le_bytes());
        data[base + 0x18..base + 0x1c].copy_from_slice(&44100u32.to_le_bytes());

        let result = open_bsnf(Box::new(MemSource::new(data)), &OpenOptions::default());
        assert!(matches!(
            result,
            Err(toccata_core::errors::Error::MissingCompanion(_))
        ));
    }
}
