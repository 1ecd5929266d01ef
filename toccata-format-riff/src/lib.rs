// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RIFF-variant game audio.
//!
//! Several engines ship audio in slightly bent RIFF: Wwise `.wem` (RIFF/RIFX with a Vorbis
//! `fmt` of 0xFFFF and a `vorb` parameter chunk), Ubisoft LyN (a `fact` chunk tagged "LyN "
//! and vendor codecs, among them interleaved mono Ogg), UbiArt CKD (RIFF wrapping a CWAV),
//! and MUPS (an Ogg stream whose magic words were renamed). The chunk walker is shared; each
//! variant keeps its own module.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use toccata_core::audio::AudioStream;
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::{read_magic, FormatDescriptor, OpenOptions};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

pub mod ckd;
pub mod lyn;
pub mod mups;
pub mod wem;

/// The registry descriptor for RIFF-family files (WEM/LyN/CKD).
pub const RIFF_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "riff",
    description: "RIFF game variants",
    score: score,
    open: open,
};

/// The registry descriptor for MUPS disguised-Ogg files.
pub const MUPS_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "mups",
    description: "MUPS Ogg",
    score: mups::score,
    open: mups::open,
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<12>(src)?;
    let riff = &magic[0..4] == b"RIFF" || &magic[0..4] == b"RIFX";
    Ok(if riff && &magic[8..12] == b"WAVE" { 100 } else { 0 })
}

/// A located RIFF chunk.
#[derive(Clone, Copy, Debug)]
pub struct Chunk {
    pub offset: u64,
    pub size: u64,
}

/// Walks the chunk list for a tag. Chunk sizes are little-endian in RIFF and big-endian in
/// RIFX.
pub fn find_chunk(
    src: &mut dyn ByteSource,
    tag: &[u8; 4],
    big_endian: bool,
) -> Result<Option<Chunk>> {
    let len = src.byte_len();
    let mut reader = SourceReader::new_at(src, 0x0c);

    while reader.pos() + 8 <= len {
        let mut chunk_tag = [0u8; 4];
        reader.read_buf_exact(&mut chunk_tag)?;
        let size = if big_endian {
            u64::from(reader.read_be_u32()?)
        }
        else {
            u64::from(reader.read_u32()?)
        };

        if &chunk_tag == tag {
            return Ok(Some(Chunk { offset: reader.pos(), size }));
        }

        /* chunks are word-aligned */
        reader.ignore_bytes(size + (size & 1))?;
    }

    Ok(None)
}

fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    let magic = read_magic::<12>(src.as_mut())?;
    let big_endian = match &magic[0..4] {
        b"RIFF" => false,
        b"RIFX" => true,
        _ => return decode_error("riff: missing RIFF signature"),
    };
    if &magic[8..12] != b"WAVE" {
        return decode_error("riff: missing WAVE form");
    }

    if opts.subsong() != 1 {
        return decode_error("riff: subsong out of range");
    }

    /* the CKD wrapper has no fmt at all, its first chunk is the CWAV body */
    if ckd::detect(src.as_mut())? {
        return ckd::open(src, opts);
    }

    let fmt = match find_chunk(src.as_mut(), b"fmt ", big_endian)? {
        Some(chunk) => chunk,
        None => return decode_error("riff: missing fmt chunk"),
    };

    let mut reader = SourceReader::new_at(src.as_mut(), fmt.offset);
    let codec = if big_endian { reader.read_be_u16()? } else { reader.read_u16()? };

    match codec {
        0xffff => wem::open(src, opts, big_endian),
        _ if lyn::detect(src.as_mut(), big_endian)? => lyn::open(src, opts),
        0x0001 => {
            /* plain PCM in a custom-tooled RIFF */
            let mut reader = SourceReader::new_at(src.as_mut(), fmt.offset + 0x02);
            let channels = reader.read_u16()? as usize;
            let sample_rate = reader.read_u32()?;

            let data = match find_chunk(src.as_mut(), b"data", big_endian)? {
                Some(chunk) => chunk,
                None => return decode_error("riff: missing data chunk"),
            };
            if channels == 0 {
                return decode_error("riff: invalid channel count");
            }

            let info = toccata_core::audio::StreamInfo::new(channels, sample_rate, 0);
            let format = if big_endian {
                toccata_codec_pcm::PcmFormat::S16Be
            }
            else {
                toccata_codec_pcm::PcmFormat::S16Le
            };
            Ok(Box::new(toccata_codec_pcm::PcmStream::new(
                src,
                info,
                format,
                data.offset,
                data.size,
            )))
        }
        _ => unsupported_error("riff: unsupported codec tag"),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    /// Builds a minimal RIFF file from (tag, body) chunks.
    pub(crate) fn build_riff(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0u32.to_le_bytes()); /* patched below */
        out.extend_from_slice(b"WAVE");
        for (tag, body) in chunks {
            out.extend_from_slice(*tag);
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
            out.extend_from_slice(body);
            if body.len() % 2 == 1 {
                out.push(0);
            }
        }
        let riff_size = (out.len() - 8) as u32;
        out[4..8].copy_from_slice(&riff_size.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_util::build_riff;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_chunk_walk() {
        let data = build_riff(&[
            (b"fmt ", vec![0x01, 0x00, 0x02, 0x00, 0x44, 0xac, 0x00, 0x00]),
            (b"odd ", vec![0xaa; 3]),
            (b"data", vec![0x11; 8]),
        ]);
        let mut src = MemSource::new(data);

        let fmt = find_chunk(&mut src, b"fmt ", false).unwrap().unwrap();
        assert_eq!(fmt.offset, 0x14);
        assert_eq!(fmt.size, 8);

        /* the odd-sized chunk is padded, data must still be found */
        let data = find_chunk(&mut src, b"data", false).unwrap().unwrap();
        assert_eq!(data.size, 8);
        assert!(find_chunk(&mut src, b"none", false).unwrap().is_none());
    }

    #[test]
    fn verify_pcm_riff_opens() {
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes()); /* codec */
        fmt.extend_from_slice(&1u16.to_le_bytes()); /* channels */
        fmt.extend_from_slice(&8000u32.to_le_bytes());
        fmt.extend_from_slice(&[0u8; 8]);

        let mut pcm = Vec::new();
        for v in [10i16, -10, 20, -20] {
            pcm.extend_from_slice(&v.to_le_bytes());
        }

        let data = build_riff(&[(b"fmt ", fmt), (b"data", pcm)]);
        let mut stream =
            open(Box::new(MemSource::new(data)), &OpenOptions::default()).unwrap();

        assert_eq!(stream.info().channels, 1);
        assert_eq!(stream.info().num_frames, 4);
        let mut out = [0i16; 4];
        assert_eq!(stream.decode(&mut out).unwrap(), 4);
        assert_eq!(out, [10, -10, 20, -20]);
    }

    #[test]
    fn verify_probe() {
        let mut src = MemSource::new(build_riff(&[]));
        assert_eq!(score(&mut src).unwrap(), 100);
    }
}
