// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ubisoft LyN RIFF.
//!
//! A slightly eccentric RIFF: a `fact` chunk tagged "LyN " carries the sample count, and the
//! codec field doubles as a vendor selector (0xFFFE hides the real codec in a faked GUID).
//! The 0x3157 codec is mono Ogg Vorbis layers interleaved in fixed-size chunks; a single
//! layer deblocks into a standard Ogg stream.

use toccata_core::audio::{AudioStream, StreamInfo};
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::OpenOptions;
use toccata_core::io::deblock::{DeblockOptions, DeblockSource, FixedBlockMapper};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

use toccata_codec_pcm::{PcmFormat, PcmStream};
use toccata_codec_vorbis::{VorbisConfig, VorbisStream, VorbisVariant};

use crate::find_chunk;

const CODEC_PCM: u32 = 0x0001;
const CODEC_OGG: u32 = 0x3157;

/// True when the RIFF carries the LyN `fact` tag.
pub fn detect(src: &mut dyn ByteSource, big_endian: bool) -> Result<bool> {
    let fact = match find_chunk(src, b"fact", big_endian)? {
        Some(chunk) => chunk,
        None => return Ok(false),
    };
    if fact.size != 0x10 {
        return Ok(false);
    }

    let mut tag = [0u8; 4];
    src.read_exact_at(fact.offset + 0x04, &mut tag)?;
    Ok(&tag == b"LyN ")
}

pub fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    let fmt = match find_chunk(src.as_mut(), b"fmt ", false)? {
        Some(chunk) => chunk,
        None => return decode_error("riff: missing fmt chunk"),
    };
    let data = match find_chunk(src.as_mut(), b"data", false)? {
        Some(chunk) => chunk,
        None => return decode_error("riff: missing data chunk"),
    };
    let fact = match find_chunk(src.as_mut(), b"fact", false)? {
        Some(chunk) => chunk,
        None => return decode_error("riff: missing fact chunk"),
    };

    let name = src.name().map(|n| n.to_string());

    let mut reader = SourceReader::new_at(src.as_mut(), fact.offset);
    let num_samples = u64::from(reader.read_u32()?);

    reader.seek_to(fmt.offset);
    let mut codec = u32::from(reader.read_u16()?);
    let channels = reader.read_u16()? as usize;
    let sample_rate = reader.read_u32()?;

    if codec == 0xfffe {
        /* a faked GUID whose first dword is the real codec */
        if fmt.size < 0x28 {
            return decode_error("riff: truncated extensible fmt");
        }
        reader.seek_to(fmt.offset + 0x18);
        codec = reader.read_u32()?;
    }

    if channels == 0 || channels > 8 {
        return decode_error("riff: invalid channel count");
    }

    let mut info = StreamInfo::new(channels, sample_rate, num_samples);
    info.name = name;

    match codec {
        CODEC_PCM => Ok(Box::new(PcmStream::new(
            src,
            info,
            PcmFormat::S16Le,
            data.offset,
            data.size,
        ))),
        CODEC_OGG => {
            /* data: 0x00 id (always 1), 0x04 interleave, 0x08.. per-layer logical sizes */
            reader.seek_to(data.offset);
            if reader.read_u32()? != 1 {
                return decode_error("riff: bad lyn ogg id");
            }
            let interleave = u64::from(reader.read_u32()?);
            let logical_size = u64::from(reader.read_u32()?);
            let layers_offset = data.offset + 0x08 + 0x04 * channels as u64;

            if channels != 1 {
                // Each channel is an independent mono Ogg; playing more than one needs the
                // layered-layout machinery that lives outside this library.
                return unsupported_error("riff: multi-layer lyn ogg");
            }

            let mapper = FixedBlockMapper { chunk_size: interleave, skip_size: 0 };
            let deblock_opts = DeblockOptions {
                stream_start: layers_offset,
                logical_size,
                ..Default::default()
            };
            let layer = DeblockSource::new(src, Box::new(mapper), deblock_opts)?;

            let cfg = VorbisConfig {
                channels: 1,
                sample_rate,
                num_frames: num_samples,
                ..Default::default()
            };
            Ok(Box::new(VorbisStream::try_new(
                Box::new(layer),
                VorbisVariant::Ogg,
                cfg,
                opts,
            )?))
        }
        _ => unsupported_error("riff: unsupported lyn codec"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::build_riff;
    use toccata_core::io::MemSource;

    fn lyn_fact() -> Vec<u8> {
        let mut fact = vec![0u8; 0x10];
        fact[0..4].copy_from_slice(&1000u32.to_le_bytes());
        fact[4..8].copy_from_slice(b"LyN ");
        fact
    }

    #[test]
    fn verify_detection() {
        let data = build_riff(&[(b"fact", lyn_fact())]);
        let mut src = MemSource::new(data);
        assert!(detect(&mut src, false).unwrap());

        let plain = build_riff(&[(b"fact", vec![0u8; 0x10])]);
        let mut src = MemSource::new(plain);
        assert!(!detect(&mut src, false).unwrap());
    }

    #[test]
    fn verify_pcm_path() {
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&(CODEC_PCM as u16).to_le_bytes());
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&32000u32.to_le_bytes());
        fmt.extend_from_slice(&[0u8; 10]);

        let mut pcm = Vec::new();
        for v in [5i16, -5] {
            pcm.extend_from_slice(&v.to_le_bytes());
        }

        let data = build_riff(&[(b"fmt ", fmt), (b"fact", lyn_fact()), (b"data", pcm)]);
        let mut stream =
            open(Box::new(MemSource::new(data)), &OpenOptions::default()).unwrap();

        assert_eq!(stream.info().num_frames, 1000); /* fact wins over data size */
        assert_eq!(stream.info().sample_rate, 32000);
        let mut out = [0i16; 2];
        assert_eq!(stream.decode(&mut out).unwrap(), 2);
        assert_eq!(out, [5, -5]);
    }
}
