// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wwise `.wem` Vorbis.
//!
//! The `fmt` chunk carries codec 0xFFFF plus channels/rate; the stream parameters (sample
//! count, setup and first-audio offsets relative to the `data` chunk, and the blocksize
//! exponents) live in a `vorb` chunk, or merged into an extended `fmt` on newer encoders. The
//! chunk shape picks the encoder generation and with it the packet/setup layout.

use toccata_core::audio::AudioStream;
use toccata_core::errors::{decode_error, Result};
use toccata_core::formats::OpenOptions;
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

use toccata_codec_vorbis::{VorbisConfig, VorbisStream, VorbisVariant, WwiseConfig, WwiseVersion};

use crate::find_chunk;

struct WemParams {
    channels: u16,
    sample_rate: u32,
    num_samples: u32,
    setup_offset: u64,
    audio_offset: u64,
    blocksize_0_exp: u8,
    blocksize_1_exp: u8,
    version: WwiseVersion,
}

fn read_vorb(
    reader: &mut SourceReader<'_>,
    vorb_offset: u64,
    vorb_size: u64,
    big_endian: bool,
) -> Result<(u32, u64, u64, u8, u8, WwiseVersion)> {
    let read_u32 = |reader: &mut SourceReader<'_>| -> Result<u32> {
        if big_endian {
            reader.read_be_u32()
        }
        else {
            reader.read_u32()
        }
    };

    reader.seek_to(vorb_offset);
    let num_samples = read_u32(reader)?;

    /* setup/audio offsets and blocksizes shift with the chunk generation */
    let (offsets_at, blocksizes_at, version) = match vorb_size {
        0x34 | 0x32 => (0x10u64, Some(0x28u64), WwiseVersion::V38),
        0x2a => (0x10, Some(0x28), WwiseVersion::V62),
        0x28 | 0x2c => (0x10, None, WwiseVersion::V53),
        _ => return decode_error("riff: unknown vorb chunk size"),
    };

    reader.seek_to(vorb_offset + offsets_at);
    let setup_offset = u64::from(read_u32(reader)?);
    let audio_offset = u64::from(read_u32(reader)?);

    let (blocksize_0_exp, blocksize_1_exp) = match blocksizes_at {
        Some(at) => {
            reader.seek_to(vorb_offset + at);
            let b0 = reader.read_u8()?;
            let b1 = reader.read_u8()?;
            (b0, b1)
        }
        /* external-codebook generations default to the common 2048/256 split */
        None => (0x0b, 0x08),
    };

    Ok((num_samples, setup_offset, audio_offset, blocksize_0_exp, blocksize_1_exp, version))
}

/// Opens a WEM Vorbis stream.
pub fn open(
    mut src: Box<dyn ByteSource>,
    opts: &OpenOptions,
    big_endian: bool,
) -> Result<Box<dyn AudioStream>> {
    let fmt = match find_chunk(src.as_mut(), b"fmt ", big_endian)? {
        Some(chunk) => chunk,
        None => return decode_error("riff: missing fmt chunk"),
    };
    let data = match find_chunk(src.as_mut(), b"data", big_endian)? {
        Some(chunk) => chunk,
        None => return decode_error("riff: missing data chunk"),
    };
    let vorb = find_chunk(src.as_mut(), b"vorb", big_endian)?;

    let mut reader = SourceReader::new_at(src.as_mut(), fmt.offset + 0x02);
    let (channels, sample_rate) = if big_endian {
        (reader.read_be_u16()?, reader.read_be_u32()?)
    }
    else {
        (reader.read_u16()?, reader.read_u32()?)
    };
    if channels == 0 || channels > 8 {
        return decode_error("riff: invalid wem channel count");
    }

    let params = match vorb {
        Some(vorb) => {
            let (num_samples, setup_offset, audio_offset, b0, b1, version) =
                read_vorb(&mut reader, vorb.offset, vorb.size, big_endian)?;
            WemParams {
                channels,
                sample_rate,
                num_samples,
                setup_offset,
                audio_offset,
                blocksize_0_exp: b0,
                blocksize_1_exp: b1,
                version,
            }
        }
        None => {
            /* merged layout: the vorb fields follow the 0x18-byte WAVEFORMATEXTENSIBLE head */
            if fmt.size < 0x42 {
                return decode_error("riff: wem fmt chunk too small");
            }
            let vorb_offset = fmt.offset + 0x18;
            reader.seek_to(vorb_offset);
            let num_samples =
                if big_endian { reader.read_be_u32()? } else { reader.read_u32()? };
            reader.seek_to(vorb_offset + 0x10);
            let (setup_offset, audio_offset) = if big_endian {
                (u64::from(reader.read_be_u32()?), u64::from(reader.read_be_u32()?))
            }
            else {
                (u64::from(reader.read_u32()?), u64::from(reader.read_u32()?))
            };
            reader.seek_to(vorb_offset + 0x28);
            let b0 = reader.read_u8()?;
            let b1 = reader.read_u8()?;

            WemParams {
                channels,
                sample_rate,
                num_samples,
                setup_offset,
                audio_offset,
                blocksize_0_exp: b0,
                blocksize_1_exp: b1,
                version: WwiseVersion::V62,
            }
        }
    };

    if params.blocksize_0_exp < 6
        || params.blocksize_0_exp > 13
        || params.blocksize_1_exp < 6
        || params.blocksize_1_exp > 13
    {
        return decode_error("riff: invalid wem blocksizes");
    }

    let ww_cfg = WwiseConfig {
        version: params.version,
        big_endian,
        channels: params.channels as u8,
        sample_rate: params.sample_rate,
        blocksize_0_exp: params.blocksize_0_exp,
        blocksize_1_exp: params.blocksize_1_exp,
        setup_offset: data.offset + params.setup_offset,
        audio_offset: data.offset + params.audio_offset,
    };
    let cfg = VorbisConfig {
        channels: params.channels as u8,
        sample_rate: params.sample_rate,
        num_frames: u64::from(params.num_samples),
        ..Default::default()
    };

    Ok(Box::new(VorbisStream::try_new(src, VorbisVariant::Wwise(ww_cfg), cfg, opts)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::build_riff;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_vorb_chunk_parse() {
        let mut vorb = vec![0u8; 0x34];
        vorb[0x00..0x04].copy_from_slice(&44100u32.to_le_bytes()); /* samples */
        vorb[0x10..0x14].copy_from_slice(&0x30u32.to_le_bytes()); /* setup */
        vorb[0x14..0x18].copy_from_slice(&0x200u32.to_le_bytes()); /* audio */
        vorb[0x28] = 0x0b;
        vorb[0x29] = 0x08;

        let data = build_riff(&[(b"vorb", vorb)]);
        let mut src = MemSource::new(data);
        let mut reader = SourceReader::new(&mut src);
        let chunk = find_chunk(reader.source_mut(), b"vorb", false).unwrap().unwrap();

        let (samples, setup, audio, b0, b1, version) =
            read_vorb(&mut reader, chunk.offset, chunk.size, false).unwrap();
        assert_eq!(samples, 44100);
        assert_eq!(setup, 0x30);
        assert_eq!(audio, 0x200);
        assert_eq!((b0, b1), (0x0b, 0x08));
        assert_eq!(version, WwiseVersion::V38);
    }
}
