// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Acclaim `.audiopkg` banks (The Hobbit, Area 51).
//!
//! The header is a stack of counted tables: strings, lipsync/music/breakpoint blobs,
//! identifier and descriptor indexes, then "hot/warm/cold" sample index and header sections.
//! Indexes are u16 references into the sample-header table, with one extra trailing index per
//! section so a stereo pair (two headers, one index) is detectable from the index delta.
//! Channels of interleaved streams alternate 0x8000 blocks, with a 0x10 padding tail inside
//! each block on later revisions.

use toccata_core::audio::{AudioStream, LoopPoints, StreamInfo};
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::{read_magic, FormatDescriptor, OpenOptions};
use toccata_core::io::deblock::{BlockMapper, BlockState, DeblockOptions, DeblockSource};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

use toccata_codec_pcm::{PcmFormat, PcmStream};

pub const AUDIOPKG_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "audiopkg",
    description: "Acclaim AUDIOPKG",
    score: score,
    open: open,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Platform {
    Pc,
    Xbox,
    Ps2,
    Gc,
}

/* sample header type field */
const TYPE_PLATFORM_ADPCM: i32 = 0x00;
const TYPE_PCM: i32 = 0x01;
const TYPE_MP3: i32 = 0x02;

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<4>(src)?;
    let known = matches!(&magic, b"v1.5" | b"v1.6" | b"v1.7" | b"v1.8");
    Ok(if known { 150 } else { 0 })
}

struct Tables {
    big_endian: bool,
    platform: Platform,
    sample_headers: [i64; 3],
    sample_indices: [i64; 3],
    sample_sizes: [i64; 3],
    sample_indices_offset: u64,
    sample_headers_offset: u64,
}

fn parse_tables(src: &mut dyn ByteSource) -> Result<Tables> {
    /* 0x00 version string, 0x10 platform string, 0x20 build user, 0x30 build date */
    let magic = read_magic::<4>(src)?;
    let mut version = i32::from(magic[3].wrapping_sub(0x30));
    if version < 5 || version > 8 {
        return decode_error("audiopkg: unknown version");
    }

    let mut platform_tag = [0u8; 4];
    src.read_exact_at(0x10, &mut platform_tag)?;
    let platform = match &platform_tag {
        b"Wind" => Platform::Pc,
        b"Xbox" => Platform::Xbox,
        b"Play" => Platform::Ps2,
        b"Game" => Platform::Gc,
        _ => return decode_error("audiopkg: unknown platform"),
    };

    /* PC banks lie about their version by one */
    if platform == Platform::Pc && version == 6 {
        version = 5;
    }
    let big_endian = platform == Platform::Gc;

    let mut offset = 0x40u64;
    offset += match version {
        5 => 0x60,
        6 => 0x70,
        7 | 8 => 0x80,
        _ => return decode_error("audiopkg: unknown version"),
    };

    let mut reader = SourceReader::new_at(src, offset);
    let mut read_u32 = |reader: &mut SourceReader<'_>| -> Result<u32> {
        if big_endian {
            reader.read_be_u32()
        }
        else {
            reader.read_u32()
        }
    };

    let descriptors = i64::from(read_u32(&mut reader)?);
    let identifiers = i64::from(read_u32(&mut reader)?);
    let descriptors_size = u64::from(read_u32(&mut reader)?);
    let strings_size = u64::from(read_u32(&mut reader)?);
    let lipsyncs_size = u64::from(read_u32(&mut reader)?);
    let musicdata_size = u64::from(read_u32(&mut reader)?);
    let breakpoints_size = u64::from(read_u32(&mut reader)?);
    let mut sample_headers = [0i64; 3];
    for header in sample_headers.iter_mut() {
        *header = i64::from(read_u32(&mut reader)?);
    }
    let mut sample_indices = [0i64; 3];
    for index in sample_indices.iter_mut() {
        *index = i64::from(read_u32(&mut reader)?);
    }
    /* 0x34: per-section compression types, defined again per stream */
    reader.seek_to(offset + 0x40);
    let mut sample_sizes = [0i64; 3];
    for size in sample_sizes.iter_mut() {
        *size = i64::from(read_u32(&mut reader)?);
    }

    let mut offset = offset + 0x4c;
    if version >= 6 {
        offset += 0x04;
    }

    /* the table stack */
    offset += strings_size;
    offset += lipsyncs_size;
    offset += breakpoints_size;
    offset += musicdata_size;
    offset += identifiers as u64 * 0x08;
    offset += descriptors as u64 * 0x04;
    offset += descriptors_size;

    let sample_indices_offset = offset;
    let indices_count: i64 = sample_indices.iter().sum();
    let extras = sample_indices.iter().filter(|&&count| count != 0).count() as i64;
    offset += (indices_count + extras) as u64 * 0x02;

    let sample_headers_offset = offset;

    Ok(Tables {
        big_endian,
        platform,
        sample_headers,
        sample_indices,
        sample_sizes,
        sample_indices_offset,
        sample_headers_offset,
    })
}

fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    let tables = parse_tables(src.as_mut())?;

    let total: i64 = tables.sample_indices.iter().sum();
    if total <= 0 {
        return decode_error("audiopkg: bank has no subsongs");
    }
    let subsong = opts.subsong();
    if i64::from(subsong) > total {
        return decode_error("audiopkg: subsong out of range");
    }

    /* find the target's section and its index pair */
    let mut entries_left = i64::from(subsong) - 1;
    let mut target_offset = tables.sample_indices_offset;
    let mut temperature = 0usize;
    for (section, &count) in tables.sample_indices.iter().enumerate() {
        if count == 0 {
            continue;
        }
        if entries_left >= count {
            target_offset += (count + 1) as u64 * 0x02;
            entries_left -= count;
            continue;
        }
        target_offset += entries_left as u64 * 0x02;
        temperature = section;
        break;
    }

    let mut reader = SourceReader::new_at(src.as_mut(), target_offset);
    let (index0, index1) = if tables.big_endian {
        (i64::from(reader.read_be_u16()?), i64::from(reader.read_be_u16()?))
    }
    else {
        (i64::from(reader.read_u16()?), i64::from(reader.read_u16()?))
    };

    /* a stereo pair owns two consecutive headers */
    let channels = (index1 - index0) as usize;
    if channels < 1 || channels > 2 {
        return decode_error("audiopkg: invalid channel span");
    }

    let head_size = tables.sample_sizes[temperature] as u64;
    let mut head_offset = tables.sample_headers_offset;
    for section in 0..3 {
        if tables.sample_headers[section] == 0 {
            continue;
        }
        if section < temperature {
            head_offset +=
                (tables.sample_headers[section] * tables.sample_sizes[section]) as u64;
            continue;
        }
        head_offset += index0 as u64 * head_size;
        break;
    }

    /* sample header: stream bounds, codec type and playback params */
    reader.seek_to(head_offset + 0x04);
    let mut read_u32 = |reader: &mut SourceReader<'_>| -> Result<u32> {
        if tables.big_endian {
            reader.read_be_u32()
        }
        else {
            reader.read_u32()
        }
    };
    let stream_offset = u64::from(read_u32(&mut reader)?);
    let stream_size = u64::from(read_u32(&mut reader)?);
    reader.seek_to(head_offset + 0x14);
    let sample_type = read_u32(&mut reader)? as i32;
    let num_samples = u64::from(read_u32(&mut reader)?);
    let sample_rate = read_u32(&mut reader)?;
    let loop_start = u64::from(read_u32(&mut reader)?);
    let loop_end = u64::from(read_u32(&mut reader)?);

    let mut info = StreamInfo::new(channels, sample_rate, num_samples);
    info.subsong = subsong;
    info.subsong_count = total as u32;
    if loop_end > 0 {
        info.loops = Some(LoopPoints { start: loop_start, end: loop_end });
    }
    info.name = src.name().map(|n| n.to_string());

    match sample_type {
        TYPE_PCM => {
            if channels == 1 {
                let format =
                    if tables.big_endian { PcmFormat::S16Be } else { PcmFormat::S16Le };
                return Ok(Box::new(PcmStream::new(
                    src,
                    info,
                    format,
                    stream_offset,
                    stream_size,
                )));
            }
            /* interleaved stereo alternates 0x8000 channel blocks with padded tails */
            let _lane = open_channel_lane(src, stream_offset, stream_size, 0, channels)?;
            unsupported_error("audiopkg: interleaved stereo pcm")
        }
        TYPE_PLATFORM_ADPCM | TYPE_MP3 => {
            // Type 0 is the platform's native ADPCM (PSX/XBOX/DSP), type 2 is MP3.
            log::debug!(
                "audiopkg: subsong {} uses vendor codec (type {}, platform {})",
                subsong,
                sample_type,
                match tables.platform {
                    Platform::Pc => "pc",
                    Platform::Xbox => "xbox",
                    Platform::Ps2 => "ps2",
                    Platform::Gc => "gc",
                },
            );
            unsupported_error("audiopkg: vendor payload codec")
        }
        _ => decode_error("audiopkg: unknown sample type"),
    }
}

/// Removes the per-block padding inside one channel's 0x8000-block lane.
#[derive(Clone)]
struct PaddingMapper;

impl BlockMapper for PaddingMapper {
    fn next_block(&mut self, _src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        state.block_size = 0x10000;
        state.skip_size = 0;
        state.data_size = state.block_size - 0x10;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(PaddingMapper)
    }
}

/// Builds the logical view of one interleaved channel: step over the other channels' 0x8000
/// blocks, then strip block padding.
fn open_channel_lane(
    src: Box<dyn ByteSource>,
    stream_offset: u64,
    stream_size: u64,
    channel: usize,
    channels: usize,
) -> Result<Box<dyn ByteSource>> {
    use toccata_core::io::deblock::FixedBlockMapper;

    let step = DeblockSource::new(
        src,
        Box::new(FixedBlockMapper { chunk_size: 0x8000, skip_size: 0 }),
        DeblockOptions {
            stream_start: stream_offset,
            stream_size,
            step_start: channel as u32,
            step_count: channels as u32,
            ..Default::default()
        },
    )?;

    let unpadded =
        DeblockSource::new(Box::new(step), Box::new(PaddingMapper), DeblockOptions::default())?;
    Ok(Box::new(unpadded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_probe() {
        let mut head = vec![0u8; 0x20];
        head[0..4].copy_from_slice(b"v1.7");
        head[0x10..0x14].copy_from_slice(b"Play");
        let mut src = MemSource::new(head);
        assert_eq!(score(&mut src).unwrap(), 150);
    }

    #[test]
    fn verify_channel_lane_stacking() {
        /* two interleaved channels of two 0x8000 blocks each */
        let mut data = Vec::new();
        for block in 0..4u8 {
            let fill = if block % 2 == 0 { 0xa0 } else { 0xb0 } + block / 2;
            data.resize(data.len() + 0x8000, fill);
        }

        let lane =
            open_channel_lane(Box::new(MemSource::new(data)), 0, 0x20000, 1, 2).unwrap();
        let mut lane = lane;

        /* channel 1 sees its two blocks back to back, minus the per-0x10000 padding */
        assert_eq!(lane.byte_len(), 0x10000 - 0x10);
        let mut probe = [0u8; 1];
        lane.read_at(0, &mut probe).unwrap();
        assert_eq!(probe[0], 0xb0);
        lane.read_at(0x8000, &mut probe).unwrap();
        assert_eq!(probe[0], 0xb1);
    }
}
