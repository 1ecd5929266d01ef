// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rockstar AWC ("audio wave container") reader.
//!
//! AWC banks hold either independent sfx streams or one multichannel "music" stream whose
//! channels are interleaved in fixed-size blocks. Each music block begins with a per-channel
//! header table giving that channel's chunk position and size inside the block, which is what
//! the block mapper walks; Vorbis frames inside a chunk are padded to 0x800 and the padding is
//! skipped by the packet framer.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use toccata_core::audio::AudioStream;
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::{read_magic, FormatDescriptor, OpenOptions};
use toccata_core::io::deblock::{BlockMapper, BlockState, DeblockOptions, DeblockSource};
use toccata_core::io::{ByteSource, ReadBytes, SliceSource, SourceReader};

use toccata_codec_pcm::{PcmFormat, PcmStream};
use toccata_codec_vorbis::{VorbisConfig, VorbisStream, VorbisVariant};

const MAX_MUSIC_CHANNELS: usize = 32;

/* stream dictionary codec ids */
const CODEC_PCM16: u8 = 0x01;
const CODEC_VORBIS: u8 = 0x08;

/// The registry descriptor for AWC banks.
pub const AWC_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "awc",
    description: "Rockstar AWC",
    score: score,
    open: open,
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<4>(src)?;
    Ok(match &magic {
        b"ADAT" | b"TADA" => 190,
        _ => 0,
    })
}

/// One stream of the bank's dictionary.
#[derive(Clone, Copy, Debug)]
struct AwcStream {
    offset: u64,
    size: u64,
    channels: usize,
    codec: u8,
    sample_rate: u32,
    num_samples: u32,
    /// Music streams interleave per-channel chunks in blocks of this size.
    block_chunk: u32,
}

struct AwcHeader {
    big_endian: bool,
    streams: Vec<AwcStream>,
    is_music: bool,
}

impl AwcHeader {
    /// Parses the bank dictionary: magic, flags, then a fixed-size entry per stream.
    fn parse(src: &mut dyn ByteSource) -> Result<AwcHeader> {
        let magic = read_magic::<4>(src)?;
        let big_endian = match &magic {
            b"ADAT" => false,
            b"TADA" => true,
            _ => return decode_error("awc: missing ADAT signature"),
        };

        let mut reader = SourceReader::new_at(src, 0x04);
        let read_u32 = |reader: &mut SourceReader<'_>| -> Result<u32> {
            if big_endian {
                reader.read_be_u32()
            }
            else {
                reader.read_u32()
            }
        };

        let flags = read_u32(&mut reader)?;
        let entries = read_u32(&mut reader)? as usize;
        let _header_size = read_u32(&mut reader)?;

        if entries == 0 || entries > 0x1000 {
            return decode_error("awc: invalid entry count");
        }

        let is_music = flags & 0x0000_0001 != 0;

        /* per stream: id, offset, size, then the format word */
        let mut streams = Vec::with_capacity(entries);
        for _ in 0..entries {
            let _id = read_u32(&mut reader)?;
            let offset = u64::from(read_u32(&mut reader)?);
            let size = u64::from(read_u32(&mut reader)?);
            let num_samples = read_u32(&mut reader)?;
            let sample_rate_and_codec = read_u32(&mut reader)?;
            let channels_and_chunk = read_u32(&mut reader)?;

            streams.push(AwcStream {
                offset,
                size,
                num_samples,
                sample_rate: sample_rate_and_codec & 0x00ff_ffff,
                codec: (sample_rate_and_codec >> 24) as u8,
                channels: (channels_and_chunk >> 24) as usize,
                block_chunk: (channels_and_chunk & 0x00ff_ffff) << 8,
            });
        }

        Ok(AwcHeader { big_endian, streams, is_music })
    }
}

/// The music-mode block mapper: each block holds a header table (one entry per channel) and
/// then every channel's chunk, padded up to the block size.
#[derive(Clone)]
struct AwcBlockMapper {
    big_endian: bool,
    codec: u8,
    channel: usize,
    channels: usize,
    chunk_size: u64,
}

impl AwcBlockMapper {
    /// Reads one block's channel table and derives this channel's chunk bounds.
    fn read_block(
        &self,
        src: &mut dyn ByteSource,
        block_offset: u64,
    ) -> Result<(u64, u64)> {
        /* entry sizes per codec family; only the Vorbis/PCM shapes are walked here */
        let channel_entry_size = match self.codec {
            CODEC_VORBIS => 0x18u64,
            _ => 0x10,
        };
        let seek_entry_size = 0x04u64;
        let header_padding = 0x800u64;

        let mut reader = SourceReader::new_at(src, block_offset);
        let read_u32 = |reader: &mut SourceReader<'_>| -> Result<u32> {
            if self.big_endian {
                reader.read_be_u32()
            }
            else {
                reader.read_u32()
            }
        };

        let mut channel_entries = vec![0u64; self.channels];
        for entry in channel_entries.iter_mut() {
            let _start_entry = read_u32(&mut reader)?;
            *entry = u64::from(read_u32(&mut reader)?);
            let _skip = read_u32(&mut reader)?;
            let _samples = read_u32(&mut reader)?;
            reader.ignore_bytes(channel_entry_size - 0x10)?;
        }

        let mut offset = block_offset + channel_entry_size * self.channels as u64;

        /* seek table: one entry per frame of every channel */
        for &entry_count in &channel_entries {
            offset += entry_count * seek_entry_size;
        }

        /* pad the header to its alignment, relative to the block start */
        let header_size = offset - block_offset;
        let aligned = (header_size + header_padding - 1) / header_padding * header_padding;
        offset = block_offset + aligned;

        /* chunks follow per channel in order; frames are 0x800 each */
        let mut chunk_start = 0u64;
        let mut chunk_size = 0u64;
        let mut cursor = offset;
        for (ch, &entry_count) in channel_entries.iter().enumerate() {
            let size = entry_count * 0x800;
            if ch == self.channel {
                chunk_start = cursor - block_offset;
                chunk_size = size;
            }
            cursor += size;
        }

        Ok((chunk_start, chunk_size))
    }
}

impl BlockMapper for AwcBlockMapper {
    fn next_block(&mut self, src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        if state.physical_offset >= src.byte_len() {
            return Ok(());
        }

        let (chunk_start, chunk_size) = self.read_block(src, state.physical_offset)?;

        state.block_size = self.chunk_size;
        state.skip_size = chunk_start;
        state.data_size = chunk_size;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(self.clone())
    }
}

/// Opens one subsong of an AWC bank.
fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    let header = AwcHeader::parse(src.as_mut())?;

    if header.is_music {
        open_music(src, &header, opts)
    }
    else {
        open_sfx(src, &header, opts)
    }
}

/// Music mode: subsong 1 selects the multichannel stream; channels are deblocked lanes of the
/// shared block sequence.
fn open_music(
    src: Box<dyn ByteSource>,
    header: &AwcHeader,
    opts: &OpenOptions,
) -> Result<Box<dyn AudioStream>> {
    if opts.subsong() != 1 {
        return decode_error("awc: subsong out of range");
    }

    let stream =
        header.streams.first().ok_or(toccata_core::errors::Error::DecodeError("awc: empty bank"))?;
    if stream.channels == 0 || stream.channels > MAX_MUSIC_CHANNELS {
        return decode_error("awc: invalid music channel count");
    }

    match stream.codec {
        CODEC_VORBIS => {
            /* per-channel deblock; the decoder sees one logically-contiguous mono lane */
            if stream.channels != 1 {
                // Multichannel music needs one decoder per lane plus a mixer layout; only the
                // mono lane is wired in this build.
                return unsupported_error("awc: multichannel vorbis music");
            }

            let mapper = AwcBlockMapper {
                big_endian: header.big_endian,
                codec: stream.codec,
                channel: 0,
                channels: stream.channels,
                chunk_size: u64::from(stream.block_chunk),
            };
            let opts_deblock = DeblockOptions {
                stream_start: stream.offset,
                stream_size: stream.size,
                ..Default::default()
            };
            let lane = DeblockSource::new(src, Box::new(mapper), opts_deblock)?;

            let cfg = VorbisConfig {
                channels: 1,
                sample_rate: stream.sample_rate,
                setup_offset: 0,
                data_offset: 0,
                num_frames: u64::from(stream.num_samples),
                ..Default::default()
            };
            open_awc_vorbis(Box::new(lane), cfg, opts)
        }
        CODEC_PCM16 => {
            let info = stream_info(header, stream, 1, 1);
            let format = if header.big_endian { PcmFormat::S16Be } else { PcmFormat::S16Le };
            Ok(Box::new(PcmStream::new(src, info, format, stream.offset, stream.size)))
        }
        _ => unsupported_error("awc: unsupported codec"),
    }
}

/// Sfx mode: every dictionary entry is its own subsong.
fn open_sfx(
    src: Box<dyn ByteSource>,
    header: &AwcHeader,
    opts: &OpenOptions,
) -> Result<Box<dyn AudioStream>> {
    let total = header.streams.len() as u32;
    let subsong = opts.subsong();
    if subsong > total {
        return decode_error("awc: subsong out of range");
    }
    let stream = &header.streams[(subsong - 1) as usize];

    match stream.codec {
        CODEC_VORBIS => {
            /* sfx vorbis: the header triad sits at the start of the stream region, audio
             * follows the headers */
            let mut view = src.reopen()?;
            let mut probe = SourceReader::new_at(view.as_mut(), stream.offset);
            let mut header_bytes = 0u64;
            for _ in 0..3 {
                let size = u64::from(probe.read_u32()?);
                header_bytes += 4 + size;
                probe.ignore_bytes(size)?;
            }

            let cfg = VorbisConfig {
                channels: stream.channels.max(1) as u8,
                sample_rate: stream.sample_rate,
                setup_offset: 0,
                data_offset: header_bytes,
                num_frames: u64::from(stream.num_samples),
                ..Default::default()
            };
            let carved = SliceSource::new(src, stream.offset, stream.size);
            open_awc_vorbis(Box::new(carved), cfg, opts)
        }
        CODEC_PCM16 => {
            let info = stream_info(header, stream, subsong, total);
            let format = if header.big_endian { PcmFormat::S16Be } else { PcmFormat::S16Le };
            Ok(Box::new(PcmStream::new(src, info, format, stream.offset, stream.size)))
        }
        _ => unsupported_error("awc: unsupported codec"),
    }
}

fn stream_info(
    _header: &AwcHeader,
    stream: &AwcStream,
    subsong: u32,
    subsong_count: u32,
) -> toccata_core::audio::StreamInfo {
    let mut info = toccata_core::audio::StreamInfo::new(
        stream.channels.max(1),
        stream.sample_rate,
        u64::from(stream.num_samples),
    );
    info.subsong = subsong;
    info.subsong_count = subsong_count;
    info
}

fn open_awc_vorbis(
    src: Box<dyn ByteSource>,
    cfg: VorbisConfig,
    opts: &OpenOptions,
) -> Result<Box<dyn AudioStream>> {
    Ok(Box::new(VorbisStream::try_new(src, VorbisVariant::Awc, cfg, opts)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    /// Builds one music block: channel table, seek table, padding, then per-channel chunks of
    /// `entries[ch]` frames.
    fn build_block(channels: usize, entries: &[u32], fill: u8) -> Vec<u8> {
        let mut block = Vec::new();
        for (ch, &count) in entries.iter().enumerate().take(channels) {
            block.extend_from_slice(&(ch as u32).to_le_bytes()); /* start entry */
            block.extend_from_slice(&count.to_le_bytes());
            block.extend_from_slice(&0u32.to_le_bytes()); /* skip */
            block.extend_from_slice(&(count * 1024).to_le_bytes()); /* samples */
            block.extend_from_slice(&[0u8; 8]); /* vorbis entries are 0x18 */
        }
        for &count in &entries[..channels] {
            block.resize(block.len() + count as usize * 4, 0); /* seek table */
        }
        let aligned = (block.len() + 0x7ff) / 0x800 * 0x800;
        block.resize(aligned, 0);
        for (ch, &count) in entries.iter().enumerate().take(channels) {
            block.resize(block.len() + count as usize * 0x800, fill + ch as u8);
        }
        block
    }

    #[test]
    fn verify_music_block_mapping() {
        let channels = 2;
        let entries = [2u32, 3];
        let block = build_block(channels, &entries, 0x40);
        let chunk_size = block.len() as u64;
        let mut src = MemSource::new(block);

        let mapper = AwcBlockMapper {
            big_endian: false,
            codec: CODEC_VORBIS,
            channel: 1,
            channels,
            chunk_size,
        };

        let (chunk_start, size) = mapper.read_block(&mut src, 0).unwrap();
        /* channel 1's chunk starts after the aligned header plus channel 0's 2 frames */
        assert_eq!(chunk_start, 0x800 + 2 * 0x800);
        assert_eq!(size, 3 * 0x800);

        let mut byte = [0u8; 1];
        src.read_at(chunk_start, &mut byte).unwrap();
        assert_eq!(byte[0], 0x41);
    }

    #[test]
    fn verify_deblocked_lane_is_contiguous() {
        let channels = 2;
        let entries = [1u32, 1];
        let mut data = build_block(channels, &entries, 0x10);
        data.extend_from_slice(&build_block(channels, &entries, 0x20));
        let chunk_size = (data.len() / 2) as u64;

        let mapper = AwcBlockMapper {
            big_endian: false,
            codec: CODEC_VORBIS,
            channel: 0,
            channels,
            chunk_size,
        };
        let mut lane = DeblockSource::new(
            Box::new(MemSource::new(data)),
            Box::new(mapper),
            DeblockOptions::default(),
        )
        .unwrap();

        /* two blocks, one 0x800 frame for channel 0 in each */
        assert_eq!(lane.byte_len(), 2 * 0x800);
        let mut bytes = vec![0u8; 2 * 0x800];
        lane.read_at(0, &mut bytes).unwrap();
        assert!(bytes[..0x800].iter().all(|&b| b == 0x10));
        assert!(bytes[0x800..].iter().all(|&b| b == 0x20));
    }

    #[test]
    fn verify_probe() {
        let mut src = MemSource::new(b"ADAT\x00\x00\x00\x00".to_vec());
        assert_eq!(score(&mut src).unwrap(), 190);
        let mut other = MemSource::new(b"RIFF\x00\x00\x00\x00".to_vec());
        assert_eq!(score(&mut other).unwrap(), 0);
    }
}
