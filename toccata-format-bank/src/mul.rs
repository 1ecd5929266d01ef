// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crystal Dynamics `.mul` (Legacy of Kain, Tomb Raider).
//!
//! An unsigned header (sample rate, loop start, samples, channels) precedes typed blocks:
//! header blocks of 0x10, audio sub-blocks tagged 0x800 whose second word selects the track,
//! and non-audio blocks skipped whole. Endianness is guessed from the sample-rate word. The
//! payloads are platform ADPCM codecs, so streams are located and deblocked but surface as
//! unsupported.

use toccata_core::audio::{AudioStream, LoopPoints, StreamInfo};
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::{read_magic, FormatDescriptor, OpenOptions};
use toccata_core::io::deblock::{BlockMapper, BlockState, DeblockOptions, DeblockSource};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

pub const MUL_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "mul",
    description: "Crystal Dynamics MUL",
    score: score,
    open: open,
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    /* no magic: a plausible sample rate in either endianness plus zero padding at 0x10 */
    let head = read_magic::<0x20>(src)?;
    let le = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let be = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let rate_ok = (8000..=48000).contains(&le) || (8000..=48000).contains(&be);
    let zeros = head[0x10..0x20].iter().all(|&b| b == 0);
    Ok(if rate_ok && zeros { 40 } else { 0 })
}

/// The block walk: per-track 0x800 audio sub-blocks behind 0x10 headers.
#[derive(Clone)]
pub(crate) struct MulBlockMapper {
    pub big_endian: bool,
    pub track: u32,
}

impl BlockMapper for MulBlockMapper {
    fn next_block(&mut self, src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        /* the first 0x800 of the file is the bank header */
        if state.physical_offset == 0 {
            state.block_size = 0x800;
            state.data_size = 0;
            state.skip_size = 0;
            return Ok(());
        }

        let mut reader = SourceReader::new_at(src, state.physical_offset);
        let (block_type, block_size) = if self.big_endian {
            (reader.read_be_u32()?, u64::from(reader.read_be_u32()?))
        }
        else {
            (reader.read_u32()?, u64::from(reader.read_u32()?))
        };

        if block_type == 0 && block_size != 0 {
            /* header block */
            state.block_size = 0x10;
            state.data_size = 0;
            state.skip_size = 0;
        }
        else if block_type == 0x0000_0800 {
            /* audio sub-block: the size word doubles as the track number */
            state.block_size = 0x810;
            if block_size == u64::from(self.track) {
                state.data_size = 0x800;
                state.skip_size = 0x10;
            }
            else {
                state.data_size = 0;
                state.skip_size = 0;
            }
        }
        else {
            /* non-audio block */
            state.block_size = block_size + 0x10;
            state.data_size = 0;
            state.skip_size = 0;
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(self.clone())
    }
}

fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    if opts.subsong() != 1 {
        return decode_error("mul: subsong out of range");
    }

    let head = read_magic::<0x10>(src.as_mut())?;
    let le_rate = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let big_endian = !(8000..=48000).contains(&le_rate);

    let mut reader = SourceReader::new(src.as_mut());
    let mut read_u32 = |reader: &mut SourceReader<'_>| -> Result<u32> {
        if big_endian {
            reader.read_be_u32()
        }
        else {
            reader.read_u32()
        }
    };

    let sample_rate = read_u32(&mut reader)?;
    let loop_start = read_u32(&mut reader)?;
    let num_samples = u64::from(read_u32(&mut reader)?);
    let channels = read_u32(&mut reader)? as usize;

    if sample_rate < 8000 || sample_rate > 48000 || channels == 0 || channels > 8 {
        return decode_error("mul: invalid header");
    }

    let mut info = StreamInfo::new(channels, sample_rate, num_samples);
    if loop_start != u32::MAX {
        info.loops = Some(LoopPoints { start: u64::from(loop_start), end: num_samples });
    }
    info.name = src.name().map(|n| n.to_string());

    /* reassemble track 0 to validate the walk; the payloads themselves are platform ADPCM */
    let mapper = MulBlockMapper { big_endian, track: 0 };
    let _audio = DeblockSource::new(src, Box::new(mapper), DeblockOptions::default())?;

    unsupported_error("mul: platform adpcm payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_track_deblock() {
        let mut data = vec![0u8; 0x800];
        data[0..4].copy_from_slice(&44100u32.to_le_bytes());

        /* track 0 block, track 1 block, non-audio block, track 0 block */
        for (track, fill) in [(0u32, 0x11u8), (1, 0x22)] {
            data.extend_from_slice(&0x800u32.to_le_bytes());
            data.extend_from_slice(&track.to_le_bytes());
            data.extend_from_slice(&[0u8; 8]);
            data.resize(data.len() + 0x800, fill);
        }
        data.extend_from_slice(&0x1234u32.to_le_bytes()); /* non-audio type */
        data.extend_from_slice(&0x20u32.to_le_bytes());
        data.resize(data.len() + 0x28, 0);
        data.extend_from_slice(&0x800u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 8]);
        data.resize(data.len() + 0x800, 0x33);

        let mapper = MulBlockMapper { big_endian: false, track: 0 };
        let mut lane = DeblockSource::new(
            Box::new(MemSource::new(data)),
            Box::new(mapper),
            DeblockOptions::default(),
        )
        .unwrap();

        assert_eq!(lane.byte_len(), 0x1000);
        let mut bytes = vec![0u8; 0x1000];
        lane.read_at(0, &mut bytes).unwrap();
        assert!(bytes[..0x800].iter().all(|&b| b == 0x11));
        assert!(bytes[0x800..].iter().all(|&b| b == 0x33));
    }

    #[test]
    fn verify_probe_accepts_both_endiannesses() {
        let mut head = vec![0u8; 0x20];
        head[0..4].copy_from_slice(&32000u32.to_be_bytes());
        let mut src = MemSource::new(head);
        assert!(score(&mut src).unwrap() > 0);
    }
}
