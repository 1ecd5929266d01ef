// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Electronic Arts MPF+MUS paired banks (the PathFinder interactive-music tool).
//!
//! The `.mpf` index ("PFDx", big-endian) lists playback nodes and, in its sample section, the
//! offsets of the actual streams inside the paired `.mus` bank. Each stream is an `SCHl`
//! block: a `PT` platform header of one-byte-tagged variable-width fields, then `SCDl` data
//! blocks up to the closing `SCEl`. MicroTalk and PCM payloads decode in-tree.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use log::debug;

use toccata_core::audio::{AudioStream, LoopPoints, StreamInfo};
use toccata_core::conv::clamp16;
use toccata_core::errors::{decode_error, seek_error, unsupported_error, Result, SeekErrorKind};
use toccata_core::formats::{read_magic, CompanionRole, FormatDescriptor, OpenOptions};
use toccata_core::io::deblock::{DeblockOptions, DeblockSource};
use toccata_core::io::{ByteSource, ReadBytes, SourceReader};

use toccata_codec_pcm::{PcmFormat, PcmStream};
use toccata_codec_utk::UtkDecoder;

mod schl;

use schl::{SchlBlockMapper, SchlHeader, CODEC_MICROTALK, CODEC_PCM16_LE};

/// The registry descriptor for MPF indexes (the MUS bank arrives as a companion).
pub const EA_MPF_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "ea-mpf",
    description: "Electronic Arts MPF+MUS",
    score: score,
    open: open,
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<5>(src)?;
    Ok(if &magic[..4] == b"PFDx" && magic[4] <= 1 { 180 } else { 0 })
}

/// Walks the v0/v1 index: node and event sections precede the sample-offset table.
fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    let mut reader = SourceReader::new(src.as_mut());

    let mut magic = [0u8; 4];
    reader.read_buf_exact(&mut magic)?;
    if &magic != b"PFDx" {
        return decode_error("ea: missing PFDx signature");
    }

    /* 04: version, 05: starting node, 06: nodes, 07: events, 0b: sections */
    let version = reader.read_u8()?;
    if version > 1 {
        return unsupported_error("ea: unknown index version");
    }
    let _start_node = reader.read_u8()?;
    let num_sounds = u32::from(reader.read_u8()?);
    let num_events = u64::from(reader.read_u8()?);
    reader.ignore_bytes(3)?;
    let num_sections = u64::from(reader.read_u8()?);

    let mut section_offset = 0x0cu64;
    section_offset += u64::from(num_sounds) * 0x1c; /* nodes */
    section_offset += num_events * num_sections; /* events */

    let subsong = opts.subsong();
    if num_sounds == 0 || subsong > num_sounds {
        return decode_error("ea: subsong out of range");
    }

    reader.seek_to(section_offset + u64::from(subsong - 1) * 0x04);
    let schl_offset = u64::from(reader.read_be_u32()?);

    let mut mus = opts.companion(CompanionRole::Paired)?;
    let header = SchlHeader::parse(mus.as_mut(), schl_offset)?;
    debug!("ea: subsong {} at {:#x} codec {:#x}", subsong, schl_offset, header.codec);

    let mut info = StreamInfo::new(
        header.channels.max(1),
        header.sample_rate,
        u64::from(header.num_samples),
    );
    info.subsong = subsong;
    info.subsong_count = num_sounds;
    info.name = mus.name().map(|n| n.to_string());
    if let (Some(start), Some(end)) = (header.loop_start, header.loop_end) {
        info.loops = Some(LoopPoints { start: u64::from(start), end: u64::from(end) });
    }

    /* deblock the SCDl payload into a contiguous stream */
    let mapper = SchlBlockMapper { channels: header.channels.max(1) };
    let deblock_opts = DeblockOptions {
        stream_start: header.data_offset,
        ..Default::default()
    };
    let payload = DeblockSource::new(mus, Box::new(mapper), deblock_opts)?;

    match header.codec {
        CODEC_MICROTALK => {
            if header.channels > 1 {
                return unsupported_error("ea: multichannel microtalk");
            }
            Ok(Box::new(UtkStream::new(Box::new(payload), info)))
        }
        CODEC_PCM16_LE => {
            let len = payload.byte_len();
            Ok(Box::new(PcmStream::new(Box::new(payload), info, PcmFormat::S16Le, 0, len)))
        }
        _ => unsupported_error("ea: unsupported stream codec"),
    }
}

/// A MicroTalk stream pulled frame-by-frame out of a deblocked payload.
pub struct UtkStream {
    decoder: UtkDecoder,
    info: StreamInfo,
    frame: [i16; toccata_codec_utk::SAMPLES_PER_FRAME],
    buffered: usize,
    consumed: usize,
    to_discard: u64,
    emitted: u64,
    poisoned: bool,
}

impl UtkStream {
    pub fn new(src: Box<dyn ByteSource>, info: StreamInfo) -> UtkStream {
        UtkStream {
            decoder: UtkDecoder::new(src),
            info,
            frame: [0; toccata_codec_utk::SAMPLES_PER_FRAME],
            buffered: 0,
            consumed: 0,
            to_discard: 0,
            emitted: 0,
            poisoned: false,
        }
    }

    fn decode_next_frame(&mut self) -> Result<()> {
        self.decoder.decode_frame()?;
        for (out, &sample) in self.frame.iter_mut().zip(self.decoder.frame()) {
            *out = clamp16(sample as i32);
        }
        self.buffered = toccata_codec_utk::SAMPLES_PER_FRAME;
        self.consumed = 0;
        Ok(())
    }
}

impl AudioStream for UtkStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn decode(&mut self, out: &mut [i16]) -> Result<usize> {
        let mut done = 0usize;

        while done < out.len() {
            if self.poisoned || self.emitted >= self.info.num_frames {
                break;
            }

            if self.consumed < self.buffered {
                let mut avail = self.buffered - self.consumed;

                if self.to_discard > 0 {
                    let drop = (self.to_discard as usize).min(avail);
                    self.consumed += drop;
                    self.to_discard -= drop as u64;
                    continue;
                }

                avail = avail
                    .min(out.len() - done)
                    .min((self.info.num_frames - self.emitted) as usize);
                out[done..done + avail]
                    .copy_from_slice(&self.frame[self.consumed..self.consumed + avail]);
                self.consumed += avail;
                self.emitted += avail as u64;
                done += avail;
                continue;
            }

            if let Err(err) = self.decode_next_frame() {
                debug!("ea: fatal microtalk error: {}", err);
                self.poisoned = true;
                out[done..].fill(0);
                break;
            }
        }

        Ok(done)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if frame > self.info.num_frames {
            return seek_error(SeekErrorKind::OutOfRange);
        }

        self.decoder.reset();
        self.decoder.set_position(0);
        self.buffered = 0;
        self.consumed = 0;
        self.to_discard = frame;
        self.emitted = frame;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_probe() {
        let mut src = MemSource::new(b"PFDx\x01\x00\x00\x00".to_vec());
        assert_eq!(score(&mut src).unwrap(), 180);
        let mut bad = MemSource::new(b"PFDx\x05\x00\x00\x00".to_vec());
        assert_eq!(score(&mut bad).unwrap(), 0);
    }

    #[test]
    fn verify_missing_companion_reported() {
        /* index with one sound and no events: the sample table lands at 0x0c + 0x1c */
        let mut data = vec![0u8; 0x2c];
        data[0..4].copy_from_slice(b"PFDx");
        data[4] = 1;
        data[6] = 1; /* sounds */
        data[0x28..0x2c].copy_from_slice(&0u32.to_be_bytes());

        let result = open(Box::new(MemSource::new(data)), &OpenOptions::default());
        assert!(matches!(
            result,
            Err(toccata_core::errors::Error::MissingCompanion(_))
        ));
    }
}
