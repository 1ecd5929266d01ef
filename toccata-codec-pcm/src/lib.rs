// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw PCM reader.
//!
//! Containers whose payload is plain interleaved PCM hand the carved byte range here. Output
//! is always signed 16-bit host-order; 8-bit sources are widened.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use toccata_core::audio::{AudioStream, StreamInfo};
use toccata_core::errors::{seek_error, Result, SeekErrorKind};
use toccata_core::io::ByteSource;

/// Sample layouts the reader understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmFormat {
    S16Le,
    S16Be,
    U8,
    S8,
}

impl PcmFormat {
    fn bytes_per_sample(self) -> usize {
        match self {
            PcmFormat::S16Le | PcmFormat::S16Be => 2,
            PcmFormat::U8 | PcmFormat::S8 => 1,
        }
    }
}

/// A PCM stream over a byte range of a source.
pub struct PcmStream {
    src: Box<dyn ByteSource>,
    info: StreamInfo,
    format: PcmFormat,
    start: u64,
    size: u64,
    /// Next sample frame to produce.
    position: u64,
}

impl PcmStream {
    /// Instantiates a reader over `[start, start + size)`. When the info's frame count is
    /// zero it is derived from the byte range.
    pub fn new(
        src: Box<dyn ByteSource>,
        mut info: StreamInfo,
        format: PcmFormat,
        start: u64,
        size: u64,
    ) -> PcmStream {
        let size = size.min(src.byte_len().saturating_sub(start));
        let frame_bytes = (format.bytes_per_sample() * info.channels) as u64;
        if info.num_frames == 0 && frame_bytes > 0 {
            info.num_frames = size / frame_bytes;
        }
        PcmStream { src, info, format, start, size, position: 0 }
    }
}

impl AudioStream for PcmStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn decode(&mut self, out: &mut [i16]) -> Result<usize> {
        let channels = self.info.channels;
        let frame_bytes = (self.format.bytes_per_sample() * channels) as u64;
        let in_range = (self.size / frame_bytes).saturating_sub(self.position);
        let frames_left = self.info.num_frames.saturating_sub(self.position).min(in_range);
        let max_frames = ((out.len() / channels) as u64).min(frames_left);
        if max_frames == 0 {
            return Ok(0);
        }

        let byte_len = (max_frames * frame_bytes) as usize;
        let mut raw = vec![0u8; byte_len];
        let offset = self.start + self.position * frame_bytes;
        let got = self.src.read_at(offset, &mut raw)?;
        let frames = got as u64 / frame_bytes;
        let samples = frames as usize * channels;

        match self.format {
            PcmFormat::S16Le => {
                for (i, pair) in raw.chunks_exact(2).take(samples).enumerate() {
                    out[i] = i16::from_le_bytes([pair[0], pair[1]]);
                }
            }
            PcmFormat::S16Be => {
                for (i, pair) in raw.chunks_exact(2).take(samples).enumerate() {
                    out[i] = i16::from_be_bytes([pair[0], pair[1]]);
                }
            }
            PcmFormat::U8 => {
                for (i, &byte) in raw.iter().take(samples).enumerate() {
                    out[i] = (i16::from(byte) - 0x80) << 8;
                }
            }
            PcmFormat::S8 => {
                for (i, &byte) in raw.iter().take(samples).enumerate() {
                    out[i] = i16::from(byte as i8) << 8;
                }
            }
        }

        self.position += frames;
        Ok(frames as usize)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if frame > self.info.num_frames {
            return seek_error(SeekErrorKind::OutOfRange);
        }
        self.position = frame;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_s16le_stereo() {
        let mut data = Vec::new();
        for v in [100i16, -100, 200, -200, 300, -300] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let src = Box::new(MemSource::new(data));
        let info = StreamInfo::new(2, 44100, 0);
        let mut stream = PcmStream::new(src, info, PcmFormat::S16Le, 0, u64::MAX);

        assert_eq!(stream.info().num_frames, 3);
        let mut out = [0i16; 6];
        assert_eq!(stream.decode(&mut out).unwrap(), 3);
        assert_eq!(out, [100, -100, 200, -200, 300, -300]);
        assert_eq!(stream.decode(&mut out).unwrap(), 0);
    }

    #[test]
    fn verify_s16be_and_seek() {
        let mut data = Vec::new();
        for v in [1i16, 2, 3, 4] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let src = Box::new(MemSource::new(data));
        let info = StreamInfo::new(1, 22050, 0);
        let mut stream = PcmStream::new(src, info, PcmFormat::S16Be, 0, u64::MAX);

        stream.seek(2).unwrap();
        let mut out = [0i16; 4];
        assert_eq!(stream.decode(&mut out).unwrap(), 2);
        assert_eq!(&out[..2], &[3, 4]);
    }

    #[test]
    fn verify_u8_widening() {
        let src = Box::new(MemSource::new(vec![0x80, 0x00, 0xff]));
        let info = StreamInfo::new(1, 8000, 0);
        let mut stream = PcmStream::new(src, info, PcmFormat::U8, 0, u64::MAX);

        let mut out = [0i16; 3];
        assert_eq!(stream.decode(&mut out).unwrap(), 3);
        assert_eq!(out, [0, -32768, 32512]);
    }
}
