// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CRI HCA decoder.
//!
//! HCA is an MDCT-based perceptual codec used across CRI middleware titles, standalone in
//! `.hca` files and embedded in ACB/AWB banks or KTSR containers. Frames are fixed-size with a
//! 16-bit sync and trailing CRC16; the spectrum is coded with adaptive resolutions plus noise
//! and high-frequency band reconstruction, and streams may be encrypted with a keyed byte
//! substitution.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::excessive_precision)]

use log::debug;

use toccata_core::audio::{AudioStream, LoopPoints, StreamInfo};
use toccata_core::errors::{decode_error, seek_error, Result, SeekErrorKind};
use toccata_core::formats::{read_magic, FormatDescriptor, OpenOptions};
use toccata_core::io::ByteSource;

mod ath;
mod cipher;
mod frame;
mod header;
mod keys;
mod tables;

pub use frame::{FrameDecoder, SAMPLES_PER_FRAME};
pub use header::{HcaHeader, HcaLoop};
pub use keys::{find_key, scramble_subkey, score_key, KNOWN_KEYS};

/// The registry descriptor for standalone `.hca` streams.
pub const HCA_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "hca",
    description: "CRI HCA",
    score: score,
    open: |src, opts| Ok(Box::new(HcaDecoder::try_new(src, opts)?)),
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<4>(src)?;
    let tag = u32::from_be_bytes(magic) & 0x7f7f7f7f;
    Ok(if tag == 0x48434100 { 200 } else { 0 })
}

/// An opened HCA stream.
pub struct HcaDecoder {
    src: Box<dyn ByteSource>,
    header: HcaHeader,
    decoder: FrameDecoder,
    info: StreamInfo,

    /// Count of frames actually backed by the source (pre-fetched banks may truncate).
    usable_frames: u32,
    /// Next frame index to read.
    next_frame: u32,
    /// Scratch for one encoded frame.
    frame_data: Vec<u8>,
    /// One decoded frame of interleaved PCM.
    sample_buffer: Vec<i16>,
    /// Sample frames available in `sample_buffer`.
    buffered: usize,
    /// Sample frames of `sample_buffer` already handed out.
    consumed: usize,
    /// Sample frames to drop before output resumes (encoder delay, seeks).
    to_discard: u64,
    /// Sample frames emitted so far.
    emitted: u64,
    poisoned: bool,
}

impl HcaDecoder {
    /// Opens an HCA stream, resolving the decryption key if needed.
    pub fn try_new(src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<HcaDecoder> {
        HcaDecoder::try_new_subkey(src, opts, 0)
    }

    /// Opens an HCA stream with a container-provided scramble subkey (AWB, KTSR).
    pub fn try_new_subkey(
        mut src: Box<dyn ByteSource>,
        opts: &OpenOptions,
        subkey: u16,
    ) -> Result<HcaDecoder> {
        if opts.subsong() != 1 {
            return decode_error("hca: subsong out of range");
        }

        let probe = read_magic::<8>(src.as_mut())?;
        let (_, header_size) = header::peek_info(&probe)?;

        let mut header_data = vec![0u8; header_size as usize];
        src.read_exact_at(0, &mut header_data)?;
        let header = HcaHeader::parse(&header_data)?;

        let mut decoder = FrameDecoder::new(&header, 0)?;

        // Resolve encryption. A caller-provided keycode wins; otherwise try the known keys.
        if header.ciph_type == 56 {
            let keycode = match opts.keycode {
                Some(key) => {
                    let keycode = keys::scramble_subkey(key, subkey);
                    if keys::score_key(src.as_mut(), &header, &mut decoder, keycode)? < 0 {
                        return Err(toccata_core::errors::Error::KeyRejected);
                    }
                    keycode
                }
                None => {
                    let keycode = keys::find_key(src.as_mut(), &header, &mut decoder, subkey)?;
                    debug!("hca: selected known key {:#018x}", keycode);
                    keycode
                }
            };
            decoder.set_key(header.ciph_type, keycode)?;
            decoder.reset();
        }

        // Pre-fetched banks may hold fewer frames than the header claims.
        let mut usable_frames = header.frame_count;
        let body = src.byte_len().saturating_sub(u64::from(header.header_size));
        if u64::from(usable_frames) * u64::from(header.frame_size) > body {
            usable_frames = (body / u64::from(header.frame_size)) as u32;
            debug!("hca: stream truncated to {} of {} frames", usable_frames, header.frame_count);
        }

        let num_frames = (u64::from(usable_frames) * SAMPLES_PER_FRAME as u64)
            .saturating_sub(u64::from(header.encoder_delay) + u64::from(header.encoder_padding));

        let mut info = StreamInfo::new(header.channels, header.sample_rate, num_frames);
        info.loops = header.loops.map(|l| LoopPoints {
            start: (u64::from(l.start_frame) * SAMPLES_PER_FRAME as u64 + u64::from(l.start_delay))
                .saturating_sub(u64::from(header.encoder_delay)),
            end: (u64::from(l.end_frame) * SAMPLES_PER_FRAME as u64
                + (SAMPLES_PER_FRAME as u64 - u64::from(l.end_padding)))
            .saturating_sub(u64::from(header.encoder_delay)),
        });
        info.name = src.name().map(|n| n.to_string());

        let channels = header.channels;
        let frame_size = header.frame_size as usize;
        let to_discard = u64::from(header.encoder_delay);

        Ok(HcaDecoder {
            src,
            header,
            decoder,
            info,
            usable_frames,
            next_frame: 0,
            frame_data: vec![0; frame_size],
            sample_buffer: vec![0; SAMPLES_PER_FRAME * channels],
            buffered: 0,
            consumed: 0,
            to_discard,
            emitted: 0,
            poisoned: false,
        })
    }

    /// The parsed header, for containers that surface HCA internals.
    pub fn header(&self) -> &HcaHeader {
        &self.header
    }

    /// Reads and decodes the next physical frame into the sample buffer. Returns false at end
    /// of stream.
    fn decode_next_frame(&mut self) -> Result<bool> {
        if self.next_frame >= self.usable_frames {
            return Ok(false);
        }

        let frame_size = self.header.frame_size as usize;
        let offset = u64::from(self.header.header_size)
            + u64::from(self.next_frame) * frame_size as u64;

        self.src.read_exact_at(offset, &mut self.frame_data)?;

        self.decoder.decode_frame(&mut self.frame_data)?;
        self.decoder.read_samples16(&mut self.sample_buffer);

        self.next_frame += 1;
        self.buffered = SAMPLES_PER_FRAME;
        self.consumed = 0;
        Ok(true)
    }
}

impl AudioStream for HcaDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn decode(&mut self, out: &mut [i16]) -> Result<usize> {
        let channels = self.info.channels;
        let max_frames = out.len() / channels;
        let mut done = 0usize;

        while done < max_frames {
            if self.poisoned || self.emitted >= self.info.num_frames {
                break;
            }

            if self.consumed < self.buffered {
                let mut avail = self.buffered - self.consumed;

                // Drop delay/seek samples before handing any out.
                if self.to_discard > 0 {
                    let drop = (self.to_discard as usize).min(avail);
                    self.consumed += drop;
                    self.to_discard -= drop as u64;
                    continue;
                }

                avail = avail
                    .min(max_frames - done)
                    .min((self.info.num_frames - self.emitted) as usize);
                let src_start = self.consumed * channels;
                let dst_start = done * channels;
                out[dst_start..dst_start + avail * channels]
                    .copy_from_slice(&self.sample_buffer[src_start..src_start + avail * channels]);

                self.consumed += avail;
                self.emitted += avail as u64;
                done += avail;
                continue;
            }

            match self.decode_next_frame() {
                Ok(true) => (),
                Ok(false) => break,
                Err(err) => {
                    // A fatal frame error poisons the stream: pad this call with silence and
                    // return what was real.
                    debug!("hca: fatal frame error: {}", err);
                    self.poisoned = true;
                    out[done * channels..max_frames * channels].fill(0);
                    break;
                }
            }
        }

        Ok(done)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if frame > self.info.num_frames {
            return seek_error(SeekErrorKind::OutOfRange);
        }

        // Frame N starts at header_size + N * frame_size, but the IMDCT overlap needs the
        // previous frame, so decode one warm-up frame when landing mid-stream.
        let absolute = frame + u64::from(self.header.encoder_delay);
        let block = absolute / SAMPLES_PER_FRAME as u64;
        let warm_block = block.saturating_sub(1);

        self.decoder.reset();
        self.next_frame = warm_block as u32;
        self.to_discard = absolute - warm_block * SAMPLES_PER_FRAME as u64;
        self.buffered = 0;
        self.consumed = 0;
        self.emitted = frame;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use toccata_core::checksum::crc16_checksum;

    fn push_u16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    /// Builds a checksummed v2.0 header with a `comp` chunk and fixed band layout
    /// (total 128 = base 100 + stereo 28, no HFR).
    pub(crate) fn build_header(
        channels: usize,
        sample_rate: u32,
        frame_count: u32,
        encoder_delay: u16,
        encoder_padding: u16,
        frame_size: u16,
        ciph_type: u16,
    ) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"HCA\0");
        push_u16(&mut out, 0x0200);
        let header_size = 8 + 16 + 16 + if ciph_type != 0 { 6 } else { 0 } + 2;
        push_u16(&mut out, header_size);

        out.extend_from_slice(b"fmt\0");
        out.push(channels as u8);
        out.extend_from_slice(&sample_rate.to_be_bytes()[1..4]);
        push_u32(&mut out, frame_count);
        push_u16(&mut out, encoder_delay);
        push_u16(&mut out, encoder_padding);

        out.extend_from_slice(b"comp");
        push_u16(&mut out, frame_size);
        out.push(1); /* min_resolution */
        out.push(15); /* max_resolution */
        out.push(1); /* track_count */
        out.push(0); /* channel_config */
        out.push(128); /* total_band_count */
        out.push(100); /* base_band_count */
        out.push(28); /* stereo_band_count */
        out.push(0); /* bands_per_hfr_group */
        out.push(0); /* ms_stereo */
        out.push(0); /* reserved */

        if ciph_type != 0 {
            out.extend_from_slice(b"ciph");
            push_u16(&mut out, ciph_type);
        }

        let crc = crc16_checksum(&out);
        push_u16(&mut out, crc);
        assert_eq!(out.len(), header_size as usize);
        out
    }

    /// Builds a checksummed all-silent frame.
    pub(crate) fn build_frame(frame_size: usize) -> Vec<u8> {
        let mut frame = vec![0u8; frame_size];
        frame[0] = 0xff;
        frame[1] = 0xff;
        let crc = crc16_checksum(&frame[..frame_size - 2]);
        frame[frame_size - 2] = (crc >> 8) as u8;
        frame[frame_size - 1] = (crc & 0xff) as u8;
        frame
    }

    /// Builds a whole in-memory stream: header plus `frame_count` silent frames.
    pub(crate) fn build_stream(
        channels: usize,
        sample_rate: u32,
        frame_count: u32,
        encoder_delay: u16,
        encoder_padding: u16,
        frame_size: u16,
    ) -> Vec<u8> {
        let mut data =
            build_header(channels, sample_rate, frame_count, encoder_delay, encoder_padding, frame_size, 0);
        for _ in 0..frame_count {
            data.extend_from_slice(&build_frame(frame_size as usize));
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    fn open_test_stream() -> HcaDecoder {
        // channels=2, rate=48000, delay=128, padding=112, frames=4.
        let data = test_util::build_stream(2, 48000, 4, 128, 112, 0x100);
        let src = Box::new(MemSource::new(data));
        HcaDecoder::try_new(src, &OpenOptions::default()).unwrap()
    }

    #[test]
    fn verify_stream_info() {
        let decoder = open_test_stream();
        let info = decoder.info();
        assert_eq!(info.channels, 2);
        assert_eq!(info.sample_rate, 48000);
        // 4 * 1024 - 128 - 112 sample frames.
        assert_eq!(info.num_frames, 3856);
        assert_eq!(info.subsong_count, 1);
    }

    #[test]
    fn verify_decode_produces_exact_sample_count() {
        let mut decoder = open_test_stream();
        let mut out = vec![0i16; 512 * 2];
        let mut total = 0u64;
        loop {
            let frames = decoder.decode(&mut out).unwrap();
            if frames == 0 {
                break;
            }
            total += frames as u64;
        }
        assert_eq!(total, 3856);
    }

    #[test]
    fn verify_split_decode_matches_single_decode() {
        let mut one = open_test_stream();
        let mut two = open_test_stream();

        let mut whole = vec![0i16; 3856 * 2];
        assert_eq!(one.decode(&mut whole).unwrap(), 3856);

        let mut first = vec![0i16; 1000 * 2];
        let mut second = vec![0i16; 2856 * 2];
        assert_eq!(two.decode(&mut first).unwrap(), 1000);
        assert_eq!(two.decode(&mut second).unwrap(), 2856);

        assert_eq!(whole[..2000], first[..]);
        assert_eq!(whole[2000..], second[..]);
    }

    #[test]
    fn verify_seek_restarts_consistently(){
        let mut reference = open_test_stream();
        let mut out_ref = vec![0i16; 3856 * 2];
        reference.decode(&mut out_ref).unwrap();

        let mut seeked = open_test_stream();
        let mut skip = vec![0i16; 100 * 2];
        seeked.decode(&mut skip).unwrap();
        seeked.seek(2000).unwrap();

        let mut out = vec![0i16; 500 * 2];
        assert_eq!(seeked.decode(&mut out).unwrap(), 500);
        assert_eq!(out[..], out_ref[2000 * 2..2500 * 2]);
    }

    #[test]
    fn verify_probe_score() {
        let data = test_util::build_stream(2, 48000, 1, 0, 0, 0x100);
        let mut src = MemSource::new(data);
        assert_eq!(score(&mut src).unwrap(), 200);

        let mut other = MemSource::new(b"RIFFxxxx".to_vec());
        assert_eq!(score(&mut other).unwrap(), 0);
    }
}
