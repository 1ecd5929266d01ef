// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Header parsing.
//!
//! An HCA header is a sequence of 4-byte-tagged chunks in fixed order: `HCA\0`, `fmt\0`, one of
//! `comp`/`dec\0`, then optional `vbr\0`, `ath\0`, `loop`, `ciph`, `rva\0`, `comm`, `pad\0`.
//! Tags may have their high bits set when the stream is encrypted, so they are matched under a
//! `0x7F7F7F7F` mask. The CRC16 over the whole header, trailing checksum included, is zero.

use toccata_core::checksum::crc16_checksum;
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::io::{BufReader, ReadBytes};

pub const HCA_VERSION_V101: u32 = 0x0101;
pub const HCA_VERSION_V102: u32 = 0x0102;
pub const HCA_VERSION_V103: u32 = 0x0103;
pub const HCA_VERSION_V200: u32 = 0x0200;
pub const HCA_VERSION_V300: u32 = 0x0300;

pub const MIN_FRAME_SIZE: u32 = 0x8;
pub const MAX_FRAME_SIZE: u32 = 0xffff;
pub const MAX_CHANNELS: usize = 16;
pub const MAX_SAMPLE_RATE: u32 = 0x7f_ffff;

/// Chunk tags are matched with the high bit of each byte stripped.
const TAG_MASK: u32 = 0x7f7f7f7f;

/// How a channel participates in joint stereo.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelType {
    #[default]
    Discrete,
    StereoPrimary,
    StereoSecondary,
}

/// Loop points in frame/sample units, straight from the `loop` chunk.
#[derive(Clone, Copy, Debug)]
pub struct HcaLoop {
    pub start_frame: u32,
    pub end_frame: u32,
    pub start_delay: u32,
    pub end_padding: u32,
}

/// Parsed HCA header state.
#[derive(Clone, Debug, Default)]
pub struct HcaHeader {
    pub version: u32,
    pub header_size: u32,
    /* fmt */
    pub channels: usize,
    pub sample_rate: u32,
    pub frame_count: u32,
    pub encoder_delay: u32,
    pub encoder_padding: u32,
    /* comp/dec */
    pub frame_size: u32,
    pub min_resolution: u32,
    pub max_resolution: u32,
    pub track_count: u32,
    pub channel_config: u32,
    pub total_band_count: u32,
    pub base_band_count: u32,
    pub stereo_band_count: u32,
    pub bands_per_hfr_group: u32,
    pub ms_stereo: bool,
    /* vbr */
    pub vbr_max_frame_size: u32,
    pub vbr_noise_level: u32,
    /* ath */
    pub ath_type: u32,
    /* loop */
    pub loops: Option<HcaLoop>,
    /* ciph */
    pub ciph_type: u32,
    /* rva (pre-applied by the encoder, retained for information only) */
    pub rva_volume: f32,
    /* comm */
    pub comment: Option<String>,
    /* derived */
    pub hfr_group_count: u32,
}

fn ceil_div(a: u32, b: u32) -> u32 {
    if b < 1 {
        return 0;
    }
    a / b + u32::from(a % b != 0)
}

/// Peeks the masked tag at the reader's position without consuming it.
fn peek_tag(data: &[u8], reader: &BufReader<'_>) -> u32 {
    let pos = reader.pos() as usize;
    if pos + 4 > data.len() {
        return 0;
    }
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) & TAG_MASK
}

/// Reads the `HCA\0` chunk of a header prefix and returns `(version, header_size)`. Used by
/// containers to size the full header read.
pub fn peek_info(probe: &[u8]) -> Result<(u32, u32)> {
    if probe.len() < 8 {
        return decode_error("hca: header too small");
    }
    if u32::from_be_bytes([probe[0], probe[1], probe[2], probe[3]]) & TAG_MASK != 0x48434100 {
        return decode_error("hca: missing HCA signature");
    }
    let version = u32::from(u16::from_be_bytes([probe[4], probe[5]]));
    let header_size = u32::from(u16::from_be_bytes([probe[6], probe[7]]));
    Ok((version, header_size))
}

impl HcaHeader {
    /// Parses and validates a complete header.
    pub fn parse(data: &[u8]) -> Result<HcaHeader> {
        let mut hca = HcaHeader::default();
        let mut reader = BufReader::new(data);

        /* base header */
        if peek_tag(data, &reader) != 0x48434100 {
            /* "HCA\0" */
            return decode_error("hca: missing HCA signature");
        }
        reader.ignore_bytes(4)?;
        hca.version = u32::from(reader.read_be_u16()?);
        hca.header_size = u32::from(reader.read_be_u16()?);

        match hca.version {
            HCA_VERSION_V101 | HCA_VERSION_V102 | HCA_VERSION_V103 | HCA_VERSION_V200
            | HCA_VERSION_V300 => (),
            _ => return unsupported_error("hca: unknown version"),
        }

        if (data.len() as u32) < hca.header_size {
            return decode_error("hca: header truncated");
        }
        if crc16_checksum(&data[..hca.header_size as usize]) != 0 {
            return decode_error("hca: header checksum mismatch");
        }

        let mut size = hca.header_size - 0x08;

        /* format info */
        if size >= 0x10 && peek_tag(data, &reader) == 0x666d7400 {
            /* "fmt\0" */
            reader.ignore_bytes(4)?;
            hca.channels = usize::from(reader.read_u8()?);
            hca.sample_rate = reader.read_be_u24()?;
            hca.frame_count = reader.read_be_u32()?;
            hca.encoder_delay = u32::from(reader.read_be_u16()?);
            hca.encoder_padding = u32::from(reader.read_be_u16()?);

            if hca.channels < 1 || hca.channels > MAX_CHANNELS {
                return decode_error("hca: invalid channel count");
            }
            if hca.frame_count == 0 {
                return decode_error("hca: no frames");
            }
            if hca.sample_rate < 1 || hca.sample_rate > MAX_SAMPLE_RATE {
                return decode_error("hca: invalid sample rate");
            }

            size -= 0x10;
        }
        else {
            return decode_error("hca: missing fmt chunk");
        }

        /* compression (v2.0) or decode (v1.x) info */
        if size >= 0x10 && peek_tag(data, &reader) == 0x636f6d70 {
            /* "comp" */
            reader.ignore_bytes(4)?;
            hca.frame_size = u32::from(reader.read_be_u16()?);
            hca.min_resolution = u32::from(reader.read_u8()?);
            hca.max_resolution = u32::from(reader.read_u8()?);
            hca.track_count = u32::from(reader.read_u8()?);
            hca.channel_config = u32::from(reader.read_u8()?);
            hca.total_band_count = u32::from(reader.read_u8()?);
            hca.base_band_count = u32::from(reader.read_u8()?);
            hca.stereo_band_count = u32::from(reader.read_u8()?);
            hca.bands_per_hfr_group = u32::from(reader.read_u8()?);
            hca.ms_stereo = reader.read_u8()? != 0;
            let _reserved = reader.read_u8()?;

            size -= 0x10;
        }
        else if size >= 0x0c && peek_tag(data, &reader) == 0x64656300 {
            /* "dec\0" */
            reader.ignore_bytes(4)?;
            hca.frame_size = u32::from(reader.read_be_u16()?);
            hca.min_resolution = u32::from(reader.read_u8()?);
            hca.max_resolution = u32::from(reader.read_u8()?);
            hca.total_band_count = u32::from(reader.read_u8()?) + 1;
            hca.base_band_count = u32::from(reader.read_u8()?) + 1;
            let track_and_config = reader.read_u8()?;
            hca.track_count = u32::from(track_and_config >> 4);
            hca.channel_config = u32::from(track_and_config & 0xf);
            let stereo_type = reader.read_u8()?;

            if stereo_type == 0 {
                hca.base_band_count = hca.total_band_count;
            }
            hca.stereo_band_count = hca.total_band_count - hca.base_band_count;
            hca.bands_per_hfr_group = 0;

            size -= 0x0c;
        }
        else {
            return decode_error("hca: missing comp/dec chunk");
        }

        /* VBR (variable bit rate) info */
        if size >= 0x08 && peek_tag(data, &reader) == 0x76627200 {
            /* "vbr\0" */
            reader.ignore_bytes(4)?;
            hca.vbr_max_frame_size = u32::from(reader.read_be_u16()?);
            hca.vbr_noise_level = u32::from(reader.read_be_u16()?);

            if !(hca.frame_size == 0
                && hca.vbr_max_frame_size > 8
                && hca.vbr_max_frame_size <= 0x1ff)
            {
                return decode_error("hca: invalid vbr chunk");
            }

            size -= 0x08;
        }

        /* ATH info (removed in v2.0, with a default in v1.x) */
        if size >= 0x06 && peek_tag(data, &reader) == 0x61746800 {
            /* "ath\0" */
            reader.ignore_bytes(4)?;
            hca.ath_type = u32::from(reader.read_be_u16()?);
            size -= 0x06;
        }
        else {
            hca.ath_type = u32::from(hca.version < HCA_VERSION_V200);
        }

        /* loop info */
        if size >= 0x10 && peek_tag(data, &reader) == 0x6c6f6f70 {
            /* "loop" */
            reader.ignore_bytes(4)?;
            let loops = HcaLoop {
                start_frame: reader.read_be_u32()?,
                end_frame: reader.read_be_u32()?,
                start_delay: u32::from(reader.read_be_u16()?),
                end_padding: u32::from(reader.read_be_u16()?),
            };

            if !(loops.start_frame <= loops.end_frame && loops.end_frame < hca.frame_count) {
                return decode_error("hca: invalid loop frames");
            }

            hca.loops = Some(loops);
            size -= 0x10;
        }

        /* cipher info */
        if size >= 0x06 && peek_tag(data, &reader) == 0x63697068 {
            /* "ciph" */
            reader.ignore_bytes(4)?;
            hca.ciph_type = u32::from(reader.read_be_u16()?);

            if !(hca.ciph_type == 0 || hca.ciph_type == 1 || hca.ciph_type == 56) {
                return decode_error("hca: invalid cipher type");
            }

            size -= 0x06;
        }

        /* RVA (relative volume adjustment) info */
        if size >= 0x08 && peek_tag(data, &reader) == 0x72766100 {
            /* "rva\0" */
            reader.ignore_bytes(4)?;
            hca.rva_volume = f32::from_bits(reader.read_be_u32()?);
            size -= 0x08;
        }
        else {
            hca.rva_volume = 1.0;
        }

        /* comment */
        if size >= 0x05 && peek_tag(data, &reader) == 0x636f6d6d {
            /* "comm" */
            reader.ignore_bytes(4)?;
            let len = usize::from(reader.read_u8()?);

            if len as u32 > size {
                return decode_error("hca: invalid comment length");
            }

            let bytes = reader.read_boxed_slice_exact(len)?;
            let text: String =
                bytes.iter().take_while(|&&b| b != 0).map(|&b| char::from(b)).collect();
            if !text.is_empty() {
                hca.comment = Some(text);
            }
        }

        /* "pad\0" fills the rest of the header up-to the checksum, nothing to read */

        /* extra validations */
        if hca.frame_size < MIN_FRAME_SIZE || hca.frame_size > MAX_FRAME_SIZE {
            return decode_error("hca: invalid frame size");
        }

        if hca.version <= HCA_VERSION_V200 {
            if hca.min_resolution != 1 || hca.max_resolution != 15 {
                return decode_error("hca: invalid resolution range");
            }
        }
        else if hca.min_resolution > hca.max_resolution || hca.max_resolution > 15 {
            return decode_error("hca: invalid resolution range");
        }

        // Old encoders may write a zero track count.
        if hca.track_count == 0 {
            hca.track_count = 1;
        }
        if hca.track_count > hca.channels as u32 {
            return decode_error("hca: more tracks than channels");
        }

        let bands = 128u32;
        if hca.total_band_count > bands
            || hca.base_band_count > bands
            || hca.stereo_band_count > bands
            || hca.base_band_count + hca.stereo_band_count > bands
            || hca.bands_per_hfr_group > bands
        {
            return decode_error("hca: invalid band counts");
        }

        hca.hfr_group_count = ceil_div(
            hca.total_band_count - hca.base_band_count - hca.stereo_band_count,
            hca.bands_per_hfr_group,
        );

        if hca.ms_stereo && hca.version < HCA_VERSION_V300 {
            return unsupported_error("hca: ms stereo in pre-v3 stream");
        }

        Ok(hca)
    }

    /// Derives the per-channel joint-stereo roles from the track layout. Channels are split
    /// evenly among tracks; within a track the stereo pairs follow a fixed map per
    /// channels-per-track count.
    pub fn channel_types(&self) -> [ChannelType; MAX_CHANNELS] {
        use ChannelType::{Discrete, StereoPrimary, StereoSecondary};

        let mut types = [Discrete; MAX_CHANNELS];
        let per_track = self.channels / self.track_count as usize;

        if self.stereo_band_count == 0 || per_track <= 1 {
            return types;
        }

        for track in 0..self.track_count as usize {
            let ct = &mut types[track * per_track..];
            match per_track {
                2 => {
                    ct[0] = StereoPrimary;
                    ct[1] = StereoSecondary;
                }
                3 => {
                    ct[0] = StereoPrimary;
                    ct[1] = StereoSecondary;
                    ct[2] = Discrete;
                }
                4 => {
                    ct[0] = StereoPrimary;
                    ct[1] = StereoSecondary;
                    if self.channel_config == 0 {
                        ct[2] = StereoPrimary;
                        ct[3] = StereoSecondary;
                    }
                }
                5 => {
                    ct[0] = StereoPrimary;
                    ct[1] = StereoSecondary;
                    ct[2] = Discrete;
                    if self.channel_config <= 2 {
                        ct[3] = StereoPrimary;
                        ct[4] = StereoSecondary;
                    }
                }
                6 | 7 => {
                    ct[0] = StereoPrimary;
                    ct[1] = StereoSecondary;
                    ct[4] = StereoPrimary;
                    ct[5] = StereoSecondary;
                }
                8 => {
                    ct[0] = StereoPrimary;
                    ct[1] = StereoSecondary;
                    ct[4] = StereoPrimary;
                    ct[5] = StereoSecondary;
                    ct[6] = StereoPrimary;
                    ct[7] = StereoSecondary;
                }
                _ => (),
            }
        }

        types
    }

    /// Coded coefficients per channel: secondary stereo channels carry only the base bands.
    pub fn coded_count(&self, ctype: ChannelType) -> usize {
        match ctype {
            ChannelType::StereoSecondary => self.base_band_count as usize,
            _ => (self.base_band_count + self.stereo_band_count) as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::build_header;

    #[test]
    fn verify_minimal_header_roundtrip() {
        let data = build_header(2, 48000, 4, 128, 112, 0x2c0, 0);
        let hca = HcaHeader::parse(&data).unwrap();

        assert_eq!(hca.version, HCA_VERSION_V200);
        assert_eq!(hca.channels, 2);
        assert_eq!(hca.sample_rate, 48000);
        assert_eq!(hca.frame_count, 4);
        assert_eq!(hca.encoder_delay, 128);
        assert_eq!(hca.encoder_padding, 112);
        assert_eq!(hca.frame_size, 0x2c0);
        assert_eq!(hca.ciph_type, 0);
        assert!(hca.loops.is_none());
    }

    #[test]
    fn verify_corrupt_checksum_rejected() {
        let mut data = build_header(2, 48000, 4, 128, 112, 0x2c0, 0);
        data[9] ^= 0x01;
        assert!(matches!(
            HcaHeader::parse(&data),
            Err(toccata_core::errors::Error::DecodeError(msg)) if msg.contains("checksum")
        ));
    }

    #[test]
    fn verify_masked_tags_accepted() {
        // Encrypted streams set the high bit of tag bytes; the parser masks it away.
        let mut data = build_header(2, 48000, 4, 128, 112, 0x2c0, 56);
        for off in [0usize, 8, 24] {
            for i in 0..3 {
                data[off + i] |= 0x80;
            }
        }
        // Restore checksum after mangling tags.
        let len = data.len();
        data[len - 2] = 0;
        data[len - 1] = 0;
        let crc = toccata_core::checksum::crc16_checksum(&data[..len - 2]);
        data[len - 2] = (crc >> 8) as u8;
        data[len - 1] = (crc & 0xff) as u8;

        let hca = HcaHeader::parse(&data).unwrap();
        assert_eq!(hca.ciph_type, 56);
    }

    #[test]
    fn verify_stereo_channel_types() {
        let data = build_header(2, 48000, 4, 128, 112, 0x2c0, 0);
        let hca = HcaHeader::parse(&data).unwrap();
        let types = hca.channel_types();
        assert_eq!(types[0], ChannelType::StereoPrimary);
        assert_eq!(types[1], ChannelType::StereoSecondary);
        assert_eq!(hca.coded_count(types[0]), hca.total_band_count as usize);
    }
}
