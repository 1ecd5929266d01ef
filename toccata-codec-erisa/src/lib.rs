// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entis ERISA/MIO audio decoder.
//!
//! MIO streams live in EMC ("Entis Media Complex") containers: an `Entis\x1a` file header
//! followed by tagged records of (64-bit id, 64-bit length). Audio packets are coded with
//! adaptive huffman ("ERINA") or adaptive arithmetic ("ERISA") symbol coders and either stored
//! losslessly as byte-plane deltas or transformed with a lapped orthogonal transform plus DCT.
//! Packets flagged as lead blocks are keyframes that reset the coder, which is what seeking
//! recovers from.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::excessive_precision)]
#![allow(clippy::needless_range_loop)]

use log::debug;

use toccata_core::audio::{AudioStream, StreamInfo};
use toccata_core::errors::{decode_error, seek_error, unsupported_error, Result, SeekErrorKind};
use toccata_core::formats::{read_magic, FormatDescriptor, OpenOptions};
use toccata_core::io::{ByteSource, SourceReader, ReadBytes};

mod context;
mod matrix;
mod sound;

pub use context::MioContext;
pub use sound::MioDecoder;

/// Keyframe flag of a packet: the symbol coder state is reset at such packets.
pub const MIO_LEAD_BLOCK: u8 = 0x01;

const EMC_SIGNATURE: &[u8; 8] = b"Entis\x1a\x00\x00";

/// 64-bit record tags (8 ASCII bytes, little-endian).
const RECORD_HEADER: u64 = u64::from_le_bytes(*b"Header  ");
const RECORD_FILE_HEADER: u64 = u64::from_le_bytes(*b"FileHdr ");
const RECORD_SOUND_INFO: u64 = u64::from_le_bytes(*b"SoundInf");
const RECORD_DESCRIPTION: u64 = u64::from_le_bytes(*b"descript");
const RECORD_STREAM: u64 = u64::from_le_bytes(*b"Stream  ");
const RECORD_SOUND_STREAM: u64 = u64::from_le_bytes(*b"SoundStm");

/// How the spectrum (or signal) was transformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transformation {
    /// Byte-plane delta coding, bit-exact PCM.
    Lossless,
    /// Lapped orthogonal transform + DCT.
    Lot,
    /// LOT with mid/side-style channel rotation.
    LotMss,
}

/// Which entropy coder the packets use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Architecture {
    /// Run-length + adaptive huffman with gamma-coded escapes.
    RunLengthGamma,
    /// Run-length + adaptive huffman with 8-bit escapes.
    RunLengthHuffman,
    /// "Nemesis" adaptive arithmetic coding.
    Nemesis,
}

/// The MIO stream parameters, from the `SoundInf` record.
#[derive(Clone, Debug)]
pub struct InfoHeader {
    pub version: u32,
    pub transformation: Transformation,
    pub architecture: Architecture,
    pub channels: usize,
    pub samples_per_sec: u32,
    pub blockset_count: u32,
    pub subband_degree: u32,
    pub all_sample_count: u32,
    pub lapped_degree: u32,
    pub bits_per_sample: u32,
}

/// One packet's prefix, from a `SoundStm` record.
#[derive(Clone, Copy, Debug)]
pub struct DataHeader {
    pub version: u8,
    pub flags: u8,
    pub sample_count: u32,
}

/// A located packet within the container.
#[derive(Clone, Copy)]
struct PacketDesc {
    offset: u64,
    size: u64,
    header: DataHeader,
    /// First (per-channel) sample frame this packet produces.
    start_frame: u64,
}

/// The registry descriptor for EMC/MIO files.
pub const ERISA_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "mio",
    description: "Entis ERISA MIO",
    score: score,
    open: |src, opts| Ok(Box::new(MioStream::try_new(src, opts)?)),
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<8>(src)?;
    Ok(if &magic == EMC_SIGNATURE { 220 } else { 0 })
}

fn parse_info_header(reader: &mut SourceReader<'_>) -> Result<InfoHeader> {
    let version = reader.read_u32()?;
    if version > 0x0002_0100 {
        return unsupported_error("erisa: unknown stream version");
    }

    let transformation = match reader.read_u32()? {
        0x0302_0000 => Transformation::Lossless,
        0x0000_0005 => Transformation::Lot,
        0x0000_0105 => Transformation::LotMss,
        _ => return unsupported_error("erisa: unknown transformation"),
    };
    let architecture = match reader.read_u32()? {
        0xffff_ffff => Architecture::RunLengthGamma,
        0xffff_fffc => Architecture::RunLengthHuffman,
        0xffff_fff0 => Architecture::Nemesis,
        _ => return unsupported_error("erisa: unknown architecture"),
    };

    Ok(InfoHeader {
        version,
        transformation,
        architecture,
        channels: reader.read_u32()? as usize,
        samples_per_sec: reader.read_u32()?,
        blockset_count: reader.read_u32()?,
        subband_degree: reader.read_u32()?,
        all_sample_count: reader.read_u32()?,
        lapped_degree: reader.read_u32()?,
        bits_per_sample: reader.read_u32()?,
    })
}

/// An opened MIO stream.
pub struct MioStream {
    src: Box<dyn ByteSource>,
    info: StreamInfo,
    decoder: MioDecoder,
    context: MioContext,
    packets: Vec<PacketDesc>,

    next_packet: usize,
    sample_buffer: Vec<i16>,
    buffered: usize,
    consumed: usize,
    to_discard: u64,
    emitted: u64,
    poisoned: bool,
}

impl MioStream {
    pub fn try_new(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<MioStream> {
        if opts.subsong() != 1 {
            return decode_error("erisa: subsong out of range");
        }

        let mut reader = SourceReader::new(src.as_mut());

        let mut signature = [0u8; 8];
        reader.read_buf_exact(&mut signature)?;
        if &signature != EMC_SIGNATURE {
            return decode_error("erisa: missing EMC signature");
        }
        let _file_id = reader.read_u32()?;
        let _reserved = reader.read_u32()?;
        reader.ignore_bytes(0x30)?; /* format description text */

        let mut header: Option<InfoHeader> = None;
        let mut packets = Vec::new();
        let mut total_frames = 0u64;

        /* walk the top-level records */
        let file_len = reader.byte_len();
        while reader.pos() + 16 <= file_len {
            let record_id = reader.read_u64()?;
            let record_len = reader.read_u64()?;
            let record_end = reader.pos() + record_len;

            match record_id {
                RECORD_HEADER => {
                    /* nested header records */
                    while reader.pos() + 16 <= record_end {
                        let sub_id = reader.read_u64()?;
                        let sub_len = reader.read_u64()?;
                        let sub_end = reader.pos() + sub_len;

                        match sub_id {
                            RECORD_FILE_HEADER => {
                                /* version, contained flag, keyframe/frame counts */
                                let _version = reader.read_u32()?;
                                let contained = reader.read_u32()?;
                                if contained & 0x01 == 0 {
                                    debug!("erisa: header reports no sound stream");
                                }
                            }
                            RECORD_SOUND_INFO => {
                                header = Some(parse_info_header(&mut reader)?);
                            }
                            RECORD_DESCRIPTION => (),
                            _ => (),
                        }
                        reader.seek_to(sub_end);
                    }
                }
                RECORD_STREAM => {
                    /* packet records continue until the stream record ends */
                    while reader.pos() + 16 <= record_end {
                        let sub_id = reader.read_u64()?;
                        let sub_len = reader.read_u64()?;
                        let sub_end = reader.pos() + sub_len;

                        if sub_id == RECORD_SOUND_STREAM && sub_len >= 8 {
                            let version = reader.read_u8()?;
                            let flags = reader.read_u8()?;
                            reader.ignore_bytes(2)?;
                            let sample_count = reader.read_u32()?;

                            packets.push(PacketDesc {
                                offset: reader.pos(),
                                size: sub_len - 8,
                                header: DataHeader { version, flags, sample_count },
                                start_frame: total_frames,
                            });
                            total_frames += u64::from(sample_count);
                        }
                        reader.seek_to(sub_end);
                    }
                }
                _ => (),
            }
            reader.seek_to(record_end);
        }

        let header = match header {
            Some(header) => header,
            None => return decode_error("erisa: missing sound info record"),
        };
        if packets.is_empty() {
            return decode_error("erisa: no sound packets");
        }
        if packets[0].header.flags & MIO_LEAD_BLOCK == 0 {
            return decode_error("erisa: stream does not start on a keyframe");
        }

        let decoder = MioDecoder::new(&header)?;

        let num_frames = match header.all_sample_count {
            0 => total_frames,
            count => u64::from(count),
        };
        let mut info = StreamInfo::new(header.channels, header.samples_per_sec, num_frames);
        info.name = src.name().map(|n| n.to_string());

        let max_packet_samples = packets
            .iter()
            .map(|p| p.header.sample_count as usize)
            .max()
            .unwrap_or(0);

        Ok(MioStream {
            src,
            decoder,
            context: MioContext::new(),
            sample_buffer: vec![0; max_packet_samples * header.channels],
            info,
            packets,
            next_packet: 0,
            buffered: 0,
            consumed: 0,
            to_discard: 0,
            emitted: 0,
            poisoned: false,
        })
    }

    fn decode_next_packet(&mut self) -> Result<bool> {
        let packet = match self.packets.get(self.next_packet) {
            Some(&packet) => packet,
            None => return Ok(false),
        };

        let mut data = vec![0u8; packet.size as usize];
        self.src.read_exact_at(packet.offset, &mut data)?;
        self.context.attach(data);

        let produced =
            self.decoder.decode_sound(&mut self.context, &packet.header, &mut self.sample_buffer)?;

        self.next_packet += 1;
        self.buffered = produced / self.info.channels;
        self.consumed = 0;
        Ok(true)
    }
}

impl AudioStream for MioStream {
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

            match self.decode_next_packet() {
                Ok(true) => (),
                Ok(false) => break,
                Err(err) => {
                    debug!("erisa: fatal packet error: {}", err);
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

        // Restart from the nearest keyframe at or before the target; lead blocks fully reset
        // the coder and the lapped history.
        let mut start = 0usize;
        for (i, packet) in self.packets.iter().enumerate() {
            if packet.start_frame > frame {
                break;
            }
            if packet.header.flags & MIO_LEAD_BLOCK != 0 {
                start = i;
            }
        }

        self.decoder.reset();
        self.context = MioContext::new();
        self.next_packet = start;
        self.buffered = 0;
        self.consumed = 0;
        self.to_discard = frame - self.packets[start].start_frame;
        self.emitted = frame;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    fn push_record(out: &mut Vec<u8>, id: &[u8; 8], body: &[u8]) {
        out.extend_from_slice(id);
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(body);
    }

    fn build_emc(info_body: &[u8], packets: &[(u8, u32, Vec<u8>)]) -> Vec<u8> {
        let mut header_body = Vec::new();
        push_record(&mut header_body, b"FileHdr ", &[1, 0, 0, 0, 1, 0, 0, 0]);
        push_record(&mut header_body, b"SoundInf", info_body);

        let mut stream_body = Vec::new();
        for (flags, sample_count, payload) in packets {
            let mut body = vec![1, *flags, 0, 0];
            body.extend_from_slice(&sample_count.to_le_bytes());
            body.extend_from_slice(payload);
            push_record(&mut stream_body, b"SoundStm", &body);
        }

        let mut out = Vec::new();
        out.extend_from_slice(EMC_SIGNATURE);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&[0u8; 0x30]);
        push_record(&mut out, b"Header  ", &header_body);
        push_record(&mut out, b"Stream  ", &stream_body);
        out
    }

    fn lossless_info(channels: u32, bits: u32, total_samples: u32) -> Vec<u8> {
        let fields: [u32; 10] = [
            0x0002_0100, /* version */
            0x0302_0000, /* lossless */
            0xffff_fffc, /* run-length huffman */
            channels,
            44100,
            1,
            0,
            total_samples,
            0,
            bits,
        ];
        fields.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn verify_probe_scores_emc() {
        let data = build_emc(&lossless_info(1, 8, 4), &[(MIO_LEAD_BLOCK, 4, vec![0u8; 8])]);
        let mut src = MemSource::new(data);
        assert_eq!(score(&mut src).unwrap(), 220);
    }

    #[test]
    fn verify_lossless_pcm8_roundtrip() {
        // Mono 8-bit deltas [4, 252(-4), 1, 0] integrate to [4, 0, 1, 1] (biased by 0x80).
        // Under order-1 huffman with fresh trees every symbol is an escaped literal, except
        // that a zero symbol is followed by a gamma run length (here: 1, a single zero).
        let mut bits: Vec<bool> = Vec::new();
        let mut push_byte =
            |bits: &mut Vec<bool>, byte: u8| (0..8).rev().for_each(|i| bits.push(byte & (1 << i) != 0));
        push_byte(&mut bits, 4);
        push_byte(&mut bits, 252);
        push_byte(&mut bits, 1);
        push_byte(&mut bits, 0);
        bits.push(false); /* gamma code for run length 1 */

        let mut payload = vec![0u8; (bits.len() + 7) / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                payload[i / 8] |= 0x80 >> (i % 8);
            }
        }

        let data = build_emc(&lossless_info(1, 8, 4), &[(MIO_LEAD_BLOCK, 4, payload)]);
        let mut stream =
            MioStream::try_new(Box::new(MemSource::new(data)), &OpenOptions::default()).unwrap();

        assert_eq!(stream.info().channels, 1);
        assert_eq!(stream.info().num_frames, 4);

        let mut out = [0i16; 4];
        assert_eq!(stream.decode(&mut out).unwrap(), 4);
        let expect: Vec<i16> =
            [4u8, 0, 1, 1].iter().map(|&v| (i16::from(v) - 0x80) << 8).collect();
        assert_eq!(out.to_vec(), expect);
    }

    #[test]
    fn verify_non_keyframe_start_rejected() {
        let data = build_emc(&lossless_info(1, 8, 4), &[(0, 4, vec![0u8; 8])]);
        assert!(MioStream::try_new(Box::new(MemSource::new(data)), &OpenOptions::default())
            .is_err());
    }

    #[test]
    fn verify_unknown_transformation_rejected() {
        let mut info = lossless_info(1, 8, 4);
        info[4..8].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        let data = build_emc(&info, &[(MIO_LEAD_BLOCK, 4, vec![0u8; 8])]);
        assert!(MioStream::try_new(Box::new(MemSource::new(data)), &OpenOptions::default())
            .is_err());
    }
}
