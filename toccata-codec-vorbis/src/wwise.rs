// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wwise Vorbis reconstruction.
//!
//! Wwise strips the Ogg layer, prefixes packets with small size headers, and, depending on the
//! encoder version, strips parts of the setup header and of each audio packet. This module
//! rebuilds standard Vorbis from all known layouts, following the format recovered by hcs's
//! ww2ogg.
//!
//! Three independent axes, selected by encoder version:
//! - header: 8-byte (size + granule), 6-byte, or 2-byte (size only) packet headers;
//! - packets: standard, or "modified" with the packet-type bit and window flags removed;
//! - setup: a plain header triad, a full setup packet, inline packed codebooks, or packed
//!   codebooks referenced by 10-bit ids from a codebook library (the built-in tables first,
//!   then a caller-supplied companion library).

use log::debug;

use toccata_core::errors::{decode_error, Result};
use toccata_core::io::{BitReaderRtl, BitWriterRtl, ByteSource};

use crate::codebooks::CodebookLibrary;
use crate::common::{build_header_comment, build_header_identification};
use crate::packed_codebooks;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WwiseHeaderType {
    /// 32-bit size + 32-bit granule.
    Type8,
    /// 16-bit size + 32-bit granule.
    Type6,
    /// 16-bit size.
    Type2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WwisePacketType {
    Standard,
    Modified,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WwiseSetupType {
    /// Plain id/comment/setup packets, each behind a Wwise packet header.
    HeaderTriad,
    /// One setup packet with standard codebooks.
    FullSetup,
    /// One setup packet with inline packed codebooks.
    InlineCodebooks,
    /// One setup packet referencing packed codebooks of the standard library by id.
    ExternalCodebooks,
    /// As external, against the aoTuV 6.03 library.
    AotuvCodebooks,
}

/// Encoder generations with distinct layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WwiseVersion {
    V34,
    V38,
    V44,
    V48,
    V52,
    V53,
    V56,
    V62,
}

/// Container-provided stream parameters.
#[derive(Clone, Copy, Debug)]
pub struct WwiseConfig {
    pub version: WwiseVersion,
    pub big_endian: bool,
    pub channels: u8,
    pub sample_rate: u32,
    pub blocksize_0_exp: u8,
    pub blocksize_1_exp: u8,
    /// Offset of the setup section (header packets).
    pub setup_offset: u64,
    /// Offset of the first audio packet.
    pub audio_offset: u64,
}

struct WwisePacket {
    header_size: u64,
    packet_size: usize,
    data: Vec<u8>,
    /// First byte of the following packet, needed to infer the next window flag.
    next_byte: Option<u8>,
}

/// The Wwise packet source and rebuilder.
pub struct WwiseVorbis {
    header_type: WwiseHeaderType,
    packet_type: WwisePacketType,
    setup_type: WwiseSetupType,
    config: WwiseConfig,

    /* mode state recovered from the setup, needed to rebuild modified packets */
    mode_bits: u32,
    mode_blockflag: [bool; 64 + 1],
    prev_blockflag: bool,

    /// Offset of the next audio packet.
    offset: u64,
}

impl WwiseVorbis {
    /// Derives the per-version layout, mirroring the known encoder generations.
    pub fn new(config: WwiseConfig) -> WwiseVorbis {
        let (header_type, mut packet_type, setup_type) = match config.version {
            WwiseVersion::V34 => {
                (WwiseHeaderType::Type8, WwisePacketType::Standard, WwiseSetupType::HeaderTriad)
            }
            WwiseVersion::V38 => {
                (WwiseHeaderType::Type6, WwisePacketType::Standard, WwiseSetupType::FullSetup)
            }
            WwiseVersion::V44 => (
                WwiseHeaderType::Type6,
                WwisePacketType::Standard,
                WwiseSetupType::InlineCodebooks,
            ),
            WwiseVersion::V48 | WwiseVersion::V52 => (
                WwiseHeaderType::Type6,
                WwisePacketType::Standard,
                WwiseSetupType::ExternalCodebooks,
            ),
            WwiseVersion::V53 | WwiseVersion::V56 => (
                WwiseHeaderType::Type2,
                WwisePacketType::Modified,
                WwiseSetupType::ExternalCodebooks,
            ),
            WwiseVersion::V62 => (
                WwiseHeaderType::Type2,
                WwisePacketType::Modified,
                WwiseSetupType::AotuvCodebooks,
            ),
        };

        // Equal blocksizes imply a single window, and those encoders emit standard packets.
        if config.version >= WwiseVersion::V53
            && config.blocksize_0_exp == config.blocksize_1_exp
        {
            packet_type = WwisePacketType::Standard;
        }

        WwiseVorbis {
            header_type,
            packet_type,
            setup_type,
            config,
            mode_bits: 0,
            mode_blockflag: [false; 65],
            prev_blockflag: false,
            offset: config.audio_offset,
        }
    }

    /// Repositions the audio packet cursor (seek/loop restart).
    pub fn seek_start(&mut self) {
        self.offset = self.config.audio_offset;
        self.prev_blockflag = false;
    }

    fn read_header_fields(&self, buf: &[u8]) -> (usize, i32) {
        let be = self.config.big_endian;
        let read_u16 = |b: &[u8]| {
            if be {
                u16::from_be_bytes([b[0], b[1]])
            }
            else {
                u16::from_le_bytes([b[0], b[1]])
            }
        };
        let read_u32 = |b: &[u8]| {
            if be {
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
            else {
                u32::from_le_bytes([b[0], b[1], b[2], b[3]])
            }
        };

        match self.header_type {
            WwiseHeaderType::Type8 => (read_u32(&buf[0..4]) as usize, read_u32(&buf[4..8]) as i32),
            WwiseHeaderType::Type6 => (usize::from(read_u16(&buf[0..2])), read_u32(&buf[2..6]) as i32),
            WwiseHeaderType::Type2 => (usize::from(read_u16(&buf[0..2])), 0),
        }
    }

    /// Reads one Wwise packet at `offset`. Modified audio packets also capture the next
    /// packet's first byte.
    fn read_packet(
        &self,
        src: &mut dyn ByteSource,
        offset: u64,
        is_setup: bool,
    ) -> Result<WwisePacket> {
        let header_size = match self.header_type {
            WwiseHeaderType::Type8 => 8u64,
            WwiseHeaderType::Type6 => 6,
            WwiseHeaderType::Type2 => 2,
        };

        let mut header = [0u8; 8];
        src.read_exact_at(offset, &mut header[..header_size as usize])?;
        let (packet_size, _granule) = self.read_header_fields(&header);

        if packet_size == 0 {
            return decode_error("vorbis: empty wwise packet");
        }

        // Modified packets need the next packet's first byte, except at end of stream.
        let want_next = !is_setup && self.packet_type == WwisePacketType::Modified;
        let read_size =
            packet_size + if want_next { header_size as usize + 1 } else { 0 };

        let mut data = vec![0u8; read_size];
        let got = src.read_at(offset + header_size, &mut data)?;
        if got < packet_size {
            return decode_error("vorbis: truncated wwise packet");
        }

        let next_byte = if want_next && got == read_size {
            Some(data[packet_size + header_size as usize])
        }
        else {
            None
        };
        data.truncate(packet_size);

        Ok(WwisePacket { header_size, packet_size, data, next_byte })
    }

    /// Produces the three standard header packets, rebuilding the setup as the version
    /// demands.
    pub fn make_headers(
        &mut self,
        src: &mut dyn ByteSource,
        codebooks: &CodebookLibrary,
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        if self.setup_type == WwiseSetupType::HeaderTriad {
            /* three standard packets, each behind a Wwise header */
            let mut offset = self.config.setup_offset;

            let id = self.read_packet(src, offset, true)?;
            offset += id.header_size + id.packet_size as u64;
            let comment = self.read_packet(src, offset, true)?;
            offset += comment.header_size + comment.packet_size as u64;
            let setup = self.read_packet(src, offset, true)?;

            return Ok((id.data, comment.data, setup.data));
        }

        let ident = build_header_identification(
            self.config.channels,
            self.config.sample_rate,
            self.config.blocksize_0_exp,
            self.config.blocksize_1_exp,
        );
        let comment = build_header_comment();

        let packet = self.read_packet(src, self.config.setup_offset, true)?;
        let setup = self.rebuild_setup(&packet.data, codebooks)?;

        Ok((ident, comment, setup))
    }

    /// Returns the next standard-Vorbis audio packet, or `None` at end of stream.
    pub fn next_packet(&mut self, src: &mut dyn ByteSource) -> Result<Option<Vec<u8>>> {
        if self.offset >= src.byte_len() {
            return Ok(None);
        }

        let packet = match self.read_packet(src, self.offset, false) {
            Ok(packet) => packet,
            Err(err) => {
                // Trailing padding reads as an empty packet; treat as end of stream.
                debug!("vorbis: wwise packet read stopped: {}", err);
                return Ok(None);
            }
        };
        self.offset += packet.header_size + packet.packet_size as u64;

        if self.packet_type == WwisePacketType::Standard {
            return Ok(Some(packet.data));
        }

        /* rebuild the packet-type bit and window flags stripped from modified packets */
        let mut iw = BitReaderRtl::new(&packet.data);
        let mut ow = BitWriterRtl::new();

        ow.put_bit(false); /* audio packet type */

        let mode_number = iw.read_bits_leq32(self.mode_bits)?;
        ow.put_bits_leq32(mode_number, self.mode_bits);

        let remainder = iw.read_bits_leq32(8 - self.mode_bits)?;

        if self.mode_blockflag[mode_number as usize] {
            /* long window: infer the neighbor flags */
            let next_blockflag = match packet.next_byte {
                Some(byte) => {
                    let mut nw = BitReaderRtl::new(std::slice::from_ref(&byte));
                    let next_mode = nw.read_bits_leq32(self.mode_bits)?;
                    self.mode_blockflag[next_mode as usize]
                }
                None => false,
            };

            ow.put_bit(self.prev_blockflag);
            ow.put_bit(next_blockflag);
        }

        self.prev_blockflag = self.mode_blockflag[mode_number as usize];

        ow.put_bits_leq32(remainder, 8 - self.mode_bits);

        copy_bits(&mut ow, &mut iw, (packet.packet_size - 1) * 8)?;
        ow.byte_align();

        Ok(Some(ow.into_bytes()))
    }

    /// Rebuilds a Wwise setup packet into a standard Vorbis one, recreating all six parts and
    /// validating every cross-reference.
    fn rebuild_setup(&mut self, input: &[u8], codebooks: &CodebookLibrary) -> Result<Vec<u8>> {
        let mut iw = BitReaderRtl::new(input);
        let mut ow = BitWriterRtl::new();

        /* packet header */
        ow.put_bits_leq32(0x05, 8); /* packet_type (setup) */
        for &byte in b"vorbis" {
            ow.put_bits_leq32(u32::from(byte), 8);
        }

        /* codebooks */
        let codebook_count_less1 = iw.read_bits_leq32(8)?;
        ow.put_bits_leq32(codebook_count_less1, 8);
        let codebook_count = codebook_count_less1 + 1;

        match self.setup_type {
            WwiseSetupType::FullSetup => {
                for _ in 0..codebook_count {
                    codebook_copy(&mut ow, &mut iw)?;
                }
            }
            WwiseSetupType::InlineCodebooks => {
                for _ in 0..codebook_count {
                    codebook_rebuild(&mut ow, &mut iw, 0)?;
                }
            }
            _ => {
                let library = packed_codebooks::wwise_library(self.setup_type);
                for _ in 0..codebook_count {
                    let codebook_id = iw.read_bits_leq32(10)?;
                    /* the built-in library answers first, the companion fills its gaps */
                    let blob = match library.get(codebook_id) {
                        Some(blob) => blob.to_vec(),
                        None => codebooks.load(codebook_id)?,
                    };
                    let mut cw = BitReaderRtl::new(&blob);
                    codebook_rebuild(&mut ow, &mut cw, blob.len())?;
                }
            }
        }

        /* time domain transforms: a count-0 placeholder */
        ow.put_bits_leq32(0, 6);
        ow.put_bits_leq32(0, 16);

        if self.setup_type == WwiseSetupType::FullSetup {
            /* the rest of a full setup is standard, copy it through */
            let total_bits = input.len() * 8;
            while iw.pos() < total_bits {
                let bit = iw.read_bit()?;
                ow.put_bit(bit);
            }
        }
        else {
            self.rebuild_floors_residues_modes(&mut ow, &mut iw, codebook_count)?;
        }

        /* end framing flag */
        ow.put_bit(true);
        ow.byte_align();

        Ok(ow.into_bytes())
    }

    /// The reduced-setup tail: floors, residues, mappings and modes, re-inflated to their
    /// standard field widths.
    fn rebuild_floors_residues_modes(
        &mut self,
        ow: &mut BitWriterRtl,
        iw: &mut BitReaderRtl<'_>,
        codebook_count: u32,
    ) -> Result<()> {
        let channels = u32::from(self.config.channels);

        /* floors, always type 1 */
        let floor_count_less1 = iw.read_bits_leq32(6)?;
        ow.put_bits_leq32(floor_count_less1, 6);
        let floor_count = floor_count_less1 + 1;

        for _ in 0..floor_count {
            ow.put_bits_leq32(1, 16); /* floor_type */

            let floor1_partitions = iw.read_bits_leq32(5)?;
            ow.put_bits_leq32(floor1_partitions, 5);

            let mut partition_class_list = [0u32; 32];
            let mut maximum_class = 0u32;
            for j in 0..floor1_partitions as usize {
                let class = iw.read_bits_leq32(4)?;
                ow.put_bits_leq32(class, 4);
                partition_class_list[j] = class;
                maximum_class = maximum_class.max(class);
            }

            let mut class_dimensions_list = [0u32; 16 + 1];
            for j in 0..=maximum_class as usize {
                let dimensions_less1 = iw.read_bits_leq32(3)?;
                ow.put_bits_leq32(dimensions_less1, 3);
                class_dimensions_list[j] = dimensions_less1 + 1;

                let subclasses = iw.read_bits_leq32(2)?;
                ow.put_bits_leq32(subclasses, 2);

                if subclasses != 0 {
                    let masterbook = iw.read_bits_leq32(8)?;
                    ow.put_bits_leq32(masterbook, 8);
                    if masterbook >= codebook_count {
                        return decode_error("vorbis: invalid floor1 masterbook");
                    }
                }

                for _ in 0..(1u32 << subclasses) {
                    let subclass_book_plus1 = iw.read_bits_leq32(8)?;
                    ow.put_bits_leq32(subclass_book_plus1, 8);
                    let subclass_book = subclass_book_plus1 as i32 - 1;
                    if subclass_book >= 0 && subclass_book as u32 >= codebook_count {
                        return decode_error("vorbis: invalid floor1 subclass book");
                    }
                }
            }

            let multiplier_less1 = iw.read_bits_leq32(2)?;
            ow.put_bits_leq32(multiplier_less1, 2);

            let rangebits = iw.read_bits_leq32(4)?;
            ow.put_bits_leq32(rangebits, 4);

            for j in 0..floor1_partitions as usize {
                let class = partition_class_list[j] as usize;
                for _ in 0..class_dimensions_list[class] {
                    let x = iw.read_bits_leq32(rangebits)?;
                    ow.put_bits_leq32(x, rangebits);
                }
            }
        }

        /* residues, the 2-bit type widened to 16 */
        let residue_count_less1 = iw.read_bits_leq32(6)?;
        ow.put_bits_leq32(residue_count_less1, 6);
        let residue_count = residue_count_less1 + 1;

        for _ in 0..residue_count {
            let residue_type = iw.read_bits_leq32(2)?;
            ow.put_bits_leq32(residue_type, 16);
            if residue_type > 2 {
                return decode_error("vorbis: invalid residue type");
            }

            let begin = iw.read_bits_leq32(24)?;
            ow.put_bits_leq32(begin, 24);
            let end = iw.read_bits_leq32(24)?;
            ow.put_bits_leq32(end, 24);
            let partition_size_less1 = iw.read_bits_leq32(24)?;
            ow.put_bits_leq32(partition_size_less1, 24);
            let classifications_less1 = iw.read_bits_leq32(6)?;
            ow.put_bits_leq32(classifications_less1, 6);
            let classbook = iw.read_bits_leq32(8)?;
            ow.put_bits_leq32(classbook, 8);
            let classifications = classifications_less1 + 1;

            if classbook >= codebook_count {
                return decode_error("vorbis: invalid residue classbook");
            }

            let mut cascade = [0u32; 64 + 1];
            for j in 0..classifications as usize {
                let low_bits = iw.read_bits_leq32(3)?;
                ow.put_bits_leq32(low_bits, 3);

                let bitflag = iw.read_bit()?;
                ow.put_bit(bitflag);

                let mut high_bits = 0;
                if bitflag {
                    high_bits = iw.read_bits_leq32(5)?;
                    ow.put_bits_leq32(high_bits, 5);
                }

                cascade[j] = high_bits * 8 + low_bits;
            }

            for &bits in cascade.iter().take(classifications as usize) {
                for k in 0..8 {
                    if bits & (1 << k) != 0 {
                        let residue_book = iw.read_bits_leq32(8)?;
                        ow.put_bits_leq32(residue_book, 8);
                        if residue_book >= codebook_count {
                            return decode_error("vorbis: invalid residue book");
                        }
                    }
                }
            }
        }

        /* mappings, always type 0 */
        let mapping_count_less1 = iw.read_bits_leq32(6)?;
        ow.put_bits_leq32(mapping_count_less1, 6);
        let mapping_count = mapping_count_less1 + 1;

        for _ in 0..mapping_count {
            ow.put_bits_leq32(0, 16); /* mapping_type */

            let submaps_flag = iw.read_bit()?;
            ow.put_bit(submaps_flag);

            let mut submaps = 1u32;
            if submaps_flag {
                let submaps_less1 = iw.read_bits_leq32(4)?;
                ow.put_bits_leq32(submaps_less1, 4);
                submaps = submaps_less1 + 1;
            }

            let square_polar_flag = iw.read_bit()?;
            ow.put_bit(square_polar_flag);

            if square_polar_flag {
                let coupling_steps_less1 = iw.read_bits_leq32(8)?;
                ow.put_bits_leq32(coupling_steps_less1, 8);

                for _ in 0..coupling_steps_less1 + 1 {
                    let bits = ilog(channels.saturating_sub(1));
                    let magnitude = iw.read_bits_leq32(bits)?;
                    ow.put_bits_leq32(magnitude, bits);
                    let angle = iw.read_bits_leq32(bits)?;
                    ow.put_bits_leq32(angle, bits);

                    if angle == magnitude || magnitude >= channels || angle >= channels {
                        return decode_error("vorbis: invalid coupling pair");
                    }
                }
            }

            let mapping_reserved = iw.read_bits_leq32(2)?;
            ow.put_bits_leq32(mapping_reserved, 2);
            if mapping_reserved != 0 {
                return decode_error("vorbis: nonzero mapping reserved field");
            }

            if submaps > 1 {
                for _ in 0..channels {
                    let mapping_mux = iw.read_bits_leq32(4)?;
                    ow.put_bits_leq32(mapping_mux, 4);
                    if mapping_mux >= submaps {
                        return decode_error("vorbis: invalid mapping mux");
                    }
                }
            }

            for _ in 0..submaps {
                /* the unused time-domain configuration placeholder survives */
                let time_config = iw.read_bits_leq32(8)?;
                ow.put_bits_leq32(time_config, 8);

                let floor_number = iw.read_bits_leq32(8)?;
                ow.put_bits_leq32(floor_number, 8);
                if floor_number >= floor_count {
                    return decode_error("vorbis: invalid floor mapping");
                }

                let residue_number = iw.read_bits_leq32(8)?;
                ow.put_bits_leq32(residue_number, 8);
                if residue_number >= residue_count {
                    return decode_error("vorbis: invalid residue mapping");
                }
            }
        }

        /* modes; remember the block flags to rebuild modified audio packets */
        let mode_count_less1 = iw.read_bits_leq32(6)?;
        ow.put_bits_leq32(mode_count_less1, 6);
        let mode_count = mode_count_less1 + 1;

        self.mode_blockflag = [false; 65];
        self.mode_bits = ilog(mode_count - 1);

        for i in 0..mode_count as usize {
            let block_flag = iw.read_bit()?;
            ow.put_bit(block_flag);
            self.mode_blockflag[i] = block_flag;

            ow.put_bits_leq32(0, 16); /* windowtype */
            ow.put_bits_leq32(0, 16); /* transformtype */

            let mapping = iw.read_bits_leq32(8)?;
            ow.put_bits_leq32(mapping, 8);
            if mapping >= mapping_count {
                return decode_error("vorbis: invalid mode mapping");
            }
        }

        Ok(())
    }
}

/// Fixed-point ilog (bit length).
pub fn ilog(value: u32) -> u32 {
    32 - value.leading_zeros()
}

/// Entry count of a map-type-1 lookup table.
pub fn book_maptype1_quantvals(entries: u32, dimensions: u32) -> Result<u32> {
    if dimensions == 0 {
        return decode_error("vorbis: zero codebook dimensions");
    }

    let bits = ilog(entries);
    let mut vals = entries >> ((bits - 1) * (dimensions - 1) / dimensions);

    for _ in 0..0x10000 {
        let mut acc: u64 = 1;
        let mut acc1: u64 = 1;
        for _ in 0..dimensions {
            acc *= u64::from(vals);
            acc1 *= u64::from(vals) + 1;
        }
        if acc <= u64::from(entries) && acc1 > u64::from(entries) {
            return Ok(vals);
        }
        else if acc > u64::from(entries) {
            vals -= 1;
        }
        else {
            vals += 1;
        }
    }
    decode_error("vorbis: quantvals does not converge")
}

/// Copies `bits` from reader to writer (neither side is byte-aligned in general).
fn copy_bits(ow: &mut BitWriterRtl, iw: &mut BitReaderRtl<'_>, mut bits: usize) -> Result<()> {
    while bits >= 32 {
        let c = iw.read_bits_leq32(32)?;
        ow.put_bits_leq32(c, 32);
        bits -= 32;
    }
    if bits > 0 {
        let c = iw.read_bits_leq32(bits as u32)?;
        ow.put_bits_leq32(c, bits as u32);
    }
    Ok(())
}

/// Copies one standard codebook through untouched, tracking its length fields to know where
/// it ends.
fn codebook_copy(ow: &mut BitWriterRtl, iw: &mut BitReaderRtl<'_>) -> Result<()> {
    let id = iw.read_bits_leq32(24)?;
    ow.put_bits_leq32(id, 24);
    let dimensions = iw.read_bits_leq32(16)?;
    ow.put_bits_leq32(dimensions, 16);
    let entries = iw.read_bits_leq32(24)?;
    ow.put_bits_leq32(entries, 24);

    if id != 0x564342 {
        /* "VCB" */
        return decode_error("vorbis: invalid codebook identifier");
    }

    /* codeword lengths */
    let ordered = iw.read_bit()?;
    ow.put_bit(ordered);
    if ordered {
        let initial_length = iw.read_bits_leq32(5)?;
        ow.put_bits_leq32(initial_length, 5);

        let mut current_entry = 0u32;
        while current_entry < entries {
            let bits = ilog(entries - current_entry);
            let number = iw.read_bits_leq32(bits)?;
            ow.put_bits_leq32(number, bits);
            current_entry += number;
        }
        if current_entry > entries {
            return decode_error("vorbis: codebook entry overflow");
        }
    }
    else {
        let sparse = iw.read_bit()?;
        ow.put_bit(sparse);

        for _ in 0..entries {
            let present = if sparse {
                let present = iw.read_bit()?;
                ow.put_bit(present);
                present
            }
            else {
                true
            };

            if present {
                let codeword_length = iw.read_bits_leq32(5)?;
                ow.put_bits_leq32(codeword_length, 5);
            }
        }
    }

    /* lookup table */
    let lookup_type = iw.read_bits_leq32(4)?;
    ow.put_bits_leq32(lookup_type, 4);
    copy_lookup_values(ow, iw, lookup_type, entries, dimensions)
}

/// Re-inflates one packed codebook (the compressed form Wwise stores) into a standard one.
fn codebook_rebuild(
    ow: &mut BitWriterRtl,
    iw: &mut BitReaderRtl<'_>,
    cb_size: usize,
) -> Result<()> {
    ow.put_bits_leq32(0x564342, 24); /* "VCB" */

    let dimensions = iw.read_bits_leq32(4)?;
    ow.put_bits_leq32(dimensions, 16); /* 4 bits widened to 16 */
    let entries = iw.read_bits_leq32(14)?;
    ow.put_bits_leq32(entries, 24); /* 14 bits widened to 24 */

    /* codeword lengths */
    let ordered = iw.read_bit()?;
    ow.put_bit(ordered);
    if ordered {
        let initial_length = iw.read_bits_leq32(5)?;
        ow.put_bits_leq32(initial_length, 5);

        let mut current_entry = 0u32;
        while current_entry < entries {
            let bits = ilog(entries - current_entry);
            let number = iw.read_bits_leq32(bits)?;
            ow.put_bits_leq32(number, bits);
            current_entry += number;
        }
        if current_entry > entries {
            return decode_error("vorbis: codebook entry overflow");
        }
    }
    else {
        let codeword_length_length = iw.read_bits_leq32(3)?;
        let sparse = iw.read_bit()?;
        ow.put_bit(sparse);

        if codeword_length_length == 0 || codeword_length_length > 5 {
            return decode_error("vorbis: invalid codeword length size");
        }

        for _ in 0..entries {
            let present = if sparse {
                let present = iw.read_bit()?;
                ow.put_bit(present);
                present
            }
            else {
                true
            };

            if present {
                let codeword_length = iw.read_bits_leq32(codeword_length_length)?;
                ow.put_bits_leq32(codeword_length, 5); /* narrow length widened to 5 */
            }
        }
    }

    /* lookup table, the 1-bit kind flag widened to 4 */
    let lookup_type = iw.read_bits_leq32(1)?;
    ow.put_bits_leq32(lookup_type, 4);
    copy_lookup_values(ow, iw, lookup_type, entries, dimensions)?;

    /* the packed blob must be consumed exactly (one partial byte of padding allowed) */
    if cb_size != 0 && iw.pos() / 8 + 1 != cb_size {
        return decode_error("vorbis: codebook size mismatch");
    }

    Ok(())
}

fn copy_lookup_values(
    ow: &mut BitWriterRtl,
    iw: &mut BitReaderRtl<'_>,
    lookup_type: u32,
    entries: u32,
    dimensions: u32,
) -> Result<()> {
    match lookup_type {
        0 => Ok(()),
        1 => {
            let min = iw.read_bits_leq32(32)?;
            ow.put_bits_leq32(min, 32);
            let max = iw.read_bits_leq32(32)?;
            ow.put_bits_leq32(max, 32);
            let value_length = iw.read_bits_leq32(4)?;
            ow.put_bits_leq32(value_length, 4);
            let sequence_flag = iw.read_bit()?;
            ow.put_bit(sequence_flag);

            let quantvals = book_maptype1_quantvals(entries, dimensions)?;
            for _ in 0..quantvals {
                let val = iw.read_bits_leq32(value_length + 1)?;
                ow.put_bits_leq32(val, value_length + 1);
            }
            Ok(())
        }
        2 => decode_error("vorbis: unexpected lookup type 2"),
        _ => decode_error("vorbis: invalid lookup type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_ilog() {
        assert_eq!(ilog(0), 0);
        assert_eq!(ilog(1), 1);
        assert_eq!(ilog(2), 2);
        assert_eq!(ilog(3), 2);
        assert_eq!(ilog(7), 3);
        assert_eq!(ilog(63), 6);
    }

    #[test]
    fn verify_quantvals() {
        // From the Tremor reference: quantvals is the largest v with v^dim <= entries.
        assert_eq!(book_maptype1_quantvals(16, 4).unwrap(), 2);
        assert_eq!(book_maptype1_quantvals(81, 4).unwrap(), 3);
        assert_eq!(book_maptype1_quantvals(256, 2).unwrap(), 16);
        assert_eq!(book_maptype1_quantvals(100, 2).unwrap(), 10);
    }

    #[test]
    fn verify_packed_codebook_roundtrip() {
        // Build a packed codebook: 2 dimensions, 4 entries, unordered non-sparse lengths of
        // 3 bits each (codeword_length_length = 3), no lookup table.
        let mut packed = BitWriterRtl::new();
        packed.put_bits_leq32(2, 4); /* dimensions */
        packed.put_bits_leq32(4, 14); /* entries */
        packed.put_bit(false); /* not ordered */
        packed.put_bits_leq32(3, 3); /* codeword_length_length */
        packed.put_bit(false); /* not sparse */
        for len in [1u32, 2, 3, 3] {
            packed.put_bits_leq32(len, 3);
        }
        packed.put_bit(false); /* lookup_type 0 */
        let blob = packed.into_bytes();

        let mut ow = BitWriterRtl::new();
        let mut iw = BitReaderRtl::new(&blob);
        codebook_rebuild(&mut ow, &mut iw, blob.len()).unwrap();
        let standard = ow.into_bytes();

        // The inflated codebook must parse as a standard one.
        let mut check = BitReaderRtl::new(&standard);
        assert_eq!(check.read_bits_leq32(24).unwrap(), 0x564342);
        assert_eq!(check.read_bits_leq32(16).unwrap(), 2);
        assert_eq!(check.read_bits_leq32(24).unwrap(), 4);
        assert!(!check.read_bit().unwrap()); /* unordered */
        assert!(!check.read_bit().unwrap()); /* not sparse */
        for expect in [1u32, 2, 3, 3] {
            assert_eq!(check.read_bits_leq32(5).unwrap(), expect);
        }
        assert_eq!(check.read_bits_leq32(4).unwrap(), 0); /* lookup */

        // And copy-through must accept its own output.
        let mut ow2 = BitWriterRtl::new();
        let mut iw2 = BitReaderRtl::new(&standard);
        codebook_copy(&mut ow2, &mut iw2).unwrap();
        assert_eq!(ow2.into_bytes(), standard);
    }

    #[test]
    fn verify_version_layouts() {
        let cfg = WwiseConfig {
            version: WwiseVersion::V53,
            big_endian: false,
            channels: 2,
            sample_rate: 48000,
            blocksize_0_exp: 0x0b,
            blocksize_1_exp: 0x08,
            setup_offset: 0,
            audio_offset: 0,
        };
        let wwise = WwiseVorbis::new(cfg);
        assert_eq!(wwise.header_type, WwiseHeaderType::Type2);
        assert_eq!(wwise.packet_type, WwisePacketType::Modified);
        assert_eq!(wwise.setup_type, WwiseSetupType::ExternalCodebooks);

        // Equal blocksizes force standard packets on modern versions.
        let cfg_eq = WwiseConfig { blocksize_0_exp: 0x0a, blocksize_1_exp: 0x0a, ..cfg };
        let wwise_eq = WwiseVorbis::new(cfg_eq);
        assert_eq!(wwise_eq.packet_type, WwisePacketType::Standard);

        let cfg_old = WwiseConfig { version: WwiseVersion::V34, ..cfg };
        let wwise_old = WwiseVorbis::new(cfg_old);
        assert_eq!(wwise_old.header_type, WwiseHeaderType::Type8);
        assert_eq!(wwise_old.setup_type, WwiseSetupType::HeaderTriad);
    }
}
