// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OOR page parsing.
//!
//! OOR keeps Vorbis packets in "OggS-like" but bit-packed, variable-sized pages: a 2-bit
//! version, a 4-bit flag nibble, an optional 64-bit granule (v1), then a size table of
//! `packet_count` entries around a base size. Packets may continue across pages via the
//! CONTINUED/PARTIAL flags. The header page carries channels, sample rate and the blocksize
//! exponents; the setup page carries a one-byte codebook selector plus an optional inline
//! codebook.

use toccata_core::errors::{decode_error, Result};
use toccata_core::io::{BitReaderLtr, ByteSource};

pub const OOR_FLAG_CONTINUED: u32 = 1 << 3;
pub const OOR_FLAG_PARTIAL: u32 = 1 << 2;
pub const OOR_FLAG_BOS: u32 = 1 << 1;
pub const OOR_FLAG_EOS: u32 = 1 << 0;

/// A page prefix.
#[derive(Clone, Copy, Debug, Default)]
pub struct OorPage {
    pub version: u32,
    pub flags: u32,
    pub granule: u64,
    pub padding1: u32,
    pub padding2: u32,
}

/// A page's packet size table.
#[derive(Clone, Debug, Default)]
pub struct OorSizes {
    pub vps_bits: u32,
    pub padding1: u32,
    pub packet_count: usize,
    pub bps_selector: u32,
    pub base_packet_size: u32,
    pub variable_packet_size: Vec<u32>,
    pub post_padding: u32,
}

/// The stream parameters from the header page.
#[derive(Clone, Copy, Debug, Default)]
pub struct OorHeader {
    pub pre_padding: u32,
    pub version: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub last_granule: u64,
    pub blocksize1_exp: u8,
    pub blocksize0_exp: u8,
    pub framing: u32,
    pub post_padding: u32,
}

/// The setup page's selector packet.
#[derive(Clone, Copy, Debug, Default)]
pub struct OorSetup {
    pub setup_type: u32,
    pub codebook_id: u32,
}

/// Reads a page prefix. The bit cursor ends 6 bits into the current byte, v0 and v1 alike.
pub fn read_page(bs: &mut BitReaderLtr<'_>, page: &mut OorPage) {
    page.version = bs.read_bits_leq32(2);
    page.flags = bs.read_bits_leq32(4);

    match page.version {
        0 => {
            page.granule = 0;
            page.padding1 = 0;
            page.padding2 = 0;
        }
        1 => {
            // The 64-bit granule is byte-aligned between two paddings.
            page.padding1 = bs.read_bits_leq32(2);
            let granule_hi = bs.read_bits_leq32(32);
            let granule_lo = bs.read_bits_leq32(32);
            page.granule = (u64::from(granule_hi) << 32) | u64::from(granule_lo);
            page.padding2 = bs.read_bits_leq32(6);
        }
        _ => (),
    }
}

/// Reads a page's size table and aligns the cursor to the next byte.
pub fn read_sizes(bs: &mut BitReaderLtr<'_>, sizes: &mut OorSizes) {
    sizes.vps_bits = bs.read_bits_leq32(4);
    sizes.padding1 = bs.read_bits_leq32(1);
    sizes.packet_count = bs.read_bits_leq32(8) as usize;
    sizes.bps_selector = bs.read_bits_leq32(2);

    sizes.base_packet_size = match sizes.bps_selector {
        0 => 0,
        1 => bs.read_bits_leq32(8),
        2 => bs.read_bits_leq32(11),
        _ => 0, /* undefined */
    };

    sizes.variable_packet_size.clear();
    for _ in 0..sizes.packet_count {
        let size = if sizes.vps_bits != 0 { bs.read_bits_leq32(sizes.vps_bits) } else { 0 };
        sizes.variable_packet_size.push(size);
    }

    let bit_pos = (bs.pos() % 8) as u32;
    sizes.post_padding = if bit_pos > 0 { bs.read_bits_leq32(8 - bit_pos) } else { 0 };
}

/// Reads the stream header that follows the first page's prefix.
pub fn read_header(bs: &mut BitReaderLtr<'_>, hdr: &mut OorHeader) {
    hdr.pre_padding = bs.read_bits_leq32(2);

    hdr.version = bs.read_bits_leq32(2);
    hdr.channels = bs.read_bits_leq32(3);
    let sr_selector = bs.read_bits_leq32(2);

    if sr_selector == 3 {
        let sr_index = bs.read_bits_leq32(8);

        hdr.sample_rate = match (hdr.version, sr_index) {
            (0, 3) => 32000,
            (0, 4) => 48000,
            (0, 5) => 96000,
            (1, 4) => 32000,
            (1, 5) => 48000,
            (1, 6) => 64000,
            (1, 7) => 88200,
            (1, 8) => 96000,
            _ => 0,
        };
        // Unknown indexes get a placeholder so they surface instead of dividing by zero.
        if hdr.sample_rate == 0 {
            hdr.sample_rate = 8000;
        }
    }
    else {
        hdr.sample_rate = 11025 << sr_selector;
    }

    if hdr.version == 1 {
        let _unknown1 = bs.read_bits_leq32(1);
        let _unknown2 = bs.read_bits_leq32(1);
        let _unknown3 = bs.read_bits_leq32(7);

        let granule_hi = bs.read_bits_leq32(32);
        let granule_lo = bs.read_bits_leq32(32);
        hdr.last_granule = (u64::from(granule_hi) << 32) | u64::from(granule_lo);
    }
    else {
        hdr.last_granule = 0;
    }

    hdr.blocksize1_exp = bs.read_bits_leq32(4) as u8;
    hdr.blocksize0_exp = bs.read_bits_leq32(4) as u8;
    hdr.framing = bs.read_bits_leq32(1);

    let bit_pos = (bs.pos() % 8) as u32;
    hdr.post_padding = if bit_pos > 0 { bs.read_bits_leq32(8 - bit_pos) } else { 0 };
}

/// Reads the setup selector.
pub fn read_setup(bs: &mut BitReaderLtr<'_>) -> OorSetup {
    OorSetup { setup_type: bs.read_bits_leq32(2), codebook_id: bs.read_bits_leq32(6) }
}

pub fn validate_header_page(page: &OorPage, hdr: &OorHeader) -> bool {
    if page.version > 1 || page.flags != OOR_FLAG_BOS {
        return false;
    }
    if page.granule != 0 || page.padding1 != 0 || page.padding2 != 0 {
        return false;
    }

    if hdr.pre_padding != 0 || hdr.version > 1 || hdr.version != page.version {
        return false;
    }
    if hdr.channels == 0 || hdr.sample_rate == 0 {
        return false;
    }
    if hdr.version == 1 && hdr.last_granule == 0 {
        return false;
    }
    if hdr.blocksize0_exp < 6
        || hdr.blocksize0_exp > 13
        || hdr.blocksize1_exp < 6
        || hdr.blocksize1_exp > 13
    {
        return false;
    }
    if hdr.framing != 1 {
        return false;
    }
    hdr.post_padding == 0
}

pub fn validate_setup_page(page: &OorPage, sizes: &OorSizes, hdr: &OorHeader) -> bool {
    if page.version != hdr.version {
        return false;
    }
    // Codebooks may spill into further pages via PARTIAL, but the setup page itself starts
    // clean.
    if page.flags & (OOR_FLAG_CONTINUED | OOR_FLAG_BOS | OOR_FLAG_EOS) != 0 {
        return false;
    }
    if page.granule != 0 || page.padding1 != 0 || page.padding2 != 0 {
        return false;
    }
    if sizes.padding1 != 0 || sizes.bps_selector == 3 {
        return false;
    }
    sizes.post_padding == 0
}

pub fn validate_setup_info(sizes: &OorSizes, setup: &OorSetup) -> bool {
    /* the setup page has exactly two packets: selector + codebook blob */
    if sizes.packet_count != 2 {
        return false;
    }
    let packet0 = sizes.base_packet_size + sizes.variable_packet_size[0];
    let packet1 = sizes.base_packet_size + sizes.variable_packet_size[1];

    if packet0 != 0x01 {
        return false;
    }
    /* the blob is empty exactly when a built-in codebook id is referenced */
    if setup.codebook_id > 0 {
        packet1 == 0
    }
    else {
        packet1 != 0
    }
}

pub fn validate_audio_page(page: &OorPage, sizes: &OorSizes, hdr: Option<&OorHeader>) -> bool {
    if let Some(hdr) = hdr {
        if page.version != hdr.version {
            return false;
        }
    }
    if page.flags & OOR_FLAG_BOS != 0 {
        return false;
    }
    if page.padding1 != 0 || page.padding2 != 0 {
        return false;
    }
    if sizes.padding1 != 0 || sizes.bps_selector == 3 {
        return false;
    }
    if sizes.post_padding != 0 {
        return false;
    }
    sizes.packet_count != 0
}

/// Walks audio packets across OOR pages, merging PARTIAL/CONTINUED spans.
pub struct OorPacketReader {
    offset: u64,
    header: OorHeader,
    /// Partial packet carried over from the previous page.
    pending: Vec<u8>,
    /// Queue of whole packets from the current page.
    queue: std::collections::VecDeque<Vec<u8>>,
    finished: bool,
}

impl OorPacketReader {
    pub fn new(data_start: u64, header: OorHeader) -> OorPacketReader {
        OorPacketReader {
            offset: data_start,
            header,
            pending: Vec::new(),
            queue: std::collections::VecDeque::new(),
            finished: false,
        }
    }

    /// Restarts the walk at a page boundary, dropping any partial state.
    pub fn reset(&mut self, data_start: u64) {
        self.offset = data_start;
        self.pending.clear();
        self.queue.clear();
        self.finished = false;
    }

    /// Returns the next whole audio packet, or `None` at end of stream.
    pub fn next_packet(&mut self, src: &mut dyn ByteSource) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(packet) = self.queue.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished || self.offset >= src.byte_len() {
                return Ok(None);
            }
            self.read_page(src)?;
        }
    }

    fn read_page(&mut self, src: &mut dyn ByteSource) -> Result<()> {
        // Page prefix + size table fit comfortably in a small window; packets follow the
        // aligned table.
        let mut head = vec![0u8; 0x400.min((src.byte_len() - self.offset) as usize)];
        if head.is_empty() {
            self.finished = true;
            return Ok(());
        }
        src.read_exact_at(self.offset, &mut head)?;

        let mut bs = BitReaderLtr::new(&head);
        let mut page = OorPage::default();
        let mut sizes = OorSizes::default();
        read_page(&mut bs, &mut page);
        read_sizes(&mut bs, &mut sizes);

        if !validate_audio_page(&page, &sizes, Some(&self.header)) {
            return decode_error("vorbis: invalid oor audio page");
        }

        let mut data_offset = self.offset + (bs.pos() / 8) as u64;

        for (i, &variable) in sizes.variable_packet_size.iter().enumerate() {
            let size = (sizes.base_packet_size + variable) as usize;
            let mut packet = vec![0u8; size];
            src.read_exact_at(data_offset, &mut packet)?;
            data_offset += size as u64;

            let first = i == 0;
            let last = i == sizes.packet_count - 1;

            // CONTINUED glues the first packet onto the carried partial; PARTIAL leaves the
            // last packet pending for the next page.
            if first && page.flags & OOR_FLAG_CONTINUED != 0 {
                self.pending.extend_from_slice(&packet);
                if !(last && page.flags & OOR_FLAG_PARTIAL != 0) {
                    self.queue.push_back(std::mem::take(&mut self.pending));
                }
            }
            else if last && page.flags & OOR_FLAG_PARTIAL != 0 {
                if !self.pending.is_empty() {
                    // A stray partial with carried data means framing was lost.
                    return decode_error("vorbis: oor partial packet mismatch");
                }
                self.pending = packet;
            }
            else {
                self.queue.push_back(packet);
            }
        }

        if page.flags & OOR_FLAG_EOS != 0 {
            self.finished = true;
        }
        self.offset = data_offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    /// MSB-first bit collector for building test pages.
    #[derive(Default)]
    struct MsbWriter {
        bits: Vec<bool>,
    }

    impl MsbWriter {
        fn put(&mut self, value: u32, width: u32) {
            for i in (0..width).rev() {
                self.bits.push(value & (1 << i) != 0);
            }
        }

        fn align(&mut self) {
            while self.bits.len() % 8 != 0 {
                self.bits.push(false);
            }
        }

        fn bytes(&self) -> Vec<u8> {
            let mut out = vec![0u8; (self.bits.len() + 7) / 8];
            for (i, &bit) in self.bits.iter().enumerate() {
                if bit {
                    out[i / 8] |= 0x80 >> (i % 8);
                }
            }
            out
        }
    }

    fn build_audio_page(flags: u32, packets: &[&[u8]]) -> Vec<u8> {
        let mut w = MsbWriter::default();
        w.put(0, 2); /* version */
        w.put(flags, 4);
        w.put(8, 4); /* vps_bits */
        w.put(0, 1);
        w.put(packets.len() as u32, 8);
        w.put(0, 2); /* bps_selector 0 -> base 0 */
        for packet in packets {
            w.put(packet.len() as u32, 8);
        }
        w.align();
        let mut page = w.bytes();
        for packet in packets {
            page.extend_from_slice(packet);
        }
        page
    }

    #[test]
    fn verify_header_page_parse() {
        let mut w = MsbWriter::default();
        w.put(0, 2); /* page version 0 */
        w.put(OOR_FLAG_BOS, 4);
        /* header follows, 6 bits into the byte */
        w.put(0, 2); /* pre_padding */
        w.put(0, 2); /* version */
        w.put(2, 3); /* channels */
        w.put(2, 2); /* sr_selector -> 44100 */
        w.put(11, 4); /* blocksize1_exp */
        w.put(8, 4); /* blocksize0_exp */
        w.put(1, 1); /* framing */
        w.align();

        let bytes = w.bytes();
        let mut bs = BitReaderLtr::new(&bytes);
        let mut page = OorPage::default();
        read_page(&mut bs, &mut page);
        let mut hdr = OorHeader::default();
        read_header(&mut bs, &mut hdr);

        assert!(validate_header_page(&page, &hdr));
        assert_eq!(hdr.channels, 2);
        assert_eq!(hdr.sample_rate, 44100);
        assert_eq!(hdr.blocksize1_exp, 11);
        assert_eq!(hdr.blocksize0_exp, 8);
    }

    #[test]
    fn verify_audio_packets_across_pages() {
        let header = OorHeader { version: 0, ..Default::default() };
        let mut data = build_audio_page(0, &[b"alpha", b"beta!"]);
        let second = build_audio_page(OOR_FLAG_EOS, &[b"gamma"]);
        data.extend_from_slice(&second);

        let mut src = MemSource::new(data);
        let mut reader = OorPacketReader::new(0, header);
        assert_eq!(reader.next_packet(&mut src).unwrap().unwrap(), b"alpha");
        assert_eq!(reader.next_packet(&mut src).unwrap().unwrap(), b"beta!");
        assert_eq!(reader.next_packet(&mut src).unwrap().unwrap(), b"gamma");
        assert!(reader.next_packet(&mut src).unwrap().is_none());
    }

    #[test]
    fn verify_partial_packet_reassembly() {
        let header = OorHeader { version: 0, ..Default::default() };
        let mut data = build_audio_page(OOR_FLAG_PARTIAL, &[b"whole", b"split-he"]);
        let second = build_audio_page(OOR_FLAG_CONTINUED | OOR_FLAG_EOS, &[b"ad"]);
        data.extend_from_slice(&second);

        let mut src = MemSource::new(data);
        let mut reader = OorPacketReader::new(0, header);
        assert_eq!(reader.next_packet(&mut src).unwrap().unwrap(), b"whole");
        assert_eq!(reader.next_packet(&mut src).unwrap().unwrap(), b"split-head");
        assert!(reader.next_packet(&mut src).unwrap().is_none());
    }

    #[test]
    fn verify_setup_info_validation() {
        let sizes = OorSizes {
            packet_count: 2,
            base_packet_size: 0,
            variable_packet_size: vec![1, 0],
            ..Default::default()
        };
        let by_id = OorSetup { setup_type: 1, codebook_id: 3 };
        assert!(validate_setup_info(&sizes, &by_id));

        let inline = OorSetup { setup_type: 1, codebook_id: 0 };
        assert!(!validate_setup_info(&sizes, &inline));
    }
}
