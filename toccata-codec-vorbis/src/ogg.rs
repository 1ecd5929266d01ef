// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A minimal Ogg page walker.
//!
//! Used by the variants that keep genuine Ogg framing: SK streams are Ogg pages with the
//! `OggS` capture pattern replaced by `\x11SK\x10` and "vorbis" replaced by "SK" in header
//! packets; MUPS streams arrive here already restored to plain Ogg by the container's
//! deblocker patching.

use toccata_core::errors::{decode_error, Result};
use toccata_core::io::ByteSource;

/// Offset of the segment count within a page, and of the segment table after it.
const PAGE_SEGMENTS: u64 = 0x1a;
const PAGE_TABLE: u64 = 0x1b;

/// Location of one packet inside a page, plus the page's packet count.
#[derive(Clone, Copy, Debug, Default)]
pub struct PagePacket {
    pub packet_offset: u64,
    pub packet_size: usize,
    pub page_packets: usize,
    /// Offset one past the page (start of the next page).
    pub page_end: u64,
}

/// Walks Ogg-framed packets from a source, tolerating a swapped capture pattern.
pub struct PageWalker {
    magic: [u8; 4],
    /// Offset of the current page.
    page_offset: u64,
    /// Next packet index within the current page.
    current_packet: usize,
}

impl PageWalker {
    /// A walker over standard `OggS` pages.
    pub fn new(start_offset: u64) -> PageWalker {
        PageWalker { magic: *b"OggS", page_offset: start_offset, current_packet: 0 }
    }

    /// A walker over pages with a custom capture pattern.
    pub fn with_magic(start_offset: u64, magic: [u8; 4]) -> PageWalker {
        PageWalker { magic, page_offset: start_offset, current_packet: 0 }
    }

    /// Repositions the walker at a page boundary.
    pub fn seek_page(&mut self, offset: u64) {
        self.page_offset = offset;
        self.current_packet = 0;
    }

    /// Reads the page at `offset` and locates packet `target` within it (`None` returns the
    /// whole data region as one span).
    pub fn page_info(
        &self,
        src: &mut dyn ByteSource,
        offset: u64,
        target: Option<usize>,
    ) -> Result<PagePacket> {
        let mut head = [0u8; 4];
        src.read_exact_at(offset, &mut head)?;
        if head != self.magic {
            return decode_error("vorbis: missing page capture pattern");
        }

        let mut segments = [0u8; 1];
        src.read_exact_at(offset + PAGE_SEGMENTS, &mut segments)?;
        let segments = usize::from(segments[0]);

        let mut table = vec![0u8; segments];
        src.read_exact_at(offset + PAGE_TABLE, &mut table)?;

        let data_start = offset + PAGE_TABLE + segments as u64;
        let mut result = PagePacket::default();
        let mut total_size = 0usize;
        let mut current_offset = data_start;
        let mut current_size = 0usize;
        let mut page_packets = 0usize;

        for &segment_size in &table {
            total_size += usize::from(segment_size);
            current_size += usize::from(segment_size);

            // A lace value under 0xFF closes the packet.
            if segment_size != 0xff {
                page_packets += 1;

                if target == Some(page_packets - 1) {
                    result.packet_offset = current_offset;
                    result.packet_size = current_size;
                }

                current_offset += current_size as u64;
                current_size = 0;
            }
        }

        match target {
            Some(index) if index >= page_packets => {
                return decode_error("vorbis: packet index past page");
            }
            None => {
                result.packet_offset = data_start;
                result.packet_size = total_size;
            }
            _ => (),
        }

        result.page_packets = page_packets;
        result.page_end = data_start + total_size as u64;
        Ok(result)
    }

    /// Returns the next packet's bytes, advancing across pages. `None` at end of stream.
    pub fn next_packet(&mut self, src: &mut dyn ByteSource) -> Result<Option<Vec<u8>>> {
        if self.page_offset >= src.byte_len() {
            return Ok(None);
        }

        let info = self.page_info(src, self.page_offset, Some(self.current_packet))?;
        self.current_packet += 1;

        let mut packet = vec![0u8; info.packet_size];
        src.read_exact_at(info.packet_offset, &mut packet)?;

        if self.current_packet >= info.page_packets {
            self.page_offset = info.page_end;
            self.current_packet = 0;
        }

        Ok(Some(packet))
    }

    /// Reads a header packet and restores the standard "vorbis" identifier that obfuscated
    /// streams replace with a short tag.
    pub fn rebuild_header(
        &self,
        src: &mut dyn ByteSource,
        packet_offset: u64,
        packet_size: usize,
        id_len: usize,
    ) -> Result<Vec<u8>> {
        if packet_size < 1 + id_len {
            return decode_error("vorbis: header packet too small");
        }

        let mut packet_type = [0u8; 1];
        src.read_exact_at(packet_offset, &mut packet_type)?;

        let mut buf = Vec::with_capacity(7 + packet_size - 1 - id_len);
        buf.push(packet_type[0]);
        buf.extend_from_slice(b"vorbis");

        let rest = packet_size - 1 - id_len;
        let mut tail = vec![0u8; rest];
        src.read_exact_at(packet_offset + 1 + id_len as u64, &mut tail)?;
        buf.extend_from_slice(&tail);

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    /// Builds a minimal page: header + segment table + packet data.
    fn build_page(magic: &[u8; 4], packets: &[&[u8]]) -> Vec<u8> {
        let mut page = Vec::new();
        page.extend_from_slice(magic);
        page.extend_from_slice(&[0u8; 0x16]); /* version..checksum, unchecked here */

        let mut table = Vec::new();
        for packet in packets {
            let mut left = packet.len();
            while left >= 0xff {
                table.push(0xff);
                left -= 0xff;
            }
            table.push(left as u8);
        }
        page.push(table.len() as u8);
        page.extend_from_slice(&table);
        for packet in packets {
            page.extend_from_slice(packet);
        }
        page
    }

    #[test]
    fn verify_packet_extraction_across_pages() {
        let mut data = build_page(b"OggS", &[b"first", b"second!"]);
        data.extend_from_slice(&build_page(b"OggS", &[b"third"]));
        let mut src = MemSource::new(data);

        let mut walker = PageWalker::new(0);
        assert_eq!(walker.next_packet(&mut src).unwrap().unwrap(), b"first");
        assert_eq!(walker.next_packet(&mut src).unwrap().unwrap(), b"second!");
        assert_eq!(walker.next_packet(&mut src).unwrap().unwrap(), b"third");
        assert!(walker.next_packet(&mut src).unwrap().is_none());
    }

    #[test]
    fn verify_long_lacing() {
        let long_packet = vec![0x5a; 0x1fe];
        let data = build_page(b"OggS", &[&long_packet, b"tail"]);
        let mut src = MemSource::new(data);

        let mut walker = PageWalker::new(0);
        assert_eq!(walker.next_packet(&mut src).unwrap().unwrap(), long_packet);
        assert_eq!(walker.next_packet(&mut src).unwrap().unwrap(), b"tail");
    }

    #[test]
    fn verify_swapped_magic() {
        let data = build_page(b"\x11SK\x10", &[b"packet"]);
        let mut src = MemSource::new(data);

        let mut walker = PageWalker::with_magic(0, *b"\x11SK\x10");
        assert_eq!(walker.next_packet(&mut src).unwrap().unwrap(), b"packet");

        let mut plain = PageWalker::new(0);
        let mut src2 = MemSource::new(build_page(b"\x11SK\x10", &[b"packet"]));
        assert!(plain.next_packet(&mut src2).is_err());
    }

    #[test]
    fn verify_header_identifier_restoration() {
        // An obfuscated header: type byte + "SK" + payload.
        let packet = b"\x01SKrest-of-header";
        let data = build_page(b"\x11SK\x10", &[packet]);
        let mut src = MemSource::new(data);

        let walker = PageWalker::with_magic(0, *b"\x11SK\x10");
        let info = walker.page_info(&mut src, 0, Some(0)).unwrap();
        let rebuilt = walker
            .rebuild_header(&mut src, info.packet_offset, info.packet_size, 2)
            .unwrap();

        assert_eq!(&rebuilt[..7], b"\x01vorbis");
        assert_eq!(&rebuilt[7..], b"rest-of-header");
    }
}
