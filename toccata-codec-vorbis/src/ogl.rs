// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OGL packet framing: a 16-bit field of `(size << 2) | flags` per packet, flag 0x01 marking
//! the identification packet. The header triad precedes the audio packets in sequence.

use toccata_core::errors::Result;
use toccata_core::io::ByteSource;

/// Reads the 16-bit header at `offset`, returning `(size, flags)`.
pub fn packet_header(src: &mut dyn ByteSource, offset: u64) -> Result<Option<(usize, u16)>> {
    let mut head = [0u8; 2];
    if src.read_at(offset, &mut head)? != 2 {
        return Ok(None);
    }
    let raw = u16::from_le_bytes(head);
    Ok(Some(((raw >> 2) as usize, raw & 0x03)))
}

/// Reads the packet at `*offset`, advancing it. `None` on EOF or end padding.
pub fn next_packet(src: &mut dyn ByteSource, offset: &mut u64) -> Result<Option<Vec<u8>>> {
    let size = match packet_header(src, *offset)? {
        Some((size, _)) => size,
        None => return Ok(None),
    };
    *offset += 2;

    if size == 0 || size == 0x3fff {
        return Ok(None);
    }

    let mut packet = vec![0u8; size];
    if src.read_at(*offset, &mut packet)? != size {
        return Ok(None);
    }
    *offset += size as u64;
    Ok(Some(packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_size_and_flags_split() {
        let mut data = Vec::new();
        data.extend_from_slice(&((6u16 << 2) | 1).to_le_bytes());
        data.extend_from_slice(b"packet");

        let mut src = MemSource::new(data);
        assert_eq!(packet_header(&mut src, 0).unwrap(), Some((6, 1)));

        let mut offset = 0;
        assert_eq!(next_packet(&mut src, &mut offset).unwrap().unwrap(), b"packet");
    }
}
