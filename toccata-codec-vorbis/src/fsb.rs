// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FSB packet framing: each audio packet is prefixed with a 16-bit little-endian size. The
//! setup packet is external, referenced by `setup_id` (see [`crate::codebooks`]).

use toccata_core::errors::Result;
use toccata_core::io::ByteSource;

/// Reads the packet at `*offset`, advancing it. `None` on EOF or end padding.
pub fn next_packet(src: &mut dyn ByteSource, offset: &mut u64) -> Result<Option<Vec<u8>>> {
    let mut head = [0u8; 2];
    if src.read_at(*offset, &mut head)? != 2 {
        return Ok(None);
    }
    let size = usize::from(u16::from_le_bytes(head));
    *offset += 2;

    if size == 0 || size == 0xffff {
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
    fn verify_packet_framing() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u16.to_le_bytes());
        data.extend_from_slice(b"hello");
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(b"hi");
        data.extend_from_slice(&0u16.to_le_bytes());

        let mut src = MemSource::new(data);
        let mut offset = 0;
        assert_eq!(next_packet(&mut src, &mut offset).unwrap().unwrap(), b"hello");
        assert_eq!(next_packet(&mut src, &mut offset).unwrap().unwrap(), b"hi");
        assert!(next_packet(&mut src, &mut offset).unwrap().is_none());
    }
}
