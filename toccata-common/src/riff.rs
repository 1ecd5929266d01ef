// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `riff` module provides RIFF chunk helpers and the WAVEFORMATEXTENSIBLE subformat
//! GUIDs shared by the RIFF-family containers.

use toccata_core::errors::Result;
use toccata_core::io::ReadBytes;

/// A 16-byte GUID in its wire layout: three little-endian groups plus 8 raw bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Reads a GUID from the stream.
    pub fn read<B: ReadBytes>(reader: &mut B) -> Result<Guid> {
        let data1 = reader.read_u32()?;
        let data2 = reader.read_u16()?;
        let data3 = reader.read_u16()?;
        let mut data4 = [0u8; 8];
        reader.read_buf_exact(&mut data4)?;
        Ok(Guid { data1, data2, data3, data4 })
    }

    const fn waveformatex(data1: u32) -> Guid {
        // The KSDATAFORMAT_SUBTYPE family shares its tail with the wave format tag in
        // data1.
        Guid {
            data1,
            data2: 0x0000,
            data3: 0x0010,
            data4: [0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71],
        }
    }
}

/// KSDATAFORMAT_SUBTYPE_PCM.
pub const SUBTYPE_PCM: Guid = Guid::waveformatex(0x0000_0001);
/// KSDATAFORMAT_SUBTYPE_IEEE_FLOAT.
pub const SUBTYPE_IEEE_FLOAT: Guid = Guid::waveformatex(0x0000_0003);
/// KSDATAFORMAT_SUBTYPE_ATRAC3plus.
pub const SUBTYPE_ATRAC3P: Guid = Guid {
    data1: 0xe923_aabf,
    data2: 0xcb58,
    data3: 0x4471,
    data4: [0xa1, 0x19, 0xff, 0xfa, 0x01, 0xe4, 0xce, 0x62],
};
/// KSDATAFORMAT_SUBTYPE_ATRAC9.
pub const SUBTYPE_ATRAC9: Guid = Guid {
    data1: 0x47e1_42d2,
    data2: 0x36ba,
    data3: 0x4d8d,
    data4: [0x88, 0xfc, 0x61, 0x65, 0x4f, 0x8c, 0x83, 0x6c],
};

/// Reads a four-character chunk tag.
pub fn read_fourcc<B: ReadBytes>(reader: &mut B) -> Result<[u8; 4]> {
    reader.read_quad_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::BufReader;

    #[test]
    fn verify_guid_wire_layout() {
        // KSDATAFORMAT_SUBTYPE_PCM as it appears on the wire.
        let bytes = [
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00,
            0x38, 0x9b, 0x71,
        ];
        let mut reader = BufReader::new(&bytes);
        assert_eq!(Guid::read(&mut reader).unwrap(), SUBTYPE_PCM);
    }

    #[test]
    fn verify_subtype_distinct() {
        assert_ne!(SUBTYPE_PCM, SUBTYPE_IEEE_FLOAT);
        assert_ne!(SUBTYPE_ATRAC3P, SUBTYPE_ATRAC9);
    }
}
