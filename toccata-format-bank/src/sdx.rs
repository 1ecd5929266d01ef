// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Treyarch SDX indexes (the binary sibling of the text `.snd` lists).
//!
//! A flat array of 0x58-byte records: a 0x30-byte ASCII sound name, then little-endian
//! fields locating the sample in the paired `.vbc` body. The VBC payload is PS2 ADPCM with no
//! in-tree decoder, so the index contributes subsong enumeration and naming.

use toccata_core::audio::{AudioStream, StreamInfo};
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::{read_magic, CompanionRole, FormatDescriptor, OpenOptions};
use toccata_core::io::{ByteSource, ReadBytes, SliceSource, SourceReader};

const RECORD_SIZE: u64 = 0x58;

pub const SDX_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "sdx",
    description: "Treyarch SDX",
    score: score,
    open: open,
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    /* records start with a printable name and a zero dword at 0x30 */
    if src.byte_len() < RECORD_SIZE || src.byte_len() % RECORD_SIZE != 0 {
        return Ok(0);
    }
    let head = read_magic::<0x38>(src)?;
    let ascii_name = head[0] != 0 && head[..8].iter().all(|&b| b < 0x80 && (b == 0 || b >= 0x20));
    let zero_dword = head[0x30..0x34] == [0, 0, 0, 0];
    Ok(if ascii_name && zero_dword { 60 } else { 0 })
}

struct SdxRecord {
    name: String,
    offset: u64,
    size: u64,
    sample_rate: u32,
    flags: u32,
}

fn read_record(src: &mut dyn ByteSource, index: u64) -> Result<SdxRecord> {
    let base = index * RECORD_SIZE;

    let mut name_bytes = [0u8; 0x30];
    src.read_exact_at(base, &mut name_bytes)?;
    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
    let name = name_bytes[..end].iter().map(|&b| char::from(b)).collect();

    let mut reader = SourceReader::new_at(src, base + 0x30);
    let _id = reader.read_u32()?;
    let offset = u64::from(reader.read_u32()?);
    let size = u64::from(reader.read_u32()?);
    let sample_rate = reader.read_u32()?;
    let flags = reader.read_u32()?;

    Ok(SdxRecord { name, offset, size, sample_rate, flags })
}

fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    if score(src.as_mut())? == 0 {
        return decode_error("sdx: not an sdx index");
    }

    let total = (src.byte_len() / RECORD_SIZE) as u32;
    let subsong = opts.subsong();
    if subsong > total {
        return decode_error("sdx: subsong out of range");
    }

    let record = read_record(src.as_mut(), u64::from(subsong - 1))?;
    let channels = if record.flags & 0x01 != 0 { 2 } else { 1 };

    let mut info = StreamInfo::new(channels, record.sample_rate.max(1), 0);
    info.subsong = subsong;
    info.subsong_count = total;
    if !record.name.is_empty() {
        info.name = Some(record.name);
    }

    /* carve the sample from the paired body */
    let body = opts.companion(CompanionRole::Paired)?;
    let _sample = SliceSource::new(body, record.offset, record.size);

    // VBC samples are PS2 ADPCM, a vendor codec with no in-tree decoder.
    unsupported_error("sdx: ps2 adpcm payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    fn build_index(names: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let mut record = vec![0u8; RECORD_SIZE as usize];
            record[..name.len()].copy_from_slice(name.as_bytes());
            record[0x34..0x38].copy_from_slice(&((i as u32) * 0x1000).to_le_bytes());
            record[0x38..0x3c].copy_from_slice(&0x800u32.to_le_bytes());
            record[0x3c..0x40].copy_from_slice(&22050u32.to_le_bytes());
            out.extend_from_slice(&record);
        }
        out
    }

    #[test]
    fn verify_record_walk() {
        let mut src = MemSource::new(build_index(&["intro", "combat_a"]));
        assert!(score(&mut src).unwrap() > 0);

        let record = read_record(&mut src, 1).unwrap();
        assert_eq!(record.name, "combat_a");
        assert_eq!(record.offset, 0x1000);
        assert_eq!(record.size, 0x800);
        assert_eq!(record.sample_rate, 22050);
    }

    #[test]
    fn verify_dispatch_is_unsupported() {
        let src = Box::new(MemSource::new(build_index(&["one"])));
        let mut opts = OpenOptions::default();
        opts.companions.push((
            CompanionRole::Paired,
            Box::new(MemSource::new(vec![0u8; 0x2000])),
        ));
        assert!(matches!(
            open(src, &opts),
            Err(toccata_core::errors::Error::Unsupported(_))
        ));
    }
}
