// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Koei Tecmo KTSR ("KTSL2 sound resource") reader.
//!
//! A KTSR bank is a `KTSR` header (typed by a hash id) followed by hash-typed entry chunks.
//! Sound entries are either internal (data inside the bank) or external (data in a paired
//! `ktsl2stbin` stream file, itself a KTSR). External stream data may be Blowfish-ECB
//! encrypted, with a length-prefixed key stored in the stream file's header; sound and config
//! names are XOR-scrambled with an LCG seeded by the bank's audio id.
//!
//! The payload codecs are Koei vendor formats surfaced as unsupported here; locating streams,
//! decrypting them and naming subsongs is this reader's job.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use log::debug;

use toccata_common::crypto::BlowfishSource;
use toccata_core::audio::{AudioStream, StreamInfo};
use toccata_core::errors::{decode_error, unsupported_error, Result};
use toccata_core::formats::{read_magic, CompanionRole, FormatDescriptor, OpenOptions};
use toccata_core::io::{ByteSource, ReadBytes, SliceSource, SourceReader};

/* bank type hashes ("as" memory bank, "st" stream bank, "gc" global config) */
const KTSR_HASH_AS: u32 = 0x777b_481a;
const KTSR_HASH_ST: u32 = 0x0294_ddfc;

/* sound entry chunk hashes */
const CHUNK_EXTERNAL: [u32; 6] =
    [0x38d0_437d, 0x3dea_478d, 0xdf92_529f, 0x6422_007c, 0x793a_1fd7, 0xa0f4_fc6c];
const CHUNK_INTERNAL: [u32; 5] =
    [0x41fd_bd4e, 0x6ff2_73f9, 0x6fca_b62e, 0x6ad8_6fe9, 0x1025_0527];
const CHUNK_CONFIG: u32 = 0xbd88_8c36;

/// The registry descriptor for KTSR banks.
pub const KTSR_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "ktsr",
    description: "Koei Tecmo KTSR",
    score: score,
    open: open,
};

fn score(src: &mut dyn ByteSource) -> Result<u8> {
    let magic = read_magic::<4>(src)?;
    Ok(if &magic == b"KTSR" { 190 } else { 0 })
}

#[derive(Clone, Default)]
struct KtsrSound {
    sound_id: u32,
    channels: u32,
    sample_rate: u32,
    num_samples: u32,
    channel_layout: u32,
    is_external: bool,
    stream_offset: u64,
    stream_size: u64,
    format: u32,
    name: Option<String>,
}

struct KtsrBank {
    platform: u8,
    audio_id: u32,
    sounds: Vec<KtsrSound>,
}

/// Unscrambles a name string: an LCG keyed on the bank's audio id, one byte per output.
fn decrypt_name(buf: &mut [u8], seed: u32) {
    let mut seed = seed;
    for byte in buf.iter_mut() {
        if *byte == 0 {
            break;
        }
        seed = 0x343fd_u32.wrapping_mul(seed).wrapping_add(0x269ec3);
        *byte ^= (seed >> 16) as u8;
        if *byte == 0 {
            break;
        }
    }
}

fn read_name(src: &mut dyn ByteSource, offset: u64, decrypt: Option<u32>) -> Option<String> {
    let mut buf = [0u8; 255];
    let got = src.read_at(offset, &mut buf).ok()?;
    if let Some(seed) = decrypt {
        decrypt_name(&mut buf[..got], seed);
    }
    let end = buf.iter().position(|&b| b == 0)?;
    if end == 0 {
        return None;
    }
    Some(buf[..end].iter().map(|&b| char::from(b)).collect())
}

impl KtsrBank {
    fn parse(src: &mut dyn ByteSource) -> Result<KtsrBank> {
        let mut reader = SourceReader::new(src);

        let mut magic = [0u8; 4];
        reader.read_buf_exact(&mut magic)?;
        if &magic != b"KTSR" {
            return decode_error("ktsr: missing KTSR signature");
        }
        let bank_type = reader.read_be_u32()?;
        if bank_type != KTSR_HASH_AS {
            return unsupported_error("ktsr: not a memory bank");
        }

        /* 08: version, 0a: unknown, 0b: platform, 0c: audio id */
        reader.ignore_bytes(3)?;
        let platform = reader.read_u8()?;
        let audio_id = reader.read_u32()?;
        reader.ignore_bytes(8)?; /* nulls */
        let size1 = reader.read_u32()?;
        let size2 = reader.read_u32()?;
        if size1 != size2 || u64::from(size1) > reader.byte_len() {
            return decode_error("ktsr: inconsistent bank size");
        }
        let end = u64::from(size1);

        /* typed chunks from 0x40 until the declared end */
        let mut sounds: Vec<KtsrSound> = Vec::new();
        let mut offset = 0x40u64;
        while offset + 8 <= end {
            reader.seek_to(offset);
            let chunk_type = reader.read_be_u32()?;
            let chunk_size = u64::from(reader.read_u32()?);
            if chunk_size < 8 {
                return decode_error("ktsr: bad chunk size");
            }

            if CHUNK_EXTERNAL.contains(&chunk_type) {
                sounds.push(parse_external(&mut reader, offset)?);
            }
            else if CHUNK_INTERNAL.contains(&chunk_type) {
                sounds.push(parse_internal(&mut reader, offset)?);
            }

            offset += chunk_size;
        }

        /* a second pass links config chunks to sounds for names */
        let mut offset = 0x40u64;
        while offset + 8 <= end {
            reader.seek_to(offset);
            let chunk_type = reader.read_be_u32()?;
            let chunk_size = u64::from(reader.read_u32()?);
            if chunk_size < 8 {
                break;
            }

            if chunk_type == CHUNK_CONFIG {
                let stream_id = reader.read_u32()?;
                let config_flags = reader.read_u32()?;
                reader.seek_to(offset + 0x28);
                let name_offset = u64::from(reader.read_u32()?);

                if name_offset > 0 {
                    if let Some(sound) =
                        sounds.iter_mut().find(|sound| sound.sound_id == stream_id)
                    {
                        let decrypt = (config_flags & 0x0200 != 0).then_some(audio_id);
                        sound.name = read_name(reader_src(&mut reader), offset + name_offset, decrypt);
                    }
                }
            }

            offset += chunk_size;
        }

        if sounds.is_empty() {
            return decode_error("ktsr: bank has no subsongs");
        }

        Ok(KtsrBank { platform, audio_id, sounds })
    }
}

/// The reader borrows the source; chunks occasionally need raw reads at absolute offsets.
fn reader_src<'a, 'b>(reader: &'a mut SourceReader<'b>) -> &'a mut dyn ByteSource {
    reader.source_mut()
}

fn parse_external(reader: &mut SourceReader<'_>, offset: u64) -> Result<KtsrSound> {
    /* 08: sound id, 0c: channels, 14: external codec, 20: codec value,
     * 28: channel layout, 30/34 (or 34/38): stream offset/size */
    let sound_id = reader.read_u32()?;
    let mut sound = KtsrSound { sound_id, is_external: true, ..Default::default() };

    sound.channels = reader.read_u32()?;
    reader.seek_to(offset + 0x14);
    sound.format = reader.read_u32()?;
    reader.seek_to(offset + 0x28);
    sound.channel_layout = reader.read_u32()?;

    reader.seek_to(offset + 0x30);
    let offset_a = reader.read_u32()?;
    let size_a = reader.read_u32()?;
    let size_b = reader.read_u32()?;

    /* two known sub-layouts shift these fields by 4 */
    if size_a != 0 && offset_a != 0 {
        sound.stream_offset = u64::from(offset_a);
        sound.stream_size = u64::from(size_a);
    }
    else {
        sound.stream_offset = u64::from(size_a);
        sound.stream_size = u64::from(size_b);
    }

    Ok(sound)
}

fn parse_internal(reader: &mut SourceReader<'_>, offset: u64) -> Result<KtsrSound> {
    /* 08: sound id, 0c: channels, 10: sample rate, 14: samples, 24: layout, 28: extra */
    let sound_id = reader.read_u32()?;
    let mut sound = KtsrSound { sound_id, is_external: false, ..Default::default() };

    sound.channels = reader.read_u32()?;
    sound.sample_rate = reader.read_u32()?;
    sound.num_samples = reader.read_u32()?;
    reader.seek_to(offset + 0x24);
    sound.channel_layout = reader.read_u32()?;
    let sub_offset = u64::from(reader.read_u32()?) + offset;

    /* first sub-stream: offset/size tables relative to the chunk */
    reader.seek_to(sub_offset);
    let starts_offset = u64::from(reader.read_u32()?) + offset;
    let sizes_offset = u64::from(reader.read_u32()?) + offset;
    reader.seek_to(starts_offset);
    sound.stream_offset = u64::from(reader.read_u32()?) + offset;
    reader.seek_to(sizes_offset);
    sound.stream_size = u64::from(reader.read_u32()?);

    Ok(sound)
}

/// An opened KTSR subsong, reported but with a vendor codec.
fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    let bank = KtsrBank::parse(src.as_mut())?;

    let total = bank.sounds.len() as u32;
    let subsong = opts.subsong();
    if subsong > total {
        return decode_error("ktsr: subsong out of range");
    }
    let sound = &bank.sounds[(subsong - 1) as usize];

    let mut info = StreamInfo::new(
        sound.channels.max(1) as usize,
        sound.sample_rate,
        u64::from(sound.num_samples),
    );
    info.subsong = subsong;
    info.subsong_count = total;
    info.name = sound.name.clone();

    /* carve the stream's bytes, decrypting external banks when they carry a key */
    let _stream: Box<dyn ByteSource> = if sound.is_external {
        let stream_bank = opts.companion(CompanionRole::StreamData)?;
        open_external_stream(stream_bank, sound.stream_offset, sound.stream_size)?
    }
    else {
        Box::new(SliceSource::new(src, sound.stream_offset, sound.stream_size))
    };

    debug!(
        "ktsr: located subsong {} (platform {:#x}, id {:#x}, format {:#x})",
        subsong, bank.platform, bank.audio_id, sound.format
    );

    // The located payloads are Koei vendor codecs (KTSS/KTAC/ATRAC9 families) with no
    // in-tree decoder.
    unsupported_error("ktsr: vendor payload codec")
}

/// Validates the stream bank and wraps it in the Blowfish filter when its header carries a
/// key (a length-prefixed blob at 0x20).
fn open_external_stream(
    mut bank: Box<dyn ByteSource>,
    offset: u64,
    size: u64,
) -> Result<Box<dyn ByteSource>> {
    let magic = read_magic::<4>(bank.as_mut())?;
    if &magic != b"KTSR" {
        return decode_error("ktsr: stream bank missing KTSR signature");
    }
    let mut reader = SourceReader::new_at(bank.as_mut(), 0x04);
    let bank_type = reader.read_be_u32()?;
    if bank_type != KTSR_HASH_ST {
        debug!("ktsr: stream bank has unexpected type {:#x}", bank_type);
    }

    let mut key = [0u8; 0x20];
    bank.read_exact_at(0x20, &mut key)?;

    let key_len = usize::from(key[0]);
    let decrypted: Box<dyn ByteSource> = if key_len > 0 && key_len < key.len() {
        Box::new(BlowfishSource::new(bank, &key[1..1 + key_len])?)
    }
    else {
        bank
    };

    Ok(Box::new(SliceSource::new(decrypted, offset, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    fn push_chunk(out: &mut Vec<u8>, chunk_type: u32, body: &[u8]) {
        out.extend_from_slice(&chunk_type.to_be_bytes());
        out.extend_from_slice(&((body.len() + 8) as u32).to_le_bytes());
        out.extend_from_slice(body);
    }

    fn build_bank(sounds: usize) -> Vec<u8> {
        let mut chunks = Vec::new();
        for i in 0..sounds {
            /* minimal internal sound entry; offsets below are chunk-relative minus the
             * 8-byte chunk prefix */
            let mut body = vec![0u8; 0x40];
            body[0x00..0x04].copy_from_slice(&(100 + i as u32).to_le_bytes()); /* id */
            body[0x04..0x08].copy_from_slice(&2u32.to_le_bytes()); /* channels */
            body[0x08..0x0c].copy_from_slice(&48000u32.to_le_bytes());
            body[0x0c..0x10].copy_from_slice(&1024u32.to_le_bytes());
            body[0x1c..0x20].copy_from_slice(&0u32.to_le_bytes()); /* layout (chunk+0x24) */
            body[0x20..0x24].copy_from_slice(&0x30u32.to_le_bytes()); /* sub tables (chunk+0x30) */
            body[0x28..0x2c].copy_from_slice(&0x38u32.to_le_bytes()); /* starts (chunk+0x38) */
            body[0x2c..0x30].copy_from_slice(&0x3cu32.to_le_bytes()); /* sizes (chunk+0x3c) */
            body[0x30..0x34].copy_from_slice(&0x100u32.to_le_bytes()); /* stream offset */
            body[0x34..0x38].copy_from_slice(&0x80u32.to_le_bytes()); /* stream size */
            push_chunk(&mut chunks, CHUNK_INTERNAL[0], &body);
        }

        let total = 0x40 + chunks.len();
        let mut bank = Vec::with_capacity(total);
        bank.extend_from_slice(b"KTSR");
        bank.extend_from_slice(&KTSR_HASH_AS.to_be_bytes());
        bank.extend_from_slice(&[0, 0, 0, 1]); /* version + platform PC */
        bank.extend_from_slice(&0x1234_5678u32.to_le_bytes()); /* audio id */
        bank.extend_from_slice(&[0u8; 8]);
        bank.extend_from_slice(&(total as u32).to_le_bytes());
        bank.extend_from_slice(&(total as u32).to_le_bytes());
        bank.resize(0x40, 0);
        bank.extend_from_slice(&chunks);
        bank
    }

    #[test]
    fn verify_probe() {
        let mut src = MemSource::new(build_bank(1));
        assert_eq!(score(&mut src).unwrap(), 190);
    }

    #[test]
    fn verify_subsong_walk_and_dispatch() {
        let mut src = MemSource::new(build_bank(3));
        let bank = KtsrBank::parse(&mut src).unwrap();
        assert_eq!(bank.sounds.len(), 3);
        assert_eq!(bank.sounds[1].sound_id, 101);
        assert_eq!(bank.sounds[0].channels, 2);
        assert_eq!(bank.sounds[0].sample_rate, 48000);

        /* vendor codecs surface as unsupported, not as a parse failure */
        let src = Box::new(MemSource::new(build_bank(1)));
        let result = open(src, &OpenOptions::default());
        assert!(matches!(result, Err(toccata_core::errors::Error::Unsupported(_))));
    }

    #[test]
    fn verify_subsong_out_of_range() {
        let src = Box::new(MemSource::new(build_bank(2)));
        let opts = OpenOptions { subsong: 3, ..Default::default() };
        assert!(open(src, &opts).is_err());
    }

    #[test]
    fn verify_name_decryption() {
        /* "bgm_stage_01" scrambled with seed 0xcafef00d */
        let mut name = vec![
            0x76, 0x08, 0x10, 0x79, 0x51, 0x82, 0x6e, 0x5b, 0xdb, 0x93, 0xe5, 0x60, 0x00,
        ];
        decrypt_name(&mut name, 0xcafe_f00d);
        assert_eq!(&name[..12], b"bgm_stage_01");
    }
}
