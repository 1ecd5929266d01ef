// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `crypto` module provides decrypting source filters.

use std::cmp;

use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, KeyInit};
use blowfish::Blowfish;

use toccata_core::errors::{decode_error, Result};
use toccata_core::io::ByteSource;

const BLOCK_LEN: usize = 8;

/// A `BlowfishSource` presents a Blowfish-ECB-encrypted source as plain bytes.
///
/// Blocks are 8 bytes, aligned to offset 0 of the inner source. An arbitrary `(offset, length)`
/// read decrypts the containing aligned range and hands out the requested slice, so unaligned
/// leading and trailing spans cost one extra block each. A trailing partial block (a source
/// whose length is not a multiple of 8) cannot be decrypted and is passed through raw.
pub struct BlowfishSource {
    inner: Box<dyn ByteSource>,
    cipher: Blowfish,
    /// Kept for reopening, the cipher state is not cloneable.
    key: Vec<u8>,
}

impl BlowfishSource {
    /// Instantiates a decrypting view with the given key (4..=56 bytes).
    pub fn new(inner: Box<dyn ByteSource>, key: &[u8]) -> Result<BlowfishSource> {
        let cipher = Blowfish::new_from_slice(key)
            .map_err(|_| toccata_core::errors::Error::DecodeError("blowfish: invalid key length"))?;
        Ok(BlowfishSource { inner, cipher, key: key.to_vec() })
    }
}

impl ByteSource for BlowfishSource {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let aligned_start = pos - pos % BLOCK_LEN as u64;
        let span = (pos - aligned_start) as usize + buf.len();
        let aligned_len = span + (BLOCK_LEN - span % BLOCK_LEN) % BLOCK_LEN;

        let mut work = vec![0u8; aligned_len];
        let got = self.inner.read_at(aligned_start, &mut work)?;
        work.truncate(got);

        // Decrypt whole blocks in place; a ragged tail stays as read.
        for block in work.chunks_exact_mut(BLOCK_LEN) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }

        let skip = (pos - aligned_start) as usize;
        if got <= skip {
            return Ok(0);
        }
        let avail = cmp::min(buf.len(), got - skip);
        buf[..avail].copy_from_slice(&work[skip..skip + avail]);
        Ok(avail)
    }

    fn byte_len(&self) -> u64 {
        self.inner.byte_len()
    }

    fn reopen(&self) -> Result<Box<dyn ByteSource>> {
        Ok(Box::new(BlowfishSource::new(self.inner.reopen()?, &self.key)?))
    }

    fn name(&self) -> Option<&str> {
        self.inner.name()
    }
}

/// Derives a Blowfish key from an ASCII hex string, as some containers store them.
pub fn key_from_hex(text: &[u8]) -> Result<Vec<u8>> {
    if text.is_empty() || text.len() % 2 != 0 {
        return decode_error("blowfish: bad hex key length");
    }
    let nibble = |c: u8| -> Result<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => decode_error("blowfish: bad hex key digit"),
        }
    };
    text.chunks(2).map(|pair| Ok(nibble(pair[0])? << 4 | nibble(pair[1])?)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use blowfish::cipher::BlockEncrypt;
    use toccata_core::io::MemSource;

    const KEY: &[u8] = b"0123456789abcdef";

    fn encrypt_whole(plain: &[u8]) -> Vec<u8> {
        let cipher: Blowfish = Blowfish::new_from_slice(KEY).unwrap();
        let mut data = plain.to_vec();
        for block in data.chunks_exact_mut(BLOCK_LEN) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        data
    }

    #[test]
    fn verify_unaligned_reads_match_contiguous_decryption() {
        let plain: Vec<u8> = (0u8..64).collect();
        let encrypted = encrypt_whole(&plain);

        let mut src =
            BlowfishSource::new(Box::new(MemSource::new(encrypted)), KEY).unwrap();

        // Whole-buffer read equals the plaintext.
        let mut whole = vec![0u8; 64];
        assert_eq!(src.read_at(0, &mut whole).unwrap(), 64);
        assert_eq!(whole, plain);

        // Any (offset, length) carve-out equals the same slice of the plaintext.
        for (offset, len) in [(0usize, 8usize), (3, 10), (7, 1), (5, 27), (60, 4), (13, 51)] {
            let mut out = vec![0u8; len];
            assert_eq!(src.read_at(offset as u64, &mut out).unwrap(), len);
            assert_eq!(out, &plain[offset..offset + len], "offset {} len {}", offset, len);
        }
    }

    #[test]
    fn verify_short_reads_at_eof() {
        let plain: Vec<u8> = (0u8..16).collect();
        let encrypted = encrypt_whole(&plain);

        let mut src =
            BlowfishSource::new(Box::new(MemSource::new(encrypted)), KEY).unwrap();

        let mut out = vec![0u8; 16];
        assert_eq!(src.read_at(12, &mut out).unwrap(), 4);
        assert_eq!(&out[..4], &plain[12..]);
        assert_eq!(src.read_at(16, &mut out).unwrap(), 0);
    }

    #[test]
    fn verify_hex_key_parsing() {
        assert_eq!(key_from_hex(b"00ff10Ab").unwrap(), vec![0x00, 0xff, 0x10, 0xab]);
        assert!(key_from_hex(b"0q").is_err());
        assert!(key_from_hex(b"abc").is_err());
    }
}
