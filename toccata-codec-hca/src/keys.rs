// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key discovery for encrypted streams.
//!
//! Keys are 56-bit values handed around as decimal or hex strings. When a container carries a
//! 16-bit scramble subkey (AWB), the effective keycode combines both. Discovery scores a
//! handful of frames per candidate and keeps the best-scoring key.

use toccata_core::errors::{Error, Result};
use toccata_core::io::ByteSource;

use crate::frame::FrameDecoder;
use crate::header::HcaHeader;

/// Well-known keycodes observed in shipping titles, most-common first.
pub const KNOWN_KEYS: &[u64] = &[
    9621963164387704,     // CRI tools default
    0xCC55463930DBE1AB,   // Phantasy Star Online 2 and many console titles
    61891147883431481,    // older Phantasy Star Online 2
    19700307,             // JoJo All Star Battle
    2012082716,           // Himitsu no Otoshimono
    1234253142,           // VRIDGE catalogue
    59751358413602,       // Cinderella Stage / Shadowverse
    5027916581011272,     // Grimoire
    2424,                 // Idol Connect
    29423500797988784,    // Battle Rush
    30260840980773,       // SD Strikers
    19910623,             // Sonic Runners
    12345,                // Fate/Grand Order base assets
    9117927877783581796,  // Fate/Grand Order downloads
    45719322,             // Raramagi
    765765765765765,      // Million Live
    3003875739822025258,  // Kurokishi
    20536401,             // Magia Record / Hortensia Saga
    9101518402445063,     // Tower of Princess
    4867249871962584729,  // Bang Dream
    9001712656335836006,  // World Flipper
    6929101074247145,     // Heaven Burns Red
    62049655719861786,    // Uma Musume
];

/// Combines a base key with a container's 16-bit scramble subkey.
pub fn scramble_subkey(key: u64, subkey: u16) -> u64 {
    if subkey == 0 {
        return key;
    }
    key.wrapping_mul((u64::from(subkey) << 16) | u64::from((!subkey).wrapping_add(2)))
}

/* score tuning, arbitrary but chosen to make perfect keys stand out fast */
const SCORE_SCALE: i32 = 10;
const MAX_SKIP_BLANKS: u32 = 1200;
const MIN_TEST_FRAMES: u32 = 3;
const MAX_TEST_FRAMES: u32 = 7;
const MAX_FRAME_SCORE: i32 = 600;
const MAX_TOTAL_SCORE: i32 = MAX_TEST_FRAMES as i32 * 50 * SCORE_SCALE;

/// Scores a candidate key over the first frames of a stream. Returns a negative score for a key
/// that cannot decode, 0 for an inconclusive all-silent file, and otherwise a positive score
/// where 1 is a certain hit.
pub fn score_key(
    src: &mut dyn ByteSource,
    header: &HcaHeader,
    decoder: &mut FrameDecoder,
    keycode: u64,
) -> Result<i32> {
    decoder.set_key(header.ciph_type, keycode)?;
    decoder.reset();

    let frame_size = header.frame_size as usize;
    let mut frame = vec![0u8; frame_size];
    let mut offset = u64::from(header.header_size);

    let mut test_frames = 0u32;
    let mut current_frame = 0u32;
    let mut blank_frames = 0u32;
    let mut total_score = 0i32;

    while test_frames < MAX_TEST_FRAMES && current_frame < header.frame_count {
        if src.read_at(offset, &mut frame)? != frame_size {
            break;
        }
        offset += frame_size as u64;

        let score = decoder.test_frame(&mut frame);

        if score < 0 || score > MAX_FRAME_SCORE {
            total_score = -1;
            break;
        }

        current_frame += 1;

        /* skip (a lot of) leading silence; it proves nothing about the key */
        if score == 0 && blank_frames < MAX_SKIP_BLANKS {
            blank_frames += 1;
            continue;
        }

        test_frames += 1;

        let score = match score {
            1 => 1,
            0 => 3 * SCORE_SCALE, /* silence between sound is a weak signal */
            n => n * SCORE_SCALE,
        };
        total_score += score;

        if total_score > MAX_TOTAL_SCORE {
            break;
        }
    }

    /* many perfect frames and few blanks is as good as it gets */
    if test_frames > MIN_TEST_FRAMES && total_score > 0 && total_score <= test_frames as i32 {
        total_score = 1;
    }

    decoder.reset();
    Ok(total_score)
}

/// Tries the known-key table (optionally combined with a subkey) and returns the best-scoring
/// keycode.
pub fn find_key(
    src: &mut dyn ByteSource,
    header: &HcaHeader,
    decoder: &mut FrameDecoder,
    subkey: u16,
) -> Result<u64> {
    let mut best_score = -1;
    let mut best_keycode = 0u64;

    for &key in KNOWN_KEYS {
        let keycode = scramble_subkey(key, subkey);
        let score = score_key(src, header, decoder, keycode)?;

        if score < 0 {
            continue;
        }
        if best_score <= 0 || (score < best_score && score > 0) {
            best_score = score;
            best_keycode = keycode;
        }
        if best_score == 1 {
            break;
        }
    }

    if best_score < 0 {
        return Err(Error::KeyRequired);
    }
    Ok(best_keycode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_subkey_combination() {
        // A zero subkey leaves the key untouched.
        assert_eq!(scramble_subkey(12345, 0), 12345);

        // The combined value multiplies by (subkey << 16) | (~subkey + 2).
        let key = 0x0011_2233_4455_6677u64;
        let subkey = 0xb271u16;
        let factor = (u64::from(subkey) << 16) | u64::from((!subkey).wrapping_add(2));
        assert_eq!(scramble_subkey(key, subkey), key.wrapping_mul(factor));
    }
}
