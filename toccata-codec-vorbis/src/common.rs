// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic header packets.
//!
//! Variants that strip the identification and comment headers get byte-exact standard
//! replacements built from the container's parameters.

/// Builds the 30-byte identification header packet.
pub fn build_header_identification(
    channels: u8,
    sample_rate: u32,
    blocksize_0_exp: u8,
    blocksize_1_exp: u8,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(0x1e);

    buf.push(0x01); /* packet_type (id) */
    buf.extend_from_slice(b"vorbis");
    buf.extend_from_slice(&0u32.to_le_bytes()); /* vorbis_version */
    buf.push(channels);
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); /* bitrate_maximum */
    buf.extend_from_slice(&0u32.to_le_bytes()); /* bitrate_nominal */
    buf.extend_from_slice(&0u32.to_le_bytes()); /* bitrate_minimum */
    buf.push((blocksize_0_exp << 4) | blocksize_1_exp);
    buf.push(0x01); /* framing_flag */

    buf
}

/// Builds the 25-byte comment header packet with a fixed vendor string.
pub fn build_header_comment() -> Vec<u8> {
    let mut buf = Vec::with_capacity(0x19);

    buf.push(0x03); /* packet_type (comments) */
    buf.extend_from_slice(b"vorbis");
    buf.extend_from_slice(&9u32.to_le_bytes()); /* vendor_length */
    buf.extend_from_slice(b"toccata 1");
    buf.extend_from_slice(&0u32.to_le_bytes()); /* user_comment_list_length */
    buf.push(0x01); /* framing_flag */

    buf
}

/// Log2 of the allowed Vorbis blocksizes (64..8192), or 0 for anything else.
pub fn blocksize_exp(blocksize: u32) -> u8 {
    match blocksize {
        64 => 6,
        128 => 7,
        256 => 8,
        512 => 9,
        1024 => 10,
        2048 => 11,
        4096 => 12,
        8192 => 13,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_identification_packet_layout() {
        let packet = build_header_identification(2, 48000, 11, 8);

        assert_eq!(packet.len(), 0x1e);
        assert_eq!(packet[0], 0x01);
        assert_eq!(&packet[1..7], b"vorbis");
        assert_eq!(u32::from_le_bytes(packet[7..11].try_into().unwrap()), 0);
        assert_eq!(packet[0x0b], 2);
        assert_eq!(u32::from_le_bytes(packet[0x0c..0x10].try_into().unwrap()), 48000);
        assert_eq!(packet[0x1c], (11 << 4) | 8);
        assert_eq!(packet[0x1d], 0x01);
    }

    #[test]
    fn verify_comment_packet_layout() {
        let packet = build_header_comment();

        assert_eq!(packet.len(), 0x19);
        assert_eq!(packet[0], 0x03);
        assert_eq!(&packet[1..7], b"vorbis");
        assert_eq!(u32::from_le_bytes(packet[7..11].try_into().unwrap()), 9);
        assert_eq!(u32::from_le_bytes(packet[0x14..0x18].try_into().unwrap()), 0);
        assert_eq!(packet[0x18], 0x01);
    }

    #[test]
    fn verify_identification_parses_with_lewton() {
        let packet = build_header_identification(2, 44100, 11, 8);
        let ident = lewton::header::read_header_ident(&packet).unwrap();
        assert_eq!(ident.audio_channels, 2);
        assert_eq!(ident.audio_sample_rate, 44100);
    }

    #[test]
    fn verify_comment_parses_with_lewton() {
        let packet = build_header_comment();
        let comment = lewton::header::read_header_comment(&packet).unwrap();
        assert!(comment.comment_list.is_empty());
    }

    #[test]
    fn verify_blocksize_exponents() {
        assert_eq!(blocksize_exp(2048), 11);
        assert_eq!(blocksize_exp(256), 8);
        assert_eq!(blocksize_exp(1000), 0);
    }
}
