// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whole-stream decoding through the public API only.

use toccata_codec_hca::HcaDecoder;
use toccata_core::audio::AudioStream;
use toccata_core::checksum::crc16_checksum;
use toccata_core::formats::OpenOptions;
use toccata_core::io::MemSource;

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// A v2.0 stereo stream of silent frames: header (fmt + comp), then checksummed all-zero
/// frames.
fn build_silent_stream(frame_count: u32, delay: u16, padding: u16) -> Vec<u8> {
    let frame_size = 0x100u16;

    let mut header = Vec::new();
    header.extend_from_slice(b"HCA\0");
    push_u16(&mut header, 0x0200);
    push_u16(&mut header, 8 + 16 + 16 + 2); /* header size */

    header.extend_from_slice(b"fmt\0");
    header.push(2); /* channels */
    header.extend_from_slice(&48000u32.to_be_bytes()[1..4]);
    push_u32(&mut header, frame_count);
    push_u16(&mut header, delay);
    push_u16(&mut header, padding);

    header.extend_from_slice(b"comp");
    push_u16(&mut header, frame_size);
    header.extend_from_slice(&[1, 15, 1, 0, 128, 100, 28, 0, 0, 0]);

    let crc = crc16_checksum(&header);
    push_u16(&mut header, crc);

    let mut frame = vec![0u8; frame_size as usize];
    frame[0] = 0xff;
    frame[1] = 0xff;
    let crc = crc16_checksum(&frame[..frame.len() - 2]);
    frame[frame_size as usize - 2] = (crc >> 8) as u8;
    frame[frame_size as usize - 1] = (crc & 0xff) as u8;

    let mut stream = header;
    for _ in 0..frame_count {
        stream.extend_from_slice(&frame);
    }
    stream
}

#[test]
fn decodes_expected_sample_count() {
    // 4 frames of 1024 samples minus 128 delay and 112 padding.
    let data = build_silent_stream(4, 128, 112);
    let mut decoder =
        HcaDecoder::try_new(Box::new(MemSource::new(data)), &OpenOptions::default()).unwrap();

    assert_eq!(decoder.info().num_frames, 3856);
    assert_eq!(decoder.info().channels, 2);

    let mut out = vec![0i16; 1000 * 2];
    let mut total = 0usize;
    loop {
        let frames = decoder.decode(&mut out).unwrap();
        if frames == 0 {
            break;
        }
        assert!(out[..frames * 2].iter().all(|&s| s == 0));
        total += frames;
    }
    assert_eq!(total, 3856);
}

#[test]
fn seek_and_sequential_reads_agree() {
    let data = build_silent_stream(4, 0, 0);
    let mut decoder =
        HcaDecoder::try_new(Box::new(MemSource::new(data)), &OpenOptions::default()).unwrap();

    decoder.seek(3000).unwrap();
    let mut out = vec![0i16; 512 * 2];
    let frames = decoder.decode(&mut out).unwrap();
    assert_eq!(frames, 512);
    assert!(out.iter().all(|&s| s == 0));
}
