// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `audio` module provides the description of decoded streams and the decoder contract.

use crate::errors::Result;

bitflags::bitflags! {
    /// A bitmask of speaker positions, in the canonical WAVE channel-mask order.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Channels: u32 {
        const FRONT_LEFT          = 0x0000_0001;
        const FRONT_RIGHT         = 0x0000_0002;
        const FRONT_CENTRE        = 0x0000_0004;
        const LFE1                = 0x0000_0008;
        const REAR_LEFT           = 0x0000_0010;
        const REAR_RIGHT          = 0x0000_0020;
        const FRONT_LEFT_CENTRE   = 0x0000_0040;
        const FRONT_RIGHT_CENTRE  = 0x0000_0080;
        const REAR_CENTRE         = 0x0000_0100;
        const SIDE_LEFT           = 0x0000_0200;
        const SIDE_RIGHT          = 0x0000_0400;
        const TOP_CENTRE          = 0x0000_0800;
        const TOP_FRONT_LEFT      = 0x0000_1000;
        const TOP_FRONT_CENTRE    = 0x0000_2000;
        const TOP_FRONT_RIGHT     = 0x0000_4000;
        const TOP_REAR_LEFT       = 0x0000_8000;
        const TOP_REAR_CENTRE     = 0x0001_0000;
        const TOP_REAR_RIGHT      = 0x0002_0000;
    }
}

impl Channels {
    /// Gets the number of channels in the mask.
    pub fn count(self) -> usize {
        self.bits().count_ones() as usize
    }

    /// The default mask for a given channel count: mono, stereo, and the usual surround
    /// orderings. Counts with no conventional layout get an empty mask.
    pub fn default_map(count: usize) -> Channels {
        match count {
            1 => Channels::FRONT_CENTRE,
            2 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
            3 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT | Channels::FRONT_CENTRE,
            4 => {
                Channels::FRONT_LEFT
                    | Channels::FRONT_RIGHT
                    | Channels::REAR_LEFT
                    | Channels::REAR_RIGHT
            }
            5 => {
                Channels::FRONT_LEFT
                    | Channels::FRONT_RIGHT
                    | Channels::FRONT_CENTRE
                    | Channels::REAR_LEFT
                    | Channels::REAR_RIGHT
            }
            6 => {
                Channels::FRONT_LEFT
                    | Channels::FRONT_RIGHT
                    | Channels::FRONT_CENTRE
                    | Channels::LFE1
                    | Channels::REAR_LEFT
                    | Channels::REAR_RIGHT
            }
            8 => {
                Channels::FRONT_LEFT
                    | Channels::FRONT_RIGHT
                    | Channels::FRONT_CENTRE
                    | Channels::LFE1
                    | Channels::REAR_LEFT
                    | Channels::REAR_RIGHT
                    | Channels::SIDE_LEFT
                    | Channels::SIDE_RIGHT
            }
            _ => Channels::empty(),
        }
    }
}

/// Loop points of a stream, in sample frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopPoints {
    pub start: u64,
    /// Exclusive end frame.
    pub end: u64,
}

/// A `StreamInfo` describes one decoded subsong: the §6 `info` contract.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    /// Number of interleaved output channels.
    pub channels: usize,
    /// Speaker positions, when the container declares them.
    pub channel_map: Channels,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Total length in sample frames.
    pub num_frames: u64,
    /// Loop points, when the stream loops.
    pub loops: Option<LoopPoints>,
    /// 1-based index of this subsong.
    pub subsong: u32,
    /// Number of subsongs in the container this stream came from.
    pub subsong_count: u32,
    /// Stream name, when the container stores one.
    pub name: Option<String>,
}

impl StreamInfo {
    /// A `StreamInfo` with a single unnamed, non-looping subsong; the common case containers
    /// start from.
    pub fn new(channels: usize, sample_rate: u32, num_frames: u64) -> Self {
        StreamInfo {
            channels,
            channel_map: Channels::default_map(channels),
            sample_rate,
            num_frames,
            loops: None,
            subsong: 1,
            subsong_count: 1,
            name: None,
        }
    }
}

/// An `AudioStream` produces interleaved signed 16-bit PCM on demand.
///
/// `decode` fills `out` with whole sample frames (`channels` samples each) and returns the
/// number of sample frames written; 0 means end-of-stream. A decoder that hits a fatal
/// mid-frame error zero-fills the remainder of the failing call, reports the short count, and
/// returns `Ok(0)` from then on.
pub trait AudioStream: Send {
    /// Gets the stream description.
    fn info(&self) -> &StreamInfo;

    /// Decodes up-to `out.len() / channels` sample frames into `out`, interleaved.
    fn decode(&mut self, out: &mut [i16]) -> Result<usize>;

    /// Seeks to an absolute sample frame. Decoders without seek tables restart decoding and
    /// discard samples up to the target.
    fn seek(&mut self, frame: u64) -> Result<()>;
}
