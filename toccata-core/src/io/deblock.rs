// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `deblock` module presents a logically contiguous byte stream over physically blocked or
//! interleaved container data.
//!
//! Containers frequently store one stream as a sequence of blocks, each with a header to skip,
//! padding, or blocks belonging to other streams interleaved in-between. A [`DeblockSource`]
//! walks those blocks with the help of a container-supplied [`BlockMapper`] and exposes the
//! clean data as a plain [`ByteSource`], so decoders never see the container's layout.

use std::cmp;

use log::warn;

use crate::errors::Result;
use crate::io::ByteSource;

/// Per-block shape and walk cursors, maintained by [`DeblockSource`] and filled in by a
/// [`BlockMapper`].
#[derive(Clone, Debug, Default)]
pub struct BlockState {
    /// Offset of the current block in the underlying source.
    pub physical_offset: u64,
    /// Offset of the current block's first data byte in the logical stream.
    pub logical_offset: u64,
    /// Total size of the current block. Advances the physical cursor. A mapper that sets 0
    /// terminates the stream.
    pub block_size: u64,
    /// Bytes to skip from the block start to reach data (a header, other-channel lanes, ...).
    pub skip_size: u64,
    /// Usable data bytes in the block. Advances the logical cursor. May be 0 for data-less
    /// blocks.
    pub data_size: u64,
    /// First physical offset of the stream, for mappers that special-case the head block.
    pub stream_start: u64,
    /// Physical offset one past the last byte belonging to the stream.
    pub physical_end: u64,
}

/// A `BlockMapper` describes the physical layout of a blocked stream, one block at a time.
pub trait BlockMapper: Send {
    /// Describes the block at `state.physical_offset` by setting `block_size`, `skip_size` and
    /// `data_size`. The mapper may read block headers through `src`.
    fn next_block(&mut self, src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()>;

    /// Optionally rewrites just-read data in place. `block_pos` is the position of `buf[0]`
    /// relative to the start of the block's data region. Used by containers that lightly
    /// disguise an otherwise standard stream.
    fn patch(&mut self, _buf: &mut [u8], _state: &BlockState, _block_pos: u64) {}

    /// Called whenever the walk restarts from the stream start, so mappers can reset any
    /// internal cursors of their own.
    fn reset(&mut self) {}

    /// Clones the mapper for [`ByteSource::reopen`].
    fn box_clone(&self) -> Box<dyn BlockMapper>;
}

/// A `FixedBlockMapper` describes the common layout of constant-size blocks with a constant
/// header to skip.
#[derive(Clone)]
pub struct FixedBlockMapper {
    pub chunk_size: u64,
    pub skip_size: u64,
}

impl BlockMapper for FixedBlockMapper {
    fn next_block(&mut self, _src: &mut dyn ByteSource, state: &mut BlockState) -> Result<()> {
        state.block_size = self.chunk_size;
        state.skip_size = self.skip_size;
        state.data_size = state.block_size - state.skip_size;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn BlockMapper> {
        Box::new(self.clone())
    }
}

/// Walk configuration for a [`DeblockSource`].
#[derive(Clone, Copy, Default)]
pub struct DeblockOptions {
    /// Physical offset where the stream's blocks begin.
    pub stream_start: u64,
    /// Physical extent of the stream's blocks. 0 means "to the end of the source".
    pub stream_size: u64,
    /// Pre-computed logical size. 0 means "walk the blocks once to measure".
    pub logical_size: u64,
    /// Blocks to skip before the first data block is returned.
    pub step_start: u32,
    /// Number of interleaved consumers sharing the block sequence. A value of N returns every
    /// Nth block to this consumer, stepping over the N-1 blocks in-between. 0 or 1 disables
    /// stepping.
    pub step_count: u32,
}

/// A `DeblockSource` exposes the data regions of a blocked stream as one contiguous
/// [`ByteSource`].
///
/// The walk is strictly forward: a read below the current logical cursor restarts from
/// `stream_start`. There is no seek index; the mapper is re-invoked for every block, and must
/// produce the same shapes on every walk.
pub struct DeblockSource {
    inner: Box<dyn ByteSource>,
    mapper: Box<dyn BlockMapper>,
    opts: DeblockOptions,
    state: BlockState,
    /// Blocks still to be stepped over before the next data block.
    steps_left: u32,
    /// False until the first walk has started, or after a restart is required.
    walking: bool,
    logical_size: u64,
}

impl DeblockSource {
    /// Instantiates a `DeblockSource`, measuring the logical size with a full block walk unless
    /// the options carry a pre-computed one.
    pub fn new(
        inner: Box<dyn ByteSource>,
        mapper: Box<dyn BlockMapper>,
        opts: DeblockOptions,
    ) -> Result<Self> {
        let mut deblock = DeblockSource {
            inner,
            mapper,
            opts,
            state: BlockState::default(),
            steps_left: 0,
            walking: false,
            logical_size: opts.logical_size,
        };

        // Clamp the physical extent to the source.
        let src_len = deblock.inner.byte_len();
        let avail = src_len.saturating_sub(opts.stream_start);
        let physical_size = match opts.stream_size {
            0 => avail,
            size => cmp::min(size, avail),
        };
        deblock.state.stream_start = opts.stream_start;
        deblock.state.physical_end = opts.stream_start + physical_size;

        if deblock.logical_size == 0 {
            deblock.logical_size = deblock.measure()?;
        }

        Ok(deblock)
    }

    /// Restarts the walk from the stream start.
    fn restart(&mut self) {
        self.state.physical_offset = self.opts.stream_start;
        self.state.logical_offset = 0;
        self.state.block_size = 0;
        self.state.skip_size = 0;
        self.state.data_size = 0;
        self.steps_left = self.opts.step_start;
        self.walking = true;
        self.mapper.reset();
    }

    /// Walks every block once to compute the logical size.
    fn measure(&mut self) -> Result<u64> {
        let mut sink = [0u8; 1];
        self.read_at(u64::MAX >> 1, &mut sink)?;
        Ok(self.state.logical_offset)
    }

    /// Steps over the N-1 blocks belonging to other consumers. Returns false when the physical
    /// stream ended mid-step.
    fn walk_read(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let mut pos = pos;
        let mut total = 0usize;

        if !self.walking || pos < self.state.logical_offset {
            self.restart();
        }

        while total < buf.len() {
            // End of the physical stream.
            if self.state.physical_offset >= self.state.physical_end {
                break;
            }

            // Describe a new block.
            if self.state.data_size == 0 {
                self.mapper.next_block(self.inner.as_mut(), &mut self.state)?;

                if self.state.block_size == 0 {
                    warn!(
                        "deblock: block size not set at {:#x}",
                        self.state.physical_offset
                    );
                    break;
                }
            }

            // Blocks belonging to other interleaved consumers are stepped over whole.
            if self.steps_left > 0 {
                self.steps_left -= 1;
                self.state.physical_offset += self.state.block_size;
                self.state.data_size = 0;
                continue;
            }

            // Move past fully-consumed or data-less blocks.
            if self.state.data_size == 0
                || pos >= self.state.logical_offset + self.state.data_size
            {
                self.state.physical_offset += self.state.block_size;
                self.state.logical_offset += self.state.data_size;
                self.state.data_size = 0;
                self.steps_left = self.opts.step_count.saturating_sub(1);
                continue;
            }

            // Read from the current block's data region.
            let block_pos = pos - self.state.logical_offset;
            let want =
                cmp::min((self.state.data_size - block_pos) as usize, buf.len() - total);
            let src_pos = self.state.physical_offset + self.state.skip_size + block_pos;

            let done = self.inner.read_at(src_pos, &mut buf[total..total + want])?;
            if done > 0 {
                self.mapper.patch(&mut buf[total..total + done], &self.state, block_pos);
            }

            total += done;
            pos += done as u64;

            if done != want {
                break;
            }
        }

        Ok(total)
    }
}

impl ByteSource for DeblockSource {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if self.logical_size > 0 && pos >= self.logical_size {
            return Ok(0);
        }
        self.walk_read(pos, buf)
    }

    fn byte_len(&self) -> u64 {
        self.logical_size
    }

    fn reopen(&self) -> Result<Box<dyn ByteSource>> {
        let mut opts = self.opts;
        opts.logical_size = self.logical_size;
        Ok(Box::new(DeblockSource::new(
            self.inner.reopen()?,
            self.mapper.box_clone(),
            opts,
        )?))
    }

    fn name(&self) -> Option<&str> {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemSource;

    fn block_source(blocks: u64, block_size: u64) -> Box<dyn ByteSource> {
        // Physical bytes count up so that a logical byte is identifiable by its physical
        // offset.
        let data: Vec<u8> = (0..blocks * block_size).map(|off| off as u8).collect();
        Box::new(MemSource::new(data))
    }

    #[test]
    fn verify_logical_to_physical_mapping() {
        // Two blocks of (block_size=16, skip_size=4, data_size=12).
        let mapper = FixedBlockMapper { chunk_size: 16, skip_size: 4 };
        let mut deblock = DeblockSource::new(
            block_source(2, 16),
            Box::new(mapper),
            DeblockOptions::default(),
        )
        .unwrap();

        assert_eq!(deblock.byte_len(), 24);

        // Logical byte 13 is the second data byte of the second block: physical 16 + 4 + 1.
        let mut byte = [0u8; 1];
        assert_eq!(deblock.read_at(13, &mut byte).unwrap(), 1);
        assert_eq!(byte[0], 21);
    }

    #[test]
    fn verify_spanning_read_equals_concatenation() {
        let mapper = FixedBlockMapper { chunk_size: 16, skip_size: 4 };
        let mut deblock = DeblockSource::new(
            block_source(4, 16),
            Box::new(mapper),
            DeblockOptions::default(),
        )
        .unwrap();

        let mut all = vec![0u8; 48];
        assert_eq!(deblock.read_at(0, &mut all).unwrap(), 48);

        let expect: Vec<u8> = (0..4u8)
            .flat_map(|block| (block * 16 + 4..block * 16 + 16))
            .collect();
        assert_eq!(all, expect);

        // Reading the same range in two chunks yields the same bytes.
        let mut first = vec![0u8; 20];
        let mut second = vec![0u8; 28];
        assert_eq!(deblock.read_at(0, &mut first).unwrap(), 20);
        assert_eq!(deblock.read_at(20, &mut second).unwrap(), 28);
        assert_eq!([first, second].concat(), expect);
    }

    #[test]
    fn verify_backwards_read_restarts_walk() {
        let mapper = FixedBlockMapper { chunk_size: 8, skip_size: 2 };
        let mut deblock = DeblockSource::new(
            block_source(3, 8),
            Box::new(mapper),
            DeblockOptions::default(),
        )
        .unwrap();

        let mut byte = [0u8; 1];
        deblock.read_at(17, &mut byte).unwrap();
        assert_eq!(byte[0], 21);
        deblock.read_at(0, &mut byte).unwrap();
        assert_eq!(byte[0], 2);
    }

    #[test]
    fn verify_step_counter_deinterleave() {
        // Two consumers share the blocks; this one starts one block in and reads every other
        // block.
        let mapper = FixedBlockMapper { chunk_size: 8, skip_size: 0 };
        let opts = DeblockOptions { step_start: 1, step_count: 2, ..Default::default() };
        let mut deblock =
            DeblockSource::new(block_source(4, 8), Box::new(mapper), opts).unwrap();

        assert_eq!(deblock.byte_len(), 16);

        let mut data = vec![0u8; 16];
        assert_eq!(deblock.read_at(0, &mut data).unwrap(), 16);
        let expect: Vec<u8> = (8..16u8).chain(24..32u8).collect();
        assert_eq!(data, expect);
    }

    #[test]
    fn verify_patch_rewrites_block_head() {
        #[derive(Clone)]
        struct HeadPatch;

        impl BlockMapper for HeadPatch {
            fn next_block(
                &mut self,
                _src: &mut dyn ByteSource,
                state: &mut BlockState,
            ) -> Result<()> {
                state.block_size = 8;
                state.skip_size = 0;
                state.data_size = 8;
                Ok(())
            }

            fn patch(&mut self, buf: &mut [u8], _state: &BlockState, block_pos: u64) {
                if block_pos == 0 {
                    buf[0] = 0xaa;
                }
            }

            fn box_clone(&self) -> Box<dyn BlockMapper> {
                Box::new(self.clone())
            }
        }

        let mut deblock = DeblockSource::new(
            block_source(2, 8),
            Box::new(HeadPatch),
            DeblockOptions::default(),
        )
        .unwrap();

        let mut data = vec![0u8; 16];
        deblock.read_at(0, &mut data).unwrap();
        assert_eq!(data[0], 0xaa);
        assert_eq!(data[8], 0xaa);
        assert_eq!(data[1], 1);
    }
}
