// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements composable byte- and bit-level I/O.
//!
//! Containers and codecs read from a [`ByteSource`]: a random-access view of bytes with a known
//! total size that can be cheaply reopened to obtain an independent read cursor. Sequential
//! parsing is done through [`SourceReader`] or [`BufReader`], both of which implement the
//! [`ReadBytes`] trait. Bit-level readers are found in the [`bit`] submodule, and the logical
//! view over physically blocked data in the [`deblock`] submodule.

use std::cmp;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{end_of_stream_error, Result};

pub mod bit;
pub mod deblock;

pub use bit::{BitReaderLtr, BitReaderRtl, BitWriterRtl};
pub use deblock::{BlockMapper, BlockState, DeblockSource};

/// A `ByteSource` is a random-access view of a finite sequence of bytes.
///
/// All offsets are absolute. A read past the end of the source returns fewer bytes than
/// requested; a read entirely past the end returns 0 bytes. Neither is an error.
///
/// A source must support cheap reopening: decoders keep multiple simultaneous read cursors over
/// the same underlying data.
pub trait ByteSource: Send {
    /// Reads up-to `buf.len()` bytes starting at the absolute position `pos`, and returns the
    /// number of bytes read.
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize>;

    /// Returns the total length of the source in bytes.
    fn byte_len(&self) -> u64;

    /// Produces a new, independent view of the same underlying bytes.
    fn reopen(&self) -> Result<Box<dyn ByteSource>>;

    /// Returns the name of the source, if it has one.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Reads exactly `buf.len()` bytes starting at `pos` or returns an end-of-stream error.
    fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        if self.read_at(pos, buf)? != buf.len() {
            return end_of_stream_error();
        }
        Ok(())
    }
}

impl ByteSource for Box<dyn ByteSource> {
    #[inline(always)]
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(pos, buf)
    }

    #[inline(always)]
    fn byte_len(&self) -> u64 {
        (**self).byte_len()
    }

    fn reopen(&self) -> Result<Box<dyn ByteSource>> {
        (**self).reopen()
    }

    fn name(&self) -> Option<&str> {
        (**self).name()
    }
}

/// A `MemSource` is a `ByteSource` over an in-memory byte buffer. Reopening is a reference-count
/// bump.
#[derive(Clone)]
pub struct MemSource {
    buf: Arc<[u8]>,
    name: Option<String>,
}

impl MemSource {
    /// Instantiates a `MemSource` that takes ownership of the provided buffer.
    pub fn new(buf: Vec<u8>) -> Self {
        MemSource { buf: buf.into(), name: None }
    }

    /// Instantiates a named `MemSource`.
    pub fn with_name(buf: Vec<u8>, name: &str) -> Self {
        MemSource { buf: buf.into(), name: Some(name.to_string()) }
    }
}

impl ByteSource for MemSource {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos >= self.buf.len() as u64 {
            return Ok(0);
        }
        let start = pos as usize;
        let len = cmp::min(buf.len(), self.buf.len() - start);
        buf[..len].copy_from_slice(&self.buf[start..start + len]);
        Ok(len)
    }

    fn byte_len(&self) -> u64 {
        self.buf.len() as u64
    }

    fn reopen(&self) -> Result<Box<dyn ByteSource>> {
        Ok(Box::new(self.clone()))
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A `FileSource` is a `ByteSource` backed by a file on disk. Reopening opens a new handle to
/// the same path.
pub struct FileSource {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Opens the file at `path` as a `FileSource`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(FileSource { file, path: path.as_ref().to_path_buf(), len })
    }
}

impl ByteSource for FileSource {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos >= self.len {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(pos))?;

        // A plain read may return short before end-of-file, so loop until the buffer is full or
        // the file is exhausted.
        let mut total = 0;
        while total < buf.len() {
            let count = self.file.read(&mut buf[total..])?;
            if count == 0 {
                break;
            }
            total += count;
        }
        Ok(total)
    }

    fn byte_len(&self) -> u64 {
        self.len
    }

    fn reopen(&self) -> Result<Box<dyn ByteSource>> {
        Ok(Box::new(FileSource::open(&self.path)?))
    }

    fn name(&self) -> Option<&str> {
        self.path.file_stem().and_then(|stem| stem.to_str())
    }
}

/// A `SliceSource` clamps a window of another `ByteSource` and exposes it as a source of its
/// own, re-based to offset 0. Containers use it to hand a single stream's bytes to a codec.
pub struct SliceSource {
    inner: Box<dyn ByteSource>,
    start: u64,
    len: u64,
    name: Option<String>,
}

impl SliceSource {
    /// Instantiates a `SliceSource` over `[start, start + len)` of the inner source. The window
    /// is clamped to the inner source's length.
    pub fn new(inner: Box<dyn ByteSource>, start: u64, len: u64) -> Self {
        let len = cmp::min(len, inner.byte_len().saturating_sub(start));
        let name = inner.name().map(|n| n.to_string());
        SliceSource { inner, start, len, name }
    }

    /// Overrides the name reported by this source, e.g. with a container's stream name.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }
}

impl ByteSource for SliceSource {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos >= self.len {
            return Ok(0);
        }
        let len = cmp::min(buf.len() as u64, self.len - pos) as usize;
        self.inner.read_at(self.start + pos, &mut buf[..len])
    }

    fn byte_len(&self) -> u64 {
        self.len
    }

    fn reopen(&self) -> Result<Box<dyn ByteSource>> {
        Ok(Box::new(SliceSource {
            inner: self.inner.reopen()?,
            start: self.start,
            len: self.len,
            name: self.name.clone(),
        }))
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// `ReadBytes` provides methods to sequentially read bytes and interpret them as little- or
/// big-endian unsigned integers of standard widths.
pub trait ReadBytes {
    /// Reads a single byte from the stream and returns it or an error.
    fn read_byte(&mut self) -> Result<u8>;

    /// Reads two bytes from the stream and returns them in read-order or an error.
    fn read_double_bytes(&mut self) -> Result<[u8; 2]>;

    /// Reads three bytes from the stream and returns them in read-order or an error.
    fn read_triple_bytes(&mut self) -> Result<[u8; 3]>;

    /// Reads four bytes from the stream and returns them in read-order or an error.
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]>;

    /// Reads up-to the number of bytes required to fill `buf` or returns an error.
    fn read_buf(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reads exactly the number of bytes required to fill the provided buffer or returns an
    /// error.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Ignores the specified number of bytes from the stream or returns an error.
    fn ignore_bytes(&mut self, count: u64) -> Result<()>;

    /// Gets the position of the stream.
    fn pos(&self) -> u64;

    /// Reads a single unsigned byte from the stream and returns it or an error.
    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8> {
        self.read_byte()
    }

    /// Reads a single signed byte from the stream and returns it or an error.
    #[inline(always)]
    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_byte()? as i8)
    }

    /// Reads two bytes from the stream and interprets them as an unsigned 16-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_double_bytes()?))
    }

    /// Reads two bytes from the stream and interprets them as a signed 16-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_double_bytes()?))
    }

    /// Reads two bytes from the stream and interprets them as an unsigned 16-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_double_bytes()?))
    }

    /// Reads two bytes from the stream and interprets them as a signed 16-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_double_bytes()?))
    }

    /// Reads three bytes from the stream and interprets them as an unsigned 24-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u24(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf[0..3].copy_from_slice(&self.read_triple_bytes()?);
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads three bytes from the stream and interprets them as an unsigned 24-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u24(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf[0..3].copy_from_slice(&self.read_triple_bytes()?);
        Ok(u32::from_be_bytes(buf) >> 8)
    }

    /// Reads four bytes from the stream and interprets them as an unsigned 32-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads four bytes from the stream and interprets them as a signed 32-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads four bytes from the stream and interprets them as an unsigned 32-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_quad_bytes()?))
    }

    /// Reads four bytes from the stream and interprets them as a signed 32-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_quad_bytes()?))
    }

    /// Reads eight bytes from the stream and interprets them as an unsigned 64-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_buf_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads eight bytes from the stream and interprets them as an unsigned 64-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_buf_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads exactly the number of bytes requested, and returns a boxed slice of the data or an
    /// error.
    fn read_boxed_slice_exact(&mut self, len: usize) -> Result<Box<[u8]>> {
        let mut buf = vec![0u8; len];
        self.read_buf_exact(&mut buf)?;
        Ok(buf.into_boxed_slice())
    }
}

impl<'b, R: ReadBytes> ReadBytes for &'b mut R {
    #[inline(always)]
    fn read_byte(&mut self) -> Result<u8> {
        (*self).read_byte()
    }

    #[inline(always)]
    fn read_double_bytes(&mut self) -> Result<[u8; 2]> {
        (*self).read_double_bytes()
    }

    #[inline(always)]
    fn read_triple_bytes(&mut self) -> Result<[u8; 3]> {
        (*self).read_triple_bytes()
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        (*self).read_quad_bytes()
    }

    #[inline(always)]
    fn read_buf(&mut self, buf: &mut [u8]) -> Result<usize> {
        (*self).read_buf(buf)
    }

    #[inline(always)]
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (*self).read_buf_exact(buf)
    }

    #[inline(always)]
    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        (*self).ignore_bytes(count)
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        (**self).pos()
    }
}

/// A `BufReader` reads bytes from an in-memory byte buffer.
pub struct BufReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufReader<'a> {
    /// Instantiates a new `BufReader` with a given byte buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        BufReader { buf, pos: 0 }
    }

    /// Returns a reference to the next `len` bytes in the buffer and advances the stream.
    pub fn read_buf_bytes_ref(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return end_of_stream_error();
        }
        self.pos += len;
        Ok(&self.buf[self.pos - len..self.pos])
    }

    /// Returns a reference to the remaining bytes in the buffer and advances the stream to the
    /// end.
    pub fn read_buf_bytes_available_ref(&mut self) -> &'a [u8] {
        let pos = self.pos;
        self.pos = self.buf.len();
        &self.buf[pos..]
    }

    /// Returns the number of bytes available for reading.
    pub fn bytes_available(&self) -> u64 {
        (self.buf.len() - self.pos) as u64
    }

    /// Sets the position of the stream.
    pub fn seek_to(&mut self, pos: u64) {
        self.pos = cmp::min(pos as usize, self.buf.len());
    }
}

impl<'a> ReadBytes for BufReader<'a> {
    #[inline(always)]
    fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.buf.len() {
            return end_of_stream_error();
        }
        self.pos += 1;
        Ok(self.buf[self.pos - 1])
    }

    fn read_double_bytes(&mut self) -> Result<[u8; 2]> {
        if self.pos + 2 > self.buf.len() {
            return end_of_stream_error();
        }
        let mut bytes = [0; 2];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(bytes)
    }

    fn read_triple_bytes(&mut self) -> Result<[u8; 3]> {
        if self.pos + 3 > self.buf.len() {
            return end_of_stream_error();
        }
        let mut bytes = [0; 3];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 3]);
        self.pos += 3;
        Ok(bytes)
    }

    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        if self.pos + 4 > self.buf.len() {
            return end_of_stream_error();
        }
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(bytes)
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = cmp::min(buf.len(), self.buf.len() - self.pos);
        buf[..len].copy_from_slice(&self.buf[self.pos..self.pos + len]);
        self.pos += len;
        Ok(len)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.pos + buf.len() > self.buf.len() {
            return end_of_stream_error();
        }
        buf.copy_from_slice(&self.buf[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        if self.pos as u64 + count > self.buf.len() as u64 {
            return end_of_stream_error();
        }
        self.pos += count as usize;
        Ok(())
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.pos as u64
    }
}

/// The size of the pull buffer a `SourceReader` keeps over its source.
const SOURCE_READER_BUF_LEN: usize = 4 * 1024;

/// A `SourceReader` is a buffered sequential cursor over a [`ByteSource`].
pub struct SourceReader<'a> {
    src: &'a mut dyn ByteSource,
    /// Absolute position of the next byte to be returned.
    pos: u64,
    buf: Box<[u8]>,
    /// Absolute position of `buf[0]`.
    buf_base: u64,
    /// Number of valid bytes in `buf`.
    buf_len: usize,
}

impl<'a> SourceReader<'a> {
    /// Instantiates a new `SourceReader` positioned at the start of the source.
    pub fn new(src: &'a mut dyn ByteSource) -> Self {
        SourceReader {
            src,
            pos: 0,
            buf: vec![0u8; SOURCE_READER_BUF_LEN].into_boxed_slice(),
            buf_base: 0,
            buf_len: 0,
        }
    }

    /// Instantiates a new `SourceReader` positioned at an absolute offset of the source.
    pub fn new_at(src: &'a mut dyn ByteSource, pos: u64) -> Self {
        let mut reader = SourceReader::new(src);
        reader.pos = pos;
        reader
    }

    /// Sets the absolute position of the stream.
    pub fn seek_to(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Reborrows the underlying source for raw positional reads.
    pub fn source_mut(&mut self) -> &mut dyn ByteSource {
        &mut *self.src
    }

    /// Returns the total length of the underlying source in bytes.
    pub fn byte_len(&self) -> u64 {
        self.src.byte_len()
    }

    /// The number of bytes buffered at the current position. Zero means the next read will hit
    /// the source.
    fn buffered(&self) -> usize {
        if self.pos >= self.buf_base && self.pos < self.buf_base + self.buf_len as u64 {
            (self.buf_base + self.buf_len as u64 - self.pos) as usize
        }
        else {
            0
        }
    }

    /// Refills the pull buffer at the current position. Returns the number of buffered bytes.
    fn refill(&mut self) -> Result<usize> {
        self.buf_base = self.pos;
        self.buf_len = self.src.read_at(self.pos, &mut self.buf)?;
        Ok(self.buf_len)
    }
}

impl<'a> ReadBytes for SourceReader<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        if self.buffered() == 0 && self.refill()? == 0 {
            return end_of_stream_error();
        }
        let byte = self.buf[(self.pos - self.buf_base) as usize];
        self.pos += 1;
        Ok(byte)
    }

    fn read_double_bytes(&mut self) -> Result<[u8; 2]> {
        let mut bytes = [0; 2];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_triple_bytes(&mut self) -> Result<[u8; 3]> {
        let mut bytes = [0; 3];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        let mut bytes = [0; 4];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_buf(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;

        // Serve what the pull buffer holds, then read the remainder from the source directly.
        let buffered = self.buffered();
        if buffered > 0 {
            let len = cmp::min(buffered, buf.len());
            let start = (self.pos - self.buf_base) as usize;
            buf[..len].copy_from_slice(&self.buf[start..start + len]);
            self.pos += len as u64;
            total += len;
        }

        if total < buf.len() {
            let count = self.src.read_at(self.pos, &mut buf[total..])?;
            self.pos += count as u64;
            total += count;
        }

        Ok(total)
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        if self.read_buf(buf)? != len {
            return end_of_stream_error();
        }
        Ok(())
    }

    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        self.pos += count;
        Ok(())
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_buf_reader_primitives() {
        let data = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut reader = BufReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
        assert_eq!(reader.read_be_u16().unwrap(), 0x0405);
        assert_eq!(reader.read_be_u24().unwrap(), 0x060708);
        assert!(reader.read_byte().is_err());
    }

    #[test]
    fn verify_mem_source_short_reads() {
        let mut src = MemSource::new((0u8..32).collect());

        let mut buf = [0u8; 16];
        assert_eq!(src.read_at(24, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..8], &[24, 25, 26, 27, 28, 29, 30, 31]);
        assert_eq!(src.read_at(32, &mut buf).unwrap(), 0);
        assert_eq!(src.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn verify_source_reader_matches_buf_reader() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let data: Vec<u8> = (0..16384).map(|_| rng.gen()).collect();

        let mut src = MemSource::new(data.clone());
        let mut reader = SourceReader::new(&mut src);
        let mut buf_reader = BufReader::new(&data);

        // Interleave small and buffer-straddling reads.
        for i in 0..64 {
            if i % 7 == 0 {
                let mut a = vec![0u8; 600];
                let mut b = vec![0u8; 600];
                reader.read_buf_exact(&mut a).unwrap();
                buf_reader.read_buf_exact(&mut b).unwrap();
                assert_eq!(a, b);
            }
            else {
                assert_eq!(reader.read_u32().unwrap(), buf_reader.read_u32().unwrap());
            }
            assert_eq!(reader.pos(), buf_reader.pos());
        }
    }
}
