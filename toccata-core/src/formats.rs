// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `formats` module defines how containers are opened and registered.

use crate::audio::AudioStream;
use crate::errors::{missing_companion_error, Result};
use crate::io::ByteSource;

/// The role a companion stream plays for the container being opened.
///
/// Companion lookup policy (which sibling file to open) is the front-end's business; the
/// container only consumes sources handed to it here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompanionRole {
    /// The paired body file of a two-file format (MUS for MPF, SDX for SND, ...).
    Paired,
    /// An external codebook library for codecs that strip theirs.
    Codebooks,
    /// Externally streamed sample data referenced by a header-only container.
    StreamData,
}

impl CompanionRole {
    fn as_str(&self) -> &'static str {
        match *self {
            CompanionRole::Paired => "paired body file",
            CompanionRole::Codebooks => "codebook library",
            CompanionRole::StreamData => "streamed sample data",
        }
    }
}

/// `OpenOptions` carries caller-side configuration into a container's `open`.
#[derive(Default)]
pub struct OpenOptions {
    /// 1-based subsong selection. 0 selects the first subsong.
    pub subsong: u32,
    /// Decryption keycode for encrypted streams, when the caller knows it.
    pub keycode: Option<u64>,
    /// Companion streams pre-opened by the front-end.
    pub companions: Vec<(CompanionRole, Box<dyn ByteSource>)>,
}

impl OpenOptions {
    /// The effective 1-based subsong index.
    pub fn subsong(&self) -> u32 {
        self.subsong.max(1)
    }

    /// Reopens the companion stream with the given role, or errors if none was provided.
    pub fn companion(&self, role: CompanionRole) -> Result<Box<dyn ByteSource>> {
        match self.companions.iter().find(|(have, _)| *have == role) {
            Some((_, src)) => src.reopen(),
            None => missing_companion_error(role.as_str()),
        }
    }

    /// Like [`OpenOptions::companion`], but `None` when the role was not provided.
    pub fn companion_opt(&self, role: CompanionRole) -> Result<Option<Box<dyn ByteSource>>> {
        match self.companions.iter().find(|(have, _)| *have == role) {
            Some((_, src)) => Ok(Some(src.reopen()?)),
            None => Ok(None),
        }
    }
}

/// The function a format exposes to open a stream.
pub type OpenFn = fn(Box<dyn ByteSource>, &OpenOptions) -> Result<Box<dyn AudioStream>>;

/// The function a format exposes to score a source during probing. Returns 0 when the source
/// cannot be this format, and up-to 255 with growing confidence.
pub type ScoreFn = fn(&mut dyn ByteSource) -> Result<u8>;

/// A `FormatDescriptor` registers a container with the probe.
#[derive(Clone, Copy)]
pub struct FormatDescriptor {
    /// Canonical short name, e.g. "hca".
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    pub score: ScoreFn,
    pub open: OpenFn,
}

/// Reads the first bytes of a source for magic scoring.
pub fn read_magic<const N: usize>(src: &mut dyn ByteSource) -> Result<[u8; N]> {
    let mut magic = [0u8; N];
    src.read_at(0, &mut magic)?;
    Ok(magic)
}
