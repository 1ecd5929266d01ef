// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Project Toccata is a game-audio decoding library: container parsers locate streams,
//! custom codec engines turn their bitstreams into interleaved 16-bit PCM.
//!
//! This meta-crate bundles the format and codec crates behind a magic-scoring probe:
//!
//! ```no_run
//! use toccata_core::formats::OpenOptions;
//! use toccata_core::io::FileSource;
//!
//! let source = Box::new(FileSource::open("song.hca")?);
//! let mut stream = toccata::open(source, &OpenOptions::default())?;
//!
//! let info = stream.info().clone();
//! let mut pcm = vec![0i16; 4096 * info.channels];
//! while stream.decode(&mut pcm)? > 0 {
//!     /* consume interleaved samples */
//! }
//! # toccata_core::errors::Result::Ok(())
//! ```

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

use log::debug;

use toccata_core::audio::AudioStream;
use toccata_core::errors::{unsupported_error, Result};
use toccata_core::formats::{FormatDescriptor, OpenOptions};
use toccata_core::io::ByteSource;

/// All registered formats, in no particular order; the probe ranks them by score.
pub fn formats() -> &'static [FormatDescriptor] {
    &[
        toccata_codec_hca::HCA_DESCRIPTOR,
        toccata_codec_erisa::ERISA_DESCRIPTOR,
        toccata_codec_vorbis::OOR_DESCRIPTOR,
        toccata_format_awc::AWC_DESCRIPTOR,
        toccata_format_ktsr::KTSR_DESCRIPTOR,
        toccata_format_ea::EA_MPF_DESCRIPTOR,
        toccata_format_riff::RIFF_DESCRIPTOR,
        toccata_format_riff::MUPS_DESCRIPTOR,
        toccata_format_idtech::MZRT_DESCRIPTOR,
        toccata_format_idtech::BSNF_DESCRIPTOR,
        toccata_format_bank::AUDIOPKG_DESCRIPTOR,
        toccata_format_bank::MUL_DESCRIPTOR,
        toccata_format_bank::LRMD_DESCRIPTOR,
        toccata_format_bank::SDX_DESCRIPTOR,
    ]
}

/// Scores every registered format against the source and returns the best match.
pub fn probe(src: &mut dyn ByteSource) -> Result<Option<&'static FormatDescriptor>> {
    let mut best: Option<(&'static FormatDescriptor, u8)> = None;

    for descriptor in formats() {
        let score = match (descriptor.score)(src) {
            Ok(score) => score,
            Err(err) => {
                debug!("probe: {} scorer failed: {}", descriptor.name, err);
                continue;
            }
        };
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((descriptor, score));
        }
    }

    Ok(best.map(|(descriptor, _)| descriptor))
}

/// Probes the source and opens the best-matching format.
pub fn open(mut src: Box<dyn ByteSource>, opts: &OpenOptions) -> Result<Box<dyn AudioStream>> {
    match probe(src.as_mut())? {
        Some(descriptor) => {
            debug!("probe: opening as {}", descriptor.name);
            (descriptor.open)(src, opts)
        }
        None => unsupported_error("probe: no format matched"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::MemSource;

    #[test]
    fn verify_probe_ranks_magics() {
        let mut hca = MemSource::new(b"HCA\x00\x02\x00\x00\x60".to_vec());
        assert_eq!(probe(&mut hca).unwrap().unwrap().name, "hca");

        let mut emc = MemSource::new(b"Entis\x1a\x00\x00garbage".to_vec());
        assert_eq!(probe(&mut emc).unwrap().unwrap().name, "mio");

        let mut mups = MemSource::new(b"MUPS\x00\x00\x00\x00PssH".to_vec());
        assert_eq!(probe(&mut mups).unwrap().unwrap().name, "mups");

        let mut nothing = MemSource::new(vec![0u8; 64]);
        assert!(probe(&mut nothing).unwrap().is_none());
    }

    #[test]
    fn verify_open_rejects_unknown() {
        let src = Box::new(MemSource::new(vec![0xffu8; 64]));
        assert!(matches!(
            open(src, &OpenOptions::default()),
            Err(toccata_core::errors::Error::Unsupported(_))
        ));
    }
}
