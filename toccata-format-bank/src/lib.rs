// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-stream audio banks.
//!
//! Four unrelated vendors, one shape: a descriptor table of subsongs over interleaved or
//! blocked sample data. Acclaim `.audiopkg` (hot/cold sample sections with per-platform
//! codecs), Crystal Dynamics `.mul` (typed 0x810 blocks per track), Sony LRMD (named layers
//! interleaved in one body file) and Treyarch SDX (a binary index over VBC sample files).

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

pub mod audiopkg;
pub mod lrmd;
pub mod mul;
pub mod sdx;

pub use audiopkg::AUDIOPKG_DESCRIPTOR;
pub use lrmd::LRMD_DESCRIPTOR;
pub use mul::MUL_DESCRIPTOR;
pub use sdx::SDX_DESCRIPTOR;
