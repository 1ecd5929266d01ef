// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Absolute-threshold-of-hearing curve setup.

use toccata_core::errors::{decode_error, Result};

use crate::tables::ATH_BASE_CURVE;

/// Fills the 128-entry ATH curve for a stream. Type 0 disables the curve; type 1 resamples the
/// base curve to the stream's rate, saturating past the table end.
pub fn init(curve: &mut [u8; 128], ath_type: u32, sample_rate: u32) -> Result<()> {
    match ath_type {
        0 => curve.fill(0),
        1 => {
            let mut acc: u32 = 0;
            for i in 0..curve.len() {
                acc = acc.wrapping_add(sample_rate);
                let index = (acc >> 13) as usize;

                if index >= 654 {
                    curve[i..].fill(0xff);
                    break;
                }
                curve[i] = ATH_BASE_CURVE[index];
            }
        }
        _ => return decode_error("hca: invalid ath type"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_type0_is_flat() {
        let mut curve = [0xaa; 128];
        init(&mut curve, 0, 48000).unwrap();
        assert!(curve.iter().all(|&v| v == 0));
    }

    #[test]
    fn verify_type1_scales_with_rate() {
        let mut curve = [0u8; 128];
        init(&mut curve, 1, 41856).unwrap();
        // At the base curve's native rate the accumulator steps land near successive table
        // entries: acc after i+1 steps is (i+1)*41856, index = acc >> 13.
        for (i, &v) in curve.iter().enumerate() {
            let index = ((i as u32 + 1) * 41856) >> 13;
            assert_eq!(v, ATH_BASE_CURVE[index as usize]);
        }
    }

    #[test]
    fn verify_type1_saturates_high_rates() {
        // A very high rate runs off the end of the base curve and saturates to 0xFF.
        let mut curve = [0u8; 128];
        init(&mut curve, 1, 0x7fffff).unwrap();
        assert_eq!(curve[127], 0xff);
    }

    #[test]
    fn verify_bad_type_rejected() {
        let mut curve = [0u8; 128];
        assert!(init(&mut curve, 2, 48000).is_err());
    }
}
