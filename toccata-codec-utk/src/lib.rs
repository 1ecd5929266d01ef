// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! EA MicroTalk (UTK) speech decoder.
//!
//! MicroTalk is a CELP-style codec: each 432-sample frame carries 12 reflection coefficients
//! for the lattice synthesis filter plus four subframes of excitation, coded either as sparse
//! multi-pulses or as a three-level residual (RELP). Revision 3 frames may append a raw PCM
//! overlay. One decoder instance decodes one channel; containers feed it bytes through a
//! [`ByteSource`] window and interleave channels themselves.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Toccata crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::excessive_precision)]
#![allow(clippy::needless_range_loop)]

use toccata_core::errors::{decode_error, Result};
use toccata_core::io::ByteSource;

mod tables;

use tables::{UTK_CODEBOOKS, UTK_COMMANDS, UTK_RC_TABLE};

/// Samples per decoded frame (4 subframes of 108).
pub const SAMPLES_PER_FRAME: usize = 432;
const SUBFRAME_LEN: usize = 108;
const ADAPT_CB_LEN: usize = 324;

/// Refill granularity of the byte window over the source.
const BUFFER_LEN: usize = 0x1000;

/// Excitation command models: pulses switch between a normal and a large-pulse codebook.
pub(crate) const MDL_NORMAL: usize = 0;
pub(crate) const MDL_LARGEPULSE: usize = 1;

/// One MicroTalk decoder instance.
pub struct UtkDecoder {
    src: Box<dyn ByteSource>,
    /// Next source offset the window refills from.
    src_pos: u64,
    buffer: Vec<u8>,
    ptr: usize,
    end: usize,

    bits_value: u32,
    bits_count: i32,

    parsed_header: bool,
    reduced_bw: bool,
    multipulse_thresh: i32,
    fixed_gains: [f32; 64],

    rc: [f32; 12],
    synth_history: [f32; 12],
    adapt_cb: [f32; ADAPT_CB_LEN],
    frame: [f32; SAMPLES_PER_FRAME],
}

impl UtkDecoder {
    /// Instantiates a decoder reading from the start of `src`.
    pub fn new(src: Box<dyn ByteSource>) -> UtkDecoder {
        UtkDecoder {
            src,
            src_pos: 0,
            buffer: vec![0; BUFFER_LEN],
            ptr: 0,
            end: 0,
            bits_value: 0,
            bits_count: 0,
            parsed_header: false,
            reduced_bw: false,
            multipulse_thresh: 0,
            fixed_gains: [0.0; 64],
            rc: [0.0; 12],
            synth_history: [0.0; 12],
            adapt_cb: [0.0; ADAPT_CB_LEN],
            frame: [0.0; SAMPLES_PER_FRAME],
        }
    }

    /// The last decoded frame.
    pub fn frame(&self) -> &[f32; SAMPLES_PER_FRAME] {
        &self.frame
    }

    /// Re-points the byte window at an absolute source offset, dropping buffered bytes and the
    /// partial bit state.
    pub fn set_position(&mut self, offset: u64) {
        self.src_pos = offset;
        self.ptr = 0;
        self.end = 0;
        self.bits_count = 0;
    }

    /// Resets all rolling state, keeping the source. The stream header is re-parsed on the
    /// next frame.
    pub fn reset(&mut self) {
        self.bits_value = 0;
        self.bits_count = 0;
        self.parsed_header = false;
        self.reduced_bw = false;
        self.multipulse_thresh = 0;
        self.fixed_gains = [0.0; 64];
        self.rc = [0.0; 12];
        self.synth_history = [0.0; 12];
        self.adapt_cb = [0.0; ADAPT_CB_LEN];
        self.frame = [0.0; SAMPLES_PER_FRAME];
    }

    /// Reads the next byte, refilling the window from the source. Past the end of the source
    /// the stream supplies zeros, like the rest of the bit readers.
    fn read_byte(&mut self) -> u8 {
        if self.ptr < self.end {
            let byte = self.buffer[self.ptr];
            self.ptr += 1;
            return byte;
        }

        match self.src.read_at(self.src_pos, &mut self.buffer) {
            Ok(count) if count > 0 => {
                self.src_pos += count as u64;
                self.ptr = 1;
                self.end = count;
                self.buffer[0]
            }
            _ => 0,
        }
    }

    fn read_i16(&mut self) -> i16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        i16::from_be_bytes([hi, lo])
    }

    /// Pulls `count` low bits from the accumulator, keeping at least 8 bits buffered.
    fn read_bits(&mut self, count: u32) -> u32 {
        let ret = self.bits_value & ((1u32 << count) - 1);
        self.bits_value >>= count;
        self.bits_count -= count as i32;

        if self.bits_count < 8 {
            let byte = u32::from(self.read_byte());
            self.bits_value |= byte << self.bits_count;
            self.bits_count += 8;
        }

        ret
    }

    /// Parses the one-time stream parameters: bandwidth mode, the multi-pulse threshold, and
    /// the geometric fixed-gain ladder.
    fn parse_header(&mut self) {
        self.reduced_bw = self.read_bits(1) != 0;
        self.multipulse_thresh = 32 - self.read_bits(4) as i32;
        self.fixed_gains[0] = 8.0 * (1 + self.read_bits(4)) as f32;
        let multiplier = 1.04 + self.read_bits(6) as f32 * 0.001;

        for i in 1..64 {
            self.fixed_gains[i] = self.fixed_gains[i - 1] * multiplier;
        }
    }

    /// Decodes one subframe of excitation into `out` at the given stride.
    fn decode_excitation(&mut self, use_multipulse: bool, out: &mut [f32], stride: usize) {
        if use_multipulse {
            /* multi-pulse model: n pulses are coded explicitly, the rest are zero */
            let mut model = MDL_NORMAL;
            let mut i = 0;
            while i < SUBFRAME_LEN {
                let cmd = usize::from(UTK_CODEBOOKS[model][(self.bits_value & 0xff) as usize]);
                let command = &UTK_COMMANDS[cmd];
                model = command.next_model;
                self.read_bits(command.code_size);

                if cmd > 3 {
                    /* a pulse with magnitude <= 6.0 */
                    out[i] = command.pulse_value;
                    i += stride;
                }
                else if cmd > 1 {
                    /* a run of 7..70 zeros */
                    let mut count = 7 + self.read_bits(6) as usize;
                    if i + count * stride > SUBFRAME_LEN {
                        count = (SUBFRAME_LEN - i) / stride;
                    }

                    for _ in 0..count {
                        out[i] = 0.0;
                        i += stride;
                    }
                }
                else {
                    /* a pulse with magnitude >= 7.0: unary extension plus sign */
                    let mut x: i32 = 7;

                    while self.read_bits(1) != 0 {
                        x += 1;
                    }
                    if self.read_bits(1) == 0 {
                        x = -x;
                    }

                    out[i] = x as f32;
                    i += stride;
                }
            }
        }
        else {
            /* RELP model: the whole residual is coded as a three-level signal */
            let mut i = 0;
            while i < SUBFRAME_LEN {
                out[i] = if self.read_bits(1) == 0 {
                    0.0
                }
                else if self.read_bits(1) == 0 {
                    -2.0
                }
                else {
                    2.0
                };
                i += stride;
            }
        }
    }

    /// Runs the all-pole synthesis filter over `num_blocks` blocks of 12 samples starting at
    /// `offset` of the decoded frame.
    fn lp_synthesis_filter(&mut self, offset: usize, num_blocks: usize) {
        let mut lpc = [0.0f32; 12];
        rc_to_lpc(&self.rc, &mut lpc);

        let mut pos = offset;
        for _ in 0..num_blocks {
            for j in 0..12 {
                let mut x = self.frame[pos];

                for k in 0..j {
                    x += lpc[k] * self.synth_history[k + 12 - j];
                }
                for k in j..12 {
                    x += lpc[k] * self.synth_history[k - j];
                }

                self.synth_history[11 - j] = x;
                self.frame[pos] = x;
                pos += 1;
            }
        }
    }

    /// Decodes one 432-sample frame.
    pub fn decode_frame(&mut self) -> Result<()> {
        if self.bits_count == 0 {
            self.bits_value = u32::from(self.read_byte());
            self.bits_count = 8;
        }

        if !self.parsed_header {
            self.parse_header();
            self.parsed_header = true;
        }

        // Five guard samples on both sides: the reduced-bandwidth interpolator reaches them.
        let mut excitation = [0.0f32; 5 + SUBFRAME_LEN + 5];
        let mut rc_delta = [0.0f32; 12];
        let mut use_multipulse = false;

        /* reflection coefficients, eased in over the frame's subframes */
        for i in 0..12 {
            let idx = if i == 0 {
                let idx = self.read_bits(6) as i32;
                if idx < self.multipulse_thresh {
                    use_multipulse = true;
                }
                idx
            }
            else if i < 4 {
                self.read_bits(6) as i32
            }
            else {
                16 + self.read_bits(5) as i32
            };

            rc_delta[i] = (UTK_RC_TABLE[idx as usize] - self.rc[i]) * 0.25;
        }

        /* four subframes of excitation plus pitch prediction */
        for i in 0..4 {
            let pitch_lag = self.read_bits(8) as usize;
            let pitch_gain = self.read_bits(4) as f32 / 15.0;
            let mut fixed_gain = self.fixed_gains[self.read_bits(6) as usize];

            if !self.reduced_bw {
                self.decode_excitation(use_multipulse, &mut excitation[5..5 + SUBFRAME_LEN], 1);
            }
            else {
                /* the excitation occupies every other sample */
                let align = self.read_bits(1) as usize;
                let zero = self.read_bits(1) != 0;

                self.decode_excitation(
                    use_multipulse,
                    &mut excitation[5 + align..5 + SUBFRAME_LEN],
                    2,
                );

                if zero {
                    /* spectrum duplicated into the high frequencies */
                    for j in 0..54 {
                        excitation[5 + (1 - align) + 2 * j] = 0.0;
                    }
                }
                else {
                    /* low-pass interpolate the gaps with a 6-tap symmetric sinc */
                    let base = 5 + (1 - align);
                    let mut j = 0;
                    while j < SUBFRAME_LEN {
                        let p = base + j;
                        excitation[p] = excitation[p - 5] * 0.01803267933428287506103515625
                            - excitation[p - 3] * 0.114591561257839202880859375
                            + excitation[p - 1] * 0.597385942935943603515625
                            + excitation[p + 1] * 0.597385942935943603515625
                            - excitation[p + 3] * 0.114591561257839202880859375
                            + excitation[p + 5] * 0.01803267933428287506103515625;
                        j += 2;
                    }

                    /* the sinc impulse response has unit energy at half gain */
                    fixed_gain *= 0.5;
                }
            }

            // The pitch predictor addresses a virtual history: the previous frame's tail (the
            // adaptive codebook) continued by the current frame's earlier subframes. Short lags
            // on later subframes land in the latter. A lag reaching before the history (only
            // possible with pitch_lag > 216 on the first subframe) predicts silence; the
            // original decoder reads out of bounds there.
            for j in 0..SUBFRAME_LEN {
                let cb_index = (SUBFRAME_LEN * i + 216 + j).wrapping_sub(pitch_lag);
                let predicted = if cb_index < ADAPT_CB_LEN {
                    self.adapt_cb[cb_index]
                }
                else {
                    self.frame.get(cb_index - ADAPT_CB_LEN).copied().unwrap_or(0.0)
                };
                self.frame[SUBFRAME_LEN * i + j] =
                    fixed_gain * excitation[5 + j] + pitch_gain * predicted;
            }
        }

        /* slide the adaptive codebook over the new frame */
        self.adapt_cb.copy_from_slice(&self.frame[SUBFRAME_LEN..]);

        /* apply a quarter of the coefficient delta per subframe and synthesize */
        for i in 0..4 {
            for j in 0..12 {
                self.rc[j] += rc_delta[j];
            }
            self.lp_synthesis_filter(12 * i, if i < 3 { 1 } else { 33 });
        }

        Ok(())
    }

    /// Decodes one revision-3 frame: a standard frame optionally followed by a raw PCM
    /// overlay, signalled by a leading `0xEE` byte.
    pub fn decode_frame_rev3(&mut self) -> Result<()> {
        let pcm_data_present = self.read_byte() == 0xee;

        self.decode_frame()?;

        // The bit reader prefetches one byte; step back so the overlay reads byte-aligned.
        self.ptr = self.ptr.saturating_sub(1);
        self.bits_count = 0;

        if pcm_data_present {
            let offset = self.read_i16() as i32;
            let count = self.read_i16() as i32;

            // The original tool does no bounds checking here and can be crashed by a crafted
            // file; reject instead.
            if offset < 0 || offset > SAMPLES_PER_FRAME as i32 {
                return decode_error("utk: invalid pcm overlay offset");
            }
            if count < 0 || count > SAMPLES_PER_FRAME as i32 - offset {
                return decode_error("utk: invalid pcm overlay count");
            }

            for i in 0..count as usize {
                self.frame[offset as usize + i] = f32::from(self.read_i16());
            }
        }

        Ok(())
    }
}

/// Converts reflection coefficients to direct-form LPC via the step-down recursion.
fn rc_to_lpc(rc: &[f32; 12], lpc: &mut [f32; 12]) {
    let mut tmp1 = [0.0f32; 12];
    let mut tmp2 = [0.0f32; 12];

    tmp2[0] = 1.0;
    tmp2[1..12].copy_from_slice(&rc[..11]);

    for i in 0..12 {
        let mut x = -tmp2[11] * rc[11];

        for j in (0..11).rev() {
            x -= tmp2[j] * rc[j];
            tmp2[j + 1] = x * rc[j] + tmp2[j];
        }

        tmp1[i] = x;
        tmp2[0] = x;

        for j in 0..i {
            x -= tmp1[i - 1 - j] * lpc[j];
        }

        lpc[i] = x;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toccata_core::io::{BitWriterRtl, MemSource};

    /// Writes the one-time stream header: full bandwidth, threshold field 15 (threshold 17),
    /// base gain 8*(1+5)=48, multiplier 1.04+10*0.001.
    fn write_header(bw: &mut BitWriterRtl) {
        bw.put_bits_leq32(0, 1);
        bw.put_bits_leq32(15, 4);
        bw.put_bits_leq32(5, 4);
        bw.put_bits_leq32(10, 6);
    }

    /// Writes a frame of all-zero reflection coefficients (index 31/15 is the zero entry,
    /// and 31 >= threshold so the RELP model is selected), zero pitch gain, and an all-zero
    /// RELP excitation.
    fn write_zero_frame(bw: &mut BitWriterRtl) {
        bw.put_bits_leq32(31, 6);
        for _ in 1..4 {
            bw.put_bits_leq32(31, 6);
        }
        for _ in 4..12 {
            bw.put_bits_leq32(15, 5);
        }
        for _ in 0..4 {
            bw.put_bits_leq32(108, 8); /* pitch_lag */
            bw.put_bits_leq32(0, 4); /* pitch_gain */
            bw.put_bits_leq32(0, 6); /* fixed_gain index */
            for _ in 0..108 {
                bw.put_bits_leq32(0, 1); /* RELP zero */
            }
        }
    }

    fn decoder_over(bytes: Vec<u8>) -> UtkDecoder {
        UtkDecoder::new(Box::new(MemSource::new(bytes)))
    }

    #[test]
    fn verify_header_parameters() {
        let mut bw = BitWriterRtl::new();
        write_header(&mut bw);
        write_zero_frame(&mut bw);
        let mut decoder = decoder_over(bw.into_bytes());

        decoder.decode_frame().unwrap();

        assert!(!decoder.reduced_bw);
        assert_eq!(decoder.multipulse_thresh, 17);
        assert_eq!(decoder.fixed_gains[0], 48.0);
        let multiplier = decoder.fixed_gains[1] / decoder.fixed_gains[0];
        assert!((multiplier - 1.05).abs() < 1.0e-6);
        // The ladder is geometric.
        for i in 2..64 {
            let step = decoder.fixed_gains[i] / decoder.fixed_gains[i - 1];
            assert!((step - multiplier).abs() < 1.0e-4);
        }
    }

    #[test]
    fn verify_zero_frame_decodes_to_silence() {
        let mut bw = BitWriterRtl::new();
        write_header(&mut bw);
        write_zero_frame(&mut bw);
        let mut decoder = decoder_over(bw.into_bytes());

        decoder.decode_frame().unwrap();
        assert!(decoder.frame().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn verify_adaptive_codebook_tracks_frame_tail() {
        let mut bw = BitWriterRtl::new();
        write_header(&mut bw);
        write_zero_frame(&mut bw);
        let mut decoder = decoder_over(bw.into_bytes());

        decoder.decode_frame().unwrap();

        // The adaptive codebook must equal the frame's last 324 pre-synthesis samples; with a
        // silent frame both are zero, which at least pins the sizes.
        assert_eq!(decoder.adapt_cb.len(), 324);
        assert!(decoder.adapt_cb.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn verify_rev3_pcm_overlay() {
        let mut bw = BitWriterRtl::new();
        write_header(&mut bw);
        write_zero_frame(&mut bw);
        let mut bytes = vec![0xee];
        bytes.extend_from_slice(&bw.into_bytes());
        // Overlay: offset 100, count 4, samples 1000, 2000, 3000, 4000 (big-endian).
        for v in [100i16, 4, 1000, 2000, 3000, 4000] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }

        let mut decoder = decoder_over(bytes);
        decoder.decode_frame_rev3().unwrap();

        let frame = decoder.frame();
        assert_eq!(frame[100], 1000.0);
        assert_eq!(frame[101], 2000.0);
        assert_eq!(frame[102], 3000.0);
        assert_eq!(frame[103], 4000.0);
        assert_eq!(frame[99], 0.0);
        assert_eq!(frame[104], 0.0);
    }

    #[test]
    fn verify_rev3_overlay_bounds_rejected() {
        for (offset, count) in [(433i16, 1i16), (430, 10), (-1i16 as i16, 1)] {
            let mut bw = BitWriterRtl::new();
            write_header(&mut bw);
            write_zero_frame(&mut bw);
            let mut bytes = vec![0xee];
            bytes.extend_from_slice(&bw.into_bytes());
            bytes.extend_from_slice(&offset.to_be_bytes());
            bytes.extend_from_slice(&count.to_be_bytes());

            let mut decoder = decoder_over(bytes);
            assert!(decoder.decode_frame_rev3().is_err(), "offset={offset} count={count}");
        }
    }

    #[test]
    fn verify_rev3_without_overlay_matches_standard() {
        let mut bw = BitWriterRtl::new();
        write_header(&mut bw);
        write_zero_frame(&mut bw);
        let frame_bytes = bw.into_bytes();

        let mut standard = decoder_over(frame_bytes.clone());
        standard.decode_frame().unwrap();

        let mut rev3_bytes = vec![0x00];
        rev3_bytes.extend_from_slice(&frame_bytes);
        let mut rev3 = decoder_over(rev3_bytes);
        rev3.decode_frame_rev3().unwrap();

        assert_eq!(standard.frame()[..], rev3.frame()[..]);
    }
}
