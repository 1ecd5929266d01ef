// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-frame decoding: bitstream unpack, spectral reconstruction and the windowed IMDCT.

use toccata_core::checksum::crc16_checksum;
use toccata_core::errors::{decode_error, Result};
use toccata_core::io::BitReaderLtr;

use crate::cipher;
use crate::header::{ChannelType, HcaHeader};
use crate::tables;

pub const SUBFRAMES: usize = 8;
pub const SAMPLES_PER_SUBFRAME: usize = 128;
pub const SAMPLES_PER_FRAME: usize = SUBFRAMES * SAMPLES_PER_SUBFRAME;
const MDCT_BITS: usize = 7;
const HALF: usize = SAMPLES_PER_SUBFRAME / 2;

const DEFAULT_RANDOM: u32 = 1;

/// Per-channel decode state.
struct Channel {
    ctype: ChannelType,
    coded_count: usize,

    /* subframe state */
    intensity: [u8; SUBFRAMES],
    scalefactors: [u8; SAMPLES_PER_SUBFRAME],
    resolution: [u8; SAMPLES_PER_SUBFRAME],
    /// Coefficient indexes needing noise fill (from the front) and regular indexes (from the
    /// back).
    noises: [u8; SAMPLES_PER_SUBFRAME],
    noise_count: usize,
    valid_count: usize,

    gain: [f32; SAMPLES_PER_SUBFRAME],
    spectra: [[f32; SAMPLES_PER_SUBFRAME]; SUBFRAMES],

    /// Ping-pong scratch of the DCT-IV.
    temp: [f32; SAMPLES_PER_SUBFRAME],
    /// Second half of the previous subframe's IMDCT, for the overlap-add.
    imdct_previous: [f32; SAMPLES_PER_SUBFRAME],

    /* frame state */
    wave: [[f32; SAMPLES_PER_SUBFRAME]; SUBFRAMES],
}

impl Channel {
    fn new(ctype: ChannelType, coded_count: usize) -> Self {
        Channel {
            ctype,
            coded_count,
            intensity: [0; SUBFRAMES],
            scalefactors: [0; SAMPLES_PER_SUBFRAME],
            resolution: [0; SAMPLES_PER_SUBFRAME],
            noises: [0; SAMPLES_PER_SUBFRAME],
            noise_count: 0,
            valid_count: 0,
            gain: [0.0; SAMPLES_PER_SUBFRAME],
            spectra: [[0.0; SAMPLES_PER_SUBFRAME]; SUBFRAMES],
            temp: [0.0; SAMPLES_PER_SUBFRAME],
            imdct_previous: [0.0; SAMPLES_PER_SUBFRAME],
            wave: [[0.0; SAMPLES_PER_SUBFRAME]; SUBFRAMES],
        }
    }
}

/// Frame decoder for one HCA stream. Holds the derived tables and all rolling channel state.
pub struct FrameDecoder {
    version: u32,
    frame_size: usize,
    channels: Vec<Channel>,
    min_resolution: u32,
    max_resolution: u32,
    total_band_count: usize,
    base_band_count: usize,
    stereo_band_count: usize,
    bands_per_hfr_group: usize,
    hfr_group_count: usize,
    ms_stereo: bool,

    ath_curve: [u8; SAMPLES_PER_SUBFRAME],
    cipher_table: [u8; 256],
    random: u32,
}

impl FrameDecoder {
    /// Builds a frame decoder from a parsed header and the effective keycode.
    pub fn new(header: &HcaHeader, keycode: u64) -> Result<FrameDecoder> {
        let mut ath_curve = [0u8; SAMPLES_PER_SUBFRAME];
        crate::ath::init(&mut ath_curve, header.ath_type, header.sample_rate)?;

        let mut cipher_table = [0u8; 256];
        cipher::init(&mut cipher_table, header.ciph_type, keycode)?;

        let types = header.channel_types();
        let channels = (0..header.channels)
            .map(|i| Channel::new(types[i], header.coded_count(types[i])))
            .collect();

        Ok(FrameDecoder {
            version: header.version,
            frame_size: header.frame_size as usize,
            channels,
            min_resolution: header.min_resolution,
            max_resolution: header.max_resolution,
            total_band_count: header.total_band_count as usize,
            base_band_count: header.base_band_count as usize,
            stereo_band_count: header.stereo_band_count as usize,
            bands_per_hfr_group: header.bands_per_hfr_group as usize,
            hfr_group_count: header.hfr_group_count as usize,
            ms_stereo: header.ms_stereo,
            ath_curve,
            cipher_table,
            random: DEFAULT_RANDOM,
        })
    }

    /// Re-derives the cipher table for a new keycode.
    pub fn set_key(&mut self, ciph_type: u32, keycode: u64) -> Result<()> {
        cipher::init(&mut self.cipher_table, ciph_type, keycode)
    }

    /// Drops rolling decode state (IMDCT overlap, noise generator) ahead of a discontinuous
    /// frame, e.g. after a seek or loop.
    pub fn reset(&mut self) {
        self.random = DEFAULT_RANDOM;
        for ch in self.channels.iter_mut() {
            ch.imdct_previous = [0.0; SAMPLES_PER_SUBFRAME];
        }
    }

    /// Decodes one whole frame in place and leaves the samples in the per-channel wave arrays.
    pub fn decode_frame(&mut self, data: &mut [u8]) -> Result<()> {
        self.unpack(data)?;
        self.transform();
        Ok(())
    }

    /// Interleaves the decoded frame as signed 16-bit samples. `out` must hold
    /// `SAMPLES_PER_FRAME * channels` values.
    pub fn read_samples16(&self, out: &mut [i16]) {
        let mut pos = 0;
        for sf in 0..SUBFRAMES {
            for s in 0..SAMPLES_PER_SUBFRAME {
                for ch in self.channels.iter() {
                    out[pos] = toccata_core::conv::f32_to_i16(ch.wave[sf][s]);
                    pos += 1;
                }
            }
        }
    }

    /// Unpacks a frame's bitstream into dequantized spectra. Returns the number of bits
    /// consumed, for trailing-data validation.
    pub fn unpack(&mut self, data: &mut [u8]) -> Result<usize> {
        if data.len() < self.frame_size {
            return decode_error("hca: frame truncated");
        }
        let data = &mut data[..self.frame_size];

        if data[0] != 0xff || data[1] != 0xff {
            return decode_error("hca: bad frame sync");
        }
        if crc16_checksum(data) != 0 {
            return decode_error("hca: frame checksum mismatch");
        }

        cipher::decrypt(&self.cipher_table, data);

        let mut bs = BitReaderLtr::new(data);
        bs.ignore_bits(16);

        let acceptable_noise_level = bs.read_bits_leq32(9);
        let evaluation_boundary = bs.read_bits_leq32(7);
        let packed_noise_level = (acceptable_noise_level << 8).wrapping_sub(evaluation_boundary);

        for ch in self.channels.iter_mut() {
            unpack_scalefactors(ch, &mut bs, self.hfr_group_count, self.version)?;
            unpack_intensity(ch, &mut bs, self.hfr_group_count, self.version)?;
            calculate_resolution(
                ch,
                packed_noise_level,
                &self.ath_curve,
                self.min_resolution,
                self.max_resolution,
            );
            calculate_gain(ch);
        }

        for subframe in 0..SUBFRAMES {
            for ch in self.channels.iter_mut() {
                dequantize_coefficients(ch, &mut bs, subframe);
            }
        }

        Ok(bs.pos())
    }

    /// Reconstructs the skipped spectrum regions and produces samples for all subframes.
    pub fn transform(&mut self) {
        for subframe in 0..SUBFRAMES {
            for ch in self.channels.iter_mut() {
                reconstruct_noise(ch, self.min_resolution, self.ms_stereo, &mut self.random, subframe);
                reconstruct_high_frequency(
                    ch,
                    self.hfr_group_count,
                    self.bands_per_hfr_group,
                    self.stereo_band_count,
                    self.base_band_count,
                    self.total_band_count,
                    self.version,
                    subframe,
                );
            }

            if self.stereo_band_count > 0 {
                for ch in 0..self.channels.len() - 1 {
                    let (left, right) = self.channels.split_at_mut(ch + 1);

                    apply_intensity_stereo(
                        (&mut left[ch], &mut right[0]),
                        subframe,
                        self.base_band_count,
                        self.total_band_count,
                    );
                    apply_ms_stereo(
                        (&mut left[ch], &mut right[0]),
                        self.ms_stereo,
                        self.base_band_count,
                        self.total_band_count,
                        subframe,
                    );
                }
            }

            for ch in self.channels.iter_mut() {
                imdct_transform(ch, subframe);
            }
        }
    }

    /// Scores one frame against the current key, for key discovery. Returns a negative value
    /// for an undecodable frame, 0 for an inconclusive (silent) one, and otherwise a positive
    /// count where lower is better and 1 is essentially perfect.
    pub fn test_frame(&mut self, data: &mut [u8]) -> i32 {
        // Frames that are zero except for sync and checksum are silent and prove nothing.
        if data.len() >= 4 && data[2..data.len() - 2].iter().all(|&b| b == 0) {
            return 0;
        }

        let used_bits = match self.unpack(data) {
            Ok(bits) => bits,
            Err(_) => return -1,
        };

        // All bits between the consumed region and the trailing checksum must be zero; a wrong
        // key scrambles them. Tolerates the known 2-bit encoder shortfall.
        let bits_max = self.frame_size * 8;
        if used_bits + 14 > bits_max {
            return -1;
        }
        let byte_start = (used_bits / 8) + usize::from(used_bits % 8 != 0);
        if byte_start < self.frame_size - 2
            && data[byte_start..self.frame_size - 2].iter().any(|&b| b != 0)
        {
            return -1;
        }

        self.transform();

        let frame_samples = SUBFRAMES * SAMPLES_PER_SUBFRAME;
        let mut clips = 0;
        let mut blanks = 0;
        let mut channel_blanks = vec![0usize; self.channels.len()];

        for (ch_index, ch) in self.channels.iter().enumerate() {
            for sf in 0..SUBFRAMES {
                for s in 0..SAMPLES_PER_SUBFRAME {
                    let sample = ch.wave[sf][s];
                    if sample > 1.0 || sample < -1.0 {
                        clips += 1;
                    }
                    else {
                        let pcm = (sample * 32768.0) as i32;
                        if pcm == 0 || pcm == -1 {
                            blanks += 1;
                            channel_blanks[ch_index] += 1;
                        }
                    }
                }
            }
        }

        // The more clipped samples, the less likely the key was right.
        if clips == 1 {
            clips += 1;
        }
        if clips > 1 {
            return clips;
        }

        if blanks == self.channels.len() * frame_samples {
            return 0;
        }

        // Wrong keys sometimes null one channel of a joint-stereo pair; don't give such frames
        // full marks.
        if self.channels.len() >= 2
            && channel_blanks[0] == frame_samples
            && channel_blanks[1] != frame_samples
        {
            return 3;
        }

        1
    }
}

/// Unpacks the per-coefficient scalefactor indexes, stored raw or as deltas.
fn unpack_scalefactors(
    ch: &mut Channel,
    bs: &mut BitReaderLtr<'_>,
    hfr_group_count: usize,
    version: u32,
) -> Result<()> {
    let mut cs_count = ch.coded_count;
    let delta_bits = bs.read_bits_leq32(3);

    // v3.0 streams carry the high-frequency scales inline after the regular ones.
    let extra_count = if ch.ctype == ChannelType::StereoSecondary
        || hfr_group_count == 0
        || version <= crate::header::HCA_VERSION_V200
    {
        0
    }
    else {
        cs_count += hfr_group_count;
        if cs_count > SAMPLES_PER_SUBFRAME {
            return decode_error("hca: scalefactor count overflow");
        }
        hfr_group_count
    };

    if delta_bits >= 6 {
        /* fixed scalefactors */
        for i in 0..cs_count {
            ch.scalefactors[i] = bs.read_bits_leq32(6) as u8;
        }
    }
    else if delta_bits > 0 {
        /* delta scalefactors */
        let expected_delta = (1u32 << delta_bits) - 1;
        let mut value = bs.read_bits_leq32(6);

        ch.scalefactors[0] = value as u8;
        for i in 1..cs_count {
            let delta = bs.read_bits_leq32(delta_bits);

            if delta == expected_delta {
                value = bs.read_bits_leq32(6); /* encoded */
            }
            else {
                // Bad keycodes produce out-of-range deltas; scalefactors must stay 6-bit.
                let test = value as i32 + (delta as i32 - (expected_delta >> 1) as i32);
                if test < 0 || test >= 64 {
                    return decode_error("hca: scalefactor delta out of range");
                }

                value = (value.wrapping_sub(expected_delta >> 1).wrapping_add(delta)) & 0x3f;
            }
            ch.scalefactors[i] = value as u8;
        }
    }
    else {
        /* no scalefactors */
        ch.scalefactors = [0; SAMPLES_PER_SUBFRAME];
    }

    /* mirror the inline HFR scales into the tail of the table (v3.0) */
    for i in 0..extra_count {
        let src = cs_count - i;
        if src < SAMPLES_PER_SUBFRAME {
            ch.scalefactors[SAMPLES_PER_SUBFRAME - 1 - i] = ch.scalefactors[src];
        }
    }

    Ok(())
}

/// Unpacks intensity-stereo pan indexes for secondary channels, or the v2.0 high-frequency
/// scales for the rest.
fn unpack_intensity(
    ch: &mut Channel,
    bs: &mut BitReaderLtr<'_>,
    hfr_group_count: usize,
    version: u32,
) -> Result<()> {
    if ch.ctype == ChannelType::StereoSecondary {
        if version <= crate::header::HCA_VERSION_V200 {
            let value = bs.peek(4) as u8;

            ch.intensity[0] = value;
            if value < 15 {
                bs.ignore_bits(4);
                for i in 1..SUBFRAMES {
                    ch.intensity[i] = bs.read_bits_leq32(4) as u8;
                }
            }
        }
        else {
            let value = bs.peek(4);

            if value < 15 {
                bs.ignore_bits(4);
                let delta_bits = bs.read_bits_leq32(2);

                ch.intensity[0] = value as u8;
                if delta_bits == 3 {
                    /* fixed intensities */
                    for i in 1..SUBFRAMES {
                        ch.intensity[i] = bs.read_bits_leq32(4) as u8;
                    }
                }
                else {
                    /* delta intensities */
                    let bmax = (2u32 << delta_bits) - 1;
                    let bits = delta_bits + 1;
                    let mut value = value;

                    for i in 1..SUBFRAMES {
                        let delta = bs.read_bits_leq32(bits);
                        if delta == bmax {
                            value = bs.read_bits_leq32(4); /* encoded */
                        }
                        else {
                            value = value.wrapping_sub(bmax >> 1).wrapping_add(delta);
                            if value > 15 {
                                return decode_error("hca: intensity delta out of range");
                            }
                        }
                        ch.intensity[i] = value as u8;
                    }
                }
            }
            else {
                bs.ignore_bits(4);
                ch.intensity = [7; SUBFRAMES];
            }
        }
    }
    else if version <= crate::header::HCA_VERSION_V200 {
        /* v2.0 high frequency scales; v3.0 derives them in unpack_scalefactors instead */
        let start = SAMPLES_PER_SUBFRAME - hfr_group_count;
        for i in 0..hfr_group_count {
            ch.scalefactors[start + i] = bs.read_bits_leq32(6) as u8;
        }
    }

    Ok(())
}

/// Derives the per-coefficient quantizer resolutions from the scalefactors and noise levels,
/// and partitions the coefficient indexes into noise-filled and regular sets.
fn calculate_resolution(
    ch: &mut Channel,
    packed_noise_level: u32,
    ath_curve: &[u8; SAMPLES_PER_SUBFRAME],
    min_resolution: u32,
    max_resolution: u32,
) {
    let cr_count = ch.coded_count;
    let mut noise_count = 0;
    let mut valid_count = 0;

    for i in 0..cr_count {
        let mut new_resolution = 0u8;
        let scalefactor = ch.scalefactors[i];

        if scalefactor > 0 {
            let noise_level =
                i32::from(ath_curve[i]) + ((packed_noise_level.wrapping_add(i as u32)) >> 8) as i32;
            let curve_position = noise_level + 1 - ((5 * i32::from(scalefactor)) >> 1);

            new_resolution = if curve_position < 0 {
                15
            }
            else if curve_position <= 65 {
                tables::INVERT_TABLE[curve_position as usize]
            }
            else {
                0
            };

            // Clamping to the header range was added in v3.0; before that min was always 1.
            new_resolution = new_resolution.clamp(min_resolution as u8, max_resolution as u8);

            if new_resolution < 1 {
                ch.noises[noise_count] = i as u8;
                noise_count += 1;
            }
            else {
                ch.noises[SAMPLES_PER_SUBFRAME - 1 - valid_count] = i as u8;
                valid_count += 1;
            }
        }
        ch.resolution[i] = new_resolution;
    }

    ch.noise_count = noise_count;
    ch.valid_count = valid_count;
    ch.resolution[cr_count..].fill(0);
}

/// Combines scalefactor and resolution into the dequantization gain.
fn calculate_gain(ch: &mut Channel) {
    for i in 0..ch.coded_count {
        let scalefactor_scale = tables::scaling_table(usize::from(ch.scalefactors[i]));
        let resolution_scale = tables::range_table(usize::from(ch.resolution[i]));
        ch.gain[i] = scalefactor_scale * resolution_scale;
    }
}

/// Reads one subframe's quantized coefficients and scales them by the gains.
fn dequantize_coefficients(ch: &mut Channel, bs: &mut BitReaderLtr<'_>, subframe: usize) {
    let cc_count = ch.coded_count;

    for i in 0..cc_count {
        let resolution = usize::from(ch.resolution[i]);
        let bits = u32::from(tables::MAX_BIT_TABLE[resolution]);
        let code = bs.read_bits_leq32(bits);

        let qc = if resolution > 7 {
            /* sign-magnitude, lowest bit is the sign */
            let signed_code = (1 - ((code & 1) << 1) as i32) * (code >> 1) as i32;
            if signed_code == 0 {
                bs.set_pos(bs.pos() - 1); /* zero has no sign bit */
            }
            signed_code as f32
        }
        else {
            /* prefix codebooks for the lower resolutions */
            let index = (resolution << 4) + code as usize;
            let used = usize::from(tables::READ_BIT_TABLE[index]);
            bs.set_pos(bs.pos() + used - bits as usize);
            tables::READ_VAL_TABLE[index]
        };

        ch.spectra[subframe][i] = ch.gain[i] * qc;
    }

    ch.spectra[subframe][cc_count..].fill(0.0);
}

/// Synthesizes the noise-filled coefficients from randomly chosen regular ones. Matches the
/// reference 16-bit LCG exactly so noise is reproducible.
fn reconstruct_noise(
    ch: &mut Channel,
    min_resolution: u32,
    ms_stereo: bool,
    random: &mut u32,
    subframe: usize,
) {
    if min_resolution > 0 {
        /* noise fill exists in v3.0 streams only */
        return;
    }
    if ch.valid_count == 0 || ch.noise_count == 0 {
        return;
    }
    if ms_stereo && ch.ctype != ChannelType::StereoPrimary {
        return;
    }

    for i in 0..ch.noise_count {
        *random = 0x343fd_u32.wrapping_mul(*random).wrapping_add(0x269ec3);

        let random_index = SAMPLES_PER_SUBFRAME - ch.valid_count
            + ((((*random & 0x7fff) as usize) * ch.valid_count) >> 15);

        let noise_index = usize::from(ch.noises[i]);
        let valid_index = usize::from(ch.noises[random_index]);

        let sf_noise = i32::from(ch.scalefactors[noise_index]);
        let sf_valid = i32::from(ch.scalefactors[valid_index]);
        let sc_index = (sf_noise - sf_valid + 62).max(0) as usize;

        ch.spectra[subframe][noise_index] =
            tables::scale_conversion_table(sc_index) * ch.spectra[subframe][valid_index];
    }
}

/// Copies low-band coefficients into the unencoded high bands, scaled by the per-group high
/// frequency scales.
#[allow(clippy::too_many_arguments)]
fn reconstruct_high_frequency(
    ch: &mut Channel,
    hfr_group_count: usize,
    bands_per_hfr_group: usize,
    stereo_band_count: usize,
    base_band_count: usize,
    total_band_count: usize,
    version: u32,
    subframe: usize,
) {
    if bands_per_hfr_group == 0 {
        return;
    }
    if ch.ctype == ChannelType::StereoSecondary {
        return;
    }

    let start_band = stereo_band_count + base_band_count;
    let mut highband = start_band;
    let mut lowband = start_band as isize - 1;
    let hfr_scales_start = SAMPLES_PER_SUBFRAME - hfr_group_count;

    // v3.0 mirrors from a pivot: the low band walks down only for the first half of the
    // groups.
    let group_limit = if version <= crate::header::HCA_VERSION_V200 {
        hfr_group_count
    }
    else {
        hfr_group_count >> 1
    };

    for group in 0..hfr_group_count {
        let lowband_sub = if group < group_limit { 1 } else { 0 };

        for _ in 0..bands_per_hfr_group {
            if highband >= total_band_count || lowband < 0 {
                break;
            }

            let sc_index = (i32::from(ch.scalefactors[hfr_scales_start + group])
                - i32::from(ch.scalefactors[lowband as usize])
                + 63)
                .max(0) as usize;

            ch.spectra[subframe][highband] =
                tables::scale_conversion_table(sc_index) * ch.spectra[subframe][lowband as usize];

            highband += 1;
            lowband -= lowband_sub;
        }
    }

    /* the last coefficient is always zeroed */
    if highband > 0 {
        ch.spectra[subframe][highband - 1] = 0.0;
    }
}

/// Rebuilds an intensity-stereo pair from the primary channel's coefficients and the pan
/// ratio.
fn apply_intensity_stereo(
    pair: (&mut Channel, &mut Channel),
    subframe: usize,
    base_band_count: usize,
    total_band_count: usize,
) {
    let (primary, secondary) = pair;
    if primary.ctype != ChannelType::StereoPrimary {
        return;
    }

    let ratio_l = tables::intensity_ratio_table(usize::from(secondary.intensity[subframe]));
    let ratio_r = 2.0 - ratio_l;
    let sp_l = &mut primary.spectra[subframe];
    let sp_r = &mut secondary.spectra[subframe];

    for band in base_band_count..total_band_count {
        let coef = sp_l[band];
        sp_l[band] = coef * ratio_l;
        sp_r[band] = coef * ratio_r;
    }
}

/// Rebuilds a mid/side pair into left/right.
fn apply_ms_stereo(
    pair: (&mut Channel, &mut Channel),
    ms_stereo: bool,
    base_band_count: usize,
    total_band_count: usize,
    subframe: usize,
) {
    if !ms_stereo {
        return;
    }
    let (primary, secondary) = pair;
    if primary.ctype != ChannelType::StereoPrimary {
        return;
    }

    const RATIO: f32 = 0.70710676908493; /* sqrt(2)/2 */
    let sp_l = &mut primary.spectra[subframe];
    let sp_r = &mut secondary.spectra[subframe];

    for band in base_band_count..total_band_count {
        let coef_l = (sp_l[band] + sp_r[band]) * RATIO;
        let coef_r = (sp_l[band] - sp_r[band]) * RATIO;
        sp_l[band] = coef_l;
        sp_r[band] = coef_r;
    }
}

/// 128-point DCT-IV over the subframe spectrum, ping-ponging between the spectrum and scratch
/// buffers. The result lands back in the spectrum buffer.
fn dct4(spectra: &mut [f32; SAMPLES_PER_SUBFRAME], temp: &mut [f32; SAMPLES_PER_SUBFRAME]) {
    /* butterfly sum/difference cascade */
    {
        let mut src: &mut [f32; SAMPLES_PER_SUBFRAME] = &mut *spectra;
        let mut dst: &mut [f32; SAMPLES_PER_SUBFRAME] = &mut *temp;

        for stage in 0..MDCT_BITS {
            let count1 = 1usize << stage;
            let count2 = HALF >> stage;

            let mut s = 0;
            let mut d1 = 0;
            let mut d2 = count2;

            for _ in 0..count1 {
                for _ in 0..count2 {
                    let a = src[s];
                    let b = src[s + 1];
                    s += 2;
                    dst[d1] = a + b;
                    dst[d2] = a - b;
                    d1 += 1;
                    d2 += 1;
                }
                d1 += count2;
                d2 += count2;
            }

            std::mem::swap(&mut src, &mut dst);
        }
    }

    /* rotation cascade; the tables carry the per-stage twiddles */
    {
        let mut src: &mut [f32; SAMPLES_PER_SUBFRAME] = &mut *temp;
        let mut dst: &mut [f32; SAMPLES_PER_SUBFRAME] = &mut *spectra;

        for stage in 0..MDCT_BITS {
            let count1 = HALF >> stage;
            let count2 = 1usize << stage;

            let mut s1 = 0;
            let mut s2 = count2;
            let mut d1 = 0;
            let mut d2 = count2 * 2 - 1;
            let mut t = 0;

            for _ in 0..count1 {
                for _ in 0..count2 {
                    let a = src[s1];
                    let b = src[s2];
                    s1 += 1;
                    s2 += 1;

                    let sin = tables::dct_sin_table(stage, t);
                    let cos = tables::dct_cos_table(stage, t);
                    t += 1;

                    dst[d1] = a * sin - b * cos;
                    d1 += 1;
                    dst[d2] = a * cos + b * sin;
                    d2 = d2.wrapping_sub(1);
                }
                s1 += count2;
                s2 += count2;
                d1 += count2;
                d2 = d2.wrapping_add(count2 * 3);
            }

            std::mem::swap(&mut src, &mut dst);
        }
    }
}

/// DCT-IV plus the fused Princen-Bradley windowed overlap-add: emits 128 samples into the wave
/// array and keeps the folded second half for the next subframe.
fn imdct_transform(ch: &mut Channel, subframe: usize) {
    let (spectra, temp) = (&mut ch.spectra[subframe], &mut ch.temp);
    dct4(spectra, temp);

    let dct = &ch.spectra[subframe];
    let wave = &mut ch.wave[subframe];
    let prev = &mut ch.imdct_previous;

    for i in 0..HALF {
        wave[i] = tables::imdct_window(i) * dct[i + HALF] + prev[i];
        wave[i + HALF] =
            tables::imdct_window(i + HALF) * dct[SAMPLES_PER_SUBFRAME - 1 - i] - prev[i + HALF];
        prev[i] = tables::imdct_window(SAMPLES_PER_SUBFRAME - 1 - i) * dct[HALF - i - 1];
        prev[i + HALF] = tables::imdct_window(HALF - i - 1) * dct[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{build_frame, build_header};

    fn decoder_for(channels: usize, ciph_type: u32, keycode: u64) -> (HcaHeader, FrameDecoder) {
        let data = build_header(channels, 48000, 4, 128, 112, 0x100, ciph_type as u16);
        let header = HcaHeader::parse(&data).unwrap();
        let decoder = FrameDecoder::new(&header, keycode).unwrap();
        (header, decoder)
    }

    #[test]
    fn verify_silent_frame_decodes_to_silence() {
        let (header, mut decoder) = decoder_for(2, 0, 0);
        let mut frame = build_frame(header.frame_size as usize);

        decoder.decode_frame(&mut frame).unwrap();

        let mut pcm = vec![1i16; SAMPLES_PER_FRAME * 2];
        decoder.read_samples16(&mut pcm);
        assert!(pcm.iter().all(|&s| s == 0));
    }

    #[test]
    fn verify_bad_sync_rejected() {
        let (header, mut decoder) = decoder_for(2, 0, 0);
        let mut frame = build_frame(header.frame_size as usize);
        frame[0] = 0x00;
        assert!(decoder.decode_frame(&mut frame).is_err());
    }

    #[test]
    fn verify_corrupt_frame_checksum_rejected() {
        let (header, mut decoder) = decoder_for(2, 0, 0);
        let mut frame = build_frame(header.frame_size as usize);
        frame[4] ^= 0x10;
        assert!(matches!(
            decoder.decode_frame(&mut frame),
            Err(toccata_core::errors::Error::DecodeError(msg)) if msg.contains("checksum")
        ));
    }

    #[test]
    fn verify_silent_frame_scores_inconclusive() {
        let (header, mut decoder) = decoder_for(2, 0, 0);
        let mut frame = build_frame(header.frame_size as usize);
        assert_eq!(decoder.test_frame(&mut frame), 0);
    }

    #[test]
    fn verify_unpack_consumes_expected_bits() {
        // For an all-zero stereo v2.0 frame: 16 sync + 9 + 7 frame bits, 3 scalefactor bits for
        // the primary, 3 + 4 + 7*4 for the secondary's intensities, and no coefficient bits.
        let (header, mut decoder) = decoder_for(2, 0, 0);
        let mut frame = build_frame(header.frame_size as usize);
        let used = decoder.unpack(&mut frame).unwrap();
        assert_eq!(used, 16 + 16 + 3 + (3 + 4 + 7 * 4));
    }
}
