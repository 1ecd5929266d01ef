// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Packet decoding: the lossless byte-predictor path and the lossy LOT-DCT path.

use std::f64::consts::PI;

use toccata_core::errors::{decode_error, unsupported_error, Result};

use crate::context::MioContext;
use crate::matrix::{
    self, create_revolve_parameter, fast_idct, fast_ilot, fast_iplot, odd_givens_inverse,
    round_to_words, SinCos, MAX_DCT_DEGREE,
};
use crate::{Architecture, DataHeader, InfoHeader, Transformation, MIO_LEAD_BLOCK};

const MAX_CHANNELS: usize = 2;

/// Decodes packets described by one stream's info header into interleaved 16-bit samples.
pub struct MioDecoder {
    header: InfoHeader,

    /// Largest per-packet sample count the scratch buffers are sized for.
    buf_length: usize,

    /* lossless scratch */
    byte_buf: Vec<i8>,
    word_buf: Vec<i16>,

    /* lossy scratch */
    quantized: Vec<i32>,
    interleaved: Vec<i16>,
    division_table: Vec<u8>,
    revolve_codes: Vec<u8>,
    weight_codes: Vec<u32>,
    coefficients: Vec<i32>,
    half_quant: Vec<i32>,
    matrix_buf: Vec<f32>,
    internal_buf: Vec<f32>,
    work_buf: Vec<f32>,
    weight_table: Vec<f32>,
    last_dct: Vec<f32>,

    /* block walk cursors */
    next_division: usize,
    next_revolve: usize,
    next_weight: usize,
    next_coefficient: usize,
    next_source: usize,
    last_dct_base: usize,

    /* current matrix geometry */
    subband_degree: u32,
    degree_num: usize,
    revolve_param: Vec<SinCos>,
    frequency_point: [i32; 7],
}

impl MioDecoder {
    /// Validates a stream's info header and sizes the decode state for it.
    pub fn new(header: &InfoHeader) -> Result<MioDecoder> {
        match header.transformation {
            Transformation::Lossless => {
                if header.architecture != Architecture::RunLengthHuffman {
                    return unsupported_error("erisa: lossless stream with non-huffman codes");
                }
                if header.channels != 1 && header.channels != 2 {
                    return decode_error("erisa: invalid channel count");
                }
                if header.bits_per_sample != 8 && header.bits_per_sample != 16 {
                    return decode_error("erisa: invalid sample depth");
                }
            }
            Transformation::Lot | Transformation::LotMss => {
                if header.channels != 1 && header.channels != 2 {
                    return decode_error("erisa: invalid channel count");
                }
                if header.bits_per_sample != 16 {
                    return decode_error("erisa: invalid sample depth");
                }
                if header.subband_degree < 8 || header.subband_degree > MAX_DCT_DEGREE {
                    return decode_error("erisa: invalid subband degree");
                }
                if header.lapped_degree != 1 {
                    return decode_error("erisa: invalid lapped degree");
                }
            }
        }

        let degree_width = 1usize << header.subband_degree;
        let lapped = header.channels * degree_width * header.lapped_degree as usize;

        let mut decoder = MioDecoder {
            header: header.clone(),
            buf_length: 0,
            byte_buf: Vec::new(),
            word_buf: Vec::new(),
            quantized: Vec::new(),
            interleaved: Vec::new(),
            division_table: Vec::new(),
            revolve_codes: Vec::new(),
            weight_codes: Vec::new(),
            coefficients: Vec::new(),
            half_quant: vec![0; degree_width],
            matrix_buf: vec![0.0; header.channels * degree_width],
            internal_buf: vec![0.0; header.channels * degree_width],
            work_buf: vec![0.0; degree_width],
            weight_table: vec![0.0; degree_width],
            last_dct: vec![0.0; lapped],
            next_division: 0,
            next_revolve: 0,
            next_weight: 0,
            next_coefficient: 0,
            next_source: 0,
            last_dct_base: 0,
            subband_degree: 0,
            degree_num: 0,
            revolve_param: Vec::new(),
            frequency_point: [0; 7],
        };

        if matches!(header.transformation, Transformation::Lot | Transformation::LotMss) {
            decoder.set_degree(header.subband_degree)?;
        }

        Ok(decoder)
    }

    /// Zeroes the lapped-transform history, e.g. before restarting at a keyframe.
    pub fn reset(&mut self) {
        self.last_dct.fill(0.0);
    }

    /// Interleaved output samples one packet can produce at most.
    pub fn max_samples(&self, datahdr: &DataHeader) -> usize {
        datahdr.sample_count as usize * self.header.channels
    }

    /// Recomputes the rotation parameters and band boundaries for a (possibly divided) matrix
    /// size.
    fn set_degree(&mut self, degree: u32) -> Result<()> {
        self.revolve_param = create_revolve_parameter(degree);

        // Seven log-spaced frequency bands, each boundary at the middle of its width.
        const FREQ_WIDTH: [i32; 7] = [-6, -6, -5, -4, -3, -2, -1];
        let mut j = 0i32;
        for (i, &width) in FREQ_WIDTH.iter().enumerate() {
            let shift = degree as i32 + width;
            let frequency_width = if shift >= 0 { 1 << shift } else { 0 };
            self.frequency_point[i] = j + frequency_width / 2;
            j += frequency_width;
        }

        self.subband_degree = degree;
        self.degree_num = 1usize << degree;
        Ok(())
    }

    /// Decodes one packet into `out`, which must hold `max_samples` entries. Returns the
    /// number of interleaved samples produced.
    pub fn decode_sound(
        &mut self,
        context: &mut MioContext,
        datahdr: &DataHeader,
        out: &mut [i16],
    ) -> Result<usize> {
        context.flush();

        match self.header.transformation {
            Transformation::Lossless => match self.header.bits_per_sample {
                8 => self.decode_lossless_pcm8(context, datahdr, out),
                _ => self.decode_lossless_pcm16(context, datahdr, out),
            },
            Transformation::Lot => self.decode_dct(context, datahdr, out, false),
            Transformation::LotMss => {
                if self.header.channels != 2 {
                    self.decode_dct(context, datahdr, out, false)
                }
                else {
                    self.decode_dct(context, datahdr, out, true)
                }
            }
        }
    }

    /// Lossless 8-bit path: huffman-coded per-channel byte deltas.
    fn decode_lossless_pcm8(
        &mut self,
        context: &mut MioContext,
        datahdr: &DataHeader,
        out: &mut [i16],
    ) -> Result<usize> {
        let sample_count = datahdr.sample_count as usize;
        let channels = self.header.channels;
        let all_samples = sample_count * channels;

        self.byte_buf.resize(all_samples, 0);

        if datahdr.flags & MIO_LEAD_BLOCK != 0 {
            context.prepare_erina(true);
        }
        context.decode_symbol_bytes(&mut self.byte_buf[..all_samples])?;

        // Integrate the deltas per channel; 8-bit output is unsigned and recentered here.
        for ch in 0..channels {
            let mut value = 0u8;
            for j in 0..sample_count {
                value = value.wrapping_add(self.byte_buf[ch * sample_count + j] as u8);
                out[j * channels + ch] = (i16::from(value) - 0x80) << 8;
            }
        }

        Ok(all_samples)
    }

    /// Lossless 16-bit path: two huffman-coded byte planes recombined, then a
    /// delta-of-delta integration per channel.
    fn decode_lossless_pcm16(
        &mut self,
        context: &mut MioContext,
        datahdr: &DataHeader,
        out: &mut [i16],
    ) -> Result<usize> {
        let sample_count = datahdr.sample_count as usize;
        let channels = self.header.channels;
        let all_samples = sample_count * channels;

        self.byte_buf.resize(all_samples * 2, 0);
        self.word_buf.resize(all_samples, 0);

        if datahdr.flags & MIO_LEAD_BLOCK != 0 {
            context.prepare_erina(true);
        }
        context.decode_symbol_bytes(&mut self.byte_buf[..all_samples * 2])?;

        // Per channel, the high-byte plane precedes the low-byte plane; the high byte is
        // xor-folded with the low byte's sign.
        for ch in 0..channels {
            let base = ch * sample_count * 2;
            for j in 0..sample_count {
                let low = self.byte_buf[base + sample_count + j];
                let high = self.byte_buf[base + j] as u8 ^ ((low >> 7) as u8);
                self.word_buf[ch * sample_count + j] =
                    i16::from_le_bytes([low as u8, high]);
            }
        }

        for ch in 0..channels {
            let mut value = 0i16;
            let mut delta = 0i16;
            for j in 0..sample_count {
                delta = delta.wrapping_add(self.word_buf[ch * sample_count + j]);
                value = value.wrapping_add(delta);
                out[j * channels + ch] = value;
            }
        }

        Ok(all_samples)
    }

    /// Builds the 2^degree-entry weight table from a packed weight code and dequantizes one
    /// subband into `dst`.
    fn dequantize(
        weight_table: &mut [f32],
        frequency_point: &[i32; 7],
        dst: &mut [f32],
        quantized: &[i32],
        degree_num: usize,
        weight_code: u32,
        coefficient: i32,
    ) {
        let matrix_scale = (2.0 / degree_num as f64).sqrt();
        let coefficient_scale = matrix_scale * f64::from(coefficient);

        // Seven band anchors joined by linear ramps; five bits of the weight code per band.
        let mut avg_ratio = [1.0f64; 7];
        for (i, ratio) in avg_ratio.iter_mut().enumerate().take(6) {
            let nibble = ((weight_code >> (i * 5)) & 0x1f) as i32;
            *ratio = 1.0 / 2.0f64.powf(f64::from(nibble - 15) * 0.5);
        }

        let mut i = 0usize;
        while (i as i32) < frequency_point[0] {
            weight_table[i] = avg_ratio[0] as f32;
            i += 1;
        }

        for j in 1..7 {
            let a = avg_ratio[j - 1];
            let k = (avg_ratio[j] - a) / f64::from(frequency_point[j] - frequency_point[j - 1]);
            while (i as i32) < frequency_point[j] {
                weight_table[i] = (k * f64::from(i as i32 - frequency_point[j - 1]) + a) as f32;
                i += 1;
            }
        }

        while i < degree_num {
            weight_table[i] = avg_ratio[6] as f32;
            i += 1;
        }

        // Every 16th entry gets the odd-weight boost; the top entry carries the raw scale.
        let odd_weight = (((weight_code >> 30) & 0x03) + 0x02) as f32 / 2.0;
        let mut i = 15;
        while i < degree_num {
            weight_table[i] *= odd_weight;
            i += 16;
        }
        weight_table[degree_num - 1] = coefficient as f32;

        for i in 0..degree_num {
            weight_table[i] = 1.0 / weight_table[i];
        }

        for i in 0..degree_num {
            dst[i] = (coefficient_scale * f64::from(weight_table[i]) * f64::from(quantized[i]))
                as f32;
        }
    }

    /// Decodes a lead (key) block: only the odd spectrum lines are present, and the result
    /// seeds the lapped history instead of producing samples.
    fn decode_lead_block(&mut self, is_mss: bool) -> Result<()> {
        let half = self.degree_num / 2;
        let internal_channels = if is_mss { 2 } else { 1 };

        let weight_code = self.weight_codes[self.next_weight];
        self.next_weight += 1;
        let coefficient = self.coefficients[self.next_coefficient];
        self.next_coefficient += 1;

        /* dequantize into the lapped history */
        for ch in 0..internal_channels {
            for i in 0..half {
                self.half_quant[i * 2] = 0;
                self.half_quant[i * 2 + 1] = self.quantized[self.next_source];
                self.next_source += 1;
            }
            let base = self.last_dct_base + ch * self.degree_num;
            Self::dequantize(
                &mut self.weight_table,
                &self.frequency_point,
                &mut self.last_dct[base..base + self.degree_num],
                &self.half_quant,
                self.degree_num,
                weight_code,
                coefficient,
            );
        }

        if is_mss {
            let rev_code = i32::from(self.revolve_codes[self.next_revolve]);
            self.next_revolve += 1;

            let sin = (f64::from(rev_code) * PI / 8.0).sin() as f32;
            let cos = (f64::from(rev_code) * PI / 8.0).cos() as f32;
            matrix::revolve_2x2(&mut self.last_dct, 0, self.degree_num, sin, cos, 1, self.degree_num);
        }

        for ch in 0..internal_channels {
            let base = self.last_dct_base + ch * self.degree_num;
            let lap = &mut self.last_dct[base..base + self.degree_num];

            odd_givens_inverse(lap, &self.revolve_param, self.subband_degree);

            for i in (0..self.degree_num).step_by(2) {
                lap[i] = lap[i + 1];
            }

            fast_iplot(lap, self.subband_degree);
        }

        Ok(())
    }

    /// Decodes a regular block and emits up-to one matrix of samples per channel lane.
    fn decode_internal_block(
        &mut self,
        out: &mut [i16],
        out_base: usize,
        samples: usize,
        is_mss: bool,
        output_channels: usize,
    ) -> Result<()> {
        let internal_channels = if is_mss { 2 } else { 1 };

        let weight_code = self.weight_codes[self.next_weight];
        self.next_weight += 1;
        let coefficient = self.coefficients[self.next_coefficient];
        self.next_coefficient += 1;

        /* dequantize */
        for ch in 0..internal_channels {
            let base = ch * self.degree_num;
            Self::dequantize(
                &mut self.weight_table,
                &self.frequency_point,
                &mut self.matrix_buf[base..base + self.degree_num],
                &self.quantized[self.next_source..self.next_source + self.degree_num],
                self.degree_num,
                weight_code,
                coefficient,
            );
            self.next_source += self.degree_num;
        }

        /* MSS blocks rotate the channel pair, even and odd lines by separate angles */
        if is_mss {
            let rev_code = i32::from(self.revolve_codes[self.next_revolve]);
            self.next_revolve += 1;
            let rev_code1 = (rev_code >> 2) & 0x03;
            let rev_code2 = rev_code & 0x03;

            let sin = (f64::from(rev_code1) * PI / 8.0).sin() as f32;
            let cos = (f64::from(rev_code1) * PI / 8.0).cos() as f32;
            matrix::revolve_2x2(
                &mut self.matrix_buf,
                0,
                self.degree_num,
                sin,
                cos,
                2,
                self.degree_num / 2,
            );

            let sin = (f64::from(rev_code2) * PI / 8.0).sin() as f32;
            let cos = (f64::from(rev_code2) * PI / 8.0).cos() as f32;
            matrix::revolve_2x2(
                &mut self.matrix_buf,
                1,
                self.degree_num + 1,
                sin,
                cos,
                2,
                self.degree_num / 2,
            );
        }

        /* inverse LOT then IDCT per lane */
        for ch in 0..internal_channels {
            let src_base = ch * self.degree_num;
            let lap_base = self.last_dct_base + ch * self.degree_num;

            let src = &mut self.matrix_buf[src_base..src_base + self.degree_num];
            odd_givens_inverse(src, &self.revolve_param, self.subband_degree);
            fast_iplot(src, self.subband_degree);

            let lap = &self.last_dct[lap_base..lap_base + self.degree_num];
            fast_ilot(&mut self.work_buf[..self.degree_num], lap, src, self.subband_degree);

            /* the current block becomes the next lap, the combined signal gets transformed */
            let lap = &mut self.last_dct[lap_base..lap_base + self.degree_num];
            for i in 0..self.degree_num {
                lap[i] = src[i];
                src[i] = self.work_buf[i];
            }

            fast_idct(
                &mut self.internal_buf[..self.degree_num],
                &self.matrix_buf[src_base..src_base + self.degree_num],
                1,
                &mut self.work_buf,
                self.subband_degree,
            );

            round_to_words(
                out,
                out_base + ch,
                output_channels,
                &self.internal_buf[..samples],
            );
        }

        Ok(())
    }

    /// Decodes the closing block of a division run: odd lines only, folded with a sign flip.
    fn decode_post_block(
        &mut self,
        out: &mut [i16],
        out_base: usize,
        samples: usize,
        is_mss: bool,
        output_channels: usize,
    ) -> Result<()> {
        let half = self.degree_num / 2;
        let internal_channels = if is_mss { 2 } else { 1 };

        let weight_code = self.weight_codes[self.next_weight];
        self.next_weight += 1;
        let coefficient = self.coefficients[self.next_coefficient];
        self.next_coefficient += 1;

        /* dequantize */
        for ch in 0..internal_channels {
            for i in 0..half {
                self.half_quant[i * 2] = 0;
                self.half_quant[i * 2 + 1] = self.quantized[self.next_source];
                self.next_source += 1;
            }
            let base = ch * self.degree_num;
            Self::dequantize(
                &mut self.weight_table,
                &self.frequency_point,
                &mut self.matrix_buf[base..base + self.degree_num],
                &self.half_quant,
                self.degree_num,
                weight_code,
                coefficient,
            );
        }

        if is_mss {
            let rev_code = i32::from(self.revolve_codes[self.next_revolve]);
            self.next_revolve += 1;

            let sin = (f64::from(rev_code) * PI / 8.0).sin() as f32;
            let cos = (f64::from(rev_code) * PI / 8.0).cos() as f32;
            matrix::revolve_2x2(&mut self.matrix_buf, 0, self.degree_num, sin, cos, 1, self.degree_num);
        }

        for ch in 0..internal_channels {
            let src_base = ch * self.degree_num;
            let lap_base = self.last_dct_base + ch * self.degree_num;

            let src = &mut self.matrix_buf[src_base..src_base + self.degree_num];
            odd_givens_inverse(src, &self.revolve_param, self.subband_degree);

            for i in (0..self.degree_num).step_by(2) {
                src[i] = -src[i + 1];
            }

            fast_iplot(src, self.subband_degree);

            let lap = &self.last_dct[lap_base..lap_base + self.degree_num];
            fast_ilot(&mut self.work_buf[..self.degree_num], lap, src, self.subband_degree);

            let src = &mut self.matrix_buf[src_base..src_base + self.degree_num];
            src.copy_from_slice(&self.work_buf[..self.degree_num]);

            fast_idct(
                &mut self.internal_buf[..self.degree_num],
                &self.matrix_buf[src_base..src_base + self.degree_num],
                1,
                &mut self.work_buf,
                self.subband_degree,
            );

            round_to_words(
                out,
                out_base + ch,
                output_channels,
                &self.internal_buf[..samples],
            );
        }

        Ok(())
    }

    /// The lossy path: quantization table, coded spectrum, then per-subband LOT+IDCT.
    fn decode_dct(
        &mut self,
        context: &mut MioContext,
        datahdr: &DataHeader,
        out: &mut [i16],
        is_mss: bool,
    ) -> Result<usize> {
        let degree_width = 1usize << self.header.subband_degree;
        let sample_count =
            (datahdr.sample_count as usize + degree_width - 1) & !(degree_width - 1);
        let subband_count = sample_count >> self.header.subband_degree;
        let channels = self.header.channels;
        let all_sample_count = sample_count * channels;
        let all_subband_count = if is_mss { subband_count } else { subband_count * channels };

        if sample_count > self.buf_length {
            self.quantized.resize(all_sample_count, 0);
            self.interleaved.resize(all_sample_count, 0);
            self.division_table.resize(all_subband_count.max(1), 0);
            self.revolve_codes.resize(all_subband_count * 10 + 1, 0);
            self.weight_codes.resize(all_subband_count * 10 + channels, 0);
            self.coefficients.resize(all_subband_count * 10 + channels, 0);
            self.buf_length = sample_count;
        }

        /* quantization table, guarded by sync bits */
        if context.get_bit() != 0 {
            return decode_error("erisa: bad quantization table sync");
        }

        self.next_division = 0;
        self.next_revolve = 0;
        self.next_weight = 0;
        self.next_coefficient = 0;

        if is_mss {
            self.read_quant_table_mss(context, subband_count)?;
        }
        else {
            self.read_quant_table_std(context, subband_count, channels)?;
        }

        if context.get_bit() != 0 {
            return decode_error("erisa: bad spectrum sync");
        }

        /* (re)prime the symbol coder */
        if datahdr.flags & MIO_LEAD_BLOCK != 0 {
            if self.header.architecture != Architecture::Nemesis {
                context.prepare_erina(true);
            }
            else {
                context.prepare_erisa();
            }
        }
        else if self.header.architecture == Architecture::Nemesis {
            if !context.is_prepared() {
                return decode_error("erisa: packet before keyframe");
            }
            context.initialize_erisa();
        }

        /* decode the full coefficient plane and de-interleave */
        let lane_width = if is_mss { degree_width * 2 } else { degree_width };
        if self.header.architecture != Architecture::Nemesis {
            self.byte_buf.resize(all_sample_count * 2, 0);
            context.decode_symbol_bytes(&mut self.byte_buf[..all_sample_count * 2])?;

            let (high_plane, low_plane) = self.byte_buf.split_at(all_sample_count);
            let mut src = 0usize;
            for i in 0..lane_width {
                for j in 0..all_subband_count {
                    let low = i32::from(low_plane[src]);
                    let high = i32::from(high_plane[src]) ^ (low >> 8);
                    self.quantized[j * lane_width + i] = (low & 0xff) | (high << 8);
                    src += 1;
                }
            }
        }
        else {
            context.decode_erisa_words(&mut self.interleaved[..all_sample_count])?;
            for i in 0..all_sample_count {
                self.quantized[i] = i32::from(self.interleaved[i]);
            }
        }

        /* walk the subbands, re-deriving the matrix size per division code */
        self.next_division = 0;
        self.next_revolve = 0;
        self.next_weight = 0;
        self.next_coefficient = 0;
        self.next_source = 0;

        if is_mss {
            self.transform_subbands_mss(datahdr, out, subband_count)?;
        }
        else {
            self.transform_subbands_std(datahdr, out, subband_count, channels)?;
        }

        Ok(datahdr.sample_count as usize * channels)
    }

    fn read_quant_table_std(
        &mut self,
        context: &mut MioContext,
        subband_count: usize,
        channels: usize,
    ) -> Result<()> {
        let mut last_division = [u32::MAX; MAX_CHANNELS];

        for i in 0..subband_count {
            for ch in 0..channels {
                let division_code = context.get_bits(2);
                self.division_table[self.next_division] = division_code as u8;
                self.next_division += 1;

                // A division change closes the previous run with one extra post-block entry.
                if division_code != last_division[ch] {
                    if i != 0 {
                        self.weight_codes[self.next_weight] = context.get_bits(32);
                        self.next_weight += 1;
                        self.coefficients[self.next_coefficient] = context.get_bits(16) as i32;
                        self.next_coefficient += 1;
                    }
                    last_division[ch] = division_code;
                }

                let division_count = 1usize << division_code;
                for _ in 0..division_count {
                    self.weight_codes[self.next_weight] = context.get_bits(32);
                    self.next_weight += 1;
                    self.coefficients[self.next_coefficient] = context.get_bits(16) as i32;
                    self.next_coefficient += 1;
                }
            }
        }
        if subband_count > 0 {
            for _ in 0..channels {
                self.weight_codes[self.next_weight] = context.get_bits(32);
                self.next_weight += 1;
                self.coefficients[self.next_coefficient] = context.get_bits(16) as i32;
                self.next_coefficient += 1;
            }
        }
        Ok(())
    }

    fn read_quant_table_mss(
        &mut self,
        context: &mut MioContext,
        subband_count: usize,
    ) -> Result<()> {
        let mut last_division = u32::MAX;

        for i in 0..subband_count {
            let division_code = context.get_bits(2);
            self.division_table[self.next_division] = division_code as u8;
            self.next_division += 1;

            let mut lead_block = false;
            if division_code != last_division {
                if i != 0 {
                    self.revolve_codes[self.next_revolve] = context.get_bits(2) as u8;
                    self.next_revolve += 1;
                    self.weight_codes[self.next_weight] = context.get_bits(32);
                    self.next_weight += 1;
                    self.coefficients[self.next_coefficient] = context.get_bits(16) as i32;
                    self.next_coefficient += 1;
                }
                lead_block = true;
                last_division = division_code;
            }

            let division_count = 1usize << division_code;
            for _ in 0..division_count {
                // Lead blocks carry a single 2-bit angle; later blocks two 2-bit angles.
                if lead_block {
                    self.revolve_codes[self.next_revolve] = context.get_bits(2) as u8;
                    lead_block = false;
                }
                else {
                    self.revolve_codes[self.next_revolve] = context.get_bits(4) as u8;
                }
                self.next_revolve += 1;
                self.weight_codes[self.next_weight] = context.get_bits(32);
                self.next_weight += 1;
                self.coefficients[self.next_coefficient] = context.get_bits(16) as i32;
                self.next_coefficient += 1;
            }
        }
        if subband_count > 0 {
            self.revolve_codes[self.next_revolve] = context.get_bits(2) as u8;
            self.next_revolve += 1;
            self.weight_codes[self.next_weight] = context.get_bits(32);
            self.next_weight += 1;
            self.coefficients[self.next_coefficient] = context.get_bits(16) as i32;
            self.next_coefficient += 1;
        }
        Ok(())
    }

    fn transform_subbands_std(
        &mut self,
        datahdr: &DataHeader,
        out: &mut [i16],
        subband_count: usize,
        channels: usize,
    ) -> Result<()> {
        let degree_width = 1usize << self.header.subband_degree;
        let mut last_division = [u32::MAX; MAX_CHANNELS];
        let mut rest_samples = [datahdr.sample_count as usize; MAX_CHANNELS];
        let mut out_pos = [0usize; MAX_CHANNELS];
        let mut current_division = u32::MAX;

        for i in 0..subband_count {
            for ch in 0..channels {
                let division_code = u32::from(self.division_table[self.next_division]);
                self.next_division += 1;
                let division_count = 1usize << division_code;

                self.last_dct_base = degree_width * self.header.lapped_degree as usize * ch;

                let mut lead_block = false;
                if last_division[ch] != division_code {
                    // Close the previous run at its old matrix size first.
                    if i != 0 {
                        if current_division != last_division[ch] {
                            self.set_degree(
                                self.header.subband_degree - last_division[ch],
                            )?;
                            current_division = last_division[ch];
                        }
                        let samples = rest_samples[ch].min(self.degree_num);
                        self.decode_post_block(
                            out,
                            out_pos[ch] * channels + ch,
                            samples,
                            false,
                            channels,
                        )?;
                        rest_samples[ch] -= samples;
                        out_pos[ch] += samples;
                    }

                    last_division[ch] = division_code;
                    lead_block = true;
                }
                if current_division != division_code {
                    self.set_degree(self.header.subband_degree - division_code)?;
                    current_division = division_code;
                }

                for _ in 0..division_count {
                    if lead_block {
                        self.decode_lead_block(false)?;
                        lead_block = false;
                    }
                    else {
                        let samples = rest_samples[ch].min(self.degree_num);
                        self.decode_internal_block(
                            out,
                            out_pos[ch] * channels + ch,
                            samples,
                            false,
                            channels,
                        )?;
                        rest_samples[ch] -= samples;
                        out_pos[ch] += samples;
                    }
                }
            }
        }

        /* close every channel's final run */
        if subband_count > 0 {
            for ch in 0..channels {
                self.last_dct_base = degree_width * self.header.lapped_degree as usize * ch;

                if current_division != last_division[ch] {
                    self.set_degree(self.header.subband_degree - last_division[ch])?;
                    current_division = last_division[ch];
                }
                let samples = rest_samples[ch].min(self.degree_num);
                self.decode_post_block(
                    out,
                    out_pos[ch] * channels + ch,
                    samples,
                    false,
                    channels,
                )?;
                rest_samples[ch] -= samples;
                out_pos[ch] += samples;
            }
        }

        Ok(())
    }

    fn transform_subbands_mss(
        &mut self,
        datahdr: &DataHeader,
        out: &mut [i16],
        subband_count: usize,
    ) -> Result<()> {
        let channels = self.header.channels;
        let mut last_division = u32::MAX;
        let mut rest_samples = datahdr.sample_count as usize;
        let mut out_pos = 0usize;

        for i in 0..subband_count {
            let division_code = u32::from(self.division_table[self.next_division]);
            self.next_division += 1;
            let division_count = 1usize << division_code;

            self.last_dct_base = 0;

            let mut lead_block = false;
            if last_division != division_code {
                if i != 0 {
                    let samples = rest_samples.min(self.degree_num);
                    self.decode_post_block(out, out_pos * channels, samples, true, channels)?;
                    rest_samples -= samples;
                    out_pos += samples;
                }

                self.set_degree(self.header.subband_degree - division_code)?;
                last_division = division_code;
                lead_block = true;
            }

            for _ in 0..division_count {
                if lead_block {
                    self.decode_lead_block(true)?;
                    lead_block = false;
                }
                else {
                    let samples = rest_samples.min(self.degree_num);
                    self.decode_internal_block(
                        out,
                        out_pos * channels,
                        samples,
                        true,
                        channels,
                    )?;
                    rest_samples -= samples;
                    out_pos += samples;
                }
            }
        }

        if subband_count > 0 {
            self.last_dct_base = 0;

            let samples = rest_samples.min(self.degree_num);
            self.decode_post_block(out, out_pos * channels, samples, true, channels)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Band boundaries for subband degree 8, as set_degree derives them.
    const FREQ_POINTS: [i32; 7] = [2, 6, 12, 24, 48, 96, 192];

    #[test]
    fn verify_flat_weight_table() {
        // All band nibbles at 15 give ratio 1.0 everywhere; top bits 0 give no odd boost.
        let weight_code: u32 = (0..6).fold(0, |acc, i| acc | 15 << (i * 5));
        let n = 256usize;

        let mut weight_table = vec![0.0f32; n];
        let quantized = vec![1i32; n];
        let mut dst = vec![0.0f32; n];

        MioDecoder::dequantize(
            &mut weight_table,
            &FREQ_POINTS,
            &mut dst,
            &quantized,
            n,
            weight_code,
            1,
        );

        let expect = (2.0f64 / n as f64).sqrt() as f32;
        for &index in &[0usize, 15, 100, 191, 200, 255] {
            assert!(
                (dst[index] - expect).abs() < 1.0e-6,
                "index {}: {} vs {}",
                index,
                dst[index],
                expect
            );
        }
    }

    #[test]
    fn verify_scale_applies_everywhere_but_the_top_line() {
        let weight_code: u32 = (0..6).fold(0, |acc, i| acc | 15 << (i * 5));
        let n = 256usize;

        let mut weight_table = vec![0.0f32; n];
        let quantized = vec![1i32; n];
        let mut dst = vec![0.0f32; n];

        MioDecoder::dequantize(
            &mut weight_table,
            &FREQ_POINTS,
            &mut dst,
            &quantized,
            n,
            weight_code,
            2,
        );

        let base = (2.0f64 / n as f64).sqrt() as f32;
        // The scale multiplies every line, but the top line's weight is the scale itself.
        assert!((dst[0] - 2.0 * base).abs() < 1.0e-6);
        assert!((dst[n - 1] - base).abs() < 1.0e-6);
    }

    #[test]
    fn verify_odd_weight_boost() {
        // Top two bits at 3 boost every 16th line by (3+2)/2 = 2.5, i.e. divide the output.
        let mut weight_code: u32 = (0..6).fold(0, |acc, i| acc | 15 << (i * 5));
        weight_code |= 3 << 30;
        let n = 256usize;

        let mut weight_table = vec![0.0f32; n];
        let quantized = vec![1i32; n];
        let mut dst = vec![0.0f32; n];

        MioDecoder::dequantize(
            &mut weight_table,
            &FREQ_POINTS,
            &mut dst,
            &quantized,
            n,
            weight_code,
            1,
        );

        let base = (2.0f64 / n as f64).sqrt() as f32;
        assert!((dst[14] - base).abs() < 1.0e-6);
        assert!((dst[15] - base / 2.5).abs() < 1.0e-6);
        assert!((dst[31] - base / 2.5).abs() < 1.0e-6);
    }
}
