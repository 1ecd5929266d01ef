// Toccata
// Copyright (c) 2025 The Project Toccata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Matrix operations of the LOT-DCT pipeline: odd-Givens rotations, the lapped-transform
//! butterflies and the recursive radix-2 (I)DCT.

use std::f64::consts::PI;

use lazy_static::lazy_static;

pub const MIN_DCT_DEGREE: u32 = 2;
pub const MAX_DCT_DEGREE: u32 = 12;

lazy_static! {
    static ref COS_PI4: f32 = (PI * 0.25).cos() as f32;
    static ref TWO_COS_PI4: f32 = 2.0 * (PI * 0.25).cos() as f32;

    /// Per-degree coefficient tables, k(n, i) = cos((2i+1) * pi / 4n).
    static ref DCT_OF_K: Vec<Vec<f32>> = {
        let mut tables = vec![Vec::new(); MAX_DCT_DEGREE as usize];
        for (degree, table) in tables.iter_mut().enumerate().skip(1) {
            let n = 1usize << degree;
            let step = PI / (4.0 * n as f64);
            *table = (0..n).map(|i| ((2 * i + 1) as f64 * step).cos() as f32).collect();
        }
        tables
    };
}

/// A sine/cosine pair of one Givens rotation.
#[derive(Clone, Copy, Default)]
pub struct SinCos {
    pub sin: f32,
    pub cos: f32,
}

/// Rounds and saturates a float block into interleaved 16-bit output.
pub fn round_to_words(dst: &mut [i16], dst_base: usize, step: usize, src: &[f32]) {
    let mut pos = dst_base;
    for &value in src {
        let value = if value >= 0.0 { (value + 0.5).floor() } else { (value - 0.5).ceil() };
        dst[pos] = (value as i32).clamp(-0x8000, 0x7fff) as i16;
        pos += step;
    }
}

/// Rotates two interleaved channel lanes by a fixed angle (the MSS 2-point rotation).
pub fn revolve_2x2(
    buf: &mut [f32],
    base1: usize,
    base2: usize,
    sin: f32,
    cos: f32,
    step: usize,
    count: usize,
) {
    let mut p1 = base1;
    let mut p2 = base2;
    for _ in 0..count {
        let r1 = buf[p1];
        let r2 = buf[p2];
        buf[p1] = r1 * cos - r2 * sin;
        buf[p2] = r1 * sin + r2 * cos;
        p1 += step;
        p2 += step;
    }
}

/// Precomputes the cascaded rotation angles of the odd-Givens inverse for one matrix size.
pub fn create_revolve_parameter(degree: u32) -> Vec<SinCos> {
    let degree_num = 1usize << degree;

    let mut lc = 1usize;
    let mut n = degree_num / 2;
    while n >= 8 {
        n /= 8;
        lc += 1;
    }

    let mut revolve = vec![SinCos::default(); lc * 8];

    let k = PI / (degree_num as f64 * 2.0);
    let mut base = 0usize;
    let mut step = 2usize;
    loop {
        for i in 0..7 {
            let mut ws = 1.0f64;
            let mut a = 0.0f64;
            for j in 0..i {
                a += step as f64;
                ws = ws * f64::from(revolve[base + j].sin)
                    + f64::from(revolve[base + j].cos) * (a * k).cos();
            }
            let r = ws.atan2(((a + step as f64) * k).cos());
            revolve[base + i].sin = r.sin() as f32;
            revolve[base + i].cos = r.cos() as f32;
        }
        base += 7;
        step *= 8;
        if step >= degree_num {
            break;
        }
    }

    revolve
}

/// Applies the inverse of the cascaded odd-Givens rotations in place.
pub fn odd_givens_inverse(src: &mut [f32], revolve: &[SinCos], degree: u32) {
    // Sizes below 16 have no rotation stages.
    debug_assert!(degree >= 4);
    let degree_num = 1usize << degree;

    let mut base = 0usize;
    let mut index = 1usize;
    let mut step = 2usize;
    let mut lc = (degree_num / 2) / 8;

    loop {
        base += 7;
        index += step * 7;
        step *= 8;
        if lc <= 8 {
            break;
        }
        lc /= 8;
    }

    let rotate = |src: &mut [f32], k: usize, params: &SinCos, step: usize| {
        let r1 = src[k];
        let r2 = src[k + step];
        src[k] = r1 * params.cos + r2 * params.sin;
        src[k + step] = r2 * params.cos - r1 * params.sin;
    };

    /* the top stage rotates the lc-1 coarsest pairs */
    for j in (0..lc.saturating_sub(1)).rev() {
        rotate(src, index + step * j, &revolve[base + j], step);
    }

    /* then each finer stage rotates 7 pairs per group */
    while lc <= (degree_num / 2) / 8 {
        base -= 7;
        step /= 8;
        index -= step * 7;

        for i in 0..lc {
            for j in (0..7).rev() {
                rotate(src, i * (step * 8) + index + step * j, &revolve[base + j], step);
            }
        }

        lc *= 8;
    }
}

/// Inverse "previous" LOT: splits each pair into its average and difference.
pub fn fast_iplot(src: &mut [f32], degree: u32) {
    let degree_num = 1usize << degree;

    for i in (0..degree_num).step_by(2) {
        let r1 = src[i];
        let r2 = src[i + 1];
        src[i] = 0.5 * (r1 + r2);
        src[i + 1] = 0.5 * (r1 - r2);
    }
}

/// Inverse LOT: recombines the previous block's lapped half with the current one.
pub fn fast_ilot(dst: &mut [f32], src1: &[f32], src2: &[f32], degree: u32) {
    let degree_num = 1usize << degree;

    for i in (0..degree_num).step_by(2) {
        let r1 = src1[i];
        let r2 = src2[i + 1];
        dst[i] = r1 + r2;
        dst[i + 1] = r1 - r2;
    }
}

/// Forward DCT used as a building block of the IDCT's odd rows; writes every
/// `dst_interval`-th element of `dst`. `src` doubles as the recursion's scratch space.
fn fast_dct(dst: &mut [f32], dst_interval: usize, src: &mut [f32], work: &mut [f32], degree: u32) {
    debug_assert!(degree >= MIN_DCT_DEGREE && degree <= MAX_DCT_DEGREE);

    if degree == MIN_DCT_DEGREE {
        /* 4-point base case */
        let r0 = src[0] + src[3];
        let r2 = src[0] - src[3];
        let r1 = src[1] + src[2];
        let r3 = src[1] - src[2];

        dst[0] = 0.5 * (r0 + r1);
        dst[dst_interval * 2] = *COS_PI4 * (r0 - r1);

        let k2 = &DCT_OF_K[1];
        let r2 = k2[0] * r2;
        let r3 = k2[1] * r3;

        let s0 = r2 + r3;
        let mut s1 = *TWO_COS_PI4 * (r2 - r3);
        s1 -= s0;

        dst[dst_interval] = s0;
        dst[dst_interval * 3] = s1;
        return;
    }

    let degree_num = 1usize << degree;
    let half = degree_num >> 1;

    //              | I   J |
    // cross ops  = |       |
    //              | I  -J |
    for i in 0..half {
        work[i] = src[i] + src[degree_num - 1 - i];
        work[i + half] = src[i] - src[degree_num - 1 - i];
    }

    /* first half: A * DCT */
    let dst_step = dst_interval << 1;
    {
        let (work_lo, _) = work.split_at_mut(half);
        let (src_lo, _) = src.split_at_mut(half);
        fast_dct(dst, dst_step, work_lo, src_lo, degree - 1);
    }

    /* last half: R * 2 * A * DCT * K */
    let k_table = &DCT_OF_K[degree as usize - 1];
    let (work_lo, work_hi) = work.split_at_mut(half);
    for i in 0..half {
        work_hi[i] *= k_table[i];
    }

    fast_dct(&mut dst[dst_interval..], dst_step, work_hi, work_lo, degree - 1);

    let mut pos = dst_interval;
    for _ in 0..half {
        dst[pos] += dst[pos];
        pos += dst_step;
    }

    let mut pos = dst_interval;
    for _ in 1..half {
        dst[pos + dst_step] -= dst[pos];
        pos += dst_step;
    }
}

/// Inverse DCT over every `src_interval`-th element of `src` into the first `2^degree`
/// elements of `dst`.
pub fn fast_idct(
    dst: &mut [f32],
    src: &[f32],
    src_interval: usize,
    work: &mut [f32],
    degree: u32,
) {
    debug_assert!(degree >= MIN_DCT_DEGREE && degree <= MAX_DCT_DEGREE);

    if degree == MIN_DCT_DEGREE {
        /* 4-point base case */
        let e0 = src[0];
        let e1 = *COS_PI4 * src[src_interval * 2];

        let even0 = e0 + e1;
        let even1 = e0 - e1;

        let k2 = &DCT_OF_K[1];
        let o0 = k2[0] * src[src_interval];
        let o1 = k2[1] * src[src_interval * 3];

        let odd0 = o0 + o1;
        let mut odd1 = *TWO_COS_PI4 * (o0 - o1);
        odd1 -= odd0;

        dst[0] = even0 + odd0;
        dst[3] = even0 - odd0;
        dst[1] = even1 + odd1;
        dst[2] = even1 - odd1;
        return;
    }

    let degree_num = 1usize << degree;
    let half = degree_num >> 1;
    let src_step = src_interval << 1;

    /* even rows: a half-size IDCT */
    fast_idct(dst, src, src_step, work, degree - 1);

    /* odd rows: R * 2 * A * DCT * K */
    let k_table = &DCT_OF_K[degree as usize - 1];
    for i in 0..half {
        work[i] = src[src_interval + i * src_step] * k_table[i];
    }

    {
        let (work_lo, work_hi) = work.split_at_mut(half);
        fast_dct(&mut dst[half..], 1, work_lo, work_hi, degree - 1);
    }

    for i in 0..half {
        dst[half + i] += dst[half + i];
    }
    for i in 1..half {
        dst[half + i] -= dst[half + i - 1];
    }

    //             | I   I |
    // cross ops = |       |
    //             | J  -J |
    let quad = half >> 1;
    for i in 0..quad {
        let r0 = dst[i] + dst[half + i];
        let r3 = dst[i] - dst[half + i];
        let r1 = dst[half - 1 - i] + dst[degree_num - 1 - i];
        let r2 = dst[half - 1 - i] - dst[degree_num - 1 - i];

        dst[i] = r0;
        dst[half - 1 - i] = r1;
        dst[half + i] = r2;
        dst[degree_num - 1 - i] = r3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct DCT-II/IDCT references for cross-checking the fast transforms.
    fn reference_idct(src: &[f32], n: usize) -> Vec<f32> {
        // The pipeline's IDCT convention: x[i] = sum_k X[k] * cos((2i+1) k pi / 2n), all
        // basis vectors at unit weight (the sqrt(2/N) normalization lives in the
        // dequantizer).
        (0..n)
            .map(|i| {
                let mut acc = 0.0f64;
                for k in 0..n {
                    acc += f64::from(src[k])
                        * (((2 * i + 1) * k) as f64 * PI / (2.0 * n as f64)).cos();
                }
                acc as f32
            })
            .collect()
    }

    #[test]
    fn verify_fast_idct_matches_direct_form() {
        for degree in [2u32, 3, 4, 6] {
            let n = 1usize << degree;
            let src: Vec<f32> =
                (0..n).map(|i| ((i * 31 + 7) % 17) as f32 / 17.0 - 0.5).collect();

            let mut dst = vec![0.0f32; n];
            let mut work = vec![0.0f32; n];
            fast_idct(&mut dst, &src, 1, &mut work, degree);

            let expect = reference_idct(&src, n);
            for i in 0..n {
                assert!(
                    (dst[i] - expect[i]).abs() < 1.0e-3,
                    "degree {} index {}: {} vs {}",
                    degree,
                    i,
                    dst[i],
                    expect[i]
                );
            }
        }
    }

    #[test]
    fn verify_iplot_ilot_pair() {
        let mut current = [4.0f32, 2.0, 8.0, 6.0];
        fast_iplot(&mut current, 2);
        assert_eq!(current, [3.0, 1.0, 7.0, 1.0]);

        let previous = [1.0f32, 5.0, 3.0, 7.0];
        let mut out = [0.0f32; 4];
        fast_ilot(&mut out, &previous, &current, 2);
        assert_eq!(out, [2.0, 0.0, 4.0, 2.0]);
    }

    #[test]
    fn verify_revolve_2x2_rotation() {
        let mut buf = vec![1.0f32, 0.0, 0.0, 1.0];
        // Rotate (buf[0], buf[2]) and (buf[1], buf[3]) by 90 degrees.
        revolve_2x2(&mut buf, 0, 2, 1.0, 0.0, 1, 2);
        assert!((buf[0] - 0.0).abs() < 1.0e-6);
        assert!((buf[2] - 1.0).abs() < 1.0e-6);
        assert!((buf[1] - (-1.0)).abs() < 1.0e-6);
        assert!((buf[3] - 0.0).abs() < 1.0e-6);
    }

    #[test]
    fn verify_odd_givens_inverse_preserves_energy() {
        // Givens rotations are orthogonal: the vector norm must be preserved.
        for degree in [4u32, 6, 8] {
            let n = 1usize << degree;
            let revolve = create_revolve_parameter(degree);
            let mut buf: Vec<f32> =
                (0..n).map(|i| ((i * 13 + 3) % 29) as f32 / 29.0 - 0.5).collect();
            let norm_before: f64 = buf.iter().map(|&v| f64::from(v) * f64::from(v)).sum();

            odd_givens_inverse(&mut buf, &revolve, degree);

            let norm_after: f64 = buf.iter().map(|&v| f64::from(v) * f64::from(v)).sum();
            assert!(
                (norm_before - norm_after).abs() < 1.0e-4,
                "degree {}: {} vs {}",
                degree,
                norm_before,
                norm_after
            );
        }
    }

    #[test]
    fn verify_round_to_words_saturates() {
        let mut dst = [0i16; 6];
        round_to_words(&mut dst, 0, 2, &[0.4, -0.6, 40000.0]);
        assert_eq!(dst[0], 0);
        assert_eq!(dst[2], -1);
        assert_eq!(dst[4], 0x7fff);
    }
}
