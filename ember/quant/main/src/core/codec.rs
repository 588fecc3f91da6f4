//! Per-block encoders and decoders.
//!
//! Layouts follow GGML. In the nibble-packed formats byte `j` holds element
//! `j` in its low nibble and element `j + 16` in its high nibble.

use crate::api::types::*;
use half::f16;

/// One block format: 32 f32 values ⇄ `BLOCK_BYTES` bytes.
pub trait BlockCodec {
    const FORMAT: QuantFormat;
    const BLOCK_BYTES: usize;

    /// Decode `block[..BLOCK_BYTES]` into `out[..QK]`.
    fn decode_block(block: &[u8], out: &mut [f32]);

    /// Encode `values[..QK]` into `block[..BLOCK_BYTES]`.
    fn encode_block(values: &[f32], block: &mut [u8]);
}

#[inline(always)]
fn read_f16(bytes: &[u8], at: usize) -> f32 {
    f16::from_le_bytes([bytes[at], bytes[at + 1]]).to_f32()
}

#[inline(always)]
fn write_f16(bytes: &mut [u8], at: usize, value: f32) {
    bytes[at..at + 2].copy_from_slice(&f16::from_f32(value).to_le_bytes());
}

/// Value with the largest magnitude, sign preserved.
#[inline(always)]
fn signed_max(values: &[f32]) -> f32 {
    let mut amax = 0.0f32;
    let mut max = 0.0f32;
    for &v in values {
        if v.abs() > amax {
            amax = v.abs();
            max = v;
        }
    }
    max
}

#[inline(always)]
fn reciprocal(d: f32) -> f32 {
    if d == 0.0 {
        0.0
    } else {
        1.0 / d
    }
}

pub struct BlockQ8_0;

impl BlockCodec for BlockQ8_0 {
    const FORMAT: QuantFormat = QuantFormat::Q8_0;
    const BLOCK_BYTES: usize = Q8_0_BLOCK_BYTES;

    #[inline(always)]
    fn decode_block(block: &[u8], out: &mut [f32]) {
        let block = &block[..Self::BLOCK_BYTES];
        let out = &mut out[..QK];
        let d = read_f16(block, 0);
        for (o, &q) in out.iter_mut().zip(&block[2..]) {
            *o = (q as i8) as f32 * d;
        }
    }

    #[inline(always)]
    fn encode_block(values: &[f32], block: &mut [u8]) {
        let values = &values[..QK];
        let block = &mut block[..Self::BLOCK_BYTES];
        let amax = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        let d = amax / 127.0;
        let id = reciprocal(d);
        write_f16(block, 0, d);
        for (q, &v) in block[2..].iter_mut().zip(values) {
            *q = (v * id).round().clamp(-127.0, 127.0) as i8 as u8;
        }
    }
}

pub struct BlockQ5_0;

impl BlockCodec for BlockQ5_0 {
    const FORMAT: QuantFormat = QuantFormat::Q5_0;
    const BLOCK_BYTES: usize = Q5_0_BLOCK_BYTES;

    #[inline(always)]
    fn decode_block(block: &[u8], out: &mut [f32]) {
        let block = &block[..Self::BLOCK_BYTES];
        let out = &mut out[..QK];
        let d = read_f16(block, 0);
        let qh = u32::from_le_bytes([block[2], block[3], block[4], block[5]]);
        let qs = &block[6..];
        for j in 0..QK / 2 {
            let hi0 = (((qh >> j) & 1) << 4) as u8;
            let hi1 = (((qh >> (j + 16)) & 1) << 4) as u8;
            let q0 = (qs[j] & 0x0F) | hi0;
            let q1 = (qs[j] >> 4) | hi1;
            out[j] = (q0 as i32 - 16) as f32 * d;
            out[j + QK / 2] = (q1 as i32 - 16) as f32 * d;
        }
    }

    #[inline(always)]
    fn encode_block(values: &[f32], block: &mut [u8]) {
        let values = &values[..QK];
        let block = &mut block[..Self::BLOCK_BYTES];
        let d = signed_max(values) / -16.0;
        let id = reciprocal(d);
        write_f16(block, 0, d);
        let mut qh = 0u32;
        for j in 0..QK / 2 {
            let q0 = ((values[j] * id + 16.5) as u8).min(31);
            let q1 = ((values[j + QK / 2] * id + 16.5) as u8).min(31);
            block[6 + j] = (q0 & 0x0F) | ((q1 & 0x0F) << 4);
            qh |= (((q0 & 0x10) >> 4) as u32) << j;
            qh |= (((q1 & 0x10) >> 4) as u32) << (j + 16);
        }
        block[2..6].copy_from_slice(&qh.to_le_bytes());
    }
}

pub struct BlockQ4_1;

impl BlockCodec for BlockQ4_1 {
    const FORMAT: QuantFormat = QuantFormat::Q4_1;
    const BLOCK_BYTES: usize = Q4_1_BLOCK_BYTES;

    #[inline(always)]
    fn decode_block(block: &[u8], out: &mut [f32]) {
        let block = &block[..Self::BLOCK_BYTES];
        let out = &mut out[..QK];
        let d = read_f16(block, 0);
        let m = read_f16(block, 2);
        for (j, &b) in block[4..].iter().enumerate() {
            out[j] = (b & 0x0F) as f32 * d + m;
            out[j + QK / 2] = (b >> 4) as f32 * d + m;
        }
    }

    #[inline(always)]
    fn encode_block(values: &[f32], block: &mut [u8]) {
        let values = &values[..QK];
        let block = &mut block[..Self::BLOCK_BYTES];
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let d = (max - min) / 15.0;
        let id = reciprocal(d);
        write_f16(block, 0, d);
        write_f16(block, 2, min);
        for j in 0..QK / 2 {
            let q0 = (((values[j] - min) * id + 0.5) as u8).min(15);
            let q1 = (((values[j + QK / 2] - min) * id + 0.5) as u8).min(15);
            block[4 + j] = q0 | (q1 << 4);
        }
    }
}

pub struct BlockQ4_0;

impl BlockCodec for BlockQ4_0 {
    const FORMAT: QuantFormat = QuantFormat::Q4_0;
    const BLOCK_BYTES: usize = Q4_0_BLOCK_BYTES;

    #[inline(always)]
    fn decode_block(block: &[u8], out: &mut [f32]) {
        let block = &block[..Self::BLOCK_BYTES];
        let out = &mut out[..QK];
        let d = read_f16(block, 0);
        for (j, &b) in block[2..].iter().enumerate() {
            out[j] = ((b & 0x0F) as i32 - 8) as f32 * d;
            out[j + QK / 2] = ((b >> 4) as i32 - 8) as f32 * d;
        }
    }

    #[inline(always)]
    fn encode_block(values: &[f32], block: &mut [u8]) {
        let values = &values[..QK];
        let block = &mut block[..Self::BLOCK_BYTES];
        let d = signed_max(values) / -8.0;
        let id = reciprocal(d);
        write_f16(block, 0, d);
        for j in 0..QK / 2 {
            let q0 = ((values[j] * id + 8.5) as u8).min(15);
            let q1 = ((values[j + QK / 2] * id + 8.5) as u8).min(15);
            block[2 + j] = q0 | (q1 << 4);
        }
    }
}
