//! Fixed-point delta compression for feature columns.
//!
//! A column is cut into 8-word (256-bit) blocks. Word 0 holds a quantized
//! base value, words 1..7 hold a little-endian bit stream of signed deltas
//! against that base. The delta width is picked greedily per block:
//!
//! | deltas | width | meta (bits 26..31 of word 7) |
//! |-------:|------:|------------------------------|
//! | 31     | 7     | `0x40`                       |
//! | 23     | 9     | `0x30`                       |
//! | 15     | 14    | `0x20`                       |
//! | 0..=7  | 31    | `count << 2`                 |
//!
//! Values are quantized as `trunc(v * 2^scaler)` before encoding, so a
//! round trip returns `q / 2^scaler`.

use crate::error::{Error, Result};

/// Words per compressed block.
pub const BLOCK_WORDS: usize = 8;

const PAYLOAD_WORDS: usize = BLOCK_WORDS - 1;

#[derive(Debug, Clone, Copy)]
struct Layout {
    count: usize,
    width: usize,
    meta: u32,
}

const NARROW: [Layout; 3] = [
    Layout { count: 31, width: 7, meta: 0x40 },
    Layout { count: 23, width: 9, meta: 0x30 },
    Layout { count: 15, width: 14, meta: 0x20 },
];

const WIDE_WIDTH: usize = 31;
const WIDE_COUNT: usize = 7;

fn fits(delta: i64, width: usize) -> bool {
    let half = 1i64 << (width - 1);
    -half <= delta && delta < half
}

fn quantize(v: f32, scale: f32) -> i32 {
    (v * scale) as i32
}

fn scale_of(scaler: u32) -> f32 {
    (1u64 << scaler) as f32
}

fn put_bits(payload: &mut [u32; PAYLOAD_WORDS], offset: usize, width: usize, value: u32) {
    let masked = u64::from(value) & ((1u64 << width) - 1);
    let word = offset / 32;
    let shifted = masked << (offset % 32);
    payload[word] |= shifted as u32;
    if offset % 32 + width > 32 {
        payload[word + 1] |= (shifted >> 32) as u32;
    }
}

fn get_bits(payload: &[u32], offset: usize, width: usize) -> u32 {
    let word = offset / 32;
    let lo = u64::from(payload[word]);
    let hi = payload.get(word + 1).copied().map_or(0, u64::from);
    (((hi << 32 | lo) >> (offset % 32)) & ((1u64 << width) - 1)) as u32
}

fn sign_extend(raw: u32, width: usize) -> i32 {
    let shift = 32 - width;
    ((raw << shift) as i32) >> shift
}

fn pack(base: i32, deltas: &[i32]) -> [u32; BLOCK_WORDS] {
    let layout = NARROW.iter().find(|l| l.count == deltas.len());
    let width = layout.map_or(WIDE_WIDTH, |l| l.width);

    let mut payload = [0u32; PAYLOAD_WORDS];
    for (k, &d) in deltas.iter().enumerate() {
        put_bits(&mut payload, k * width, width, d as u32);
    }
    match layout {
        Some(l) => payload[PAYLOAD_WORDS - 1] |= l.meta << 24,
        None => payload[PAYLOAD_WORDS - 1] |= (deltas.len() as u32) << 26,
    }

    let mut block = [0u32; BLOCK_WORDS];
    block[0] = base as u32;
    block[1..].copy_from_slice(&payload);
    block
}

/// Compress one column. The output length is a multiple of [`BLOCK_WORDS`].
///
/// Fails with [`Error::DeltaOverflow`] when a quantized delta needs more than
/// 31 bits.
pub fn compress_column(values: &[f32], scaler: u32) -> Result<Vec<u32>> {
    let scale = scale_of(scaler);
    let n = values.len();
    let mut out = Vec::with_capacity(n / 4 + BLOCK_WORDS);
    let mut deltas = Vec::with_capacity(NARROW[0].count);

    let mut i = 0;
    while i < n {
        let base = quantize(values[i], scale);
        let mut search_for = NARROW[0].count;
        deltas.clear();

        for (k, &v) in values[i + 1..].iter().enumerate() {
            let delta = i64::from(quantize(v, scale)) - i64::from(base);
            // The layout may only narrow, and only while enough values remain.
            search_for = NARROW
                .iter()
                .find(|l| fits(delta, l.width) && i + l.count < n && search_for >= l.count)
                .map_or(WIDE_COUNT, |l| l.count);
            if deltas.len() >= search_for {
                deltas.truncate(search_for);
                break;
            }
            if !fits(delta, WIDE_WIDTH) {
                return Err(Error::DeltaOverflow { index: i + 1 + k, delta });
            }
            deltas.push(delta as i32);
            if deltas.len() >= search_for {
                break;
            }
        }

        out.extend_from_slice(&pack(base, &deltas));
        i += deltas.len() + 1;
    }
    Ok(out)
}

/// Decompress blocks into `out`. Returns the number of values appended.
pub fn decompress_column(words: &[u32], scaler: u32, out: &mut Vec<f32>) -> Result<usize> {
    if words.len() % BLOCK_WORDS != 0 {
        return Err(Error::CorruptBlock(format!(
            "{} words is not a whole number of {BLOCK_WORDS}-word blocks",
            words.len()
        )));
    }
    let scale = scale_of(scaler);
    let before = out.len();

    for block in words.chunks_exact(BLOCK_WORDS) {
        let base = block[0] as i32;
        out.push(base as f32 / scale);

        let meta = (block[BLOCK_WORDS - 1] >> 24) & 0xFC;
        let (count, width) = match NARROW.iter().find(|l| l.meta == meta) {
            Some(l) => (l.count, l.width),
            None => ((meta >> 2) as usize, WIDE_WIDTH),
        };
        if count > WIDE_COUNT && width == WIDE_WIDTH {
            return Err(Error::CorruptBlock(format!("unknown block meta {meta:#04x}")));
        }

        let payload = &block[1..];
        for k in 0..count {
            let delta = sign_extend(get_bits(payload, k * width, width), width);
            out.push(base.wrapping_add(delta) as f32 / scale);
        }
    }
    Ok(out.len() - before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SCALER: u32 = 10;

    fn quantized(values: &[f32]) -> Vec<f32> {
        let s = scale_of(SCALER);
        values.iter().map(|&v| quantize(v, s) as f32 / s).collect()
    }

    fn round_trip(values: &[f32]) -> Vec<f32> {
        let words = compress_column(values, SCALER).unwrap();
        let mut out = Vec::new();
        let n = decompress_column(&words, SCALER, &mut out).unwrap();
        assert_eq!(n, values.len());
        out
    }

    #[test]
    fn smooth_column_uses_seven_bit_blocks() {
        let values: Vec<f32> = (0..64).map(|i| 0.5 + (i % 5) as f32 * 0.01).collect();
        let words = compress_column(&values, SCALER).unwrap();
        assert_eq!((words[7] >> 24) & 0xFC, 0x40);
        assert_eq!(round_trip(&values), quantized(&values));
    }

    #[test]
    fn medium_and_large_steps_pick_wider_layouts() {
        // 1.0 / 1024 per unit: deltas of ~200 need 9 bits, ~5000 need 14 bits.
        let nine: Vec<f32> = (0..40).map(|i| if i % 2 == 0 { 0.0 } else { 0.2 }).collect();
        let words = compress_column(&nine, SCALER).unwrap();
        assert_eq!((words[7] >> 24) & 0xFC, 0x30);
        assert_eq!(round_trip(&nine), quantized(&nine));

        let fourteen: Vec<f32> = (0..40).map(|i| if i % 2 == 0 { 0.0 } else { -5.0 }).collect();
        let words = compress_column(&fourteen, SCALER).unwrap();
        assert_eq!((words[7] >> 24) & 0xFC, 0x20);
        assert_eq!(round_trip(&fourteen), quantized(&fourteen));

        let wide: Vec<f32> = (0..20).map(|i| if i % 2 == 0 { 0.0 } else { 1000.0 }).collect();
        let words = compress_column(&wide, SCALER).unwrap();
        assert_eq!((words[7] >> 24) & 0xFC, (WIDE_COUNT as u32) << 2);
        assert_eq!(round_trip(&wide), quantized(&wide));
    }

    #[test]
    fn short_tail_is_a_wide_block() {
        let values = [0.25f32, 0.5, 0.75];
        let words = compress_column(&values, SCALER).unwrap();
        assert_eq!(words.len(), BLOCK_WORDS);
        assert_eq!((words[7] >> 24) & 0xFC, 2 << 2);
        assert_eq!(round_trip(&values), values.to_vec());
    }

    #[test]
    fn delta_wider_than_31_bits_is_rejected() {
        let values = [-1.0e6f32, 1.0e6];
        match compress_column(&values, SCALER) {
            Err(Error::DeltaOverflow { index, delta }) => {
                assert_eq!(index, 1);
                assert!(delta >= 1 << 30);
            }
            other => panic!("expected an overflow, got {other:?}"),
        }
        assert!(compress_column(&values, 0).is_ok());

        // A jump right after full blocks becomes the next base instead.
        let mut jump = vec![-1.0e6f32; 40];
        jump.push(1.0e6);
        let words = compress_column(&jump, SCALER).unwrap();
        let mut out = Vec::new();
        assert_eq!(decompress_column(&words, SCALER, &mut out).unwrap(), 41);
        assert_eq!(out, quantized(&jump));
    }

    #[test]
    fn truncated_input_is_corrupt() {
        let mut out = Vec::new();
        assert!(decompress_column(&[0; 5], SCALER, &mut out).is_err());
    }

    proptest! {
        #[test]
        fn round_trip_returns_quantized_values(values in prop::collection::vec(-1000.0f32..1000.0, 0..300)) {
            prop_assert_eq!(round_trip(&values), quantized(&values));
        }

        #[test]
        fn compressed_size_never_exceeds_one_block_per_value(values in prop::collection::vec(0.0f32..1.0, 1..200)) {
            let words = compress_column(&values, SCALER).unwrap();
            prop_assert!(words.len() <= values.len() * BLOCK_WORDS);
            prop_assert_eq!(words.len() % BLOCK_WORDS, 0);
        }
    }
}
