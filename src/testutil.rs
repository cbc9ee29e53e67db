//! Test fixtures - encoder side of the .dsp format
//!
//! Mirrors the writer pipeline: scale to 1e8, split into two parts,
//! delta-encode, SLEB128, zstd-compress, length-prefixed blocks.

/// Append one value as SLEB128
pub fn encode_sleb128(mut val: i64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        let sign_bit = byte & 0x40 != 0;
        let done = (val == 0 && !sign_bit) || (val == -1 && sign_bit);
        if !done {
            byte |= 0x80;
        }
        out.push(byte);
        if done {
            break;
        }
    }
}

/// Consecutive differences, first element kept as-is. Wrapping, so the
/// round trip with the wrapping prefix sum is exact for all of i64.
pub fn delta_encode(values: &[i64]) -> Vec<i64> {
    let mut deltas = Vec::with_capacity(values.len());
    let mut prev = 0i64;
    for &v in values {
        deltas.push(v.wrapping_sub(prev));
        prev = v;
    }
    deltas
}

/// Build a complete .dsp byte stream from normalized values
pub fn write_series(normalized: &[f64], total_investment: f64, smooth_value: i32) -> Vec<u8> {
    write_series_with_n(normalized, total_investment, smooth_value, normalized.len())
}

/// Same as `write_series` but with an explicit (possibly wrong) declared count
pub fn write_series_with_n(
    normalized: &[f64],
    total_investment: f64,
    smooth_value: i32,
    n: usize,
) -> Vec<u8> {
    let scaled: Vec<i64> = normalized.iter().map(|v| (v * 1e8).round() as i64).collect();
    let part1: Vec<i64> = scaled.iter().map(|s| s.div_euclid(10000)).collect();
    let part2: Vec<i64> = scaled.iter().map(|s| s.rem_euclid(10000)).collect();

    let mut enc1 = Vec::new();
    for d in delta_encode(&part1) {
        encode_sleb128(d, &mut enc1);
    }
    let mut enc2 = Vec::new();
    for d in delta_encode(&part2) {
        encode_sleb128(d, &mut enc2);
    }

    let c1 = zstd::bulk::compress(&enc1, 3).unwrap();
    let c2 = zstd::bulk::compress(&enc2, 3).unwrap();

    let meta = serde_json::json!({
        "total_investment": total_investment,
        "smooth_value": smooth_value,
        "n": n,
        "format": "delta+leb128+zstd+split8",
    });
    let meta_bytes = serde_json::to_vec(&meta).unwrap();

    let mut out = Vec::new();
    out.extend_from_slice(&(meta_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&meta_bytes);
    out.extend_from_slice(&(c1.len() as u32).to_be_bytes());
    out.extend_from_slice(&c1);
    out.extend_from_slice(&(c2.len() as u32).to_be_bytes());
    out.extend_from_slice(&c2);
    out
}

/// Convert raw values into the normalized log space the writer expects,
/// so decoding reproduces `values` under the given investment.
pub fn normalize_for_investment(values: &[f64], total_investment: f64) -> Vec<f64> {
    values
        .iter()
        .map(|v| ((v + total_investment) / total_investment).ln())
        .collect()
}
