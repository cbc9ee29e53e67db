//! DSP file codec - decodes compressed time-series files
//!
//! On-disk layout, all lengths big-endian u32:
//!   meta_len | meta_json | c1_len | c1 | c2_len | c2
//!
//! Each data block is a zstd frame of concatenated SLEB128 varints
//! holding delta-encoded integers. Both blocks must delta-decode to
//! exactly `n` values.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid header: {0}")]
    Format(String),
    #[error("Decompression failed: {0}")]
    Compression(String),
    #[error("Decoded count mismatch: expected {expected}, got {got1} and {got2}")]
    SizeMismatch {
        expected: usize,
        got1: usize,
        got2: usize,
    },
}

/// Metadata block at the head of every .dsp file
#[derive(Debug, Deserialize)]
struct Metadata {
    n: usize,
    total_investment: f64,
    smooth_value: i32,
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "unknown".to_string()
}

/// A fully reconstructed time series
#[derive(Debug, Clone)]
pub struct DecodedSeries {
    pub values: Vec<f64>,
    pub total_investment: f64,
    pub smooth_value: i32,
    pub format: String,
    pub n: usize,
}

impl DecodedSeries {
    /// Descriptive name for display
    pub fn name(&self) -> String {
        format!("Investment (S{})", self.smooth_value)
    }
}

/// Sequential reader over the length-prefixed blocks
struct BlockReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        BlockReader { buf, pos: 0 }
    }

    fn read_u32_be(&mut self) -> Result<u32, CodecError> {
        let end = self.pos + 4;
        if end > self.buf.len() {
            return Err(CodecError::Format("truncated length prefix".to_string()));
        }
        let bytes: [u8; 4] = self.buf[self.pos..end].try_into().unwrap();
        self.pos = end;
        Ok(u32::from_be_bytes(bytes))
    }

    fn read_block(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_u32_be()? as usize;
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(CodecError::Format(format!(
                "block of {} bytes exceeds remaining input",
                len
            )));
        }
        let block = &self.buf[self.pos..end];
        self.pos = end;
        Ok(block)
    }
}

/// Decode one compressed .dsp file into a series
pub fn decode(bytes: &[u8]) -> Result<DecodedSeries, CodecError> {
    let mut reader = BlockReader::new(bytes);

    let meta_bytes = reader.read_block()?;
    let meta: Metadata =
        serde_json::from_slice(meta_bytes).map_err(|e| CodecError::Format(e.to_string()))?;

    let c1 = reader.read_block()?;
    let c2 = reader.read_block()?;

    let enc1 = decompress(c1)?;
    let enc2 = decompress(c2)?;

    let deltas1 = decode_sleb128(&enc1)?;
    let deltas2 = decode_sleb128(&enc2)?;

    if deltas1.len() != meta.n || deltas2.len() != meta.n {
        return Err(CodecError::SizeMismatch {
            expected: meta.n,
            got1: deltas1.len(),
            got2: deltas2.len(),
        });
    }

    let part1 = delta_decode(&deltas1);
    let part2 = delta_decode(&deltas2);

    let mut values = Vec::with_capacity(meta.n);
    for i in 0..meta.n {
        let scaled = part1[i].wrapping_mul(10000).wrapping_add(part2[i]);
        let normalized = scaled as f64 / 1e8;

        // Zero investment marks a raw economic series (FRED case);
        // otherwise reverse the log-return transform.
        let val = if meta.total_investment.abs() < 1e-9 {
            normalized
        } else {
            meta.total_investment * (normalized.exp() - 1.0)
        };
        values.push(val);
    }

    Ok(DecodedSeries {
        values,
        total_investment: meta.total_investment,
        smooth_value: meta.smooth_value,
        format: meta.format,
        n: meta.n,
    })
}

/// Decompress one zstd frame; the frame must declare its content size
fn decompress(src: &[u8]) -> Result<Vec<u8>, CodecError> {
    if src.is_empty() {
        return Ok(Vec::new());
    }
    let size = zstd::zstd_safe::get_frame_content_size(src)
        .map_err(|_| CodecError::Compression("not a zstd frame".to_string()))?
        .ok_or_else(|| CodecError::Compression("content size not recorded".to_string()))?;
    zstd::bulk::decompress(src, size as usize).map_err(|e| CodecError::Compression(e.to_string()))
}

/// Decode back-to-back SLEB128 varints until the buffer is exhausted
pub fn decode_sleb128(buffer: &[u8]) -> Result<Vec<i64>, CodecError> {
    let mut result = Vec::new();
    let mut idx = 0;

    while idx < buffer.len() {
        let mut val: i64 = 0;
        let mut shift = 0u32;
        let byte;
        loop {
            let Some(&b) = buffer.get(idx) else {
                return Err(CodecError::Format("varint ends mid-value".to_string()));
            };
            idx += 1;
            if shift >= 64 {
                return Err(CodecError::Format("varint exceeds 64 bits".to_string()));
            }
            val |= ((b & 0x7f) as i64) << shift;
            shift += 7;
            if b & 0x80 == 0 {
                byte = b;
                break;
            }
        }

        // Sign extension when the terminal byte carries the sign bit
        if shift < 64 && byte & 0x40 != 0 {
            val |= -1i64 << shift;
        }
        result.push(val);
    }

    Ok(result)
}

/// Running prefix sum over consecutive differences. Wraps mod 2^64 so a
/// corrupt file yields defined values for the caller to reject, never a
/// panic that would take down a whole batch load.
pub fn delta_decode(deltas: &[i64]) -> Vec<i64> {
    let mut result = Vec::with_capacity(deltas.len());
    let mut accum = 0i64;
    for &d in deltas {
        accum = accum.wrapping_add(d);
        result.push(accum);
    }
    result
}
