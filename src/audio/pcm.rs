//! PCM sample conversions and energy computation.
//!
//! All wire audio is PCM signed 16-bit little-endian, matching the capture
//! format. Conversions here are allocation-light and used on the hot path.

use bytes::{BufMut, Bytes, BytesMut};

/// Root-mean-square amplitude of the samples, normalized to [0, 1].
///
/// An empty slice has zero energy.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Encode i16 samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(s);
    }
    buf.freeze()
}

/// Decode little-endian bytes back into i16 samples.
///
/// A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Convert f32 samples in [-1.0, 1.0] to i16, clamping out-of-range input.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}
