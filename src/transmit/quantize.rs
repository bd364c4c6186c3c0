//! TRANSMIT_DATA payload: per-chunk peak companding
//!
//! Layout: `scale: f32`, then `2 * n` interleaved `i16` I/Q values, all
//! little-endian. Each value is `v * 32767 / scale` truncated toward zero,
//! where `scale` is the chunk's peak component magnitude (1 for silence).

use rustfft::num_complex::Complex32;

use crate::error::CodecError;

const FULL_SCALE: f32 = 32767.0;

#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedChunk {
    pub scale: f32,
    /// Interleaved I/Q
    pub samples: Vec<i16>,
}

/// Quantize one chunk against its own peak
pub fn quantize_chunk(chunk: &[Complex32]) -> QuantizedChunk {
    let peak = chunk
        .iter()
        .flat_map(|s| [s.re.abs(), s.im.abs()])
        .fold(0.0f32, f32::max);
    let scale = if peak == 0.0 { 1.0 } else { peak };

    let samples = chunk
        .iter()
        .flat_map(|s| [s.re, s.im])
        .map(|v| (v * FULL_SCALE / scale) as i16)
        .collect();

    QuantizedChunk { scale, samples }
}

impl QuantizedChunk {
    /// Number of complex samples
    pub fn len(&self) -> usize {
        self.samples.len() / 2
    }

    /// A zero-length chunk marks end of stream
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + self.samples.len() * 2);
        payload.extend_from_slice(&self.scale.to_le_bytes());
        for value in &self.samples {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() < 4 || (payload.len() - 4) % 4 != 0 {
            return Err(CodecError::InvalidFrame(format!(
                "transmit payload of {} bytes",
                payload.len()
            )));
        }
        let scale = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let samples = payload[4..]
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(Self { scale, samples })
    }

    /// Back to floating point, as the server does
    pub fn reconstruct(&self) -> Vec<Complex32> {
        let k = self.scale / FULL_SCALE;
        self.samples
            .chunks_exact(2)
            .map(|p| Complex32::new(p[0] as f32 * k, p[1] as f32 * k))
            .collect()
    }
}
