//! Sample stream frames
//!
//! Layout: `type: u16` ([`SampleType`]), `scale: f32`, then interleaved I/Q
//! components, little-endian. Integer components are normalised by the
//! scale: `i8 -> v * scale / 128`, `i16 -> v * scale / 32768`.

use rustfft::num_complex::Complex32;

use crate::codec::baseband::MAX_FRAME_LEN;
use crate::codec::{BasebandFrame, DecodedFrame};
use crate::dsp::Stage;
use crate::error::CodecError;
use crate::protocol::SampleType;

pub const HEADER_LEN: usize = 6;

/// Most samples a frame within [`MAX_FRAME_LEN`] can hold (i8, two bytes
/// per sample)
pub const MAX_FRAME_SAMPLES: usize = (MAX_FRAME_LEN - HEADER_LEN) / 2;

/// Decode one frame into complex samples
pub fn decode_frame(frame: &[u8]) -> Result<Vec<Complex32>, CodecError> {
    if frame.len() < HEADER_LEN {
        return Err(CodecError::InvalidFrame(format!(
            "{} bytes, shorter than header",
            frame.len()
        )));
    }

    let raw_type = u16::from_le_bytes([frame[0], frame[1]]);
    let sample_type = SampleType::from_wire(raw_type)
        .ok_or_else(|| CodecError::InvalidFrame(format!("unknown sample type {raw_type}")))?;
    let scale = f32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
    let body = &frame[HEADER_LEN..];

    let pair_len = sample_type.component_size() * 2;
    if body.len() % pair_len != 0 {
        tracing::trace!("Ignoring {} trailing bytes", body.len() % pair_len);
    }
    let pairs = body.chunks_exact(pair_len);

    let samples = match sample_type {
        SampleType::I8 => {
            let k = scale / 128.0;
            pairs
                .map(|p| Complex32::new(p[0] as i8 as f32 * k, p[1] as i8 as f32 * k))
                .collect()
        }
        SampleType::I16 => {
            let k = scale / 32768.0;
            pairs
                .map(|p| {
                    Complex32::new(
                        i16::from_le_bytes([p[0], p[1]]) as f32 * k,
                        i16::from_le_bytes([p[2], p[3]]) as f32 * k,
                    )
                })
                .collect()
        }
        SampleType::F32 => pairs
            .map(|p| {
                Complex32::new(
                    f32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                    f32::from_le_bytes([p[4], p[5], p[6], p[7]]),
                )
            })
            .collect(),
    };
    Ok(samples)
}

/// Encode samples the way the server does, scaling integers to the peak
pub fn encode_frame(samples: &[Complex32], sample_type: SampleType) -> Vec<u8> {
    let peak = samples
        .iter()
        .flat_map(|s| [s.re.abs(), s.im.abs()])
        .fold(0.0f32, f32::max);
    let scale = match sample_type {
        SampleType::F32 => 1.0,
        _ if peak == 0.0 => 1.0,
        _ => peak,
    };

    let mut frame =
        Vec::with_capacity(HEADER_LEN + samples.len() * 2 * sample_type.component_size());
    frame.extend_from_slice(&(sample_type as u16).to_le_bytes());
    frame.extend_from_slice(&scale.to_le_bytes());

    for s in samples {
        for v in [s.re, s.im] {
            match sample_type {
                SampleType::I8 => {
                    frame.push((v / scale * 128.0).round().clamp(-128.0, 127.0) as i8 as u8)
                }
                SampleType::I16 => frame.extend_from_slice(
                    &((v / scale * 32768.0).round().clamp(-32768.0, 32767.0) as i16).to_le_bytes(),
                ),
                SampleType::F32 => frame.extend_from_slice(&v.to_le_bytes()),
            }
        }
    }
    frame
}

/// First pipeline stage: byte frames in, complex samples out
#[derive(Debug, Default)]
pub struct SampleStreamDecoder {
    frames_decoded: u64,
    invalid_frames: u64,
}

impl SampleStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn invalid_frames(&self) -> u64 {
        self.invalid_frames
    }
}

impl Stage for SampleStreamDecoder {
    type Input = BasebandFrame;
    type Output = DecodedFrame;

    fn process(&mut self, frame: BasebandFrame) -> Result<Option<DecodedFrame>, CodecError> {
        let samples = decode_frame(&frame.data).inspect_err(|_| self.invalid_frames += 1)?;
        self.frames_decoded += 1;
        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(DecodedFrame {
            encoding: frame.encoding,
            samples,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BasebandEncoding;

    fn tone(len: usize, amplitude: f32) -> Vec<Complex32> {
        (0..len)
            .map(|i| {
                let phase = i as f32 * 0.05;
                Complex32::new(phase.cos() * amplitude, phase.sin() * amplitude)
            })
            .collect()
    }

    fn max_error(a: &[Complex32], b: &[Complex32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).norm()).fold(0.0, f32::max)
    }

    #[test]
    fn test_each_sample_type_preserves_count() {
        let samples = tone(1000, 0.8);
        for (sample_type, tolerance) in [
            (SampleType::F32, 0.0),
            (SampleType::I16, 1e-4),
            (SampleType::I8, 1e-2),
        ] {
            let decoded = decode_frame(&encode_frame(&samples, sample_type)).unwrap();
            assert_eq!(decoded.len(), samples.len(), "{sample_type:?}");
            assert!(max_error(&samples, &decoded) <= tolerance, "{sample_type:?}");
        }
    }

    #[test]
    fn test_silence_uses_unit_scale() {
        let frame = encode_frame(&vec![Complex32::new(0.0, 0.0); 8], SampleType::I16);
        assert_eq!(&frame[2..6], &1.0f32.to_le_bytes());
        assert!(decode_frame(&frame).unwrap().iter().all(|s| s.norm() == 0.0));
    }

    #[test]
    fn test_invalid_frames() {
        assert!(decode_frame(&[1, 0, 0]).is_err());

        let mut frame = encode_frame(&tone(4, 1.0), SampleType::I16);
        frame[0] = 9;
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_decoder_stage_keeps_encoding() {
        let mut decoder = SampleStreamDecoder::new();
        let frame = BasebandFrame {
            encoding: BasebandEncoding::ExperimentalFft,
            data: encode_frame(&tone(16, 0.5), SampleType::F32),
        };
        let decoded = decoder.process(frame).unwrap().unwrap();
        assert_eq!(decoded.encoding, BasebandEncoding::ExperimentalFft);
        assert_eq!(decoded.samples.len(), 16);

        let empty = BasebandFrame {
            encoding: BasebandEncoding::Raw,
            data: encode_frame(&[], SampleType::F32),
        };
        assert!(decoder.process(empty).unwrap().is_none());
        assert!(decoder.process(BasebandFrame { encoding: BasebandEncoding::Raw, data: vec![] }).is_err());
        assert_eq!(decoder.frames_decoded(), 2);
        assert_eq!(decoder.invalid_frames(), 1);
    }
}
