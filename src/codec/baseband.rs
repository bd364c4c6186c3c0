//! Per-packet baseband codec dispatch
//!
//! Turns the payload of a BASEBAND, BASEBAND_COMPRESSED or
//! BASEBAND_EXPERIMENTAL_FFT packet into a sample stream frame for the
//! decoder stage. One zstd context is reused for the whole session.

use crate::codec::{BasebandEncoding, BasebandFrame};
use crate::constants::STREAM_BUFFER_SIZE;
use crate::error::CodecError;

/// Largest decompressed frame: a full buffer of f32 pairs plus the header
pub const MAX_FRAME_LEN: usize = STREAM_BUFFER_SIZE * 8 + 8;

pub struct BasebandDecompressor {
    zstd: zstd::bulk::Decompressor<'static>,
    capacity: usize,
    frames: u64,
    skipped: u64,
}

impl BasebandDecompressor {
    pub fn new() -> Result<Self, CodecError> {
        Self::with_capacity(MAX_FRAME_LEN)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, CodecError> {
        let zstd = zstd::bulk::Decompressor::new()
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        Ok(Self {
            zstd,
            capacity,
            frames: 0,
            skipped: 0,
        })
    }

    /// Decode one packet payload.
    ///
    /// `Ok(None)` when a compressed packet decompresses to nothing. Errors
    /// are fatal to the receive loop.
    pub fn decode(
        &mut self,
        encoding: BasebandEncoding,
        payload: &[u8],
    ) -> Result<Option<BasebandFrame>, CodecError> {
        let data = match encoding {
            BasebandEncoding::Raw => {
                if payload.len() > self.capacity {
                    return Err(CodecError::Overflow {
                        len: payload.len(),
                        capacity: self.capacity,
                    });
                }
                payload.to_vec()
            }
            BasebandEncoding::Compressed | BasebandEncoding::ExperimentalFft => self
                .zstd
                .decompress(payload, self.capacity)
                .map_err(|e| CodecError::Decompress(e.to_string()))?,
        };

        if data.is_empty() && encoding != BasebandEncoding::Raw {
            self.skipped += 1;
            return Ok(None);
        }
        self.frames += 1;
        Ok(Some(BasebandFrame { encoding, data }))
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// zstd-compress a frame the way the server does
pub fn compress(frame: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    zstd::bulk::compress(frame, level).map_err(|e| CodecError::Decompress(e.to_string()))
}
