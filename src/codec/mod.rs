//! Baseband codecs
//!
//! Inbound baseband arrives in one of three encodings, chosen per packet by
//! its type. All of them end up as sample stream frames (see
//! [`sample_stream`]); frames of the lossy FFT codec carry spectrum bins that
//! the [`efft`] stage turns back into time-domain samples.

pub mod baseband;
pub mod efft;
pub mod sample_stream;

pub use baseband::BasebandDecompressor;
pub use efft::{EfftControl, EfftDecoder, EfftEncoder, EfftStage};
pub use sample_stream::SampleStreamDecoder;

use rustfft::num_complex::Complex32;

use crate::dsp::StreamItem;
use crate::protocol::PacketType;

/// How a baseband packet was encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasebandEncoding {
    /// Sample stream frame, copied as is
    Raw,
    /// zstd compressed sample stream frame
    Compressed,
    /// zstd compressed frame of FFT codec spectrum bins
    ExperimentalFft,
}

impl BasebandEncoding {
    pub fn from_packet_type(packet_type: PacketType) -> Option<Self> {
        match packet_type {
            PacketType::Baseband => Some(Self::Raw),
            PacketType::BasebandCompressed => Some(Self::Compressed),
            PacketType::BasebandExperimentalFft => Some(Self::ExperimentalFft),
            PacketType::Command
            | PacketType::CommandAck
            | PacketType::Error
            | PacketType::TransmitData => None,
        }
    }

    pub fn packet_type(self) -> PacketType {
        match self {
            Self::Raw => PacketType::Baseband,
            Self::Compressed => PacketType::BasebandCompressed,
            Self::ExperimentalFft => PacketType::BasebandExperimentalFft,
        }
    }

    /// Whether frames must go through FFT reconstruction
    pub fn uses_fft_stage(self) -> bool {
        matches!(self, Self::ExperimentalFft)
    }
}

/// Decompressed sample stream frame, tagged with its encoding
#[derive(Debug, Clone, PartialEq)]
pub struct BasebandFrame {
    pub encoding: BasebandEncoding,
    pub data: Vec<u8>,
}

impl StreamItem for BasebandFrame {
    fn item_len(&self) -> usize {
        self.data.len()
    }
}

/// Decoded complex values, still tagged so the FFT stage can switch modes
/// in step with the data
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub encoding: BasebandEncoding,
    pub samples: Vec<Complex32>,
}

impl StreamItem for DecodedFrame {
    fn item_len(&self) -> usize {
        self.samples.len()
    }
}
