//! # IQ Remote Client
//!
//! Client for remote SDR receivers: a framed TCP command protocol, HMAC
//! challenge-response authentication, three interchangeable baseband codecs,
//! a jitter prebuffer and a transmit back-channel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              REMOTE SERVER                               │
//! └───────────────────────────────────┬──────────────────────────────────────┘
//!                                     │ TCP: [type u32|size u32|payload]
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  Worker thread (client::worker)                                          │
//! │  ┌────────────────┐   ┌───────────────────────────────────────────────┐  │
//! │  │ PacketReader   │──▶│ dispatch by PacketType / Command              │  │
//! │  │ (network)      │   │  COMMAND      → session fields, challenge,    │  │
//! │  └────────────────┘   │                 transmitter, noise figure     │  │
//! │                       │  COMMAND_ACK  → AckRegistry → PacketWaiter    │  │
//! │                       │  BASEBAND*    → BasebandDecompressor (zstd)   │  │
//! │                       └──────────────────────┬────────────────────────┘  │
//! └──────────────────────────────────────────────┼───────────────────────────┘
//!                                                ▼ Stream<BasebandFrame>
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  DSP stages (one thread each, blocking read / swap)                      │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────────┐  │
//! │  │ SampleStream     │──▶│ EfftStage        │──▶│ PrebufferStage       │  │
//! │  │ Decoder          │   │ (inverse FFT or  │   │ (lead time, paced    │  │
//! │  │ (i8/i16/f32)     │   │  pass-through)   │   │  10 ms blocks)       │  │
//! │  └──────────────────┘   └──────────────────┘   └──────────┬───────────┘  │
//! └───────────────────────────────────────────────────────────┼──────────────┘
//!                                                             ▼
//!                                                  consumer SampleStream
//!
//!   local TX audio ──▶ BackChannel thread (resample, quantize) ──▶ PacketSender
//! ```

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod dsp;
pub mod error;
pub mod network;
pub mod protocol;
pub mod transmit;

pub use client::{Session, SessionState};
pub use config::ClientConfig;
pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default server port
    pub const DEFAULT_PORT: u16 = 5259;

    /// Largest sample buffer handed between pipeline stages, in samples
    pub const STREAM_BUFFER_SIZE: usize = 1_000_000;

    /// How long synchronous commands wait for their acknowledgment
    pub const PROTOCOL_TIMEOUT_MS: u64 = 10_000;

    /// Default TCP connect timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Default receive prebuffer lead
    pub const DEFAULT_RX_PREBUFFER_MS: u32 = 100;

    /// Default transmit prebuffer lead announced in START
    pub const DEFAULT_TX_PREBUFFER_MS: u32 = 200;

    /// Sample rate of local transmit audio
    pub const TX_LOCAL_SAMPLERATE: u32 = 48_000;

    /// Sample rate of TRANSMIT_DATA payloads
    pub const TX_WIRE_SAMPLERATE: u32 = 12_000;

    /// Local transmit samples collected before each send
    pub const TX_SEND_BUFFER_SAMPLES: usize = 2400;
}
