//! Transmit path: remote transmitter state and the audio back-channel

pub mod back_channel;
pub mod quantize;
pub mod transmitter;

pub use back_channel::{BackChannel, TxResampler};
pub use quantize::{quantize_chunk, QuantizedChunk};
pub use transmitter::{PrebufferLeads, RemoteTransmitter, TxStatusMonitor};
