//! Wire protocol shared with the remote server
//!
//! Every packet starts with an 8-byte header: `type: u32`, `size: u32`, both
//! little-endian, where `size` counts the header itself. Command and
//! command-ack packets carry a `cmd: u32` right after the header, followed by
//! command specific arguments.

pub mod transmit;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Packet header length in bytes
pub const HEADER_LEN: usize = 8;

/// Command header length in bytes
pub const COMMAND_HEADER_LEN: usize = 4;

/// Largest packet accepted from the wire, header included
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Length of the server nonce and of the signed response
pub const CHALLENGE_LEN: usize = 32;

/// Magic value opening the START arguments
pub const START_MAGIC: u32 = 0x5DB0_B70E;

/// Packet types understood by this client.
///
/// Values missing from this enum are forward-compatible extensions; the
/// receive loop logs and skips them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    Command = 0,
    CommandAck = 1,
    Baseband = 2,
    BasebandCompressed = 3,
    Error = 6,
    BasebandExperimentalFft = 7,
    TransmitData = 8,
}

impl PacketType {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Command),
            1 => Some(Self::CommandAck),
            2 => Some(Self::Baseband),
            3 => Some(Self::BasebandCompressed),
            6 => Some(Self::Error),
            7 => Some(Self::BasebandExperimentalFft),
            8 => Some(Self::TransmitData),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// Command vocabulary carried inside COMMAND / COMMAND_ACK packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    GetUi = 0x00,
    UiAction = 0x01,
    Start = 0x02,
    Stop = 0x03,
    SetFrequency = 0x04,
    GetSampleRate = 0x05,
    SetSampleType = 0x06,
    SetCompression = 0x07,
    SetFftZstdCompression = 0x08,
    SetEfftLossRate = 0x09,
    EfftNoiseFigure = 0x0A,
    SecureChallenge = 0x0B,
    TransmitAction = 0x0C,
    SetTransmitterSupported = 0x0D,
    SetTransmitterNotSupported = 0x0E,
    SetSampleRate = 0x80,
    Disconnect = 0x81,
}

impl Command {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0x00 => Some(Self::GetUi),
            0x01 => Some(Self::UiAction),
            0x02 => Some(Self::Start),
            0x03 => Some(Self::Stop),
            0x04 => Some(Self::SetFrequency),
            0x05 => Some(Self::GetSampleRate),
            0x06 => Some(Self::SetSampleType),
            0x07 => Some(Self::SetCompression),
            0x08 => Some(Self::SetFftZstdCompression),
            0x09 => Some(Self::SetEfftLossRate),
            0x0A => Some(Self::EfftNoiseFigure),
            0x0B => Some(Self::SecureChallenge),
            0x0C => Some(Self::TransmitAction),
            0x0D => Some(Self::SetTransmitterSupported),
            0x0E => Some(Self::SetTransmitterNotSupported),
            0x80 => Some(Self::SetSampleRate),
            0x81 => Some(Self::Disconnect),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// Decoded command payload: the raw command id and its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPacket {
    pub raw_cmd: u32,
    pub args: bytes::Bytes,
}

impl CommandPacket {
    /// Split a COMMAND / COMMAND_ACK payload into command id and arguments
    pub fn parse(payload: bytes::Bytes) -> Result<Self, ProtocolError> {
        if payload.len() < COMMAND_HEADER_LEN {
            return Err(ProtocolError::Malformed(format!(
                "command payload of {} bytes",
                payload.len()
            )));
        }
        let raw_cmd = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(Self {
            raw_cmd,
            args: payload.slice(COMMAND_HEADER_LEN..),
        })
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_wire(self.raw_cmd)
    }
}

/// PCM representation the server uses for baseband samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SampleType {
    I8 = 0,
    I16 = 1,
    F32 = 2,
}

impl SampleType {
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::I8),
            1 => Some(Self::I16),
            2 => Some(Self::F32),
            _ => None,
        }
    }

    /// Size of one I or Q component in bytes
    pub fn component_size(self) -> usize {
        match self {
            Self::I8 => 1,
            Self::I16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Baseband compression requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Raw sample stream frames
    None,
    /// zstd compressed sample stream frames
    Legacy,
    /// Lossy FFT codec, zstd compressed
    Lossy,
}

/// Arguments of the START command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartArgs {
    pub magic: u32,
    pub signed_challenge: [u8; CHALLENGE_LEN],
    pub tx_prebuffer_msec: i32,
}

impl StartArgs {
    /// Encoded length on the wire
    pub const WIRE_LEN: usize = 4 + CHALLENGE_LEN + 4;

    pub fn new(signed_challenge: [u8; CHALLENGE_LEN], tx_prebuffer_msec: i32) -> Self {
        Self {
            magic: START_MAGIC,
            signed_challenge,
            tx_prebuffer_msec,
        }
    }

    /// Little-endian fixed layout, identical to the server's packed struct
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::WIRE_LEN {
            return Err(ProtocolError::Malformed(format!(
                "start arguments of {} bytes",
                data.len()
            )));
        }
        bincode::deserialize(&data[..Self::WIRE_LEN])
            .map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Parse a little-endian `f32` array (noise figure payloads)
pub fn parse_f32_array(args: &[u8]) -> Vec<f32> {
    args.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
