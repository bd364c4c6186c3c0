//! Length-prefixed packet framing
//!
//! A packet is only handed out once every byte its header declares has been
//! read. Running out of bytes anywhere inside a packet is a lost connection.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Write};

use crate::error::TransportError;
use crate::protocol::{Command, PacketType, COMMAND_HEADER_LEN, HEADER_LEN, MAX_PACKET_SIZE};

/// A complete packet as read from the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Raw type field, kept so unknown types can be reported
    pub raw_type: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            raw_type: packet_type.to_wire(),
            payload: payload.into(),
        }
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_wire(self.raw_type)
    }

    /// Total size on the wire, header included
    pub fn wire_size(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Serialize header and payload into one contiguous buffer
pub fn encode_packet(packet_type: PacketType, payload: &[u8]) -> Result<Bytes, TransportError> {
    let size = HEADER_LEN + payload.len();
    if size > MAX_PACKET_SIZE {
        return Err(TransportError::InvalidSize(size));
    }

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u32_le(packet_type.to_wire());
    buf.put_u32_le(size as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Command payload: `cmd: u32` followed by the arguments
pub fn command_payload(cmd: Command, args: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(COMMAND_HEADER_LEN + args.len());
    payload.extend_from_slice(&cmd.to_wire().to_le_bytes());
    payload.extend_from_slice(args);
    payload
}

/// Blocking packet reader
pub struct PacketReader<R> {
    inner: R,
    packets_read: u64,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            packets_read: 0,
        }
    }

    /// Block until a whole packet has arrived
    pub fn receive(&mut self) -> Result<Packet, TransportError> {
        let mut header = [0u8; HEADER_LEN];
        read_full(&mut self.inner, &mut header)?;

        let raw_type = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if !(HEADER_LEN..=MAX_PACKET_SIZE).contains(&size) {
            return Err(TransportError::InvalidSize(size));
        }

        let mut payload = vec![0u8; size - HEADER_LEN];
        read_full(&mut self.inner, &mut payload)?;

        self.packets_read += 1;
        Ok(Packet {
            raw_type,
            payload: Bytes::from(payload),
        })
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    // read_exact retries partial reads and EINTR itself
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            TransportError::Closed
        }
        _ => TransportError::Io(e),
    })
}

/// Blocking packet writer. Each packet goes out in a single write.
pub struct PacketWriter<W> {
    inner: W,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Returns the number of bytes written
    pub fn send(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<usize, TransportError> {
        let buf = encode_packet(packet_type, payload)?;
        self.inner.write_all(&buf).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                TransportError::Closed
            }
            _ => TransportError::Io(e),
        })?;
        self.inner.flush()?;
        Ok(buf.len())
    }

    pub fn send_command(&mut self, cmd: Command, args: &[u8]) -> Result<usize, TransportError> {
        self.send(PacketType::Command, &command_payload(cmd, args))
    }

    pub fn send_command_ack(&mut self, cmd: Command, args: &[u8]) -> Result<usize, TransportError> {
        self.send(PacketType::CommandAck, &command_payload(cmd, args))
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &W {
        &self.inner
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    const ALL_TYPES: [PacketType; 7] = [
        PacketType::Command,
        PacketType::CommandAck,
        PacketType::Baseband,
        PacketType::BasebandCompressed,
        PacketType::Error,
        PacketType::BasebandExperimentalFft,
        PacketType::TransmitData,
    ];

    /// Reader that hands out at most `step` bytes per call
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_header_layout() {
        let encoded = encode_packet(PacketType::BasebandCompressed, &[1, 2, 3]).unwrap();
        assert_eq!(&encoded[0..4], &3u32.to_le_bytes());
        assert_eq!(&encoded[4..8], &11u32.to_le_bytes());
        assert_eq!(&encoded[8..], &[1, 2, 3]);
    }

    #[test]
    fn test_partial_reads_are_reassembled() {
        let mut data = encode_packet(PacketType::Baseband, &[9u8; 100]).unwrap().to_vec();
        data.extend_from_slice(&encode_packet(PacketType::Error, &[4]).unwrap());

        let mut reader = PacketReader::new(Trickle { data, pos: 0, step: 3 });
        let first = reader.receive().unwrap();
        assert_eq!(first.packet_type(), Some(PacketType::Baseband));
        assert_eq!(first.payload.len(), 100);

        let second = reader.receive().unwrap();
        assert_eq!(second.packet_type(), Some(PacketType::Error));
        assert_eq!(&second.payload[..], &[4]);

        assert!(matches!(reader.receive(), Err(TransportError::Closed)));
        assert_eq!(reader.packets_read(), 2);
    }

    #[test]
    fn test_truncated_payload_is_connection_loss() {
        // header declares 100 payload bytes, only 10 arrive
        let mut data = Vec::new();
        data.extend_from_slice(&PacketType::BasebandCompressed.to_wire().to_le_bytes());
        data.extend_from_slice(&(HEADER_LEN as u32 + 100).to_le_bytes());
        data.extend_from_slice(&[0u8; 10]);

        let mut reader = PacketReader::new(Cursor::new(data));
        assert!(matches!(reader.receive(), Err(TransportError::Closed)));
        assert_eq!(reader.packets_read(), 0);
    }

    #[test]
    fn test_truncated_header_is_connection_loss() {
        let mut reader = PacketReader::new(Cursor::new(vec![0u8, 0, 0]));
        assert!(matches!(reader.receive(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_invalid_declared_size() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes());
        let mut reader = PacketReader::new(Cursor::new(data));
        assert!(matches!(reader.receive(), Err(TransportError::InvalidSize(4))));

        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut reader = PacketReader::new(Cursor::new(data));
        assert!(matches!(reader.receive(), Err(TransportError::InvalidSize(_))));
    }

    #[test]
    fn test_unknown_type_is_still_framed() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(&(HEADER_LEN as u32 + 2).to_le_bytes());
        data.extend_from_slice(&[7, 7]);

        let packet = PacketReader::new(Cursor::new(data)).receive().unwrap();
        assert_eq!(packet.raw_type, 5);
        assert_eq!(packet.packet_type(), None);
        assert_eq!(packet.wire_size(), HEADER_LEN + 2);
    }

    #[test]
    fn test_command_helpers() {
        let mut writer = PacketWriter::new(Vec::new());
        let written = writer.send_command(Command::SetSampleType, &[1]).unwrap();
        assert_eq!(written, HEADER_LEN + COMMAND_HEADER_LEN + 1);
        writer.send_command_ack(Command::GetUi, b"ui").unwrap();

        let mut reader = PacketReader::new(Cursor::new(writer.into_inner()));
        let packet = reader.receive().unwrap();
        assert_eq!(packet.packet_type(), Some(PacketType::Command));
        assert_eq!(&packet.payload[..4], &Command::SetSampleType.to_wire().to_le_bytes());
        assert_eq!(packet.payload[4], 1);

        let ack = reader.receive().unwrap();
        assert_eq!(ack.packet_type(), Some(PacketType::CommandAck));
        assert_eq!(&ack.payload[4..], b"ui");
    }

    proptest! {
        #[test]
        fn prop_framing_round_trip(
            index in 0usize..ALL_TYPES.len(),
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let kind = ALL_TYPES[index];
            let mut writer = PacketWriter::new(Vec::new());
            writer.send(kind, &payload).unwrap();

            let mut reader = PacketReader::new(Cursor::new(writer.into_inner()));
            let packet = reader.receive().unwrap();
            prop_assert_eq!(packet.packet_type(), Some(kind));
            prop_assert_eq!(&packet.payload[..], &payload[..]);
        }
    }
}
