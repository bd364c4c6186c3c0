//! Shared outbound side of a connection
//!
//! Commands from the host thread and transmit audio from the back-channel
//! thread both go through one [`PacketSender`], so packets never interleave.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::TransportError;
use crate::network::framing::{command_payload, PacketWriter};
use crate::protocol::{Command, PacketType};

type BoxedWriter = Box<dyn Write + Send>;

pub struct PacketSender {
    writer: Mutex<PacketWriter<BoxedWriter>>,
    open: AtomicBool,
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
}

impl PacketSender {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Mutex::new(PacketWriter::new(Box::new(writer) as BoxedWriter)),
            open: AtomicBool::new(true),
            bytes_sent: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Refuse further sends. The underlying socket is shut down by its owner.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn send(&self, packet_type: PacketType, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let written = self.writer.lock().send(packet_type, payload);
        match written {
            Ok(n) => {
                self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Send failed: {}", e);
                self.mark_closed();
                Err(e)
            }
        }
    }

    pub fn send_command(&self, cmd: Command, args: &[u8]) -> Result<(), TransportError> {
        tracing::trace!("-> {:?} ({} bytes)", cmd, args.len());
        self.send(PacketType::Command, &command_payload(cmd, args))
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network::framing::{Packet, PacketReader};
    use std::io::Cursor;
    use std::sync::Arc;

    /// Writer whose bytes stay inspectable after it is boxed
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        pub(crate) fn packets(&self) -> Vec<Packet> {
            let data = self.0.lock().clone();
            let mut reader = PacketReader::new(Cursor::new(data));
            std::iter::from_fn(|| reader.receive().ok()).collect()
        }
    }

    #[test]
    fn test_counts_and_close() {
        let buffer = SharedBuffer::default();
        let sender = PacketSender::new(buffer.clone());

        sender.send_command(Command::Stop, &[]).unwrap();
        sender.send(PacketType::TransmitData, &[0u8; 4]).unwrap();
        assert_eq!(sender.packets_sent(), 2);
        assert_eq!(sender.bytes_sent(), 12 + 12);
        assert_eq!(buffer.packets().len(), 2);

        sender.mark_closed();
        assert!(matches!(
            sender.send_command(Command::Start, &[]),
            Err(TransportError::Closed)
        ));
        assert_eq!(buffer.packets().len(), 2);
    }
}
