//! Network subsystem: TCP transport, packet framing and ack correlation

pub mod framing;
pub mod sender;
pub mod transport;
pub mod waiter;

pub use framing::{Packet, PacketReader, PacketWriter};
pub use sender::PacketSender;
pub use transport::{connect, ShutdownHandle};
pub use waiter::{AckRegistry, PacketWaiter, WaitError, WaiterState};
