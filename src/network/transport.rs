//! TCP transport setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::ConnectError;

/// Connect to the server, trying every resolved address in turn
pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConnectError::Refused(format!("cannot resolve {host}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        let socket = match Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)) {
            Ok(socket) => socket,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        match socket.connect_timeout(&addr.into(), timeout) {
            Ok(()) => {
                // Small command packets must not sit in Nagle's buffer
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::warn!("Failed to set TCP_NODELAY: {}", e);
                }
                if let Err(e) = socket.set_keepalive(true) {
                    tracing::warn!("Failed to enable keepalive: {}", e);
                }
                tracing::info!("Connected to {}", addr);
                return Ok(socket.into());
            }
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(ConnectError::Refused(match last_error {
        Some(e) => format!("{host}:{port}: {e}"),
        None => format!("{host}:{port}: no addresses"),
    }))
}

/// Handle used to unblock the receive thread from another thread
pub struct ShutdownHandle {
    stream: TcpStream,
}

impl ShutdownHandle {
    pub fn new(stream: &TcpStream) -> std::io::Result<Self> {
        Ok(Self {
            stream: stream.try_clone()?,
        })
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            tracing::trace!("Socket shutdown: {}", e);
        }
    }
}
