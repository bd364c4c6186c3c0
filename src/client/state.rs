//! Session lifecycle state and counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Connection lifecycle.
///
/// `Connecting -> AwaitingUi -> Idle <-> Streaming -> Closed`, with `Busy`
/// reachable from anywhere when the server asks us to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    AwaitingUi = 1,
    Idle = 2,
    Streaming = 3,
    Closed = 4,
    Busy = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::AwaitingUi,
            2 => Self::Idle,
            3 => Self::Streaming,
            5 => Self::Busy,
            _ => Self::Closed,
        }
    }

    /// `Closed` and `Busy` are final
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Busy)
    }
}

#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` unless already in a terminal state. Returns whether the
    /// state changed.
    pub fn advance(&self, next: SessionState) -> bool {
        let result = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let current = SessionState::from_u8(current);
            if current.is_terminal() || current == next {
                None
            } else {
                Some(next as u8)
            }
        });
        match result {
            Ok(previous) => {
                tracing::debug!("Session {:?} -> {:?}", SessionState::from_u8(previous), next);
                true
            }
            Err(_) => false,
        }
    }

    /// Enter `Busy` from any state, including `Closed`
    pub fn mark_busy(&self) {
        let previous = self.0.swap(SessionState::Busy as u8, Ordering::AcqRel);
        tracing::debug!("Session {:?} -> Busy", SessionState::from_u8(previous));
    }
}

/// Per-session traffic counters
#[derive(Debug, Default)]
pub struct SessionStats {
    pub bytes_received: AtomicU64,
    pub command_packets: AtomicU64,
    pub ack_packets: AtomicU64,
    pub baseband_packets: AtomicU64,
    pub error_packets: AtomicU64,
    pub unknown_packets: AtomicU64,
}

impl SessionStats {
    pub fn snapshot(&self, bytes_sent: u64) -> StatsSnapshot {
        StatsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent,
            command_packets: self.command_packets.load(Ordering::Relaxed),
            ack_packets: self.ack_packets.load(Ordering::Relaxed),
            baseband_packets: self.baseband_packets.load(Ordering::Relaxed),
            error_packets: self.error_packets.load(Ordering::Relaxed),
            unknown_packets: self.unknown_packets.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub command_packets: u64,
    pub ack_packets: u64,
    pub baseband_packets: u64,
    pub error_packets: u64,
    pub unknown_packets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let state = StateCell::new(SessionState::Connecting);
        assert!(state.advance(SessionState::AwaitingUi));
        assert!(state.advance(SessionState::Idle));
        assert!(state.advance(SessionState::Streaming));
        assert!(!state.advance(SessionState::Streaming));
        assert!(state.advance(SessionState::Idle));
        assert!(state.advance(SessionState::Closed));

        // terminal
        assert!(!state.advance(SessionState::Idle));
        assert_eq!(state.get(), SessionState::Closed);
    }

    #[test]
    fn test_busy_sticks() {
        let state = StateCell::new(SessionState::Streaming);
        state.mark_busy();
        assert!(!state.advance(SessionState::Closed));
        assert_eq!(state.get(), SessionState::Busy);
        assert!(state.get().is_terminal());
    }
}
