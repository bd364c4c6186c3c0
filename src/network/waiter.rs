//! Command acknowledgment correlation
//!
//! A caller registers a [`PacketWaiter`] for a command before sending it; the
//! receive thread resolves the waiter when a COMMAND_ACK with the same command
//! arrives. At most one waiter per command can be outstanding.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::error::ProtocolError;
use crate::protocol::Command;

/// Waiter lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum WaiterState {
    Pending,
    /// Acknowledged; holds the ack arguments
    Notified(Bytes),
    Cancelled,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("Timed out waiting for acknowledgment")]
    Timeout,

    #[error("Wait cancelled")]
    Cancelled,
}

/// One-shot wait for a command acknowledgment
#[derive(Debug)]
pub struct PacketWaiter {
    command: Command,
    state: Mutex<WaiterState>,
    changed: Condvar,
}

impl PacketWaiter {
    fn new(command: Command) -> Self {
        Self {
            command,
            state: Mutex::new(WaiterState::Pending),
            changed: Condvar::new(),
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn state(&self) -> WaiterState {
        self.state.lock().clone()
    }

    /// Resolve with the ack arguments. Only a pending waiter changes state.
    pub fn notify(&self, args: Bytes) -> bool {
        self.resolve(WaiterState::Notified(args))
    }

    pub fn cancel(&self) -> bool {
        self.resolve(WaiterState::Cancelled)
    }

    fn resolve(&self, next: WaiterState) -> bool {
        let mut state = self.state.lock();
        if *state != WaiterState::Pending {
            return false;
        }
        *state = next;
        self.changed.notify_all();
        true
    }

    /// Block until notified, cancelled or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> Result<Bytes, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match &*state {
                WaiterState::Notified(args) => return Ok(args.clone()),
                WaiterState::Cancelled => return Err(WaitError::Cancelled),
                WaiterState::Pending => {}
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return match &*state {
                    WaiterState::Notified(args) => Ok(args.clone()),
                    WaiterState::Cancelled => Err(WaitError::Cancelled),
                    WaiterState::Pending => Err(WaitError::Timeout),
                };
            }
        }
    }
}

/// Outstanding waiters keyed by command
#[derive(Debug, Default)]
pub struct AckRegistry {
    waiters: DashMap<Command, Arc<PacketWaiter>>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `command`; rejected while another is pending
    pub fn register(&self, command: Command) -> Result<Arc<PacketWaiter>, ProtocolError> {
        match self.waiters.entry(command) {
            Entry::Occupied(_) => Err(ProtocolError::WaiterOutstanding(command)),
            Entry::Vacant(slot) => {
                let waiter = Arc::new(PacketWaiter::new(command));
                slot.insert(waiter.clone());
                Ok(waiter)
            }
        }
    }

    /// Deliver an ack. Returns false when nobody was waiting for `command`.
    pub fn notify(&self, command: Command, args: Bytes) -> bool {
        match self.waiters.remove(&command) {
            Some((_, waiter)) => waiter.notify(args),
            None => false,
        }
    }

    /// Cancel and drop every outstanding waiter
    pub fn cancel_all(&self) -> usize {
        let commands: Vec<Command> = self.waiters.iter().map(|entry| *entry.key()).collect();
        commands
            .into_iter()
            .filter_map(|command| self.waiters.remove(&command))
            .filter(|(_, waiter)| waiter.cancel())
            .count()
    }

    /// Forget `waiter` once its caller is done with it (e.g. after a timeout)
    pub fn release(&self, waiter: &Arc<PacketWaiter>) {
        self.waiters
            .remove_if(&waiter.command(), |_, registered| Arc::ptr_eq(registered, waiter));
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
