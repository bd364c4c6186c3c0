//! Blocking hand-off between pipeline stages
//!
//! A [`Stream`] holds at most one published buffer. The writer blocks in
//! [`Stream::swap`] until the reader has taken the previous buffer, and the
//! reader blocks in [`Stream::read`] until a buffer is published. Stop flags
//! on either side release a blocked peer during teardown.

use parking_lot::{Condvar, Mutex};
use rustfft::num_complex::Complex32;

use crate::error::StreamError;

/// Anything that can travel through a [`Stream`]
pub trait StreamItem: Send {
    /// Size counted against the stream capacity
    fn item_len(&self) -> usize;
}

impl<T: Send> StreamItem for Vec<T> {
    fn item_len(&self) -> usize {
        self.len()
    }
}

struct State<M> {
    pending: Option<M>,
    reader_stop: bool,
    writer_stop: bool,
}

pub struct Stream<M> {
    state: Mutex<State<M>>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

/// Stream of complex baseband samples
pub type SampleStream = Stream<Vec<Complex32>>;

impl<M: StreamItem> Stream<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                pending: None,
                reader_stop: false,
                writer_stop: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish `item`, waiting for the reader to take the previous one
    pub fn swap(&self, item: M) -> Result<(), StreamError> {
        let len = item.item_len();
        if len > self.capacity {
            return Err(StreamError::Overflow {
                len,
                capacity: self.capacity,
            });
        }

        let mut state = self.state.lock();
        while state.pending.is_some() && !state.writer_stop {
            self.writable.wait(&mut state);
        }
        if state.writer_stop {
            return Err(StreamError::Stopped);
        }

        state.pending = Some(item);
        self.readable.notify_all();
        Ok(())
    }

    /// Take the next published item. `None` once the reader is stopped.
    pub fn read(&self) -> Option<M> {
        let mut state = self.state.lock();
        loop {
            if state.reader_stop {
                return None;
            }
            if let Some(item) = state.pending.take() {
                self.writable.notify_all();
                return Some(item);
            }
            self.readable.wait(&mut state);
        }
    }

    /// Non-blocking variant of [`Stream::read`]
    pub fn try_read(&self) -> Option<M> {
        let mut state = self.state.lock();
        if state.reader_stop {
            return None;
        }
        let item = state.pending.take();
        if item.is_some() {
            self.writable.notify_all();
        }
        item
    }

    pub fn stop_reader(&self) {
        self.state.lock().reader_stop = true;
        self.readable.notify_all();
    }

    pub fn clear_read_stop(&self) {
        self.state.lock().reader_stop = false;
    }

    pub fn stop_writer(&self) {
        self.state.lock().writer_stop = true;
        self.writable.notify_all();
    }

    pub fn clear_write_stop(&self) {
        self.state.lock().writer_stop = false;
    }

    /// Drop any published item
    pub fn clear(&self) {
        self.state.lock().pending = None;
        self.writable.notify_all();
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}
