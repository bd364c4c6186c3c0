//! Prebuffering jitter buffer
//!
//! Network delivery of baseband is bursty. The prebuffer withholds output
//! until `prebuffer_msec` worth of samples has accumulated, then releases
//! samples in arrival order at the stream's sample rate. Durations are always
//! derived from (sample count, sample rate), never from arrival times.

use parking_lot::{Condvar, Mutex};
use rustfft::num_complex::Complex32;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants::STREAM_BUFFER_SIZE;
use crate::dsp::stream::SampleStream;

/// Output pacing granularity
const BLOCK_MSEC: f64 = 10.0;

/// Depth kept beyond which the oldest samples are dropped, unless the lead
/// asks for more
const MIN_DEPTH_MSEC: f64 = 1000.0;

/// Depth limit as a multiple of the lead
const DEPTH_LEAD_FACTOR: f64 = 4.0;

/// Prebuffer core, independent of threading
#[derive(Debug)]
pub struct Prebuffer {
    buffer: VecDeque<Complex32>,
    prebuffer_msec: u32,
    sample_rate: f64,
    prebuffering: bool,
    underruns: u64,
    overflows: u64,
    dropped: u64,
    released: u64,
}

impl Prebuffer {
    pub fn new(prebuffer_msec: u32, sample_rate: f64) -> Self {
        Self {
            buffer: VecDeque::new(),
            prebuffer_msec,
            sample_rate,
            prebuffering: true,
            underruns: 0,
            overflows: 0,
            dropped: 0,
            released: 0,
        }
    }

    /// Append samples. Past [`max_samples`](Self::max_samples) the oldest
    /// samples are dropped and the overflow counted.
    pub fn push(&mut self, samples: &[Complex32]) {
        self.buffer.extend(samples.iter().copied());

        // always room for two of the latest pushes, so bursty senders with
        // large frames are not cut
        let limit = self.max_samples().max(samples.len() * 2);
        if self.buffer.len() > limit {
            let excess = self.buffer.len() - limit;
            self.buffer.drain(..excess);
            self.overflows += 1;
            self.dropped += excess as u64;
            tracing::debug!("Prebuffer overflow: dropped {} samples", excess);
        }
    }

    /// Depth limit at the current rate and lead
    pub fn max_samples(&self) -> usize {
        if self.sample_rate <= 0.0 {
            return STREAM_BUFFER_SIZE;
        }
        let msec = (self.prebuffer_msec as f64 * DEPTH_LEAD_FACTOR).max(MIN_DEPTH_MSEC);
        ((msec * self.sample_rate / 1000.0) as usize).max(self.block_len())
    }

    /// Release up to `max` samples. Empty while still prebuffering.
    pub fn pop(&mut self, max: usize) -> Vec<Complex32> {
        if self.prebuffering {
            if self.buffered_msec() < self.prebuffer_msec as f64 || self.buffer.is_empty() {
                return Vec::new();
            }
            tracing::debug!(
                "Prebuffer filled: {:.1} ms buffered, lead {} ms",
                self.buffered_msec(),
                self.prebuffer_msec
            );
            self.prebuffering = false;
        }

        if self.buffer.is_empty() {
            // lead used up: start over
            self.prebuffering = true;
            self.underruns += 1;
            tracing::debug!("Prebuffer underrun");
            return Vec::new();
        }

        let count = max.min(self.buffer.len());
        self.released += count as u64;
        self.buffer.drain(..count).collect()
    }

    /// Discard residual samples and start accumulating again
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.prebuffering = true;
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffered_msec(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.buffer.len() as f64 * 1000.0 / self.sample_rate
    }

    pub fn is_prebuffering(&self) -> bool {
        self.prebuffering
    }

    pub fn prebuffer_msec(&self) -> u32 {
        self.prebuffer_msec
    }

    pub fn set_prebuffer_msec(&mut self, msec: u32) {
        self.prebuffer_msec = msec;
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    /// Samples per output block at the current rate
    pub fn block_len(&self) -> usize {
        ((self.sample_rate * BLOCK_MSEC / 1000.0) as usize).max(1)
    }

    pub fn stats(&self) -> PrebufferStats {
        PrebufferStats {
            buffered_samples: self.buffer.len(),
            buffered_msec: self.buffered_msec(),
            prebuffering: self.prebuffering,
            underruns: self.underruns,
            overflows: self.overflows,
            dropped: self.dropped,
            released: self.released,
        }
    }
}

/// Prebuffer statistics
#[derive(Debug, Clone)]
pub struct PrebufferStats {
    pub buffered_samples: usize,
    pub buffered_msec: f64,
    pub prebuffering: bool,
    pub underruns: u64,
    /// Pushes that hit the depth limit
    pub overflows: u64,
    /// Samples discarded by those pushes
    pub dropped: u64,
    pub released: u64,
}

struct Shared {
    core: Mutex<Prebuffer>,
    data: Condvar,
}

/// Cloneable control handle onto a running prebuffer
#[derive(Clone)]
pub struct PrebufferHandle {
    shared: Arc<Shared>,
}

impl PrebufferHandle {
    pub fn clear(&self) {
        self.shared.core.lock().clear();
    }

    pub fn set_prebuffer_msec(&self, msec: u32) {
        self.shared.core.lock().set_prebuffer_msec(msec);
    }

    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.shared.core.lock().set_sample_rate(sample_rate);
        self.shared.data.notify_all();
    }

    pub fn prebuffer_msec(&self) -> u32 {
        self.shared.core.lock().prebuffer_msec()
    }

    pub fn buffered_msec(&self) -> f64 {
        self.shared.core.lock().buffered_msec()
    }

    pub fn stats(&self) -> PrebufferStats {
        self.shared.core.lock().stats()
    }
}

/// Prebuffer stage: one thread fills the buffer from upstream, another
/// releases paced blocks downstream.
pub struct PrebufferStage {
    handle: PrebufferHandle,
    input: Arc<SampleStream>,
    output: Arc<SampleStream>,
    running: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
    pacer: Option<JoinHandle<()>>,
}

impl PrebufferStage {
    pub fn spawn(
        prebuffer: Prebuffer,
        input: Arc<SampleStream>,
        output: Arc<SampleStream>,
    ) -> std::io::Result<Self> {
        let handle = PrebufferHandle {
            shared: Arc::new(Shared {
                core: Mutex::new(prebuffer),
                data: Condvar::new(),
            }),
        };
        let running = Arc::new(AtomicBool::new(true));

        let feeder = {
            let shared = handle.shared.clone();
            let input = input.clone();
            thread::Builder::new()
                .name("prebuffer-in".into())
                .spawn(move || {
                    while let Some(samples) = input.read() {
                        shared.core.lock().push(&samples);
                        shared.data.notify_all();
                    }
                })?
        };

        let pacer = {
            let shared = handle.shared.clone();
            let output = output.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("prebuffer-out".into())
                .spawn(move || Self::pace(&shared, &output, &running))?
        };

        Ok(Self {
            handle,
            input,
            output,
            running,
            feeder: Some(feeder),
            pacer: Some(pacer),
        })
    }

    fn pace(shared: &Shared, output: &SampleStream, running: &AtomicBool) {
        let mut next_release = Instant::now();
        while running.load(Ordering::Acquire) {
            let (block, sample_rate) = {
                let mut core = shared.core.lock();
                let block_len = core.block_len().min(output.capacity());
                let block = core.pop(block_len);
                if block.is_empty() {
                    shared
                        .data
                        .wait_for(&mut core, Duration::from_millis(BLOCK_MSEC as u64));
                    next_release = Instant::now();
                    continue;
                }
                (block, core.sample_rate())
            };

            let block_duration = if sample_rate > 0.0 {
                Duration::from_secs_f64(block.len() as f64 / sample_rate)
            } else {
                Duration::ZERO
            };
            if output.swap(block).is_err() {
                break;
            }

            next_release += block_duration;
            let now = Instant::now();
            if next_release > now {
                thread::sleep(next_release - now);
            } else if now - next_release > Duration::from_millis(BLOCK_MSEC as u64 * 10) {
                // consumer stalled; do not try to catch up in a burst
                next_release = now;
            }
        }
    }

    pub fn handle(&self) -> PrebufferHandle {
        self.handle.clone()
    }

    pub fn stop(&mut self) {
        if self.feeder.is_none() && self.pacer.is_none() {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.input.stop_reader();
        self.output.stop_writer();
        self.handle.shared.data.notify_all();

        for handle in [self.feeder.take(), self.pacer.take()].into_iter().flatten() {
            if handle.join().is_err() {
                tracing::error!("Prebuffer thread panicked");
            }
        }

        self.input.clear_read_stop();
        self.output.clear_write_stop();
    }
}

impl Drop for PrebufferStage {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ramp(start: usize, len: usize) -> Vec<Complex32> {
        (start..start + len)
            .map(|i| Complex32::new(i as f32, -(i as f32)))
            .collect()
    }

    #[test]
    fn test_withholds_until_lead() {
        // 100 ms at 1 kHz = 100 samples
        let mut prebuffer = Prebuffer::new(100, 1000.0);
        prebuffer.push(&ramp(0, 60));
        assert!(prebuffer.pop(1000).is_empty());
        assert!(prebuffer.is_prebuffering());

        prebuffer.push(&ramp(60, 40));
        let out = prebuffer.pop(1000);
        assert_eq!(out, ramp(0, 100));
        assert!(!prebuffer.is_prebuffering());
    }

    #[test]
    fn test_underrun_rearms() {
        let mut prebuffer = Prebuffer::new(10, 1000.0);
        prebuffer.push(&ramp(0, 10));
        assert_eq!(prebuffer.pop(4).len(), 4);
        assert_eq!(prebuffer.pop(100).len(), 6);

        assert!(prebuffer.pop(100).is_empty());
        assert!(prebuffer.is_prebuffering());
        assert_eq!(prebuffer.stats().underruns, 1);

        prebuffer.push(&ramp(0, 5));
        assert!(prebuffer.pop(100).is_empty());
    }

    #[test]
    fn test_clear_discards_residue() {
        let mut prebuffer = Prebuffer::new(0, 1000.0);
        prebuffer.push(&ramp(0, 10));
        assert_eq!(prebuffer.pop(3).len(), 3);

        prebuffer.clear();
        assert_eq!(prebuffer.buffered_samples(), 0);
        assert!(prebuffer.is_prebuffering());
    }

    #[test]
    fn test_rate_change_recomputes_duration() {
        let mut prebuffer = Prebuffer::new(100, 1000.0);
        prebuffer.push(&ramp(0, 50));
        assert_eq!(prebuffer.buffered_msec(), 50.0);

        // same samples are worth half the time at twice the rate
        prebuffer.set_sample_rate(2000.0);
        assert_eq!(prebuffer.buffered_msec(), 25.0);
        assert!(prebuffer.pop(10).is_empty());

        prebuffer.set_sample_rate(500.0);
        assert_eq!(prebuffer.pop(10).len(), 10);
    }

    #[test]
    fn test_stage_releases_in_order() {
        let input = Arc::new(SampleStream::new(10_000));
        let output = Arc::new(SampleStream::new(10_000));
        let mut stage =
            PrebufferStage::spawn(Prebuffer::new(0, 10_000.0), input.clone(), output.clone())
                .unwrap();
        let handle = stage.handle();

        for chunk in 0..10 {
            input.swap(ramp(chunk * 50, 50)).unwrap();
        }

        let mut received = Vec::new();
        while received.len() < 500 {
            received.extend(output.read().unwrap());
        }
        assert_eq!(received, ramp(0, 500));
        assert!(handle.stats().released >= 500);

        stage.stop();
    }

    #[test]
    fn test_depth_is_bounded_when_consumer_stalls() {
        // 48 kHz, 100 ms lead: nothing is popped while pushing
        let mut prebuffer = Prebuffer::new(100, 48_000.0);
        let batch = 100_000;
        for i in 0..200 {
            prebuffer.push(&ramp(i * batch, batch));
        }

        let stats = prebuffer.stats();
        assert!(stats.buffered_samples <= 2 * batch);
        assert!(stats.overflows > 0);
        assert_eq!(
            stats.dropped as usize + stats.buffered_samples,
            200 * batch
        );

        // the newest samples survive, in order
        let out = prebuffer.pop(usize::MAX);
        let newest = 200 * batch;
        assert_eq!(out, ramp(newest - out.len(), out.len()));
    }

    #[test]
    fn test_depth_follows_lead() {
        let mut prebuffer = Prebuffer::new(100, 48_000.0);
        assert_eq!(prebuffer.max_samples(), 48_000);

        prebuffer.set_prebuffer_msec(500);
        assert_eq!(prebuffer.max_samples(), 96_000);

        // small steady pushes are held to the limit
        for i in 0..300 {
            prebuffer.push(&ramp(i * 1000, 1000));
        }
        assert_eq!(prebuffer.buffered_samples(), 96_000);
        assert_eq!(prebuffer.stats().dropped, 300_000 - 96_000);
    }

    #[test]
    fn test_stage_splits_blocks_to_output_capacity() {
        let input = Arc::new(SampleStream::new(10_000));
        let output = Arc::new(SampleStream::new(64));
        // 10 ms blocks at 1 MHz would be 10_000 samples
        let mut stage =
            PrebufferStage::spawn(Prebuffer::new(0, 1e6), input.clone(), output.clone()).unwrap();

        input.swap(ramp(0, 1000)).unwrap();
        let mut received = Vec::new();
        while received.len() < 1000 {
            let block = output.read().unwrap();
            assert!(block.len() <= 64);
            received.extend(block);
        }
        assert_eq!(received, ramp(0, 1000));

        stage.stop();
    }

    proptest! {
        #[test]
        fn prop_no_output_below_lead(
            chunks in proptest::collection::vec(1usize..64, 1..40),
            lead in 1u32..200,
        ) {
            // 1 kHz: one sample per millisecond
            let mut prebuffer = Prebuffer::new(lead, 1000.0);
            let mut pushed = 0usize;
            let mut released = 0usize;

            for len in chunks {
                prebuffer.push(&ramp(pushed, len));
                pushed += len;

                let out = prebuffer.pop(usize::MAX);
                if pushed < lead as usize {
                    prop_assert!(out.is_empty());
                } else {
                    // once the lead is reached everything flows through
                    prop_assert_eq!(out.len(), pushed - released);
                    prop_assert_eq!(out, ramp(released, pushed - released));
                    released = pushed;
                }
            }
        }
    }
}
