//! Threaded pipeline stages
//!
//! Each stage runs on its own thread: read from the upstream [`Stream`],
//! process, publish downstream. Blocking on both ends gives backpressure
//! without unbounded queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::dsp::stream::{Stream, StreamItem};
use crate::error::{CodecError, StreamError};

/// Processing step hosted by a [`StageRunner`]
pub trait Stage: Send + 'static {
    type Input: StreamItem + 'static;
    type Output: StreamItem + 'static;

    /// `Ok(None)` means nothing to publish for this input
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, CodecError>;
}

/// Called once when a stage can no longer hand its output downstream
pub type FailureHook = Arc<dyn Fn() + Send + Sync>;

/// Owns a stage thread and the streams around it
pub struct StageRunner<I: StreamItem + 'static, O: StreamItem + 'static> {
    name: String,
    input: Arc<Stream<I>>,
    output: Arc<Stream<O>>,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<I: StreamItem + 'static, O: StreamItem + 'static> StageRunner<I, O> {
    pub fn spawn<S>(
        name: &str,
        stage: S,
        input: Arc<Stream<I>>,
        output: Arc<Stream<O>>,
    ) -> std::io::Result<Self>
    where
        S: Stage<Input = I, Output = O>,
    {
        Self::spawn_supervised(name, stage, input, output, Arc::new(|| {}))
    }

    /// Like [`spawn`](Self::spawn), but a failed hand-off (anything other
    /// than a stopped output) stops the input writer and runs `on_failure`.
    pub fn spawn_supervised<S>(
        name: &str,
        mut stage: S,
        input: Arc<Stream<I>>,
        output: Arc<Stream<O>>,
        on_failure: FailureHook,
    ) -> std::io::Result<Self>
    where
        S: Stage<Input = I, Output = O>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let failed = Arc::new(AtomicBool::new(false));
        let handle = {
            let input = input.clone();
            let output = output.clone();
            let running = running.clone();
            let failed = failed.clone();
            let stage_name = name.to_string();
            thread::Builder::new().name(name.to_string()).spawn(move || {
                while let Some(item) = input.read() {
                    let processed = match stage.process(item) {
                        Ok(Some(processed)) => processed,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!("{}: dropping frame: {}", stage_name, e);
                            continue;
                        }
                    };
                    match output.swap(processed) {
                        Ok(()) => {}
                        Err(StreamError::Stopped) => {
                            tracing::debug!("{}: output closed", stage_name);
                            break;
                        }
                        Err(e) => {
                            tracing::error!("{}: hand-off failed: {}", stage_name, e);
                            failed.store(true, Ordering::Release);
                            input.stop_writer();
                            on_failure();
                            break;
                        }
                    }
                }
                running.store(false, Ordering::Release);
                tracing::debug!("{} stopped", stage_name);
            })?
        };

        Ok(Self {
            name: name.to_string(),
            input,
            output,
            running,
            failed,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the stage exited because its output rejected a result
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Unblock the thread, join it and re-arm both streams
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.input.stop_reader();
        self.output.stop_writer();
        if handle.join().is_err() {
            tracing::error!("{} panicked", self.name);
        }
        self.input.clear_read_stop();
        self.output.clear_write_stop();
    }
}

impl<I: StreamItem + 'static, O: StreamItem + 'static> Drop for StageRunner<I, O> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl Stage for Doubler {
        type Input = Vec<i32>;
        type Output = Vec<i32>;

        fn process(&mut self, input: Vec<i32>) -> Result<Option<Vec<i32>>, CodecError> {
            if input.is_empty() {
                return Err(CodecError::InvalidFrame("empty".into()));
            }
            Ok(Some(input.into_iter().map(|v| v * 2).collect()))
        }
    }

    #[test]
    fn test_stage_processes_in_order() {
        let input = Arc::new(Stream::new(8));
        let output = Arc::new(Stream::new(8));
        let mut runner = StageRunner::spawn("doubler", Doubler, input.clone(), output.clone()).unwrap();

        input.swap(vec![1, 2]).unwrap();
        input.swap(vec![]).unwrap();
        input.swap(vec![3]).unwrap();

        assert_eq!(output.read(), Some(vec![2, 4]));
        assert_eq!(output.read(), Some(vec![6]));
        assert!(runner.is_running());

        runner.stop();
        assert!(!runner.is_running());
        assert_eq!(runner.name(), "doubler");
    }

    #[test]
    fn test_stop_while_blocked_on_output() {
        let input = Arc::new(Stream::new(8));
        let output = Arc::new(Stream::new(8));
        let mut runner = StageRunner::spawn("doubler", Doubler, input.clone(), output.clone()).unwrap();

        // nobody reads the output, so the second result blocks the stage
        input.swap(vec![1]).unwrap();
        input.swap(vec![2]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        runner.stop();
        assert!(!runner.is_running());
    }

    #[test]
    fn test_oversized_output_is_fatal() {
        let input = Arc::new(Stream::new(8));
        // doubled output fits, but only up to two values
        let output = Arc::new(Stream::new(2));
        let failures = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hook: FailureHook = {
            let failures = failures.clone();
            Arc::new(move || {
                failures.fetch_add(1, Ordering::SeqCst);
            })
        };
        let mut runner =
            StageRunner::spawn_supervised("doubler", Doubler, input.clone(), output.clone(), hook)
                .unwrap();

        input.swap(vec![1, 2, 3]).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while runner.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert!(!runner.is_running());
        assert!(runner.has_failed());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        // upstream writers are released instead of blocking forever
        assert_eq!(input.swap(vec![4]), Err(StreamError::Stopped));
        assert!(output.try_read().is_none());

        runner.stop();
    }

    #[test]
    fn test_stopped_output_is_not_a_failure() {
        let input = Arc::new(Stream::new(8));
        let output = Arc::new(Stream::new(8));
        let mut runner =
            StageRunner::spawn("doubler", Doubler, input.clone(), output.clone()).unwrap();

        output.stop_writer();
        input.swap(vec![1]).unwrap();
        runner.stop();
        assert!(!runner.has_failed());
    }
}
