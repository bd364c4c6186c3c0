//! Transmit back-channel thread
//!
//! Reads local transmit audio, collects [`TX_SEND_BUFFER_SAMPLES`], resamples
//! each chunk down to the wire rate and sends it as TRANSMIT_DATA. When the
//! input ends the residue is flushed and a zero-length chunk tells the
//! server the stream is over. The thread is owned and joined by its
//! transmitter.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use rustfft::num_complex::Complex32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::constants::{TX_LOCAL_SAMPLERATE, TX_SEND_BUFFER_SAMPLES, TX_WIRE_SAMPLERATE};
use crate::dsp::SampleStream;
use crate::error::CodecError;
use crate::network::PacketSender;
use crate::protocol::PacketType;
use crate::transmit::quantize::quantize_chunk;

/// Sinc resampler treating I and Q as two channels
pub struct TxResampler {
    inner: SincFixedIn<f32>,
}

impl TxResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self, CodecError> {
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            params,
            chunk_size,
            2,
        )
        .map_err(|e| CodecError::Resampler(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Resample one full chunk
    pub fn process(&mut self, chunk: &[Complex32]) -> Result<Vec<Complex32>, CodecError> {
        let waves_in = split(chunk);
        let waves_out = self
            .inner
            .process(&waves_in, None)
            .map_err(|e| CodecError::Resampler(e.to_string()))?;
        Ok(join(&waves_out))
    }

    /// Resample a final chunk shorter than the configured size
    pub fn process_partial(&mut self, chunk: &[Complex32]) -> Result<Vec<Complex32>, CodecError> {
        let waves_in = split(chunk);
        let waves_out = self
            .inner
            .process_partial(Some(waves_in.as_slice()), None)
            .map_err(|e| CodecError::Resampler(e.to_string()))?;
        Ok(join(&waves_out))
    }

    pub fn input_frames_next(&self) -> usize {
        self.inner.input_frames_next()
    }
}

fn split(chunk: &[Complex32]) -> Vec<Vec<f32>> {
    vec![
        chunk.iter().map(|s| s.re).collect(),
        chunk.iter().map(|s| s.im).collect(),
    ]
}

fn join(waves: &[Vec<f32>]) -> Vec<Complex32> {
    match waves {
        [re, im] => re
            .iter()
            .zip(im)
            .map(|(&re, &im)| Complex32::new(re, im))
            .collect(),
        _ => Vec::new(),
    }
}

/// Statistics for the back-channel
#[derive(Debug, Default)]
pub struct BackChannelStats {
    pub samples_read: AtomicU64,
    pub chunks_sent: AtomicU64,
}

pub struct BackChannel {
    input: Arc<SampleStream>,
    alive: Arc<AtomicBool>,
    stats: Arc<BackChannelStats>,
    handle: Option<JoinHandle<()>>,
}

impl BackChannel {
    /// Start the thread. It keeps running while `alive` is set and the
    /// input stream delivers.
    pub fn spawn(
        sender: Arc<PacketSender>,
        input: Arc<SampleStream>,
        alive: Arc<AtomicBool>,
    ) -> crate::Result<Self> {
        let resampler =
            TxResampler::new(TX_LOCAL_SAMPLERATE, TX_WIRE_SAMPLERATE, TX_SEND_BUFFER_SAMPLES)?;
        let stats = Arc::new(BackChannelStats::default());

        let handle = {
            let input = input.clone();
            let alive = alive.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name("tx-back-channel".into())
                .spawn(move || Self::run(resampler, &sender, &input, &alive, &stats))?
        };

        tracing::info!(
            "Transmit stream started: {} Hz -> {} Hz",
            TX_LOCAL_SAMPLERATE,
            TX_WIRE_SAMPLERATE
        );
        Ok(Self {
            input,
            alive,
            stats,
            handle: Some(handle),
        })
    }

    fn run(
        mut resampler: TxResampler,
        sender: &PacketSender,
        input: &SampleStream,
        alive: &AtomicBool,
        stats: &BackChannelStats,
    ) {
        let mut buffer: Vec<Complex32> = Vec::with_capacity(TX_SEND_BUFFER_SAMPLES);

        while let Some(samples) = input.read() {
            if !alive.load(Ordering::Acquire) {
                return;
            }
            stats
                .samples_read
                .fetch_add(samples.len() as u64, Ordering::Relaxed);

            for sample in samples {
                buffer.push(sample);
                if buffer.len() == TX_SEND_BUFFER_SAMPLES {
                    let resampled = match resampler.process(&buffer) {
                        Ok(resampled) => resampled,
                        Err(e) => {
                            tracing::error!("Transmit resampling failed: {}", e);
                            return;
                        }
                    };
                    buffer.clear();
                    tracing::trace!("Sending {} transmit samples", resampled.len());
                    if !Self::send_chunk(sender, &resampled, stats) {
                        return;
                    }
                }
            }
        }

        if !alive.load(Ordering::Acquire) {
            return;
        }
        tracing::info!("Transmit stream ended");
        if !buffer.is_empty() {
            match resampler.process_partial(&buffer) {
                Ok(resampled) => {
                    Self::send_chunk(sender, &resampled, stats);
                }
                Err(e) => tracing::warn!("Dropping transmit residue: {}", e),
            }
        }
        Self::send_chunk(sender, &[], stats);
    }

    fn send_chunk(sender: &PacketSender, samples: &[Complex32], stats: &BackChannelStats) -> bool {
        let payload = quantize_chunk(samples).encode();
        match sender.send(PacketType::TransmitData, &payload) {
            Ok(()) => {
                stats.chunks_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::debug!("Transmit stream stopped: {}", e);
                false
            }
        }
    }

    pub fn chunks_sent(&self) -> u64 {
        self.stats.chunks_sent.load(Ordering::Relaxed)
    }

    pub fn samples_read(&self) -> u64 {
        self.stats.samples_read.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop reading, join the thread and re-arm the input stream
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.alive.store(false, Ordering::Release);
        self.input.stop_reader();
        if handle.join().is_err() {
            tracing::error!("Transmit thread panicked");
        }
        self.input.clear_read_stop();
    }
}

impl Drop for BackChannel {
    fn drop(&mut self) {
        self.stop();
    }
}
