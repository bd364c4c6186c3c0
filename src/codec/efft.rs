//! Lossy frequency-domain baseband codec
//!
//! The server transforms the baseband in frames of [`EFFT_FRAME_SIZE`]
//! samples and drops every bin whose magnitude is below `loss_rate` times
//! the noise floor. Dropped bins travel as exact zeros inside an ordinary
//! sample stream frame. Reconstruction refills them with random-phase noise
//! shaped by the noise figure the server sends out of band (dB per bin,
//! stretched over the frame), then runs the inverse transform.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::DecodedFrame;
use crate::dsp::Stage;
use crate::error::CodecError;

/// Transform length in samples
pub const EFFT_FRAME_SIZE: usize = 1024;

/// Reconstruction settings, shared between the session and the stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EfftSettings {
    /// Noise floor in dB per band; empty means no noise fill
    pub noise_figure: Vec<f32>,
    pub noise_multiplier_db: f32,
}

/// Handle used by the session to steer the reconstruction stage
#[derive(Debug, Default)]
pub struct EfftControl {
    settings: Mutex<EfftSettings>,
    generation: AtomicU64,
}

impl EfftControl {
    pub fn new(noise_multiplier_db: f32) -> Self {
        Self {
            settings: Mutex::new(EfftSettings {
                noise_figure: Vec::new(),
                noise_multiplier_db,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Install a new noise figure. The stage drops its partial frame.
    pub fn set_noise_figure(&self, noise_figure: Vec<f32>) {
        tracing::debug!("Noise figure updated: {} bands", noise_figure.len());
        self.settings.lock().noise_figure = noise_figure;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn clear_noise_figure(&self) {
        self.settings.lock().noise_figure.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_noise_multiplier_db(&self, db: f32) {
        self.settings.lock().noise_multiplier_db = db;
    }

    pub fn settings(&self) -> EfftSettings {
        self.settings.lock().clone()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Noise floor of bin `bin` in linear magnitude, from a dB band vector
fn band_floor(noise_figure: &[f32], bin: usize, frame_size: usize, offset_db: f32) -> f32 {
    let band = bin * noise_figure.len() / frame_size;
    10f32.powf((noise_figure[band] + offset_db) / 20.0)
}

/// Rebuilds time-domain samples from transmitted bins
pub struct EfftDecoder {
    ifft: Arc<dyn Fft<f32>>,
    frame_size: usize,
    pending: Vec<Complex32>,
    rng: StdRng,
}

impl EfftDecoder {
    pub fn new() -> Self {
        Self::with_rng(EFFT_FRAME_SIZE, StdRng::from_entropy())
    }

    pub fn with_rng(frame_size: usize, rng: StdRng) -> Self {
        let ifft = FftPlanner::<f32>::new().plan_fft_inverse(frame_size);
        Self {
            ifft,
            frame_size,
            pending: Vec::with_capacity(frame_size),
            rng,
        }
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Consume bins, returning samples for every completed frame
    pub fn decode(&mut self, bins: &[Complex32], settings: &EfftSettings) -> Vec<Complex32> {
        let frames = (self.pending.len() + bins.len()) / self.frame_size;
        let mut out = Vec::with_capacity(frames * self.frame_size);
        let mut input = bins;

        while !input.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];

            if self.pending.len() == self.frame_size {
                let mut frame = std::mem::take(&mut self.pending);
                self.reconstruct(&mut frame, settings);
                out.extend_from_slice(&frame);
                frame.clear();
                self.pending = frame;
            }
        }
        out
    }

    fn reconstruct(&mut self, frame: &mut [Complex32], settings: &EfftSettings) {
        if !settings.noise_figure.is_empty() {
            for (bin, value) in frame.iter_mut().enumerate() {
                if value.re == 0.0 && value.im == 0.0 {
                    let magnitude = band_floor(
                        &settings.noise_figure,
                        bin,
                        self.frame_size,
                        settings.noise_multiplier_db,
                    );
                    let phase = self.rng.gen::<f32>() * TAU;
                    *value = Complex32::from_polar(magnitude, phase);
                }
            }
        }

        self.ifft.process(frame);
        let norm = 1.0 / self.frame_size as f32;
        for value in frame.iter_mut() {
            *value *= norm;
        }
    }
}

impl Default for EfftDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Server side of the codec, used for loopback tests and benches
pub struct EfftEncoder {
    fft: Arc<dyn Fft<f32>>,
    frame_size: usize,
    loss_rate: f32,
    noise_figure: Vec<f32>,
    pending: Vec<Complex32>,
}

impl EfftEncoder {
    pub fn new(loss_rate: f32) -> Self {
        Self::with_frame_size(EFFT_FRAME_SIZE, loss_rate)
    }

    pub fn with_frame_size(frame_size: usize, loss_rate: f32) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(frame_size);
        Self {
            fft,
            frame_size,
            loss_rate,
            noise_figure: Vec::new(),
            pending: Vec::with_capacity(frame_size),
        }
    }

    pub fn set_loss_rate(&mut self, loss_rate: f32) {
        self.loss_rate = loss_rate;
    }

    pub fn set_noise_figure(&mut self, noise_figure: Vec<f32>) {
        self.noise_figure = noise_figure;
    }

    /// Consume samples, returning the kept bins of every completed frame
    pub fn encode(&mut self, samples: &[Complex32]) -> Vec<Complex32> {
        let mut out = Vec::new();
        for &sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_size {
                let mut frame = std::mem::take(&mut self.pending);
                self.fft.process(&mut frame);
                self.drop_bins(&mut frame);
                out.extend_from_slice(&frame);
                frame.clear();
                self.pending = frame;
            }
        }
        out
    }

    fn drop_bins(&self, frame: &mut [Complex32]) {
        if self.loss_rate <= 0.0 {
            return;
        }

        let median = if self.noise_figure.is_empty() {
            let mut magnitudes: Vec<f32> = frame.iter().map(|v| v.norm()).collect();
            magnitudes.sort_by(f32::total_cmp);
            magnitudes[magnitudes.len() / 2]
        } else {
            0.0
        };

        for (bin, value) in frame.iter_mut().enumerate() {
            let floor = if self.noise_figure.is_empty() {
                median
            } else {
                band_floor(&self.noise_figure, bin, self.frame_size, 0.0)
            };
            if value.norm() < self.loss_rate * floor {
                *value = Complex32::new(0.0, 0.0);
            }
        }
    }
}

/// Pipeline stage between the sample stream decoder and the prebuffer.
///
/// Frames tagged as FFT encoded are reconstructed, everything else passes
/// through. A change of encoding or of the noise figure drops the partial
/// frame so the two paths never mix.
pub struct EfftStage {
    decoder: EfftDecoder,
    control: Arc<EfftControl>,
    enabled: bool,
    generation: u64,
}

impl EfftStage {
    pub fn new(control: Arc<EfftControl>) -> Self {
        Self::with_decoder(control, EfftDecoder::new())
    }

    pub fn with_decoder(control: Arc<EfftControl>, decoder: EfftDecoder) -> Self {
        let generation = control.generation();
        Self {
            decoder,
            control,
            enabled: false,
            generation,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Stage for EfftStage {
    type Input = DecodedFrame;
    type Output = Vec<Complex32>;

    fn process(&mut self, frame: DecodedFrame) -> Result<Option<Vec<Complex32>>, CodecError> {
        let enabled = frame.encoding.uses_fft_stage();
        if enabled != self.enabled {
            tracing::debug!("FFT reconstruction {}", if enabled { "enabled" } else { "disabled" });
            self.enabled = enabled;
            self.decoder.reset();
        }

        let generation = self.control.generation();
        if generation != self.generation {
            self.generation = generation;
            self.decoder.reset();
        }

        if !enabled {
            return Ok(Some(frame.samples));
        }

        let settings = self.control.settings();
        let samples = self.decoder.decode(&frame.samples, &settings);
        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(samples))
    }
}
