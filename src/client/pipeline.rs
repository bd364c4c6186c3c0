//! Receive-side DSP chain
//!
//! ```text
//! worker ──▶ input: Stream<BasebandFrame>
//!              └─▶ SampleStreamDecoder ──▶ Stream<DecodedFrame>
//!                    └─▶ EfftStage ──▶ SampleStream
//!                          └─▶ PrebufferStage ──▶ consumer output
//! ```

use rustfft::num_complex::Complex32;
use std::sync::Arc;

use crate::codec::baseband::MAX_FRAME_LEN;
use crate::codec::efft::EFFT_FRAME_SIZE;
use crate::codec::sample_stream::MAX_FRAME_SAMPLES;
use crate::codec::{BasebandFrame, DecodedFrame, EfftControl, EfftStage, SampleStreamDecoder};
use crate::dsp::{
    FailureHook, Prebuffer, PrebufferHandle, PrebufferStage, SampleStream, StageRunner, Stream,
};

/// Largest FFT stage output: one maximal frame plus a carried partial frame
const MAX_RECONSTRUCTED_SAMPLES: usize = MAX_FRAME_SAMPLES + EFFT_FRAME_SIZE;

pub struct Pipeline {
    input: Arc<Stream<BasebandFrame>>,
    decoder: StageRunner<BasebandFrame, DecodedFrame>,
    efft: StageRunner<DecodedFrame, Vec<Complex32>>,
    prebuffer: PrebufferStage,
}

impl Pipeline {
    /// Start every stage. `on_failure` runs when a stage cannot hand off
    /// its output; the pipeline input is stopped first so a blocked writer
    /// is released.
    pub fn spawn(
        prebuffer: Prebuffer,
        efft_control: Arc<EfftControl>,
        output: Arc<SampleStream>,
        on_failure: FailureHook,
    ) -> std::io::Result<Self> {
        let input = Arc::new(Stream::new(MAX_FRAME_LEN));
        let decoded = Arc::new(Stream::new(MAX_FRAME_SAMPLES));
        let reconstructed = Arc::new(SampleStream::new(MAX_RECONSTRUCTED_SAMPLES));

        let on_failure: FailureHook = {
            let input = input.clone();
            Arc::new(move || {
                input.stop_writer();
                on_failure();
            })
        };
        let decoder = StageRunner::spawn_supervised(
            "sample-decoder",
            SampleStreamDecoder::new(),
            input.clone(),
            decoded.clone(),
            on_failure.clone(),
        )?;
        let efft = StageRunner::spawn_supervised(
            "efft-decoder",
            EfftStage::new(efft_control),
            decoded,
            reconstructed.clone(),
            on_failure,
        )?;
        let prebuffer = PrebufferStage::spawn(prebuffer, reconstructed, output)?;

        Ok(Self {
            input,
            decoder,
            efft,
            prebuffer,
        })
    }

    /// Where the worker publishes decompressed frames
    pub fn input(&self) -> Arc<Stream<BasebandFrame>> {
        self.input.clone()
    }

    pub fn prebuffer(&self) -> PrebufferHandle {
        self.prebuffer.handle()
    }

    /// Stop every stage, upstream first
    pub fn stop(&mut self) {
        self.decoder.stop();
        self.efft.stop();
        self.prebuffer.stop();
    }
}
