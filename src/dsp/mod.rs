//! Sample pipeline plumbing: streams, threaded stages and the prebuffer

pub mod block;
pub mod prebuffer;
pub mod stream;

pub use block::{FailureHook, Stage, StageRunner};
pub use prebuffer::{Prebuffer, PrebufferHandle, PrebufferStage, PrebufferStats};
pub use stream::{SampleStream, Stream, StreamItem};

/// Complex baseband sample
pub use rustfft::num_complex::Complex32 as Sample;
