//! The abstract pipeline contract (C1).
//!
//! A pipeline is an opaque ML inference object. scope-core never names a
//! concrete model; it only calls `prepare`/`process` through this trait.

use crate::error::Result;
use crate::types::{ParameterBag, Requirements, VideoFrame};

/// A chunk of frames passed to or returned from one [`Pipeline::process`] call.
pub type FrameChunk = Vec<VideoFrame>;

/// An opaque, non-thread-safe inference pipeline.
///
/// The frame processor worker thread is the sole caller of any given
/// instance; implementations are not required to be `Sync`.
pub trait Pipeline: Send {
    /// Reinitialize internal state (caches, blended embeddings, denoising
    /// schedule) when `should_prepare` is true, consuming prepare-only keys
    /// from `params` (`manage_cache`, `prompt_interpolation_method`) — these
    /// must not be forwarded to [`Pipeline::process`].
    ///
    /// Returns the input chunk size the next `process` call expects, or
    /// `None` when the pipeline is purely generative this tick. Must be
    /// idempotent when `should_prepare` is false and no recognized
    /// parameter changed.
    fn prepare(&mut self, should_prepare: bool, params: &ParameterBag) -> Result<Option<Requirements>>;

    /// Run one inference step.
    ///
    /// `input` is `None`, or a chunk of exactly the `input_size` advertised
    /// by the preceding `prepare` call. Returns one or more output frames.
    fn process(&mut self, input: Option<FrameChunk>, params: &ParameterBag) -> Result<FrameChunk>;

    /// Frame dimensions this pipeline was loaded for (fixed for its lifetime).
    fn frame_size(&self) -> (u32, u32);
}

/// Trivial pipelines shared by this crate's own unit tests and, under the
/// `test-util` feature, by scope-server's tests and this crate's `tests/`
/// integration tests (both sit outside the `#[cfg(test)]` boundary).
#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;

    /// A trivial pipeline usable in unit tests across modules: echoes its
    /// input back unchanged, or emits a single solid frame when generative.
    pub struct EchoPipeline {
        pub width: u32,
        pub height: u32,
        pub input_size: Option<usize>,
        pub prepare_calls: usize,
        pub process_calls: usize,
    }

    impl EchoPipeline {
        pub fn new(width: u32, height: u32, input_size: Option<usize>) -> Self {
            Self {
                width,
                height,
                input_size,
                prepare_calls: 0,
                process_calls: 0,
            }
        }
    }

    impl Pipeline for EchoPipeline {
        fn prepare(&mut self, _should_prepare: bool, _params: &ParameterBag) -> Result<Option<Requirements>> {
            self.prepare_calls += 1;
            Ok(self.input_size.map(Requirements::new))
        }

        fn process(&mut self, input: Option<FrameChunk>, _params: &ParameterBag) -> Result<FrameChunk> {
            self.process_calls += 1;
            match input {
                Some(frames) => Ok(frames),
                None => Ok(vec![VideoFrame::new(
                    vec![0u8; (self.width * self.height * 3) as usize],
                    self.width,
                    self.height,
                )]),
            }
        }

        fn frame_size(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }
}
