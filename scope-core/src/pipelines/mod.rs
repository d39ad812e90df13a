//! Built-in [`Pipeline`](crate::pipeline::Pipeline) implementations that
//! require no GPU-backed model, useful for exercising the pipeline
//! manager's lifecycle and the frame processor's worker loop end to end.

mod passthrough;
mod vod;

pub use passthrough::PassthroughPipeline;
pub use vod::VodPipeline;
