//! A pipeline that echoes its input chunk back unchanged. Useful for
//! exercising the frame processor without a real model.

use crate::error::{Result, ScopeError};
use crate::pipeline::{FrameChunk, Pipeline};
use crate::types::{ParameterBag, Requirements};

const CHUNK_SIZE: usize = 4;

pub struct PassthroughPipeline {
    width: u32,
    height: u32,
}

impl PassthroughPipeline {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Pipeline for PassthroughPipeline {
    fn prepare(&mut self, _should_prepare: bool, _params: &ParameterBag) -> Result<Option<Requirements>> {
        Ok(Some(Requirements::new(CHUNK_SIZE)))
    }

    fn process(&mut self, input: Option<FrameChunk>, _params: &ParameterBag) -> Result<FrameChunk> {
        input.ok_or_else(|| ScopeError::transient("passthrough pipeline requires input"))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VideoFrame;

    #[test]
    fn passthrough_requires_chunk_of_four() {
        let mut pipeline = PassthroughPipeline::new(512, 512);
        let reqs = pipeline.prepare(false, &ParameterBag::new()).unwrap().unwrap();
        assert_eq!(reqs.input_size, CHUNK_SIZE);
    }

    #[test]
    fn passthrough_echoes_input() {
        let mut pipeline = PassthroughPipeline::new(512, 512);
        let input = vec![VideoFrame::new(vec![1u8; 512 * 512 * 3], 512, 512)];
        let output = pipeline.process(Some(input.clone()), &ParameterBag::new()).unwrap();
        assert_eq!(output.len(), input.len());
        assert_eq!(output[0].data, input[0].data);
    }

    #[test]
    fn passthrough_errors_without_input() {
        let mut pipeline = PassthroughPipeline::new(512, 512);
        assert!(pipeline.process(None, &ParameterBag::new()).is_err());
    }
}
