//! A purely generative pipeline that replays a small looping frame set at a
//! fixed output rate. Needs no ingress input (`prepare` returns `None`),
//! useful for exercising the pipeline manager's reload-on-different-config
//! path without a GPU-backed model or a bundled video asset.

use std::time::Duration;

use crate::error::Result;
use crate::pipeline::{FrameChunk, Pipeline};
use crate::types::{ParameterBag, Requirements, VideoFrame};

pub struct VodPipeline {
    width: u32,
    height: u32,
    output_fps: u32,
    frame_index: u64,
    /// Looping palette standing in for decoded video frames.
    palette: Vec<[u8; 3]>,
}

impl VodPipeline {
    pub fn new(width: u32, height: u32, output_fps: u32) -> Self {
        Self {
            width,
            height,
            output_fps: output_fps.max(1),
            frame_index: 0,
            palette: vec![[40, 40, 40], [80, 80, 80], [120, 120, 120], [160, 160, 160]],
        }
    }

    fn next_frame(&mut self) -> VideoFrame {
        let color = self.palette[(self.frame_index as usize) % self.palette.len()];
        self.frame_index += 1;
        let mut data = vec![0u8; (self.width * self.height * 3) as usize];
        for px in data.chunks_exact_mut(3) {
            px.copy_from_slice(&color);
        }
        VideoFrame::new(data, self.width, self.height)
    }
}

impl Pipeline for VodPipeline {
    fn prepare(&mut self, _should_prepare: bool, _params: &ParameterBag) -> Result<Option<Requirements>> {
        Ok(None)
    }

    fn process(&mut self, _input: Option<FrameChunk>, _params: &ParameterBag) -> Result<FrameChunk> {
        std::thread::sleep(Duration::from_secs_f64(1.0 / self.output_fps as f64));
        Ok(vec![self.next_frame()])
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
