//! Core data types shared across the media and inference-dispatch plane.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a session.
pub type SessionId = uuid::Uuid;

/// A value carried in a [`ParameterBag`]. Parameters arrive as JSON over
/// both the data channel and the HTTP control plane, so the in-process
/// representation reuses `serde_json::Value` directly instead of a second
/// typed enum.
pub type ParamValue = Value;

/// A mapping from parameter name to value. Recognized names are enumerated
/// per pipeline; unknown names are forwarded unchanged.
pub type ParameterBag = HashMap<String, ParamValue>;

/// Parameter key controlling pause state. Consumed by the frame processor
/// before any prepare/process call is made; never forwarded downstream.
pub const PAUSED_KEY: &str = "paused";

/// Parameter key forcing a re-`prepare` on the next tick. Consumed by the
/// frame processor before any prepare/process call is made; never forwarded
/// downstream.
pub const RESET_CACHE_KEY: &str = "reset_cache";

/// Parameter keys consumed by the frame processor before any prepare/process
/// call is made. Never forwarded to `prepare` or `process`.
pub const RESERVED_PROCESSOR_KEYS: &[&str] = &[PAUSED_KEY, RESET_CACHE_KEY];

/// Parameter keys consumed by `prepare` and never forwarded to `process`.
pub const PREPARE_ONLY_KEYS: &[&str] = &["manage_cache", "prompt_interpolation_method"];

/// A single decoded RGB8 video frame, the unit exchanged between the ingress
/// track, the frame buffer, the pipeline, and the egress track.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw RGB8 pixel data, row-major, `data.len() == width * height * 3`.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp, media-clock units as stamped by the egress track.
    pub pts: i64,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Self {
            data,
            width,
            height,
            pts: 0,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Declaration by a pipeline of how many input frames the next `process`
/// call expects. `None`/absent from `prepare`'s return means the pipeline
/// is purely generative and needs no input this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    pub input_size: usize,
}

impl Requirements {
    pub fn new(input_size: usize) -> Self {
        Self { input_size }
    }
}

/// Backward notification sent from the server to the client over the data
/// channel when the frame processor stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    StreamStopped {
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

/// Initial parameters accepted on a WebRTC offer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitialParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denoising_step_list: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_cache: Option<bool>,
}

impl InitialParameters {
    /// Flatten into a [`ParameterBag`], dropping absent fields, for handoff
    /// to the frame processor's initial parameters.
    pub fn into_bag(self) -> ParameterBag {
        let mut bag = ParameterBag::new();
        macro_rules! insert {
            ($key:literal, $val:expr) => {
                if let Some(v) = $val {
                    bag.insert($key.to_string(), serde_json::to_value(v).unwrap());
                }
            };
        }
        insert!("prompts", self.prompts);
        insert!("noise_scale", self.noise_scale);
        insert!("noise_controller", self.noise_controller);
        insert!("denoising_step_list", self.denoising_step_list);
        insert!("manage_cache", self.manage_cache);
        insert!("reset_cache", self.reset_cache);
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_frame_byte_len_matches_dimensions() {
        let frame = VideoFrame::new(vec![0u8; 512 * 512 * 3], 512, 512);
        assert_eq!(frame.byte_len(), 512 * 512 * 3);
    }

    #[test]
    fn initial_parameters_into_bag_drops_absent_fields() {
        let params = InitialParameters {
            noise_scale: Some(0.4),
            reset_cache: Some(true),
            ..Default::default()
        };
        let bag = params.into_bag();
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.get("noise_scale").unwrap(), &serde_json::json!(0.4));
        assert_eq!(bag.get("reset_cache").unwrap(), &serde_json::json!(true));
        assert!(!bag.contains_key("prompts"));
    }
}
