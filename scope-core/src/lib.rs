//! Scope Core Library
//!
//! The media and inference-dispatch plane for Scope, a real-time
//! interactive video generation server.
//!
//! This library provides:
//! - A pipeline contract abstracting real-time generative video models
//! - A frame processor worker that buffers ingress, drives the pipeline at a
//!   steady cadence, and tracks effective FPS
//! - A session type binding one peer connection's ingress, egress, and
//!   control-channel notifications together
//! - A session manager implementing the offer/answer handshake and registry
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────────┐
//! │ Ingress Loop │───▶│ Frame Processor  │───▶│ Egress Track │
//! │ (remote pull)│    │ (pipeline worker)│    │ (pacing/send)│
//! └──────────────┘    └──────────────────┘    └──────────────┘
//!         ▲                     │                     │
//!         │                     ▼                     ▼
//!   transport::RemoteVideoTrack   PipelineManager   transport::LocalVideoTrack
//! ```
//!
//! Concrete WebRTC peer connections, data channels, and tracks are supplied
//! by a collaborator implementing the [`transport`] traits; this crate never
//! names the underlying WebRTC stack.

pub mod config;
pub mod egress;
pub mod error;
pub mod frame_processor;
pub mod ingress;
pub mod notification;
pub mod pipeline;
pub mod pipeline_manager;
pub mod pipelines;
pub mod session;
pub mod session_manager;
pub mod transport;
pub mod types;

pub use config::Config;
pub use egress::EgressTrack;
pub use error::{Result, ScopeError};
pub use frame_processor::FrameProcessor;
pub use ingress::IngressLoop;
pub use notification::NotificationSender;
pub use pipeline::{FrameChunk, Pipeline};
pub use pipeline_manager::{PipelineManager, PipelineStatus};
pub use session::Session;
pub use session_manager::{Answer, OfferRequest, SessionManager};
pub use types::{Notification, ParamValue, ParameterBag, Requirements, SessionId, VideoFrame};
