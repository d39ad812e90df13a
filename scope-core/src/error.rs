//! Error types for scope-core

use thiserror::Error;

/// Result type alias using [`ScopeError`]
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Main error type for scope-core operations
#[derive(Debug, Error)]
pub enum ScopeError {
    /// An operation was attempted in a state that does not permit it,
    /// e.g. an offer arriving while no pipeline is loaded.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The pipeline manager is not in the `Loaded` state.
    #[error("pipeline not available")]
    PipelineNotAvailable,

    /// A recoverable pipeline error; the worker logs and continues.
    #[error("transient pipeline error: {0}")]
    Transient(String),

    /// A non-recoverable pipeline error; the worker stops.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Malformed data channel message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Pipeline failed to instantiate.
    #[error("failed to load pipeline {pipeline_id}: {message}")]
    LoadFailure {
        pipeline_id: String,
        message: String,
    },

    /// The remote peer connection / SDP negotiation failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Generic error with added context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ScopeError>,
    },
}

impl ScopeError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Is this error non-recoverable from the frame processor's point of view? Only
    /// resource exhaustion is fatal per spec; everything else is logged and the
    /// worker continues. Extend this set deliberately, not by default.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScopeError::ResourceExhausted(_))
    }

    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}
