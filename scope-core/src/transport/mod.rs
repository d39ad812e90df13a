//! Abstractions over the WebRTC collaborator. spec.md treats the WebRTC stack as
//! an external collaborator providing tracks, a data channel, and SDP
//! offer/answer — scope-core names none of it directly. Concrete implementations
//! (backed by the `webrtc` crate) live in `scope-server::webrtc_adapter`; this
//! crate only sees these traits, which keeps the media/inference-dispatch plane
//! testable with fakes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::VideoFrame;

/// A remote inbound video track: the ingress pull loop's sole dependency.
#[async_trait]
pub trait RemoteVideoTrack: Send + Sync {
    /// Pull the next frame. Returns `Err` on a fatal receive error (the ingress loop
    /// stops after the first one; spec §4.4: "a one-shot; avoids error spam on
    /// teardown").
    async fn receive(&self) -> Result<VideoFrame>;
}

/// A local outbound video track: the egress pacing loop's sole dependency.
#[async_trait]
pub trait LocalVideoTrack: Send + Sync {
    /// Stamp `frame` with the given media-clock timestamp and write it to
    /// the remote peer.
    async fn send(&self, frame: &VideoFrame, timestamp: u64) -> Result<()>;
}

/// A signaling/control data channel.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Is the channel currently open and ready to send?
    fn is_open(&self) -> bool;

    /// Send a UTF-8 text message (JSON, by convention of the protocol
    /// spoken over this channel).
    async fn send_text(&self, message: String) -> Result<()>;

    /// Register a listener invoked once the channel transitions to `open`. The data
    /// channel the session binds via [`PeerConnection::on_data_channel`] typically
    /// arrives before it is actually open; this is the session's cue to retry
    /// flushing anything the notification sender buffered meanwhile.
    fn on_open(&self, callback: Box<dyn Fn() + Send + Sync>);

    /// Register a listener invoked for every inbound text message.
    fn on_message(&self, callback: Box<dyn Fn(String) + Send + Sync>);
}

/// Connection-level lifecycle states a peer connection transitions through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// A single peer connection: the session's handle onto the remote browser.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Apply the offer's SDP as the remote description.
    async fn set_remote_description(&self, sdp: &str) -> Result<()>;

    /// Create and apply a local answer, returning its SDP.
    async fn create_answer(&self) -> Result<String>;

    /// Install a local video track for sending frames to the remote peer.
    async fn add_local_video_track(&self) -> Result<Box<dyn LocalVideoTrack>>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<()>;

    fn connection_state(&self) -> ConnectionState;

    /// Register a listener invoked on every connection-state transition.
    fn on_state_change(&self, callback: Box<dyn Fn(ConnectionState) + Send + Sync>);

    /// Register a listener invoked once a remote video track arrives.
    fn on_remote_track(&self, callback: Box<dyn Fn(Arc<dyn RemoteVideoTrack>) + Send + Sync>);

    /// Register a listener invoked once the peer's data channel arrives.
    fn on_data_channel(&self, callback: Box<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>);
}

/// Constructs peer connections configured with the process's ICE/TURN servers.
/// Abstracts "create a peer connection" so scope-core never names the `webrtc`
/// crate.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self) -> Result<std::sync::Arc<dyn PeerConnection>>;
}
