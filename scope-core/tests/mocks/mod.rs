//! Fake `transport` implementations for end-to-end scenario tests: stand in
//! for real WebRTC hardware with deterministic, in-memory fakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scope_core::error::Result;
use scope_core::transport::{ConnectionState, DataChannel, LocalVideoTrack, PeerConnection, PeerConnectionFactory, RemoteVideoTrack};
use scope_core::types::VideoFrame;

type StateCallback = Box<dyn Fn(ConnectionState) + Send + Sync>;
type TrackCallback = Box<dyn Fn(Arc<dyn RemoteVideoTrack>) + Send + Sync>;
type DataChannelCallback = Box<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>;

/// Records every frame/timestamp handed to `LocalVideoTrack::send`, shared
/// between the test and the fake peer connection that owns the track.
pub struct FrameLog {
    pub sent: Mutex<Vec<(Vec<u8>, u64)>>,
}

impl FrameLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()) })
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_n(&self, n: usize) -> Vec<Vec<u8>> {
        let sent = self.sent.lock().unwrap();
        sent.iter().rev().take(n).map(|(d, _)| d.clone()).collect()
    }
}

pub struct RecordingLocalTrack {
    log: Arc<FrameLog>,
}

#[async_trait]
impl LocalVideoTrack for RecordingLocalTrack {
    async fn send(&self, frame: &VideoFrame, timestamp: u64) -> Result<()> {
        self.log.sent.lock().unwrap().push((frame.data.clone(), timestamp));
        Ok(())
    }
}

/// A fake peer connection whose outbound track writes into a shared [`FrameLog`]
/// the test can inspect, and whose inbound "remote track" is a finite,
/// never-producing stub (these scenarios drive output via a generative pipeline,
/// not real ingress).
pub struct FakePeerConnection {
    pub log: Arc<FrameLog>,
    state: Mutex<ConnectionState>,
    state_callback: Mutex<Option<StateCallback>>,
    track_callback: Mutex<Option<TrackCallback>>,
    data_channel_callback: Mutex<Option<DataChannelCallback>>,
}

impl FakePeerConnection {
    pub fn new(log: Arc<FrameLog>) -> Self {
        Self {
            log,
            state: Mutex::new(ConnectionState::New),
            state_callback: Mutex::new(None),
            track_callback: Mutex::new(None),
            data_channel_callback: Mutex::new(None),
        }
    }

    /// Simulate the signaling layer handing the session its data channel.
    pub fn attach_data_channel(&self, dc: Arc<dyn DataChannel>) {
        if let Some(cb) = self.data_channel_callback.lock().unwrap().as_ref() {
            cb(dc);
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn set_remote_description(&self, _sdp: &str) -> Result<()> {
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        Ok("v=0 answer".to_string())
    }

    async fn add_local_video_track(&self) -> Result<Box<dyn LocalVideoTrack>> {
        Ok(Box::new(RecordingLocalTrack { log: Arc::clone(&self.log) }))
    }

    async fn close(&self) -> Result<()> {
        *self.state.lock().unwrap() = ConnectionState::Closed;
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn on_state_change(&self, callback: Box<dyn Fn(ConnectionState) + Send + Sync>) {
        *self.state_callback.lock().unwrap() = Some(callback);
    }

    fn on_remote_track(&self, callback: Box<dyn Fn(Arc<dyn RemoteVideoTrack>) + Send + Sync>) {
        *self.track_callback.lock().unwrap() = Some(callback);
    }

    fn on_data_channel(&self, callback: Box<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>) {
        *self.data_channel_callback.lock().unwrap() = Some(callback);
    }
}

pub struct FakeFactory {
    pub log: Arc<FrameLog>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self { log: FrameLog::new() }
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(&self) -> Result<Arc<dyn PeerConnection>> {
        Ok(Arc::new(FakePeerConnection::new(Arc::clone(&self.log))))
    }
}

/// A fake data channel the test drives directly: `push_message` simulates an
/// inbound client message, `open()` simulates the channel transitioning to
/// `open` and fires the registered `on_open` handler.
pub struct FakeDataChannel {
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
    message_callback: Mutex<Option<Box<dyn Fn(String) + Send + Sync>>>,
    open_callback: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl FakeDataChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            message_callback: Mutex::new(None),
            open_callback: Mutex::new(None),
        })
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        if let Some(cb) = self.open_callback.lock().unwrap().as_ref() {
            cb();
        }
    }

    pub fn push_message(&self, text: &str) {
        if let Some(cb) = self.message_callback.lock().unwrap().as_ref() {
            cb(text.to_string());
        }
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannel for FakeDataChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, message: String) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn on_open(&self, callback: Box<dyn Fn() + Send + Sync>) {
        *self.open_callback.lock().unwrap() = Some(callback);
    }

    fn on_message(&self, callback: Box<dyn Fn(String) + Send + Sync>) {
        *self.message_callback.lock().unwrap() = Some(callback);
    }
}
