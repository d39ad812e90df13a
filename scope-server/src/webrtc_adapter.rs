//! Concrete `scope_core::transport` implementations backed by the `webrtc`
//! crate. Pixel codec selection (VP8/H264 encode of the raw RGB frames
//! scope-core's pipelines produce) is explicitly a non-goal of the core; this
//! adapter hands raw frame bytes to `TrackLocalStaticSample` as the sample
//! payload and leaves real encode/decode as the integration point a deployed
//! build wires in (see DESIGN.md).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use scope_core::error::{Result, ScopeError};
use scope_core::transport::{ConnectionState, DataChannel, LocalVideoTrack, PeerConnection, PeerConnectionFactory, RemoteVideoTrack};
use scope_core::types::VideoFrame;

fn map_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

/// Builds an `API` plus an `RTCConfiguration` once at startup, then stamps out a
/// fresh peer connection per offer.
pub struct WebRtcPeerConnectionFactory {
    api: API,
    rtc_config: RTCConfiguration,
    /// Dimensions stamped on frames decoded from a remote track; real negotiation of
    /// the inbound resolution is out of scope.
    default_frame_width: u32,
    default_frame_height: u32,
}

impl WebRtcPeerConnectionFactory {
    pub fn new(ice_servers: Vec<String>) -> Result<Self> {
        Self::with_frame_size(ice_servers, 512, 512)
    }

    pub fn with_frame_size(ice_servers: Vec<String>, width: u32, height: u32) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| ScopeError::transport(format!("failed to register codecs: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| ScopeError::transport(format!("failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .into_iter()
                .map(|url| RTCIceServer { urls: vec![url], ..Default::default() })
                .collect(),
            ..Default::default()
        };

        Ok(Self {
            api,
            rtc_config,
            default_frame_width: width,
            default_frame_height: height,
        })
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn PeerConnection>> {
        let inner = self
            .api
            .new_peer_connection(self.rtc_config.clone())
            .await
            .map_err(|e| ScopeError::transport(format!("failed to create peer connection: {e}")))?;
        let inner = Arc::new(inner);

        let state = Arc::new(Mutex::new(ConnectionState::New));
        let state_callback: Arc<Mutex<Option<Box<dyn Fn(ConnectionState) + Send + Sync>>>> =
            Arc::new(Mutex::new(None));
        let track_callback: Arc<Mutex<Option<Box<dyn Fn(Arc<dyn RemoteVideoTrack>) + Send + Sync>>>> =
            Arc::new(Mutex::new(None));
        let data_channel_callback: Arc<Mutex<Option<Box<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>>>> =
            Arc::new(Mutex::new(None));

        let state_for_cb = Arc::clone(&state);
        let state_cb_for_cb = Arc::clone(&state_callback);
        inner.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            info!(?s, "peer connection state changed");
            let mapped = map_state(s);
            *state_for_cb.lock() = mapped;
            if let Some(cb) = state_cb_for_cb.lock().as_ref() {
                cb(mapped);
            }
            Box::pin(async {})
        }));

        let width = self.default_frame_width;
        let height = self.default_frame_height;
        let track_cb_for_cb = Arc::clone(&track_callback);
        inner.on_track(Box::new(move |track, _receiver, _transceiver| {
            info!(track_id = %track.id(), kind = ?track.kind(), "remote track arrived");
            if let Some(cb) = track_cb_for_cb.lock().as_ref() {
                let remote: Arc<dyn RemoteVideoTrack> = Arc::new(WebRtcRemoteTrack::new(track, width, height));
                cb(remote);
            }
            Box::pin(async {})
        }));

        let dc_cb_for_cb = Arc::clone(&data_channel_callback);
        inner.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            info!(label = %dc.label(), "data channel arrived");
            if let Some(cb) = dc_cb_for_cb.lock().as_ref() {
                let channel: Arc<dyn DataChannel> = Arc::new(WebRtcDataChannel::new(dc));
                cb(channel);
            }
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeerConnection {
            inner,
            state,
            state_callback,
            track_callback,
            data_channel_callback,
        }))
    }
}

pub struct WebRtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
    state: Arc<Mutex<ConnectionState>>,
    state_callback: Arc<Mutex<Option<Box<dyn Fn(ConnectionState) + Send + Sync>>>>,
    track_callback: Arc<Mutex<Option<Box<dyn Fn(Arc<dyn RemoteVideoTrack>) + Send + Sync>>>>,
    data_channel_callback: Arc<Mutex<Option<Box<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>>>>,
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn set_remote_description(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| ScopeError::transport(format!("invalid SDP offer: {e}")))?;
        self.inner
            .set_remote_description(offer)
            .await
            .map_err(|e| ScopeError::transport(format!("failed to set remote description: {e}")))
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .inner
            .create_answer(None)
            .await
            .map_err(|e| ScopeError::transport(format!("failed to create answer: {e}")))?;
        self.inner
            .set_local_description(answer.clone())
            .await
            .map_err(|e| ScopeError::transport(format!("failed to set local description: {e}")))?;
        Ok(answer.sdp)
    }

    async fn add_local_video_track(&self) -> Result<Box<dyn LocalVideoTrack>> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                ..Default::default()
            },
            "video".to_string(),
            "scope-video".to_string(),
        ));

        let rtp_sender = self
            .inner
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| ScopeError::transport(format!("failed to add video track: {e}")))?;

        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(Box::new(WebRtcLocalTrack {
            track,
            last_timestamp: AtomicU64::new(0),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| ScopeError::transport(format!("failed to close connection: {e}")))
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn on_state_change(&self, callback: Box<dyn Fn(ConnectionState) + Send + Sync>) {
        *self.state_callback.lock() = Some(callback);
    }

    fn on_remote_track(&self, callback: Box<dyn Fn(Arc<dyn RemoteVideoTrack>) + Send + Sync>) {
        *self.track_callback.lock() = Some(callback);
    }

    fn on_data_channel(&self, callback: Box<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>) {
        *self.data_channel_callback.lock() = Some(callback);
    }
}

/// Sends raw frame bytes as the sample payload; the duration between consecutive
/// samples is derived from the RTP-clock timestamp delta the egress track
/// computed.
pub struct WebRtcLocalTrack {
    track: Arc<TrackLocalStaticSample>,
    last_timestamp: AtomicU64,
}

#[async_trait]
impl LocalVideoTrack for WebRtcLocalTrack {
    async fn send(&self, frame: &VideoFrame, timestamp: u64) -> Result<()> {
        let previous = self.last_timestamp.swap(timestamp, Ordering::SeqCst);
        let delta_ticks = timestamp.saturating_sub(previous);
        let duration = Duration::from_secs_f64(delta_ticks as f64 / scope_core::egress::CLOCK_RATE as f64);

        let sample = Sample {
            data: bytes::Bytes::copy_from_slice(&frame.data),
            duration,
            ..Default::default()
        };

        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| ScopeError::transport(format!("failed to write sample: {e}")))
    }
}

/// Pulls RTP payload bytes off a remote track and wraps them in a
/// `VideoFrame` at the dimensions the loaded pipeline expects. Real pixel
/// decode from the negotiated wire codec is the integration seam noted above.
pub struct WebRtcRemoteTrack {
    track: Arc<TrackRemote>,
    width: u32,
    height: u32,
}

impl WebRtcRemoteTrack {
    pub fn new(track: Arc<TrackRemote>, width: u32, height: u32) -> Self {
        Self { track, width, height }
    }
}

#[async_trait]
impl RemoteVideoTrack for WebRtcRemoteTrack {
    async fn receive(&self) -> Result<VideoFrame> {
        let (packet, _) = self
            .track
            .read_rtp()
            .await
            .map_err(|e| ScopeError::transport(format!("failed to read RTP packet: {e}")))?;

        let expected_len = (self.width * self.height * 3) as usize;
        let mut data = packet.payload.to_vec();
        data.resize(expected_len, 0);

        debug!(len = packet.payload.len(), "received remote RTP packet");
        Ok(VideoFrame::new(data, self.width, self.height))
    }
}

pub struct WebRtcDataChannel {
    inner: Arc<RTCDataChannel>,
}

impl WebRtcDataChannel {
    pub fn new(inner: Arc<RTCDataChannel>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn is_open(&self) -> bool {
        self.inner.ready_state() == webrtc::data_channel::data_channel_state::RTCDataChannelState::Open
    }

    async fn send_text(&self, message: String) -> Result<()> {
        self.inner
            .send_text(message)
            .await
            .map_err(|e| ScopeError::transport(format!("failed to send data channel message: {e}")))?;
        Ok(())
    }

    fn on_open(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.inner.on_open(Box::new(move || {
            callback();
            Box::pin(async {})
        }));
    }

    fn on_message(&self, callback: Box<dyn Fn(String) + Send + Sync>) {
        self.inner.on_message(Box::new(move |msg| {
            callback(String::from_utf8_lossy(&msg.data).into_owned());
            Box::pin(async {})
        }));
    }
}
