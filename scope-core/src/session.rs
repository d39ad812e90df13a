//! Session (C6): binds a peer connection to a track pair, a data channel,
//! and a notification sender.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::egress::EgressTrack;
use crate::error::Result;
use crate::frame_processor::FrameProcessor;
use crate::ingress::IngressLoop;
use crate::notification::NotificationSender;
use crate::pipeline_manager::PipelineManager;
use crate::transport::{DataChannel, PeerConnection, RemoteVideoTrack};
use crate::types::{ParameterBag, ParamValue, SessionId};

/// Owns the egress/ingress pair, the optional data channel, and the
/// notification sender bound to this peer connection.
pub struct Session {
    pub id: SessionId,
    pub peer_connection: Arc<dyn PeerConnection>,
    egress: Arc<EgressTrack>,
    data_channel: Mutex<Option<Arc<dyn DataChannel>>>,
    notification_sender: Arc<NotificationSender>,
    ingress: Mutex<Option<IngressLoop>>,
    closed: AtomicBool,
}

impl Session {
    /// Construct a session: allocates an id, wires the egress track's stop callback
    /// to notify via `notification_sender`.
    pub fn new(
        peer_connection: Arc<dyn PeerConnection>,
        pipeline_manager: Arc<PipelineManager>,
        pipeline_id: String,
        initial_parameters: ParameterBag,
        local_track: Arc<dyn crate::transport::LocalVideoTrack>,
    ) -> Self {
        let notification_sender = Arc::new(NotificationSender::new());
        let sender_for_stop = Arc::clone(&notification_sender);

        let stop_callback: crate::frame_processor::StopCallback = Box::new(move |error_message| {
            sender_for_stop.send(crate::types::Notification::StreamStopped { error_message });
        });

        let processor = Arc::new(FrameProcessor::new(
            pipeline_manager,
            pipeline_id,
            initial_parameters,
            Some(stop_callback),
        ));
        let egress = Arc::new(EgressTrack::new(processor, local_track));

        Self {
            id: SessionId::new_v4(),
            peer_connection,
            egress,
            data_channel: Mutex::new(None),
            notification_sender,
            ingress: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// On remote track arrival of kind `video`, bind the ingress pull loop.
    pub fn bind_remote_track(&self, track: Arc<dyn RemoteVideoTrack>) {
        let ingress = IngressLoop::spawn(track, self.egress.processor());
        *self.ingress.lock() = Some(ingress);
    }

    pub fn egress(&self) -> &Arc<EgressTrack> {
        &self.egress
    }

    /// Remember the data channel, wire its open/message handlers, and set it on the
    /// notification sender. The channel typically arrives before it is actually
    /// open, so `on_open` re-triggers the flush for anything enqueued in that gap.
    pub fn bind_data_channel(self: &Arc<Self>, dc: Arc<dyn DataChannel>) {
        *self.data_channel.lock() = Some(Arc::clone(&dc));
        self.notification_sender.set_data_channel(Arc::clone(&dc));

        let session = Arc::clone(self);
        dc.on_message(Box::new(move |text| session.handle_data_channel_message(&text)));

        let sender = Arc::clone(&self.notification_sender);
        dc.on_open(Box::new(move || sender.flush_if_open()));
    }

    /// Handle an inbound data channel message: a JSON parameter bag. `paused` is
    /// applied directly to the egress track's pause flag in addition to being
    /// forwarded to the frame processor.
    pub fn handle_data_channel_message(&self, text: &str) {
        let params: ParameterBag = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "malformed data channel message, dropping");
                return;
            }
        };

        if let Some(ParamValue::Bool(paused)) = params.get("paused").cloned() {
            self.egress.pause(paused);
        }

        debug!(?params, "forwarding parameter update");
        self.egress.update_parameters(params);
    }

    /// Idempotent close: stops the egress track (which stops the frame
    /// processor), then closes the peer connection unless already
    /// `closed`/`failed`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(ingress) = self.ingress.lock().take() {
            ingress.cancel();
        }
        self.egress.stop();

        if !self.peer_connection.connection_state().is_terminal() {
            self.peer_connection.close().await?;
        }

        Ok(())
    }
}
