//! Session manager (C7): accepts offers, produces answers, indexes
//! sessions, tears down on connection-state change.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{Result, ScopeError};
use crate::pipeline_manager::PipelineManager;
use crate::session::Session;
use crate::transport::{ConnectionState, PeerConnectionFactory};
use crate::types::{ParameterBag, SessionId};

/// An inbound SDP offer, with optional initial parameters.
pub struct OfferRequest {
    pub sdp: String,
    pub initial_parameters: ParameterBag,
}

/// An SDP answer.
pub struct Answer {
    pub sdp: String,
}

/// Maps session id to session; a present entry is either live or in the middle
/// of `close` (`close` itself is idempotent).
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    pipeline_manager: Arc<PipelineManager>,
    connection_factory: Arc<dyn PeerConnectionFactory>,
}

impl SessionManager {
    pub fn new(pipeline_manager: Arc<PipelineManager>, connection_factory: Arc<dyn PeerConnectionFactory>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            pipeline_manager,
            connection_factory,
        }
    }

    /// `handleOffer`: pre-condition pipeline loaded, create a peer connection and
    /// session, apply the remote description, and answer. Tears down any
    /// partially-created session on error.
    pub async fn handle_offer(self: &Arc<Self>, offer: OfferRequest) -> Result<Answer> {
        if !self.pipeline_manager.is_loaded() {
            return Err(ScopeError::invalid_state("pipeline not loaded"));
        }
        let pipeline_id = match self.pipeline_manager.status() {
            crate::pipeline_manager::PipelineStatus::Loaded { id, .. } => id,
            _ => return Err(ScopeError::invalid_state("pipeline not loaded")),
        };

        let peer_connection = self.connection_factory.create().await?;
        let local_track: Arc<dyn crate::transport::LocalVideoTrack> =
            Arc::from(peer_connection.add_local_video_track().await?);

        let session = Arc::new(Session::new(
            Arc::clone(&peer_connection),
            Arc::clone(&self.pipeline_manager),
            pipeline_id,
            offer.initial_parameters,
            local_track,
        ));

        self.wire_callbacks(&session);

        let setup_result = self.finish_offer(&session, &offer.sdp).await;
        match setup_result {
            Ok(answer) => {
                self.sessions.lock().insert(session.id, Arc::clone(&session));
                Ok(answer)
            }
            Err(e) => {
                warn!(error = %e, "offer setup failed, tearing down partial session");
                let _ = session.close().await;
                Err(e)
            }
        }
    }

    async fn finish_offer(&self, session: &Session, sdp: &str) -> Result<Answer> {
        session.peer_connection.set_remote_description(sdp).await?;
        let answer_sdp = session.peer_connection.create_answer().await?;
        Ok(Answer { sdp: answer_sdp })
    }

    /// Wire the peer connection's callbacks before the remote description is
    /// applied, so a track or data channel that arrives during negotiation is never
    /// missed.
    fn wire_callbacks(self: &Arc<Self>, session: &Arc<Session>) {
        let session_for_track = Arc::clone(session);
        session
            .peer_connection
            .on_remote_track(Box::new(move |track| session_for_track.bind_remote_track(track)));

        let session_for_dc = Arc::clone(session);
        session
            .peer_connection
            .on_data_channel(Box::new(move |dc| session_for_dc.bind_data_channel(dc)));

        let manager = Arc::clone(self);
        let session_id = session.id;
        session.peer_connection.on_state_change(Box::new(move |state| {
            if state.is_terminal() {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.remove_session(session_id).await;
                });
            }
        }));
    }

    pub async fn remove_session(&self, id: SessionId) {
        let session = self.sessions.lock().remove(&id);
        match session {
            Some(session) => {
                info!(session_id = %id, "removing session");
                if let Err(e) = session.close().await {
                    warn!(session_id = %id, error = %e, "error closing session");
                }
            }
            None => warn!(session_id = %id, "attempted to remove non-existent session"),
        }
    }

    pub fn get_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// All currently registered session ids, in no particular order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().copied().collect()
    }

    /// Closes all sessions concurrently and clears the registry.
    pub async fn stop(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        let handles: Vec<_> = sessions
            .into_iter()
            .map(|session| tokio::spawn(async move { session.close().await }))
            .collect();

        for handle in handles {
            match handle.await {
                Ok(Err(e)) => warn!(error = %e, "error closing session during shutdown"),
                Err(e) => warn!(error = %e, "session close task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }
}
