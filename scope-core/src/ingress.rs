//! Ingress video track: a pull loop over the remote track's `receive()`
//! method, handing decoded frames to the frame processor (C4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use crate::frame_processor::FrameProcessor;
use crate::transport::RemoteVideoTrack;

/// Cooperative pull loop. Stops on the first fatal receive error (a
/// one-shot, to avoid error spam on teardown) or when cancelled.
pub struct IngressLoop {
    running: Arc<AtomicBool>,
}

impl IngressLoop {
    /// Spawn the pull loop as a tokio task bound to `track`, feeding
    /// `processor.put`. Returns a handle that can cancel it.
    pub fn spawn(
        track: Arc<dyn RemoteVideoTrack>,
        processor: Arc<FrameProcessor>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_task = Arc::clone(&running);

        tokio::spawn(async move {
            info!("ingress loop started");
            while running_task.load(Ordering::SeqCst) {
                match track.receive().await {
                    Ok(frame) => {
                        processor.put(frame);
                    }
                    Err(e) => {
                        error!(error = %e, "error in ingress loop, stopping");
                        running_task.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
            info!("ingress loop stopped");
        });

        Self { running }
    }

    /// Request cancellation; the loop exits promptly on its next iteration.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
