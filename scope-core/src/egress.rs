//! Egress video track: paces output frames to the remote peer, manages
//! media timestamps, and freezes the last frame while paused (C5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use crate::error::Result;
use crate::frame_processor::FrameProcessor;
use crate::transport::LocalVideoTrack;
use crate::types::VideoFrame;

/// RTP media clock rate for video, matching the WebRTC collaborator's 90 kHz
/// clock.
pub const CLOCK_RATE: u64 = 90_000;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct TimestampClock {
    start: Option<Instant>,
    timestamp: u64,
}

impl TimestampClock {
    fn new() -> Self {
        Self {
            start: None,
            timestamp: 0,
        }
    }

    /// Advance the media clock by one frame period, returning the timestamp to stamp
    /// on the outgoing frame plus how long to sleep before emitting it. Computing
    /// the wait without sleeping here keeps the lock guard out of an `.await` point.
    fn advance(&mut self, period: Duration) -> (u64, Duration) {
        match self.start {
            None => {
                self.start = Some(Instant::now());
                self.timestamp = 0;
                (0, Duration::ZERO)
            }
            Some(start) => {
                self.timestamp += (period.as_secs_f64() * CLOCK_RATE as f64).round() as u64;
                let target = start + Duration::from_secs_f64(self.timestamp as f64 / CLOCK_RATE as f64);
                let now = Instant::now();
                let wait = target.saturating_duration_since(now);
                (self.timestamp, wait)
            }
        }
    }
}

/// Single producer of outbound frames, driven by repeated calls to
/// [`EgressTrack::recv`] from the WebRTC collaborator's sample-pull loop.
pub struct EgressTrack {
    processor: Arc<FrameProcessor>,
    local_track: Arc<dyn LocalVideoTrack>,
    paused: AtomicBool,
    last_frame: Mutex<Option<VideoFrame>>,
    clock: Mutex<TimestampClock>,
    started: AtomicBool,
}

impl EgressTrack {
    pub fn new(processor: Arc<FrameProcessor>, local_track: Arc<dyn LocalVideoTrack>) -> Self {
        Self {
            processor,
            local_track,
            paused: AtomicBool::new(false),
            last_frame: Mutex::new(None),
            clock: Mutex::new(TimestampClock::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.processor.set_paused(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// The owned frame processor, for the ingress loop and data channel
    /// parameter forwarding to share.
    pub fn processor(&self) -> Arc<FrameProcessor> {
        Arc::clone(&self.processor)
    }

    /// Forward a parameter update to the frame processor.
    pub fn update_parameters(&self, params: crate::types::ParameterBag) -> bool {
        self.processor.update_parameters(params)
    }

    /// Lazily start the frame processor on first pull, so a session with no consumer
    /// never loads pipeline state.
    fn ensure_started(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.processor.start();
        }
    }

    /// One pacing iteration: refresh FPS, decide between a freeze frame and a fresh
    /// one, stamp it, and send it.
    pub async fn recv(&self) -> Result<()> {
        self.ensure_started();

        let fps = self.processor.effective_fps().max(1.0);
        let period = Duration::from_secs_f64(1.0 / fps);

        let out = if self.is_paused() {
            self.last_frame.lock().clone()
        } else {
            loop {
                if let Some(frame) = self.processor.get() {
                    break Some(frame);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };

        let Some(frame) = out else {
            return Ok(());
        };

        let (timestamp, wait) = self.clock.lock().advance(period);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        *self.last_frame.lock() = Some(frame.clone());
        self.local_track.send(&frame, timestamp).await
    }

    /// Cancels the ingress loop, stops the frame processor, and closes the
    /// parent track.
    pub fn stop(&self) {
        info!("egress track stopping");
        self.processor.stop(None);
    }
}
