//! Notification sender: enqueue-before-open, flush-on-open, thread-safe send to
//! the data channel (C8). The frame processor's worker thread is not a tokio
//! thread; it must never touch the data channel directly. The "scheduler" in
//! spec §4.8/§9 is a single dedicated task, spawned onto the
//! `tokio::runtime::Handle` captured at session construction, that drains an
//! internal `tokio::sync::mpsc` queue one message at a time — sends are never
//! spawned independently, so enqueue order is preserved even when
//! `DataChannel::send_text` has variable latency.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{error, warn};

use crate::transport::DataChannel;
use crate::types::Notification;

struct Inner {
    data_channel: Option<Arc<dyn DataChannel>>,
    pending: Vec<Notification>,
}

/// Best-effort telemetry sender for the client UI: failures are logged and
/// never propagate.
pub struct NotificationSender {
    inner: Mutex<Inner>,
    outbox: UnboundedSender<(Arc<dyn DataChannel>, Notification)>,
}

impl NotificationSender {
    /// Bind to the current Tokio runtime and spawn the single drain task that
    /// serializes all sends. Must be called from within a tokio context
    /// (session construction).
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Arc<dyn DataChannel>, Notification)>();
        Handle::current().spawn(async move {
            while let Some((dc, message)) = rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(t) => t,
                    Err(e) => {
                        error!(error = %e, "failed to serialize notification");
                        continue;
                    }
                };
                if let Err(e) = dc.send_text(text).await {
                    warn!(error = %e, "failed to send notification");
                }
            }
        });
        Self {
            inner: Mutex::new(Inner {
                data_channel: None,
                pending: Vec::new(),
            }),
            outbox: tx,
        }
    }

    /// If the channel is open, post the send onto the scheduler (never send
    /// directly from arbitrary threads); otherwise buffer it.
    pub fn send(&self, message: Notification) {
        let mut inner = self.inner.lock();
        match &inner.data_channel {
            Some(dc) if dc.is_open() => {
                let dc = Arc::clone(dc);
                self.post(dc, message);
            }
            _ => inner.pending.push(message),
        }
    }

    /// Bind the data channel, then drain pending notifications in FIFO
    /// order using the same scheduler-posting path.
    pub fn set_data_channel(&self, dc: Arc<dyn DataChannel>) {
        let pending = {
            let mut inner = self.inner.lock();
            inner.data_channel = Some(Arc::clone(&dc));
            std::mem::take(&mut inner.pending)
        };
        for message in pending {
            self.post(Arc::clone(&dc), message);
        }
    }

    /// Retry draining anything still buffered, if the bound channel is now
    /// open. The channel typically arrives in a `connecting` state via
    /// [`PeerConnection::on_data_channel`](crate::transport::PeerConnection::on_data_channel);
    /// the session wires this to the channel's `open` event so notifications
    /// enqueued in the gap between arrival and open are not stranded.
    pub fn flush_if_open(&self) {
        let mut inner = self.inner.lock();
        let Some(dc) = inner.data_channel.clone() else {
            return;
        };
        if !dc.is_open() {
            return;
        }
        let pending = std::mem::take(&mut inner.pending);
        drop(inner);
        for message in pending {
            self.post(Arc::clone(&dc), message);
        }
    }

    /// Enqueue onto the single drain task's queue. The queue preserves FIFO
    /// order across sends; the drain task awaits each `send_text` to
    /// completion before starting the next, so two messages enqueued in
    /// order A, B are always delivered in that order regardless of
    /// per-message I/O latency. The receiver only closes when `self` (and
    /// thus `outbox`) drops, so `send` never fails here.
    fn post(&self, dc: Arc<dyn DataChannel>, message: Notification) {
        if self.outbox.send((dc, message)).is_err() {
            error!("notification drain task is gone, dropping message");
        }
    }
}

impl Default for NotificationSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeChannel {
        open: AtomicBool,
        sent: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl DataChannel for FakeChannel {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn on_open(&self, _callback: Box<dyn Fn() + Send + Sync>) {}

        fn on_message(&self, _callback: Box<dyn Fn(String) + Send + Sync>) {}
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_notifications_flush_in_order_on_open() {
        let sender = NotificationSender::new();
        sender.send(Notification::StreamStopped {
            error_message: Some("first".into()),
        });
        sender.send(Notification::StreamStopped {
            error_message: Some("second".into()),
        });

        let channel = Arc::new(FakeChannel {
            open: AtomicBool::new(true),
            sent: StdMutex::new(Vec::new()),
        });
        sender.set_data_channel(Arc::clone(&channel) as Arc<dyn DataChannel>);

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("first"));
        assert!(sent[1].contains("second"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_while_closed_buffers_until_open() {
        let sender = NotificationSender::new();
        let channel = Arc::new(FakeChannel {
            open: AtomicBool::new(false),
            sent: StdMutex::new(Vec::new()),
        });
        sender.set_data_channel(Arc::clone(&channel) as Arc<dyn DataChannel>);
        sender.send(Notification::StreamStopped { error_message: None });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(channel.sent.lock().unwrap().len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_if_open_drains_once_channel_opens() {
        let sender = NotificationSender::new();
        let channel = Arc::new(FakeChannel {
            open: AtomicBool::new(false),
            sent: StdMutex::new(Vec::new()),
        });
        sender.set_data_channel(Arc::clone(&channel) as Arc<dyn DataChannel>);
        sender.send(Notification::StreamStopped {
            error_message: Some("queued-while-connecting".into()),
        });

        // Still closed: flush is a no-op.
        sender.flush_if_open();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(channel.sent.lock().unwrap().len(), 0);

        // Channel transitions to open; the session's on_open handler calls flush_if_open again.
        channel.open.store(true, Ordering::SeqCst);
        sender.flush_if_open();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("queued-while-connecting"));
    }
}
