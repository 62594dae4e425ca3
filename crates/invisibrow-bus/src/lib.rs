//! Process-wide fan-out of logs, intervention requests, and resolutions.
//!
//! A thin typed wrapper over `tokio::sync::broadcast`. Subscribers that only
//! care about one event (the intervention handshake waiting for its
//! `VerificationResolved`) use [`EventBus::wait_for`], which subscribes,
//! filters, and drops the subscription when satisfied or cancelled, so no
//! listener accumulates across a long session.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use invisibrow_types::{CoreEvent, LogLevel};

/// Default broadcast channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// In-process pub/sub bus carrying [`CoreEvent`] values.
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity (floored at 1).
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    /// Publish an event to all current subscribers.
    ///
    /// An event with no subscribers is dropped silently; the core never
    /// depends on the UI being attached.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Publish a log event for the UI feed.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.publish(CoreEvent::log(level, message));
    }

    /// Wait for the first event matching `filter`, or until `cancel` fires.
    ///
    /// Returns `None` on cancellation. The subscription is created on entry
    /// and dropped on return, so repeated waits do not grow the subscriber
    /// set. Lagged receivers skip ahead and keep waiting.
    pub async fn wait_for<F>(&self, filter: F, cancel: &CancellationToken) -> Option<CoreEvent>
    where
        F: Fn(&CoreEvent) -> bool,
    {
        let mut rx = self.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                received = rx.recv() => match received {
                    Ok(event) if filter(&event) => return Some(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event bus receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}
