//! Event bus adapters
//!
//! Implements the `VoteRequestPublisher` port. The in-memory bus uses
//! `tokio::sync::broadcast` for multi-consumer fan-out; slow receivers lag and
//! drop events rather than applying backpressure to the gate.

use crate::events::GateEvent;
use crate::ports::outbound::VoteRequestPublisher;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum events buffered per subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// In-process broadcast bus for gate events
pub struct InMemoryVoteRequestBus {
    sender: broadcast::Sender<GateEvent>,
    events_published: AtomicU64,
    capacity: usize,
}

impl InMemoryVoteRequestBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryVoteRequestBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoteRequestPublisher for InMemoryVoteRequestBus {
    async fn publish(&self, event: GateEvent) -> Result<usize, String> {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();
        let signal_id = event.signal_id();

        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(kind, %signal_id, receivers, "Gate event published");
                Ok(receivers)
            }
            Err(_) => {
                // Nobody listening is normal for an optional hook
                debug!(kind, %signal_id, "Gate event dropped (no receivers)");
                Ok(0)
            }
        }
    }
}

/// Publisher that discards everything
#[derive(Debug, Default)]
pub struct NoopVoteRequestPublisher;

#[async_trait]
impl VoteRequestPublisher for NoopVoteRequestPublisher {
    async fn publish(&self, _event: GateEvent) -> Result<usize, String> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionParams, SignalId};
    use crate::events::VoteRequestedEvent;

    fn event() -> GateEvent {
        GateEvent::VoteRequested(VoteRequestedEvent {
            signal_id: SignalId::new(),
            params: ActionParams::new("BUY", "BTC-USD", "coinbase", 0.1, 50_000.0, 0.9),
            required_checkers: Default::default(),
            created_at: 0,
            expires_at: 30_000,
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = InMemoryVoteRequestBus::new();
        assert_eq!(bus.publish(event()).await, Ok(0));
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = InMemoryVoteRequestBus::with_capacity(8);
        let mut rx = bus.subscribe();

        let sent = event();
        assert_eq!(bus.publish(sent.clone()).await, Ok(1));
        assert_eq!(rx.recv().await.unwrap(), sent);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.capacity(), 8);
    }

    #[tokio::test]
    async fn test_noop_publisher() {
        assert_eq!(NoopVoteRequestPublisher.publish(event()).await, Ok(0));
    }
}
