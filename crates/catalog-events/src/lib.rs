#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
//! Engine event bus for catalog list views.
//!
//! The bus provides a typed event enum, sequential identifiers, and support for
//! replaying recent events when a subscriber attaches late. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows, the
//! oldest events are dropped rather than blocking the publisher.

pub mod payloads;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

pub use payloads::{DEFAULT_REPLAY_CAPACITY, EngineEvent, EventEnvelope, EventId};

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a bus whose broadcast channel and replay ring share `capacity`.
    ///
    /// A zero capacity is bumped to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish an event on behalf of `view`, assigning it a sequential identifier.
    ///
    /// Publishing never blocks; having no subscribers is not an error.
    pub fn publish(&self, view: &str, event: EngineEvent) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            view: view.to_string(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let receiver = self.sender.subscribe();
        let backlog = since_id.map_or_else(VecDeque::new, |since| {
            self.lock_buffer()
                .iter()
                .filter(|item| item.id > since)
                .cloned()
                .collect()
        });
        EventStream {
            backlog,
            receiver,
            last_seen: since_id.unwrap_or(0),
        }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_buffer().back().map(|event| event.id)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events from the replay backlog first, then from
/// the live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
    last_seen: EventId,
}

impl EventStream {
    /// Receive the next event; returns `None` once every bus handle is dropped.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            self.last_seen = event.id;
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                // Events published between the replay snapshot and the
                // subscription show up on both paths.
                Ok(event) if event.id <= self.last_seen => {}
                Ok(event) => {
                    self.last_seen = event.id;
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain every event that is already available without waiting.
    pub fn drain_ready(&mut self) -> Vec<EventEnvelope> {
        let mut ready: Vec<EventEnvelope> = self.backlog.drain(..).collect();
        if let Some(last) = ready.last() {
            self.last_seen = last.id;
        }
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.id <= self.last_seen => {}
                Ok(event) => {
                    self.last_seen = event.id;
                    ready.push(event);
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        ready
    }

    /// Convert into a [`Stream`], backlog first, for use with `StreamExt`
    /// combinators.
    pub fn into_stream(self) -> impl Stream<Item = EventEnvelope> + Send {
        let mut last_seen = self.backlog.back().map_or(self.last_seen, |event| event.id);
        let live = BroadcastStream::new(self.receiver).filter_map(move |item| match item {
            Ok(event) if event.id > last_seen => {
                last_seen = event.id;
                Some(event)
            }
            _ => None,
        });
        tokio_stream::iter(self.backlog).chain(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn applied(seq: u64) -> EngineEvent {
        EngineEvent::FetchApplied { seq, total: seq * 10 }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for seq in 0..5 {
            last_id = bus.publish("products", applied(seq));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().map(|e| e.id), Some(3));
        assert_eq!(received.last().map(|e| e.id), Some(5));
        assert!(received.iter().all(|e| e.view == "products"));
    }

    #[test]
    fn replay_ring_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for seq in 0..4 {
            let _ = bus.publish("drafts", applied(seq));
        }
        let mut stream = bus.subscribe(Some(0));
        let ids: Vec<EventId> = stream.drain_ready().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(bus.last_event_id(), Some(4));
    }

    #[test]
    fn drain_ready_collects_live_events() {
        let bus = EventBus::with_capacity(8);
        let mut stream = bus.subscribe(Some(0));
        let _ = bus.publish("drafts", applied(1));
        let _ = bus.publish("drafts", applied(2));
        let kinds: Vec<&str> = stream
            .drain_ready()
            .iter()
            .map(|e| e.event.kind())
            .collect();
        assert_eq!(kinds, vec!["fetch_applied", "fetch_applied"]);
    }

    #[tokio::test]
    async fn stream_adapter_replays_then_follows_live_events() {
        let bus = EventBus::with_capacity(8);
        let _ = bus.publish("products", applied(1));
        let _ = bus.publish("products", applied(2));
        let mut stream = std::pin::pin!(bus.subscribe(Some(1)).into_stream());
        let _ = bus.publish("products", applied(3));

        let mut ids = Vec::new();
        while ids.len() < 2 {
            let next = timeout(PUBLISH_TIMEOUT, stream.next()).await;
            match next {
                Ok(Some(event)) => ids.push(event.id),
                _ => break,
            }
        }
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for seq in 0..500 {
                    let publish_bus = bus.clone();
                    timeout(PUBLISH_TIMEOUT, async move {
                        let _ = publish_bus.publish("products", applied(seq));
                    })
                    .await
                    .expect("publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = consumer.await.expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }
}
