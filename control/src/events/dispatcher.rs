//! At-least-once delivery of logged events to subscribers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::events::log::EventLog;
use crate::events::sinks::EventSink;

const BATCH_SIZE: usize = 256;

struct Subscriber {
    sink: Arc<dyn EventSink>,

    /// Offset of the next event to deliver
    cursor: AtomicU64,
}

/// Delivers the event log to every subscriber in order
///
/// A subscriber's cursor only moves past an event once the sink accepted it;
/// a failing sink is retried from the same event on the next pass and never
/// holds back the other subscribers.
pub struct EventDispatcher {
    log: Arc<EventLog>,
    subscribers: Vec<Subscriber>,
}

impl EventDispatcher {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self {
            log,
            subscribers: Vec::new(),
        }
    }

    /// Register a sink that starts from the beginning of the log
    pub fn subscribe(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.subscribers.push(Subscriber {
            sink,
            cursor: AtomicU64::new(0),
        });
        self
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Deliver everything pending; returns the number of deliveries made
    pub async fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        for subscriber in &self.subscribers {
            delivered += self.drain(subscriber).await;
        }
        delivered
    }

    async fn drain(&self, subscriber: &Subscriber) -> usize {
        let mut delivered = 0;
        loop {
            let cursor = subscriber.cursor.load(Ordering::SeqCst);
            let batch = self.log.read_from(cursor, BATCH_SIZE);
            if batch.is_empty() {
                return delivered;
            }

            for event in batch {
                if let Err(e) = subscriber.sink.deliver(&event).await {
                    warn!(
                        sink = subscriber.sink.name(),
                        offset = event.offset,
                        "event delivery failed, will retry: {}",
                        e
                    );
                    return delivered;
                }
                subscriber.cursor.store(event.offset + 1, Ordering::SeqCst);
                delivered += 1;
            }
            debug!(sink = subscriber.sink.name(), delivered, "delivered event batch");
        }
    }

    /// Offset every subscriber has delivered up to
    pub fn min_cursor(&self) -> u64 {
        self.subscribers
            .iter()
            .map(|s| s.cursor.load(Ordering::SeqCst))
            .min()
            .unwrap_or_else(|| self.log.len())
    }

    /// Drop events delivered to every subscriber, keeping the newest `keep`
    pub fn compact(&self, keep: usize) -> usize {
        let dropped = self.log.compact_below(self.min_cursor(), keep);
        if dropped > 0 {
            debug!(dropped, retained = self.log.retained(), "compacted event log");
        }
        dropped
    }

    /// Cursor of a subscriber by sink name
    pub fn cursor(&self, name: &str) -> Option<u64> {
        self.subscribers
            .iter()
            .find(|s| s.sink.name() == name)
            .map(|s| s.cursor.load(Ordering::SeqCst))
    }
}
