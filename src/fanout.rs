//! Per-pair WebSocket subscriber fanout.
//!
//! Each pair gets its own subscriber set. A broadcast that fails to reach a
//! subscriber (closed socket, full buffer) drops that subscriber silently
//! rather than propagating the send error to the caller.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// The subscriber map itself only ever does quick insert/remove/clone work,
/// so a sync lock is fine there. Each individual sink is guarded by an
/// async mutex since sending to it is an awaited I/O operation.
type Sink = Arc<AsyncMutex<SplitSink<WebSocket, Message>>>;

#[derive(Default)]
pub struct Fanout {
    subscribers: parking_lot::Mutex<HashMap<String, HashMap<u64, Sink>>>,
    next_id: AtomicU64,
}

pub struct Subscription {
    pair: String,
    id: u64,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber sink for `pair`, returning a handle used to
    /// unregister it on disconnect.
    pub fn connect(&self, pair: &str, sink: SplitSink<WebSocket, Message>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .entry(pair.to_string())
            .or_default()
            .insert(id, Arc::new(AsyncMutex::new(sink)));
        Subscription { pair: pair.to_string(), id }
    }

    pub fn disconnect(&self, sub: &Subscription) {
        let mut subs = self.subscribers.lock();
        if let Some(by_pair) = subs.get_mut(&sub.pair) {
            by_pair.remove(&sub.id);
            if by_pair.is_empty() {
                subs.remove(&sub.pair);
            }
        }
    }

    pub fn subscriber_count(&self, pair: &str) -> usize {
        self.subscribers.lock().get(pair).map(|m| m.len()).unwrap_or(0)
    }

    /// Send `text` to every subscriber of `pair`. Subscribers whose send
    /// fails are dropped from the set.
    pub async fn broadcast(&self, pair: &str, text: String) {
        let sinks: Vec<Sink> = {
            let subs = self.subscribers.lock();
            match subs.get(pair) {
                Some(by_id) => by_id.values().cloned().collect(),
                None => return,
            }
        };
        if sinks.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for sink in &sinks {
            let mut guard = sink.lock().await;
            if guard.send(Message::Text(text.clone())).await.is_err() {
                dead.push(Arc::as_ptr(sink));
            }
        }
        if dead.is_empty() {
            return;
        }
        let mut subs = self.subscribers.lock();
        if let Some(by_id) = subs.get_mut(pair) {
            by_id.retain(|_, s| !dead.contains(&Arc::as_ptr(s)));
            if by_id.is_empty() {
                subs.remove(pair);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_and_disconnect_tracks_count() {
        let fanout = Fanout::new();
        assert_eq!(fanout.subscriber_count("BTC-AL"), 0);
    }
}
