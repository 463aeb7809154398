//! # Subscriber Registry and Frame Fan-out
//!
//! Holds the live set of data-plane subscribers and delivers every produced
//! frame to all of them. Each subscriber is a bounded channel whose
//! receiving end is owned by one WebSocket connection actor.
//!
//! ## Failure isolation:
//! A send that fails (connection actor gone) or exceeds the per-send timeout
//! (client not draining its socket) marks that subscriber for removal. The
//! other subscribers and the producer loop are unaffected: a broadcast never
//! returns an error and never blocks longer than the slowest non-failing
//! send, bounded by the timeout.

use actix_web::web::Bytes;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames a subscriber may fall behind before sends start timing out.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 32;

/// Live set of stream subscribers.
///
/// The registry is shared between the producer task (iteration) and the
/// connection handlers (insert/remove); the mutex keeps mutation mutually
/// exclusive with the broadcast's snapshot of the sender list.
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<Bytes>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new subscriber and hand back its frame channel.
    ///
    /// Frames produced after this call are delivered to the subscriber;
    /// there is no replay of earlier frames.
    pub fn connect(&self) -> (Uuid, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = Uuid::new_v4();

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.insert(id, sender);
        info!("Subscriber {} connected. Total: {}", id, subscribers.len());

        (id, receiver)
    }

    /// Remove a subscriber. Safe to call while a broadcast is in flight;
    /// the broadcast works on its own snapshot of the sender list.
    pub fn disconnect(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!("Subscriber {} disconnected. Total: {}", id, subscribers.len());
        }
        removed
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Deliver one payload to every current subscriber concurrently.
    ///
    /// The payload is already serialized; cloning `Bytes` only bumps a
    /// reference count, so all subscribers see byte-identical data. Failed
    /// or timed-out subscribers are removed after the round.
    pub async fn broadcast(&self, payload: Bytes, send_timeout: Duration) {
        let targets: Vec<(Uuid, mpsc::Sender<Bytes>)> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers
                .iter()
                .map(|(id, sender)| (*id, sender.clone()))
                .collect()
        };

        if targets.is_empty() {
            return;
        }

        let sends = targets.into_iter().map(|(id, sender)| {
            let payload = payload.clone();
            async move {
                match tokio::time::timeout(send_timeout, sender.send(payload)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(_)) => {
                        debug!("Subscriber {} channel closed during send", id);
                        Some(id)
                    }
                    Err(_) => {
                        warn!(
                            "Subscriber {} send timed out after {:?}, disconnecting",
                            id, send_timeout
                        );
                        Some(id)
                    }
                }
            }
        });

        let failed: Vec<Uuid> = join_all(sends).await.into_iter().flatten().collect();

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap();
            for id in failed {
                subscribers.remove(&id);
            }
        }
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
