use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::Result;

/// Receives application-wide events by name.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &str, payload: &Value) -> Result<()>;
}

/// Named publish/subscribe bus for application-wide signals.
///
/// Share one instance per process as `Arc<EventBus>`. Signalling is
/// fire-and-forget: every subscriber runs on its own Tokio task and its
/// failures are logged, never returned to the emitter.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe `handler` to `event`. Subscribing the same `Arc` twice is a no-op.
    pub fn subscribe(&self, event: &str, handler: Arc<dyn EventHandler>) {
        let mut subs = self.subscribers.write().expect("event registry poisoned");
        let list = subs.entry(event.to_string()).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return;
        }
        list.push(handler);
        debug!(event, subscribers = list.len(), "event subscriber added");
    }

    /// Number of handlers listening to `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers
            .read()
            .expect("event registry poisoned")
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Deliver `payload` to every subscriber of `event`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn signal(&self, event: &str, payload: Value) {
        debug!(event, "signalling");
        let subs = self.subscribers.read().expect("event registry poisoned");
        let Some(list) = subs.get(event) else {
            return;
        };

        for handler in list {
            let handler = Arc::clone(handler);
            let event = event.to_string();
            let payload = payload.clone();

            tokio::spawn(async move {
                let t = Instant::now();
                if let Err(e) = handler.handle(&event, &payload).await {
                    error!(
                        event = %event,
                        duration_ms = t.elapsed().as_millis() as u64,
                        error = %e,
                        "event handler failed"
                    );
                }
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
