use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EventError, Result};

/// Base tick period of the process heartbeat.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Periodic work driven by the heartbeat.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn tick(&self);
}

/// Opaque handle returned by [`Heartbeat::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Subscriber {
    id: SubscriberId,
    name: String,
    /// Fire on every `interval`-th tick.
    interval: u64,
    handler: Arc<dyn TickHandler>,
    /// Suppressed until this instant, if set.
    sleep_until: Option<Instant>,
}

/// Process-wide tick source.
///
/// Counts fixed-period ticks and fires each subscriber whose interval divides
/// the tick count. Handlers are spawned, so a slow subscriber never delays
/// the next tick; subscribers that must not overlap guard themselves.
pub struct Heartbeat {
    period: Duration,
    count: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::with_period(DEFAULT_PERIOD)
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            count: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe `handler` to fire every `interval` ticks (0 is treated as 1).
    pub fn subscribe(&self, name: &str, interval: u64, handler: Arc<dyn TickHandler>) -> SubscriberId {
        let id = SubscriberId::new();
        let mut subs = self.subscribers.lock().expect("heartbeat registry poisoned");
        subs.push(Subscriber {
            id: id.clone(),
            name: name.to_string(),
            interval: interval.max(1),
            handler,
            sleep_until: None,
        });
        debug!(subscriber = name, interval, "heartbeat subscriber added");
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let mut subs = self.subscribers.lock().expect("heartbeat registry poisoned");
        let before = subs.len();
        subs.retain(|s| &s.id != id);
        subs.len() < before
    }

    /// Suppress a subscriber for the next `secs` seconds.
    pub fn sleep(&self, id: &SubscriberId, secs: u64) -> Result<()> {
        let mut subs = self.subscribers.lock().expect("heartbeat registry poisoned");
        let sub = subs
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| EventError::UnknownSubscriber { id: id.to_string() })?;
        sub.sleep_until = Some(Instant::now() + Duration::from_secs(secs));
        Ok(())
    }

    /// Advance the tick counter by one and spawn every due subscriber.
    /// Returns how many handlers were fired.
    pub fn beat(&self) -> usize {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Instant::now();
        let subs = self.subscribers.lock().expect("heartbeat registry poisoned");

        let mut fired = 0;
        for sub in subs.iter() {
            if count % sub.interval != 0 {
                continue;
            }
            if sub.sleep_until.is_some_and(|until| until > now) {
                continue;
            }
            let handler = Arc::clone(&sub.handler);
            debug!(subscriber = %sub.name, tick = count, "heartbeat firing");
            tokio::spawn(async move { handler.tick().await });
            fired += 1;
        }
        fired
    }

    /// Tick until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(period_ms = self.period.as_millis() as u64, "heartbeat started");

        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.beat();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("heartbeat stopped");
                        break;
                    }
                }
            }
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}
