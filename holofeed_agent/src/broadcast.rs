//! The periodic loop that samples the host, renders the event and sends it to every
//! subscriber.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::spawn_blocking;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::registry::{BroadcastOutcome, ClientRegistry};
use crate::sampler::SnapshotSource;
use crate::types::MetricSnapshot;

const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct BroadcastScheduler<S> {
    source: Arc<Mutex<S>>,
    registry: Arc<ClientRegistry>,
    period: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S: SnapshotSource> BroadcastScheduler<S> {
    pub fn new(
        source: S,
        registry: Arc<ClientRegistry>,
        period: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            registry,
            period,
            shutdown,
        }
    }

    /// Ticks until shutdown is signalled. Ticks never overlap: a slow tick delays the
    /// next one instead of bunching up.
    pub async fn run(mut self) {
        // interval() panics on a zero period
        let mut ticker = interval(self.period.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            if let Some(outcome) = self.tick().await {
                trace!(
                    delivered = outcome.delivered,
                    dropped = outcome.dropped,
                    "broadcast tick"
                );
                if outcome.dropped > 0 {
                    debug!(
                        dropped = outcome.dropped,
                        remaining = self.registry.len(),
                        "removed unreachable clients"
                    );
                }
            }
        }
        debug!("broadcast loop stopped");
    }

    /// One sample-and-send cycle. Returns `None` when sampling itself failed.
    pub async fn tick(&self) -> Option<BroadcastOutcome> {
        let snapshot = self.sample().await?;
        let payload = Bytes::from(snapshot.to_event());
        Some(self.registry.broadcast(payload).await)
    }

    // sysinfo and external tools block, so sampling runs off the async workers
    async fn sample(&self) -> Option<MetricSnapshot> {
        let source = Arc::clone(&self.source);
        let res = spawn_blocking(move || {
            let mut guard = source.lock().unwrap_or_else(PoisonError::into_inner);
            guard.sample()
        })
        .await;
        match res {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("sampler task failed: {e}");
                None
            }
        }
    }
}
