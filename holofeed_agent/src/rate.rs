//! Throughput rates from cumulative interface byte counters.

use std::time::{Duration, Instant};

use tracing::debug;

pub const BYTES_PER_KB: f64 = 1024.0;

/// Last observed cumulative counters and when they were read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCounterState {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetRates {
    pub upload_kbps: f64,
    pub download_kbps: f64,
}

/// KB/s between two readings of one counter. Zero elapsed time, or a counter that
/// went backwards, yields 0.0.
pub fn rate_kbps(previous: u64, current: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 || current < previous {
        return 0.0;
    }
    (current - previous) as f64 / BYTES_PER_KB / secs
}

impl NetworkCounterState {
    pub fn new(bytes_received: u64, bytes_sent: u64, timestamp: Instant) -> Self {
        Self {
            bytes_received,
            bytes_sent,
            timestamp,
        }
    }

    /// Computes rates against `self` and returns the state to keep for the next call.
    /// The returned state always carries the current counters and `now`.
    pub fn advance(&self, received: u64, sent: u64, now: Instant) -> (NetRates, Self) {
        let next = Self::new(received, sent, now);
        let elapsed = now.saturating_duration_since(self.timestamp);
        if elapsed.is_zero() {
            return (NetRates::default(), next);
        }
        if received < self.bytes_received || sent < self.bytes_sent {
            debug!(
                prev_rx = self.bytes_received,
                prev_tx = self.bytes_sent,
                rx = received,
                tx = sent,
                "network counters went backwards; rebasing"
            );
        }
        let rates = NetRates {
            upload_kbps: rate_kbps(self.bytes_sent, sent, elapsed),
            download_kbps: rate_kbps(self.bytes_received, received, elapsed),
        };
        (rates, next)
    }
}
