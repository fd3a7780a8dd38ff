//! Logging setup and consumer counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Filter comes from `RUST_LOG` (default `info`). Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Point-in-time view of what the consumers of one host have done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerCounts {
    /// Processed and acknowledged.
    pub completed: u64,
    /// Deleted without success: poison, non-retriable or out of retries.
    pub discarded: u64,
    /// Failed and left on the queue for redelivery.
    pub retained: u64,
    pub empty_polls: u64,
}

/// Shared by every consumer of a host.
#[derive(Debug, Default)]
pub struct ConsumerCounters {
    completed: AtomicU64,
    discarded: AtomicU64,
    retained: AtomicU64,
    empty_polls: AtomicU64,
}

impl ConsumerCounters {
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retained(&self) {
        self.retained.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumerCounts {
        ConsumerCounts {
            completed: self.completed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
        }
    }
}
