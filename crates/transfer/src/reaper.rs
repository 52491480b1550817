//! Background sweep of abandoned assemblies.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::AssemblyStore;

/// Default sweep interval.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default idle age after which an assembly counts as abandoned.
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Periodically deletes assemblies whose uploads went quiet.
///
/// A client that aborts mid-sequence leaves a temp file behind; the
/// reaper bounds that disk growth.
pub struct Reaper {
    interval: Duration,
    max_age: Duration,
    stop: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl Reaper {
    /// Creates a reaper.
    ///
    /// `None` parameters fall back to the defaults (60 s interval,
    /// 30 min max age).
    pub fn new(interval: Option<Duration>, max_age: Option<Duration>) -> Self {
        Self {
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
            max_age: max_age.unwrap_or(DEFAULT_MAX_AGE),
            stop: Mutex::new(None),
        }
    }

    /// Starts the periodic sweep in a background tokio task.
    ///
    /// Call [`stop`](Self::stop) to cancel. Starting again replaces the
    /// previous task.
    pub fn start(&self, store: Arc<AssemblyStore>) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap();
            // Stop any existing task.
            drop(stop.take());
            *stop = Some(tx);
        }

        let interval = self.interval;
        let max_age = self.max_age;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sweep_store = Arc::clone(&store);
                        let swept = tokio::task::spawn_blocking(move || {
                            sweep_store.sweep_expired(max_age)
                        })
                        .await
                        .unwrap_or(0);
                        if swept > 0 {
                            tracing::info!(swept, "removed stale assemblies");
                        }
                    }
                    _ = &mut rx => {
                        break;
                    }
                }
            }
        });
    }

    /// Stops the sweep task.
    pub fn stop(&self) {
        let mut stop = self.stop.lock().unwrap();
        // Dropping the sender signals the task to exit.
        drop(stop.take());
    }
}
