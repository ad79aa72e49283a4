//! Per-userId trailing debounce for proactive `REQUEST_SYNC`.
//!
//! Implemented as a map of userId to a cancellable delayed task: each
//! trigger aborts the previous pending task for that key (if any) before
//! spawning a fresh one, which is the idiomatic replacement the design note
//! calls for in place of a string-keyed JS `setTimeout`/`clearTimeout` pair.
//! Holding the map lock only ever brackets a single insert/remove/abort —
//! never across an `.await` — so there is no race between a trigger and the
//! timer it's racing against.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Debounces triggers keyed by an arbitrary string.
pub struct SyncDebouncer {
    window: Duration,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SyncDebouncer {
    pub fn new(window: Duration) -> Arc<Self> {
        Arc::new(Self { window, pending: Mutex::new(HashMap::new()) })
    }

    /// Trigger the debounced action for `key`. If another trigger for the
    /// same key arrives before `window` elapses, the earlier one is
    /// cancelled and never fires — collapsing any burst into exactly one
    /// call, no later than `window` after the last trigger in the burst
    ///.
    pub fn trigger<F>(self: &Arc<Self>, key: String, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let this = self.clone();
        let window = self.window;
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            this.pending.lock().unwrap().remove(&task_key);
            fire.await;
        });

        let previous = self.pending.lock().unwrap().insert(key, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn five_triggers_within_the_window_fire_exactly_once() {
        let debouncer = SyncDebouncer::new(Duration::from_millis(300));
        let fires = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let fires = fires.clone();
            debouncer.trigger("u-1".to_string(), async move {
                fires.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(20)).await;
        }

        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_fire_independently() {
        let debouncer = SyncDebouncer::new(Duration::from_millis(300));
        let fires = Arc::new(AtomicUsize::new(0));

        for key in ["u-1", "u-2"] {
            let fires = fires.clone();
            debouncer.trigger(key.to_string(), async move {
                fires.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }
}
