use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::sleep;

const BASE_FAILURE_DELAY: Duration = Duration::from_millis(5);
const MAX_FAILURE_DELAY: Duration = Duration::from_secs(1000);
/// Upper bound on keys with a tracked failure count.
const MAX_TRACKED_FAILURES: usize = 4096;

/// Work queue with per-key serialization.
///
/// - A key is handed to at most one worker at a time. Adding a key that is
///   being processed marks it dirty; it is queued again once the worker
///   calls [`WorkQueue::done`].
/// - Adding a key that is already waiting is a no-op.
///
/// # Example
/// ```ignore
/// while let Some(key) = queue.get().await {
///     handle(&key).await;
///     queue.done(&key);
/// }
/// ```
pub struct WorkQueue<K> {
    inner: Arc<Mutex<Inner<K>>>,
    notify: Arc<Notify>,
}

struct Inner<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    failure_cap: usize,
    shutting_down: bool,
}

impl<K: Eq + Hash> Inner<K> {
    /// Drops the counts of keys that are neither waiting nor in flight. Keys
    /// parked behind a backoff timer lose their count and restart at the base
    /// delay. Falls back to dropping every count.
    fn evict_failures(&mut self) {
        let dirty = &self.dirty;
        let processing = &self.processing;
        self.failures
            .retain(|k, _| dirty.contains(k) || processing.contains(k));
        if self.failures.len() >= self.failure_cap {
            self.failures.clear();
        }
    }
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
        }
    }
}

impl<K> Default for WorkQueue<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                failure_cap: MAX_TRACKED_FAILURES,
                shutting_down: false,
            })),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that tracks failure counts for at most `cap` keys.
    pub fn with_failure_cap(cap: usize) -> Self {
        let queue = Self::default();
        queue.lock().failure_cap = cap.max(1);
        queue
    }

    pub fn add(&self, key: K) {
        let mut inner = self.lock();
        if inner.shutting_down || inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Adds the key once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            queue.add(key);
        });
    }

    /// Adds the key after a per-key exponential delay that grows with every
    /// consecutive failure until [`WorkQueue::forget`] is called.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = {
            let mut inner = self.lock();
            if !inner.failures.contains_key(&key) && inner.failures.len() >= inner.failure_cap {
                inner.evict_failures();
            }
            let failures = inner.failures.entry(key.clone()).or_insert(0);
            let delay = failure_delay(*failures);
            *failures += 1;
            delay
        };
        self.add_after(key, delay);
        delay
    }

    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    let more = !inner.queue.is_empty();
                    drop(inner);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks the key as no longer being processed.
    pub fn done(&self, key: &K) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
        // A worker between its empty check and `notified()` misses
        // notify_waiters but still consumes this permit.
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn failure_delay(failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures.min(31));
    BASE_FAILURE_DELAY
        .saturating_mul(factor)
        .min(MAX_FAILURE_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let q = WorkQueue::new();
        q.add("a");
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
    }

    #[tokio::test]
    async fn key_in_flight_is_not_handed_out_twice() {
        let q = WorkQueue::new();
        q.add("a");
        let key = q.get().await.unwrap();

        // re-added while processing: parked until done
        q.add("a");
        assert!(q.is_empty());
        assert!(timeout(Duration::from_millis(50), q.get()).await.is_err());

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("a"));
    }

    #[tokio::test]
    async fn shutdown_wakes_waiters() {
        let q: WorkQueue<&str> = WorkQueue::new();
        let worker = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.shutdown();
        let got = timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn add_after_delays_delivery() {
        let q = WorkQueue::new();
        q.add_after("late", Duration::from_millis(30));
        assert!(q.is_empty());
        let got = timeout(Duration::from_secs(1), q.get()).await.unwrap();
        assert_eq!(got, Some("late"));
    }

    #[test]
    fn failure_delay_grows_and_caps() {
        assert_eq!(failure_delay(0), Duration::from_millis(5));
        assert_eq!(failure_delay(1), Duration::from_millis(10));
        assert_eq!(failure_delay(3), Duration::from_millis(40));
        assert_eq!(failure_delay(40), MAX_FAILURE_DELAY);
    }

    #[tokio::test]
    async fn forget_resets_failure_count() {
        let q = WorkQueue::new();
        assert_eq!(q.add_rate_limited("k"), Duration::from_millis(5));
        assert_eq!(q.add_rate_limited("k"), Duration::from_millis(10));
        q.forget(&"k");
        assert_eq!(q.add_rate_limited("k"), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn failure_counts_are_bounded() {
        let q = WorkQueue::with_failure_cap(2);
        q.add_rate_limited("a");
        q.add_rate_limited("a");
        q.add_rate_limited("b");
        assert_eq!(q.lock().failures.len(), 2);

        // "a" and "b" sit behind their timers, so a third key evicts both
        q.add_rate_limited("c");
        let inner = q.lock();
        assert_eq!(inner.failures.len(), 1);
        assert_eq!(inner.failures.get("c"), Some(&1));
        drop(inner);
        assert_eq!(q.add_rate_limited("a"), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn eviction_keeps_counts_of_keys_in_flight() {
        let q = WorkQueue::with_failure_cap(2);
        q.add("busy");
        let busy = q.get().await.unwrap();
        q.add_rate_limited(busy);
        q.add_rate_limited("idle");

        q.add_rate_limited("new");
        let inner = q.lock();
        assert!(inner.failures.contains_key("busy"));
        assert!(!inner.failures.contains_key("idle"));
        assert!(inner.failures.contains_key("new"));
    }
}
