use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::Notify;

const FAST_DELAY: Duration = Duration::from_secs(1);
const SLOW_DELAY: Duration = Duration::from_secs(60);
const MAX_FAST_ATTEMPTS: usize = 5;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits `fast` for the first `max_fast_attempts` consecutive failures of a key and `slow` afterwards.
pub struct FastSlowRateLimiter<K> {
    fast: Duration,
    slow: Duration,
    max_fast_attempts: usize,
    failures: Mutex<HashMap<K, usize>>,
}

impl<K> Default for FastSlowRateLimiter<K> {
    fn default() -> Self {
        Self::new(FAST_DELAY, SLOW_DELAY, MAX_FAST_ATTEMPTS)
    }
}

impl<K> FastSlowRateLimiter<K> {
    pub fn new(fast: Duration, slow: Duration, max_fast_attempts: usize) -> Self {
        Self {
            fast,
            slow,
            max_fast_attempts,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Hash + Eq + Clone> FastSlowRateLimiter<K> {
    pub fn when(&self, key: &K) -> Duration {
        let mut failures = lock(&self.failures);
        let attempts = failures.entry(key.clone()).or_default();
        *attempts += 1;
        if *attempts <= self.max_fast_attempts {
            self.fast
        } else {
            self.slow
        }
    }

    pub fn forget(&self, key: &K) {
        lock(&self.failures).remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> usize {
        lock(&self.failures).get(key).copied().unwrap_or_default()
    }
}

struct QueueState<K, V> {
    queue: VecDeque<K>,
    pending: HashMap<K, V>,
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K, V> {
    state: Mutex<QueueState<K, V>>,
    notify: Notify,
    limiter: FastSlowRateLimiter<K>,
}

/// Deduplicating work queue keyed by `K`.
///
/// A key is queued at most once and the most recent payload added for it is the one handed out. A key taken by
/// [`RateLimitingQueue::get`] is not handed out again until [`RateLimitingQueue::done`] is called for it; adds in
/// the meantime are parked and the key is queued again on `done`.
pub struct RateLimitingQueue<K, V = ()> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for RateLimitingQueue<K, V> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K, V> Default for RateLimitingQueue<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    fn default() -> Self {
        Self::new(FastSlowRateLimiter::default())
    }
}

impl<K, V> RateLimitingQueue<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    pub fn new(limiter: FastSlowRateLimiter<K>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    pending: HashMap::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    pub fn add(&self, key: K, value: V) {
        self.insert(key, value, true);
    }

    /// Re-adds a failed item once the rate limiter allows it. A payload added for the key in the meantime is
    /// newer and is kept.
    pub fn add_rate_limited(&self, key: K, value: V) {
        let delay = self.inner.limiter.when(&key);
        self.add_after(key, value, delay);
    }

    pub fn add_after(&self, key: K, value: V, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.insert(key, value, false);
        });
    }

    fn insert(&self, key: K, value: V, replace: bool) {
        let mut state = lock(&self.inner.state);
        if state.shutting_down {
            return;
        }
        if let Some(pending) = state.pending.get_mut(&key) {
            if replace {
                *pending = value;
            }
            return;
        }
        state.pending.insert(key.clone(), value);
        if !state.processing.contains(&key) {
            state.queue.push_back(key);
            self.inner.notify.notify_one();
        }
    }

    /// Waits for the next item. Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<(K, V)> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = lock(&self.inner.state);
                while let Some(key) = state.queue.pop_front() {
                    if let Some(value) = state.pending.remove(&key) {
                        state.processing.insert(key.clone());
                        return Some((key, value));
                    }
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn done(&self, key: &K) {
        let mut state = lock(&self.inner.state);
        state.processing.remove(key);
        if state.pending.contains_key(key) {
            state.queue.push_back(key.clone());
            self.inner.notify.notify_one();
        }
    }

    pub fn forget(&self, key: &K) {
        self.inner.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> usize {
        self.inner.limiter.num_requeues(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        lock(&self.inner.state).shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.inner.state).shutting_down
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[test]
    fn test_rate_limiter_escalates_and_resets() {
        let limiter = FastSlowRateLimiter::default();
        for _ in 0..MAX_FAST_ATTEMPTS {
            assert_eq!(limiter.when(&"ns/up1"), FAST_DELAY);
        }
        assert_eq!(limiter.when(&"ns/up1"), SLOW_DELAY);
        assert_eq!(limiter.when(&"ns/up1"), SLOW_DELAY);
        assert_eq!(limiter.num_requeues(&"ns/up1"), MAX_FAST_ATTEMPTS + 2);
        assert_eq!(limiter.when(&"ns/up2"), FAST_DELAY);

        limiter.forget(&"ns/up1");
        assert_eq!(limiter.num_requeues(&"ns/up1"), 0);
        assert_eq!(limiter.when(&"ns/up1"), FAST_DELAY);
    }

    #[tokio::test]
    async fn test_adds_collapse_and_latest_payload_wins() {
        let queue = RateLimitingQueue::default();
        queue.add("ns/up1", 1);
        queue.add("ns/up2", 2);
        queue.add("ns/up1", 3);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some(("ns/up1", 3)));
        assert_eq!(queue.get().await, Some(("ns/up2", 2)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_is_not_redelivered_before_done() {
        let queue = RateLimitingQueue::default();
        queue.add("ns/up1", 1);
        let (key, _) = queue.get().await.unwrap();

        queue.add("ns/up1", 2);
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.get().await, Some(("ns/up1", 2)));
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = RateLimitingQueue::<&str, ()>::default();
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get().await }
        });
        tokio::task::yield_now().await;
        queue.add("ns/svc1", ());
        assert_eq!(waiter.await.unwrap(), Some(("ns/svc1", ())));
    }

    #[tokio::test]
    async fn test_shut_down_drains_then_stops() {
        let queue = RateLimitingQueue::default();
        queue.add("ns/up1", 1);
        queue.shut_down();
        queue.add("ns/up2", 2);

        assert_eq!(queue.get().await, Some(("ns/up1", 1)));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_shut_down_wakes_idle_workers() {
        let queue = RateLimitingQueue::<&str, ()>::default();
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;
        queue.shut_down();
        for worker in workers {
            assert_eq!(worker.await.unwrap(), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_add_is_delayed() {
        let queue = RateLimitingQueue::default();
        let start = Instant::now();
        queue.add_rate_limited("ns/up1", 1);
        assert!(queue.is_empty());

        assert_eq!(queue.get().await, Some(("ns/up1", 1)));
        assert!(start.elapsed() >= FAST_DELAY);
        assert_eq!(queue.num_requeues(&"ns/up1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_add_keeps_newer_payload() {
        let queue = RateLimitingQueue::default();
        queue.add_rate_limited("ns/up1", 1);
        queue.add("ns/up1", 2);

        tokio::time::sleep(FAST_DELAY * 2).await;
        assert_eq!(queue.get().await, Some(("ns/up1", 2)));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tier_after_repeated_failures() {
        let queue = RateLimitingQueue::default();
        for _ in 0..MAX_FAST_ATTEMPTS {
            queue.add_rate_limited("ns/up1", ());
            let (key, ()) = queue.get().await.unwrap();
            queue.done(&key);
        }

        let start = Instant::now();
        queue.add_rate_limited("ns/up1", ());
        queue.get().await.unwrap();
        assert!(start.elapsed() >= SLOW_DELAY);

        queue.done(&"ns/up1");
        queue.forget(&"ns/up1");
        let start = Instant::now();
        queue.add_rate_limited("ns/up1", ());
        queue.get().await.unwrap();
        assert!(start.elapsed() < SLOW_DELAY);
    }
}
