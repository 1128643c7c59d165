//! Per-resource fetch coordination.
//!
//! A [`Resource`] drives one logical resource (an endpoint plus query
//! parameters, identified by its cache key) through loading, revalidating
//! and settled states on top of the shared [`RequestCache`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::FetchError;
use crate::lock::{rw_read, rw_write};
use crate::state::{ResourceEvent, ResourceState};
use crate::store::{ObtainOptions, RequestCache};

/// Asynchronous source of a resource's value, keyed by the cache key.
///
/// Implementations turn non-success responses into a [`FetchError`] before
/// returning; the cache layer never sees raw transport details.
#[async_trait]
pub trait Fetcher<V>: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<V, FetchError>;
}

/// Adapter implementing [`Fetcher`] from a plain async closure.
///
/// Mostly useful in tests and for non-HTTP origins:
///
/// ```ignore
/// let fetcher = Arc::new(FnFetcher::new(|key: String| async move {
///     db.load(&key).await
/// }));
/// ```
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        FnFetcher { f }
    }
}

#[async_trait]
impl<V, F, Fut> Fetcher<V> for FnFetcher<F>
where
    V: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<V, FetchError>> + Send,
{
    async fn fetch(&self, key: &str) -> Result<V, FetchError> {
        (self.f)(key.to_string()).await
    }
}

/// Construction options for [`Resource`].
pub struct ResourceOptions<V> {
    /// TTL for values this resource writes into the cache.
    /// `None` uses the cache default.
    pub ttl_ms: Option<i64>,

    /// Suppress the automatic fetch on construction and key change.
    /// [`Resource::refresh`] still works.
    pub manual: bool,

    /// Value shown before the first fetch settles.
    pub initial_data: Option<V>,
}

impl<V> Default for ResourceOptions<V> {
    fn default() -> Self {
        ResourceOptions {
            ttl_ms: None,
            manual: false,
            initial_data: None,
        }
    }
}

struct Inner<V> {
    cache: Arc<RequestCache>,
    fetcher: Arc<dyn Fetcher<V>>,
    ttl_ms: Option<i64>,
    manual: bool,
    initial_data: Option<V>,
    key: RwLock<Option<String>>,
    state: RwLock<ResourceState<V>>,
    /// Bumped on key change and teardown. A settlement carrying an older
    /// epoch is discarded instead of touching state.
    epoch: AtomicU64,
}

/// Coordinator for one logical resource subscription.
///
/// Owns the consumer-facing `{data, error, is_loading, is_validating}`
/// snapshot and the imperative controls around it: forced revalidation,
/// optimistic local mutation and key switching. All reads go through the
/// shared [`RequestCache`], so concurrent subscribers of the same key share
/// one underlying fetch.
///
/// Dropping the resource (or calling [`close`](Resource::close)) stops it
/// from observing fetches still in flight; those run to completion and their
/// settlement is discarded.
pub struct Resource<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Resource<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a coordinator for `key`.
    ///
    /// A `None` key issues no fetch and reports `is_loading == false`
    /// immediately. With a key configured, the first fetch cycle starts
    /// right away unless `manual` is set.
    ///
    /// Must be called from within a Tokio runtime: fetch cycles complete on
    /// spawned tasks.
    pub fn new(
        cache: Arc<RequestCache>,
        key: Option<&str>,
        fetcher: Arc<dyn Fetcher<V>>,
        options: ResourceOptions<V>,
    ) -> Self {
        let inner = Arc::new(Inner {
            cache,
            fetcher,
            ttl_ms: options.ttl_ms,
            manual: options.manual,
            initial_data: options.initial_data.clone(),
            key: RwLock::new(key.map(str::to_string)),
            state: RwLock::new(ResourceState::idle(options.initial_data)),
            epoch: AtomicU64::new(0),
        });
        if !inner.manual {
            Inner::trigger(&inner, false);
        }
        Resource { inner }
    }

    /// Current observable state.
    pub fn snapshot(&self) -> ResourceState<V> {
        rw_read(&self.inner.state, "snapshot").clone()
    }

    /// Point the coordinator at a different resource key.
    ///
    /// State is reset, an unsettled fetch for the old key is discarded on
    /// arrival, and a non-`None` key starts exactly one new fetch cycle
    /// unless the coordinator is in manual mode.
    pub fn set_key(&self, key: Option<&str>) {
        let inner = &self.inner;
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        *rw_write(&inner.key, "set_key") = key.map(str::to_string);
        inner.apply(ResourceEvent::Reset {
            initial_data: inner.initial_data.clone(),
        });
        if !inner.manual {
            Inner::trigger(inner, false);
        }
    }

    /// Fetch now, bypassing any live cached value.
    ///
    /// Available in manual mode too. Fetch failures land in the observable
    /// state rather than the returned result; only the absence of a
    /// configured key is reported to the caller directly. Joins an operation
    /// already in flight for the key instead of starting a second one.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        let inner = &self.inner;
        let Some(key) = inner.current_key() else {
            return Err(FetchError::NoKey);
        };
        let epoch = inner.epoch.load(Ordering::SeqCst);
        inner.start_cycle();
        inner.settle(key, epoch, true).await;
        Ok(())
    }

    /// Replace the visible value locally, then invalidate the cache entry
    /// for the current key so the next fetch is guaranteed to hit the
    /// origin rather than stale cached data.
    ///
    /// With `None` the visible value is left as-is and only the
    /// invalidation runs.
    pub async fn mutate(&self, value: Option<V>) {
        let inner = &self.inner;
        inner.apply(ResourceEvent::MutatedLocally(value));
        if let Some(key) = inner.current_key() {
            inner.cache.invalidate(&key).await;
        }
    }

    /// Stop observing. Fetches already in flight keep running; their
    /// settlement is discarded without touching state.
    pub fn close(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl<V> Drop for Resource<V> {
    fn drop(&mut self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl<V> Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn current_key(&self) -> Option<String> {
        rw_read(&self.key, "current_key").clone()
    }

    fn apply(&self, event: ResourceEvent<V>) {
        let mut state = rw_write(&self.state, "apply");
        let next = state.clone().apply(event);
        *state = next;
    }

    /// Record fetch-start, deciding initial-loading vs revalidating.
    fn start_cycle(&self) {
        let has_data = rw_read(&self.state, "start_cycle").data.is_some();
        self.apply(ResourceEvent::FetchStarted { has_data });
    }

    /// Kick off one background fetch cycle for the current key.
    fn trigger(inner: &Arc<Self>, force_refresh: bool) {
        let Some(key) = inner.current_key() else {
            return;
        };
        let epoch = inner.epoch.load(Ordering::SeqCst);
        inner.start_cycle();
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            inner.settle(key, epoch, force_refresh).await;
        });
    }

    /// Run the fetch through the cache and fold the outcome into state,
    /// unless the subscription moved on while it was in flight.
    async fn settle(&self, key: String, epoch: u64, force_refresh: bool) {
        let fetcher = Arc::clone(&self.fetcher);
        let fetch_key = key.clone();
        let result = self
            .cache
            .obtain(
                &key,
                move || async move { fetcher.fetch(&fetch_key).await },
                ObtainOptions {
                    ttl_ms: self.ttl_ms,
                    force_refresh,
                },
            )
            .await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(key, "discarding settled fetch for a detached subscription");
            return;
        }

        match result {
            Ok(value) => self.apply(ResourceEvent::FetchSucceeded(value)),
            Err(err) => self.apply(ResourceEvent::FetchFailed(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        value: &str,
        delay_ms: u64,
    ) -> Arc<dyn Fetcher<String>> {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        Arc::new(FnFetcher::new(move |_key: String| {
            let calls = Arc::clone(&calls);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Ok::<String, FetchError>(value)
            }
        }))
    }

    fn failing_fetcher(message: &str) -> Arc<dyn Fetcher<String>> {
        let message = message.to_string();
        Arc::new(FnFetcher::new(move |_key: String| {
            let message = message.clone();
            async move { Err::<String, _>(FetchError::Transport(message)) }
        }))
    }

    #[tokio::test]
    async fn test_null_key_never_fetches() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(
            Arc::clone(&cache),
            None,
            counting_fetcher(&calls, "x", 0),
            ResourceOptions::default(),
        );

        let state = resource.snapshot();
        assert!(!state.is_loading);
        assert!(!state.is_validating);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(resource.refresh().await, Err(FetchError::NoKey)));
    }

    #[tokio::test]
    async fn test_initial_fetch_cycle() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(
            Arc::clone(&cache),
            Some("/manuals/1"),
            counting_fetcher(&calls, "manual-1", 30),
            ResourceOptions::default(),
        );

        // First fetch with no data yet: initial-loading.
        let state = resource.snapshot();
        assert!(state.is_loading);
        assert!(state.is_validating);
        assert!(state.data.is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;

        let state = resource.snapshot();
        assert_eq!(state.data.as_deref(), Some("manual-1"));
        assert!(state.error.is_none());
        assert!(!state.is_loading);
        assert!(!state.is_validating);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_mode_waits_for_refresh() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(
            Arc::clone(&cache),
            Some("/manuals/2"),
            counting_fetcher(&calls, "manual-2", 0),
            ResourceOptions {
                manual: true,
                ..ResourceOptions::default()
            },
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!resource.snapshot().is_validating);

        resource.refresh().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resource.snapshot().data.as_deref(), Some("manual-2"));
    }

    #[tokio::test]
    async fn test_error_keeps_stale_data_visible() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(
            Arc::clone(&cache),
            Some("/manuals/3"),
            counting_fetcher(&calls, "good", 0),
            ResourceOptions::default(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(resource.snapshot().data.as_deref(), Some("good"));

        // Swap the origin for a failing one by moving to a key whose fetch
        // fails, then back: simpler to exercise through a second resource
        // sharing the cache.
        let failing = Resource::new(
            Arc::clone(&cache),
            Some("/manuals/3"),
            failing_fetcher("down"),
            ResourceOptions {
                manual: true,
                initial_data: Some("good".to_string()),
                ..ResourceOptions::default()
            },
        );
        failing.refresh().await.unwrap();

        let state = failing.snapshot();
        assert_eq!(state.data.as_deref(), Some("good"));
        assert!(matches!(state.error, Some(FetchError::Transport(_))));
        assert!(!state.is_loading);
        assert!(!state.is_validating);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_live_cache_entry() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(
            Arc::clone(&cache),
            Some("/manuals"),
            counting_fetcher(&calls, "v", 0),
            ResourceOptions::default(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Entry is still live; a plain obtain would be served from cache,
        // refresh goes back to the origin anyway.
        resource.refresh().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mutate_updates_data_and_invalidates_the_key() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(
            Arc::clone(&cache),
            Some("/manuals/5"),
            counting_fetcher(&calls, "server", 0),
            ResourceOptions::default(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.stats().await.keys, vec!["/manuals/5".to_string()]);

        resource.mutate(Some("optimistic".to_string())).await;

        let state = resource.snapshot();
        assert_eq!(state.data.as_deref(), Some("optimistic"));
        assert!(state.error.is_none());
        // The entry is gone, so the next fetch hits the origin even though
        // the TTL had not elapsed.
        assert_eq!(cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_key_change_resets_state_and_fetches_once() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(
            Arc::clone(&cache),
            Some("/a"),
            counting_fetcher(&calls, "value", 0),
            ResourceOptions::default(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        resource.set_key(Some("/b"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(resource.snapshot().data.as_deref(), Some("value"));

        // Null key: reset without a new fetch.
        resource.set_key(None);
        let state = resource.snapshot();
        assert!(state.data.is_none());
        assert!(!state.is_validating);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_late_settlement_after_close_is_discarded() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::new(
            Arc::clone(&cache),
            Some("/slow"),
            counting_fetcher(&calls, "late", 60),
            ResourceOptions::default(),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        resource.close();

        tokio::time::sleep(Duration::from_millis(90)).await;
        // The fetch ran to completion but never touched the state.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let state = resource.snapshot();
        assert!(state.data.is_none());
        assert!(state.is_validating);
    }
}
