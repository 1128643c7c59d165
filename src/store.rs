//! The request cache: memoized fetch results plus in-flight deduplication.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use regex::Regex;
use tokio::sync::{RwLock, oneshot};
use tracing::debug;

use crate::entry::CacheEntry;
use crate::error::FetchError;
use crate::utils::now_ms;

/// Time-to-live applied when [`ObtainOptions::ttl_ms`] is unset.
pub const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;

/// Type-erased settled value shared between all waiters of one fetch.
type SharedValue = Arc<dyn Any + Send + Sync>;

/// Future every concurrent caller for the same key awaits.
type InFlightFetch = Shared<BoxFuture<'static, Result<SharedValue, FetchError>>>;

/// Options for [`RequestCache::obtain`].
#[derive(Debug, Clone, Default)]
pub struct ObtainOptions {
    /// Time in milliseconds the settled value stays live.
    /// Defaults to [`DEFAULT_TTL_MS`].
    pub ttl_ms: Option<i64>,

    /// Do not trust a live cached value; go back to the origin.
    ///
    /// An operation already in flight for the key is still joined instead of
    /// starting a second one, so the settled value can predate this call.
    pub force_refresh: bool,
}

/// Pattern for bulk invalidation: a literal substring or a regular
/// expression matched against each currently stored key.
pub enum KeyPattern {
    Literal(String),
    Regex(Regex),
}

impl KeyPattern {
    fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Literal(fragment) => key.contains(fragment.as_str()),
            KeyPattern::Regex(re) => re.is_match(key),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(fragment: &str) -> Self {
        KeyPattern::Literal(fragment.to_string())
    }
}

impl From<String> for KeyPattern {
    fn from(fragment: String) -> Self {
        KeyPattern::Literal(fragment)
    }
}

impl From<Regex> for KeyPattern {
    fn from(re: Regex) -> Self {
        KeyPattern::Regex(re)
    }
}

/// Snapshot of the currently cached key set, for introspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of settled entries.
    pub size: usize,
    /// Cached keys in ascending order. Keys with only an in-flight
    /// operation and no settled entry are not included.
    pub keys: Vec<String>,
}

/// In-process cache of fetch results with single-flight semantics.
///
/// `RequestCache` is the single source of truth for "do we already have
/// this, or is someone already fetching it". Concurrent [`obtain`] calls for
/// the same key share one underlying operation and settle with identical
/// results; settled values are served from cache until their TTL elapses.
///
/// The key space is one flat shared map with no access control: any
/// consumer may invalidate any key. Construct separate instances where
/// isolation is needed (tests do); a process-wide instance belongs at the
/// application's composition root.
///
/// [`obtain`]: RequestCache::obtain
pub struct RequestCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    in_flight: Arc<RwLock<HashMap<String, InFlightFetch>>>,
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCache {
    pub fn new() -> Self {
        RequestCache {
            entries: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the value for `key`, running `operation` when needed.
    ///
    /// - A live cached entry is returned as-is unless
    ///   [`force_refresh`](ObtainOptions::force_refresh) is set; `operation`
    ///   is not invoked.
    /// - When an operation for `key` is already in flight its result is
    ///   shared with this caller, even under `force_refresh`; at most one
    ///   operation per key is outstanding at any instant.
    /// - Otherwise `operation` runs exactly once. Success writes a new entry
    ///   expiring at `now + ttl`; failure writes nothing and the error is
    ///   handed to every waiter. The in-flight registration is removed
    ///   unconditionally once settled. No retries.
    ///
    /// A started operation always runs to completion on a background task,
    /// even if every caller stops waiting.
    pub async fn obtain<V, F, Fut>(
        &self,
        key: &str,
        operation: F,
        options: ObtainOptions,
    ) -> Result<V, FetchError>
    where
        V: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        if !options.force_refresh {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if entry.is_live(now_ms()) {
                    debug!(key, "serving live cache entry");
                    return entry.value::<V>();
                }
            }
        }

        let fetch = {
            let mut in_flight = self.in_flight.write().await;
            match in_flight.get(key) {
                Some(existing) => {
                    debug!(key, "joining in-flight request");
                    existing.clone()
                }
                None => {
                    debug!(key, "starting fetch");
                    let ttl_ms = options.ttl_ms.unwrap_or(DEFAULT_TTL_MS);
                    let fetch = self.start_fetch(key, operation(), ttl_ms);
                    in_flight.insert(key.to_string(), fetch.clone());
                    fetch
                }
            }
        };

        let value = fetch.await?;
        value.downcast::<V>().map(|typed| (*typed).clone()).map_err(|_| {
            FetchError::Decode("shared fetch settled with a different type than requested".to_string())
        })
    }

    /// Run `operation` to completion on a spawned task and hand back a
    /// future all waiters for the key can share.
    ///
    /// The task writes the entry and drops the in-flight registration before
    /// waking any waiter, so a follow-up `obtain` observes the settled entry.
    fn start_fetch<V, Fut>(&self, key: &str, operation: Fut, ttl_ms: i64) -> InFlightFetch
    where
        V: Send + Sync + 'static,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        let in_flight = Arc::clone(&self.in_flight);
        let key = key.to_string();
        let (tx, rx) = oneshot::channel::<Result<SharedValue, FetchError>>();

        tokio::spawn(async move {
            let settled: Result<SharedValue, FetchError> = match operation.await {
                Ok(value) => {
                    let value: SharedValue = Arc::new(value);
                    let now = now_ms();
                    entries.write().await.insert(
                        key.clone(),
                        CacheEntry::from_shared(Arc::clone(&value), now, now + ttl_ms),
                    );
                    Ok(value)
                }
                Err(err) => Err(err),
            };
            in_flight.write().await.remove(&key);
            let _ = tx.send(settled);
        });

        rx.map(|settled| match settled {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transport(
                "fetch task dropped before settling".to_string(),
            )),
        })
        .boxed()
        .shared()
    }

    /// Drop the entry for exactly `key`. No-op when absent.
    pub async fn invalidate(&self, key: &str) {
        if self.entries.write().await.remove(key).is_some() {
            debug!(key, "invalidated cache entry");
        }
    }

    /// Drop every currently stored entry whose key matches `pattern`.
    ///
    /// Matching runs against the current key set only; keys written later
    /// are unaffected.
    pub async fn invalidate_matching(&self, pattern: impl Into<KeyPattern>) {
        let pattern = pattern.into();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        debug!(
            removed = before - entries.len(),
            "invalidated matching cache entries"
        );
    }

    /// Forget all entries and all in-flight registrations.
    ///
    /// Operations already started are not cancelled; they run to completion,
    /// their waiters still settle, and an eventual success still writes into
    /// the emptied map.
    pub async fn reset(&self) {
        self.entries.write().await.clear();
        self.in_flight.write().await.clear();
    }

    /// Entry count and the sorted list of currently cached keys.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        CacheStats {
            size: entries.len(),
            keys,
        }
    }
}
