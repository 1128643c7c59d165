//! One-shot write operations with success-driven cache invalidation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::FetchError;
use crate::http::JsonClient;
use crate::lock::{rw_read, rw_write};
use crate::store::RequestCache;

/// Callback invoked with the decoded result of a successful write.
pub type OnSuccess<T> = Box<dyn FnOnce(&T) + Send>;
/// Callback invoked with the error of a failed write.
pub type OnError = Box<dyn FnOnce(&FetchError) + Send>;

/// Options for [`MutationExecutor::execute`].
pub struct MutateOptions<T> {
    /// HTTP method for the write. Defaults to POST.
    pub method: Method,

    /// Cache keys invalidated after a successful write, so subsequent reads
    /// of those resources are forced to refetch.
    pub invalidate_keys: Vec<String>,

    pub on_success: Option<OnSuccess<T>>,
    pub on_error: Option<OnError>,
}

impl<T> Default for MutateOptions<T> {
    fn default() -> Self {
        MutateOptions {
            method: Method::POST,
            invalidate_keys: Vec::new(),
            on_success: None,
            on_error: None,
        }
    }
}

/// Performs a single write against an endpoint and tracks its own
/// loading/error lifecycle, independent of the read path's state.
///
/// Calls are deliberately not deduplicated: every [`execute`] issues exactly
/// one request, in contrast to the single-flight read path of
/// [`RequestCache::obtain`]. No retries either way.
///
/// [`execute`]: MutationExecutor::execute
pub struct MutationExecutor {
    client: JsonClient,
    cache: Arc<RequestCache>,
    loading: AtomicBool,
    error: RwLock<Option<FetchError>>,
}

impl MutationExecutor {
    pub fn new(client: JsonClient, cache: Arc<RequestCache>) -> Self {
        MutationExecutor {
            client,
            cache,
            loading: AtomicBool::new(false),
            error: RwLock::new(None),
        }
    }

    /// True while a write issued by this executor is running.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Error of the most recent failed write, cleared when the next one
    /// starts.
    pub fn error(&self) -> Option<FetchError> {
        rw_read(&self.error, "error").clone()
    }

    /// Perform one write. `variables` is serialized as the JSON request
    /// body.
    ///
    /// On success every key in
    /// [`invalidate_keys`](MutateOptions::invalidate_keys) is dropped from
    /// the cache and `on_success` runs with the decoded value. On failure
    /// the error is recorded locally and handed to `on_error`; no cache key
    /// is touched. Resolves to `None` on failure. The loading flag is
    /// cleared as the final step regardless of outcome.
    pub async fn execute<T, B>(
        &self,
        endpoint: &str,
        variables: &B,
        options: MutateOptions<T>,
    ) -> Option<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        self.loading.store(true, Ordering::SeqCst);
        *rw_write(&self.error, "execute.clear") = None;

        let outcome = self
            .client
            .send_json::<T, B>(options.method, endpoint, variables)
            .await;

        let result = match outcome {
            Ok(value) => {
                for key in &options.invalidate_keys {
                    self.cache.invalidate(key).await;
                }
                if let Some(on_success) = options.on_success {
                    on_success(&value);
                }
                Some(value)
            }
            Err(err) => {
                warn!(endpoint, error = %err, "write request failed");
                *rw_write(&self.error, "execute.error") = Some(err.clone());
                if let Some(on_error) = options.on_error {
                    on_error(&err);
                }
                None
            }
        };

        self.loading.store(false, Ordering::SeqCst);
        result
    }
}
