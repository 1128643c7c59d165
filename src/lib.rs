//! fetch-cache - request-cache coordination for asynchronous fetch operations
//!
//! This library provides the data-loading core of an application:
//! - Memoization of fetch results keyed by opaque strings, with TTL expiry
//! - Single-flight deduplication of concurrent requests for the same key
//! - A per-resource state machine with stale-while-revalidate semantics,
//!   optimistic local mutation and forced revalidation
//! - A write executor that invalidates affected cache keys on success
//!
//! # Example
//!
//! ```ignore
//! use fetch_cache::{JsonClient, RequestCache, Resource, ResourceOptions, derive_key};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Arc::new(RequestCache::new());
//!     let client = JsonClient::new("https://api.example.com").with_credentials("token");
//!
//!     // One coordinator per logical resource subscription.
//!     let key = derive_key("/manuals", &[("tenant", Some("acme".into()))]);
//!     let manuals: Resource<Vec<Manual>> = Resource::new(
//!         Arc::clone(&cache),
//!         Some(&key),
//!         Arc::new(client.clone().into_fetcher()),
//!         ResourceOptions::default(),
//!     );
//!
//!     // Concurrent subscribers of the same key share one underlying fetch.
//!     let snapshot = manuals.snapshot();
//!     if let Some(data) = snapshot.data {
//!         println!("{} manuals", data.len());
//!     }
//! }
//! ```

mod entry;
mod error;
mod http;
mod key;
mod lock;
mod mutation;
mod resource;
mod state;
mod store;
mod utils;

// Re-export public API
pub use entry::CacheEntry;
pub use error::FetchError;
pub use http::{JsonClient, JsonFetcher};
pub use key::{ParamValue, derive_key};
pub use mutation::{MutateOptions, MutationExecutor, OnError, OnSuccess};
pub use resource::{FnFetcher, Fetcher, Resource, ResourceOptions};
pub use state::{ResourceEvent, ResourceState};
pub use store::{CacheStats, DEFAULT_TTL_MS, KeyPattern, ObtainOptions, RequestCache};
