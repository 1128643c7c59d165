use std::any::Any;
use std::sync::Arc;

use crate::error::FetchError;

/// A cache entry holding one settled value and its expiry bookkeeping.
///
/// Entries are type-erased so a single [`RequestCache`](crate::RequestCache)
/// can hold payloads of different types side by side. The value is stored as
/// an `Arc<dyn Any>` which clones cheaply (reference count bump) and
/// downcasts back to the concrete type without serialization overhead.
///
/// An entry is never mutated in place; a later successful fetch for the same
/// key replaces it wholesale.
#[derive(Clone)]
pub struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,

    /// Unix timestamp in milliseconds at which the value settled.
    stored_at: i64,

    /// Unix timestamp in milliseconds.
    /// At or after this time the entry no longer counts as live and the next
    /// read goes back to the origin.
    expires_at: i64,
}

impl CacheEntry {
    /// Create an entry from an owned value.
    pub fn new<V>(value: V, stored_at: i64, expires_at: i64) -> Self
    where
        V: Send + Sync + 'static,
    {
        CacheEntry {
            value: Arc::new(value),
            stored_at,
            expires_at,
        }
    }

    /// Create an entry from an already type-erased value.
    pub(crate) fn from_shared(
        value: Arc<dyn Any + Send + Sync>,
        stored_at: i64,
        expires_at: i64,
    ) -> Self {
        CacheEntry {
            value,
            stored_at,
            expires_at,
        }
    }

    pub fn stored_at(&self) -> i64 {
        self.stored_at
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// A live entry may be served without consulting the origin.
    pub fn is_live(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }

    /// Downcast the stored value back to its concrete type.
    ///
    /// Fails with a decode error when the entry was written with a different
    /// type than the caller requests.
    pub fn value<V>(&self) -> Result<V, FetchError>
    where
        V: Clone + Send + Sync + 'static,
    {
        Arc::clone(&self.value)
            .downcast::<V>()
            .map(|typed| (*typed).clone())
            .map_err(|_| {
                FetchError::Decode("cached value does not have the requested type".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_type_erasure() {
        let entry = CacheEntry::new("hello".to_string(), 1_000, 2_000);
        let value: String = entry.value().unwrap();
        assert_eq!(value, "hello");
        assert_eq!(entry.stored_at(), 1_000);
        assert_eq!(entry.expires_at(), 2_000);
    }

    #[test]
    fn test_downcast_to_wrong_type_is_a_decode_error() {
        let entry = CacheEntry::new(42_u32, 0, 1_000);
        let result = entry.value::<String>();
        assert!(matches!(result, Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_liveness_is_strictly_before_expiry() {
        let entry = CacheEntry::new((), 0, 1_000);
        assert!(entry.is_live(999));
        assert!(!entry.is_live(1_000));
        assert!(!entry.is_live(1_001));
    }
}
