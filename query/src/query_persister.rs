//! Generic per-query persistence hook used by [`crate::query_cache::QueryCache`]
//! to rehydrate a single query's raw state ahead of its first fetch. This is
//! distinct from, and secondary to, the normalized persistence the store
//! façade performs through a [`crate::kv::KvStore`] — that path persists
//! entity bodies once and shares them across every query that references
//! them, while a `QueryPersister` persists one query's serialized state in
//! isolation. No client registers one by default.

use futures::future::LocalBoxFuture;

pub type Serialized = String;

/// Lets `query_cache` round-trip a query's state through `Serialized` with
/// a plain `.try_into()` regardless of the value type it's caching.
impl<V: serde::de::DeserializeOwned> TryFrom<Serialized> for crate::QueryData<V> {
    type Error = serde_json::Error;

    fn try_from(serialized: Serialized) -> Result<Self, Self::Error> {
        serde_json::from_str(&serialized)
    }
}

pub trait QueryPersister {
    fn persist<'a>(&'a self, key: &'a str, value: Serialized) -> LocalBoxFuture<'a, ()>;
    fn retrieve<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Option<Serialized>>;
    fn remove<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, ()>;
    fn clear(&self) -> LocalBoxFuture<'static, ()>;
}
