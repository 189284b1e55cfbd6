//! A normalizing, reactive query cache for Leptos: fetched documents are
//! parsed against a declared [`schema::Schema`], entities found inside them
//! are lifted into a shared [`entity::EntityMap`], and every query instance
//! keeps only a graph of references back into that map. Two queries that
//! both mention the same entity observe the same update.

pub mod cache_observer;
pub mod client;
pub mod config;
pub mod definition;
pub mod entity;
pub mod error;
pub mod fingerprint;
mod garbage_collector;
pub mod instant;
pub mod kv;
pub mod pagination;
pub mod parser;
mod query;
pub mod query_cache;
mod query_observer;
pub mod query_persister;
pub mod query_result;
pub mod schema;
pub mod stream;
pub mod transport;
pub mod use_entity_query;
pub mod use_infinite_query;
pub mod use_query;
pub mod use_query_stream;
mod util;

use std::cell::Cell;
use std::time::Duration;

use leptos::prelude::*;

pub use client::QueryClient;
pub use config::ClientConfig;
pub use entity::{EntityId, EntityMap};
pub use error::{QueryError, QueryResult as Fallible};
pub use instant::Instant;
pub use query_result::QueryResult;

/// Marker for types usable as a cache key: cheap to clone, stable to hash,
/// shareable across the threads a resource may be polled on.
pub trait QueryKey: Clone + std::fmt::Debug + Eq + std::hash::Hash + Send + Sync {}
impl<T: Clone + std::fmt::Debug + Eq + std::hash::Hash + Send + Sync> QueryKey for T {}

/// Marker for types usable as a cached value. Requires serde support because
/// a query's state crosses the server/client boundary through a `Resource`
/// and, optionally, a `QueryPersister`.
pub trait QueryValue:
    Clone + std::fmt::Debug + Send + Sync + serde::Serialize + serde::de::DeserializeOwned
{
}
impl<T: Clone + std::fmt::Debug + Send + Sync + serde::Serialize + serde::de::DeserializeOwned> QueryValue for T {}

pub trait RefetchFn: Fn() + Clone + 'static {}
impl<F: Fn() + Clone + 'static> RefetchFn for F {}

/// A value plus the instant it was produced, the unit every non-`Created`
/// query state carries.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct QueryData<V> {
    pub data: V,
    pub updated_at: Instant,
}

impl<V> QueryData<V> {
    pub fn now(data: V) -> Self {
        QueryData {
            data,
            updated_at: Instant::now(),
        }
    }
}

/// The reactive-promise state machine every query instance occupies.
#[derive(Clone, Debug)]
pub enum QueryState<V> {
    Created,
    Loading,
    Fetching(QueryData<V>),
    Loaded(QueryData<V>),
    Invalid(QueryData<V>),
}

impl<V: Clone> QueryState<V> {
    pub fn updated_at(&self) -> Option<Instant> {
        match self {
            QueryState::Created | QueryState::Loading => None,
            QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
                Some(data.updated_at)
            }
        }
    }

    pub fn data(&self) -> Option<&V> {
        match self {
            QueryState::Created | QueryState::Loading => None,
            QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
                Some(&data.data)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResourceOption {
    #[default]
    NonBlocking,
    Blocking,
    Local,
}

/// Per-observer cache policy: how long data stays fresh, how long an
/// unobserved query instance survives before eviction, and an optional
/// background refetch cadence.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    pub refetch_interval: Option<Duration>,
    pub resource_option: Option<ResourceOption>,
}

impl QueryOptions {
    /// Clamps `stale_time` to `gc_time` when the caller set a staleness
    /// window longer than the time the data would survive unobserved —
    /// such data would always look fresh right up until it vanishes.
    pub fn validate(self) -> Self {
        match (self.stale_time, self.gc_time) {
            (Some(stale), Some(gc)) if stale > gc => {
                leptos::logging::warn!(
                    "QueryOptions: stale_time ({stale:?}) exceeds gc_time ({gc:?}); clamping stale_time to gc_time"
                );
                QueryOptions {
                    stale_time: Some(gc),
                    ..self
                }
            }
            _ => self,
        }
    }
}

thread_local! {
    static SUPPRESS_QUERY_LOAD: Cell<bool> = const { Cell::new(false) };
}

/// While suppressed, queries do not spawn fetches on read — set during
/// teardown so a disposed reactive graph cannot schedule work it will never
/// observe the result of.
pub fn query_is_suppressed() -> bool {
    SUPPRESS_QUERY_LOAD.with(|c| c.get())
}

pub fn suppress_query_load(suppress: bool) {
    SUPPRESS_QUERY_LOAD.with(|c| c.set(suppress));
}

/// Installs a [`QueryClient`] into the current reactive owner's context
/// with default configuration.
pub fn provide_query_client() {
    provide_query_client_with_config(ClientConfig::default());
}

pub fn provide_query_client_with_config(config: ClientConfig) {
    let owner = Owner::current().expect("provide_query_client called outside a reactive owner");
    provide_context(QueryClient::new(owner, config));
}

pub fn use_query_client() -> QueryClient {
    use_context::<QueryClient>()
        .expect("No QueryClient found. Call provide_query_client() higher in the component tree.")
}
