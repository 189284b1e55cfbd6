//! Type-erased notifications the cache emits on every query lifecycle
//! transition, so introspection tooling (the devtools crate) can subscribe
//! to a single observer instead of being generic over every `(K, V)` the
//! application instantiates.

use crate::query::Query;
use crate::{QueryKey, QueryOptions, QueryValue};

pub type CacheKey = String;

pub fn make_cache_key<K: std::fmt::Debug>(key: &K) -> CacheKey {
    format!("{key:?}")
}

#[derive(Clone, Debug)]
pub struct CacheEventValue {
    pub key: CacheKey,
    pub state: String,
}

#[derive(Clone, Debug)]
pub enum CacheEvent {
    Created(CacheEventValue),
    Updated(CacheEventValue),
    Removed(CacheKey),
    ObserverAdded(CacheKey, QueryOptions),
    ObserverRemoved(CacheKey),
}

impl CacheEvent {
    pub fn created<K, V>(query: Query<K, V>) -> Self
    where
        K: QueryKey + 'static,
        V: QueryValue + 'static,
    {
        CacheEvent::Created(CacheEventValue {
            key: make_cache_key(query.get_key()),
            state: format!("{:?}", query.get_state()),
        })
    }

    pub fn updated<K, V>(query: Query<K, V>) -> Self
    where
        K: QueryKey + 'static,
        V: QueryValue + 'static,
    {
        CacheEvent::Updated(CacheEventValue {
            key: make_cache_key(query.get_key()),
            state: format!("{:?}", query.get_state()),
        })
    }

    pub fn removed<K: QueryKey + 'static>(key: &K) -> Self {
        CacheEvent::Removed(make_cache_key(key))
    }

    pub fn observer_added<K: QueryKey + 'static>(key: &K, options: QueryOptions) -> Self {
        CacheEvent::ObserverAdded(make_cache_key(key), options)
    }

    pub fn observer_removed<K: QueryKey + 'static>(key: &K) -> Self {
        CacheEvent::ObserverRemoved(make_cache_key(key))
    }
}

pub trait CacheObserver {
    fn process_cache_event(&self, event: CacheEvent);
}
