//! Entity Map: the in-memory index from `(typename, id)` identity to the
//! current normalized record, ref-counted so a shared entity survives as
//! long as any query (or any other entity) still points at it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use leptos::prelude::*;

use crate::fingerprint::fnv1a;
use crate::parser::normalized::{collect_entity_refs, Normalized};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityId {
    Str(String),
    Number(i64),
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Str(s) => write!(f, "{s}"),
            EntityId::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Storage key for an entity: a digest over `(typename, id, shape_key)` so
/// two schema versions of the same logical entity never collide in the KV
/// store.
pub fn entity_key(typename: &str, id: &EntityId, shape_key: u32) -> u32 {
    let desc = format!("{typename}:{id}:{shape_key}");
    fnv1a(desc.as_bytes())
}

pub struct EntityRecord {
    pub typename: String,
    pub id: EntityId,
    pub value: RwSignal<Normalized>,
    pub ref_count: usize,
}

/// The normalized identity index. One instance is shared by every query
/// belonging to a `QueryClient`.
#[derive(Clone)]
pub struct EntityMap {
    inner: Arc<RwLock<HashMap<u32, EntityRecord>>>,
}

impl Default for EntityMap {
    fn default() -> Self {
        EntityMap {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl EntityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a freshly parsed entity body into the map, creating the
    /// reactive record on first sight and updating it in place afterwards
    /// so every signal reading through an `EntityRef` observes the change.
    pub fn upsert(&self, key: u32, typename: String, id: EntityId, value: Normalized) {
        let mut map = self.inner.write().unwrap();
        match map.get(&key) {
            Some(existing) => existing.value.set(value),
            None => {
                map.insert(
                    key,
                    EntityRecord {
                        typename,
                        id,
                        value: RwSignal::new(value),
                        ref_count: 0,
                    },
                );
            }
        }
    }

    pub fn get(&self, key: u32) -> Option<RwSignal<Normalized>> {
        self.inner.read().unwrap().get(&key).map(|r| r.value)
    }

    /// Declared entity type, e.g. `"User"`. Identity metadata, not part of
    /// the reactive body, so reading it does not track.
    pub fn typename(&self, key: u32) -> Option<String> {
        self.inner.read().unwrap().get(&key).map(|r| r.typename.clone())
    }

    pub fn id(&self, key: u32) -> Option<EntityId> {
        self.inner.read().unwrap().get(&key).map(|r| r.id.clone())
    }

    pub fn contains(&self, key: u32) -> bool {
        self.inner.read().unwrap().contains_key(&key)
    }

    pub fn ref_count(&self, key: u32) -> usize {
        self.inner.read().unwrap().get(&key).map(|r| r.ref_count).unwrap_or(0)
    }

    /// Increments ref counts for every key in `refs`.
    pub fn retain_all(&self, refs: &std::collections::HashSet<u32>) {
        let mut map = self.inner.write().unwrap();
        for key in refs {
            if let Some(record) = map.get_mut(key) {
                record.ref_count += 1;
            }
        }
    }

    /// Decrements ref counts for every key in `refs`, cascading to zero-count
    /// entities: their own outgoing refs are released in turn and they are
    /// dropped from the map. Returns the set of keys actually evicted.
    pub fn release_all(&self, refs: &std::collections::HashSet<u32>) -> std::collections::HashSet<u32> {
        let mut evicted = std::collections::HashSet::new();
        let mut queue: Vec<u32> = refs.iter().copied().collect();
        let mut map = self.inner.write().unwrap();
        while let Some(key) = queue.pop() {
            let should_evict = match map.get_mut(&key) {
                Some(record) => {
                    record.ref_count = record.ref_count.saturating_sub(1);
                    record.ref_count == 0
                }
                None => false,
            };
            if should_evict {
                if let Some(record) = map.remove(&key) {
                    let child_refs = collect_entity_refs(&record.value.get_untracked());
                    queue.extend(child_refs);
                    evicted.insert(key);
                }
            }
        }
        evicted
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entity_key_is_stable_and_shape_sensitive() {
        let id = EntityId::Str("u1".into());
        let a = entity_key("User", &id, 1);
        let b = entity_key("User", &id, 1);
        let c = entity_key("User", &id, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let map = EntityMap::new();
        let key = entity_key("User", &EntityId::Str("u1".into()), 1);
        map.upsert(
            key,
            "User".into(),
            EntityId::Str("u1".into()),
            Normalized::Object(vec![("name".into(), Normalized::Str("Ada".into()))]),
        );
        assert!(map.contains(key));
        let sig = map.get(key).unwrap();
        assert_eq!(
            sig.get_untracked(),
            Normalized::Object(vec![("name".into(), Normalized::Str("Ada".into()))])
        );
    }

    #[test]
    fn cascade_release_evicts_only_at_zero() {
        let map = EntityMap::new();
        let child_key = entity_key("Profile", &EntityId::Str("p1".into()), 1);
        map.upsert(child_key, "Profile".into(), EntityId::Str("p1".into()), Normalized::Null);
        let parent_refs: std::collections::HashSet<u32> = [child_key].into_iter().collect();
        map.retain_all(&parent_refs);
        map.retain_all(&parent_refs);
        assert_eq!(map.ref_count(child_key), 2);

        let evicted_first = map.release_all(&parent_refs);
        assert!(evicted_first.is_empty());
        assert!(map.contains(child_key));

        let evicted_second = map.release_all(&parent_refs);
        assert!(evicted_second.contains(&child_key));
        assert!(!map.contains(child_key));
    }
}
