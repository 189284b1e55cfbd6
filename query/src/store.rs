//! Store façade: the durable half of the cache. Bridges the in-memory
//! [`EntityMap`] to a [`KvStore`], so a reload can restore exactly the
//! entities a persisted query still needs without replaying every fetch.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::entity::{entity_key, EntityId, EntityMap};
use crate::error::{QueryError, QueryResult};
use crate::instant::Instant;
use crate::kv::KvStore;
use crate::parser::normalized::{collect_entity_refs, Normalized};
use crate::parser::parse::ExtractedEntity;

const ENTITY_PREFIX: &str = "entity:";
const QUERY_PREFIX: &str = "query:";

fn entity_storage_key(key: u32) -> String {
    format!("{ENTITY_PREFIX}{key}")
}

fn query_storage_key(key: u32) -> String {
    format!("{QUERY_PREFIX}{key}")
}

#[derive(Serialize, Deserialize)]
struct PersistedId {
    str: Option<String>,
    number: Option<i64>,
}

impl From<&EntityId> for PersistedId {
    fn from(id: &EntityId) -> Self {
        match id {
            EntityId::Str(s) => PersistedId {
                str: Some(s.clone()),
                number: None,
            },
            EntityId::Number(n) => PersistedId {
                str: None,
                number: Some(*n),
            },
        }
    }
}

impl From<PersistedId> for EntityId {
    fn from(id: PersistedId) -> Self {
        match (id.str, id.number) {
            (Some(s), _) => EntityId::Str(s),
            (_, Some(n)) => EntityId::Number(n),
            _ => EntityId::Str(String::new()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedEntity {
    typename: String,
    id: PersistedId,
    value: Json,
}

/// A query's on-disk envelope: the normalized value plus the instant it was
/// written, so a reload can tell how stale a restored record is without
/// re-deriving an age that isn't recoverable from the entity graph itself.
#[derive(Serialize, Deserialize)]
struct PersistedQuery {
    value: Json,
    updated_at: u64,
}

pub struct Store {
    kv: Arc<dyn KvStore>,
    entity_map: EntityMap,
}

impl Store {
    pub fn new(kv: Arc<dyn KvStore>, entity_map: EntityMap) -> Self {
        Store { kv, entity_map }
    }

    /// Persists a freshly parsed query result: every entity discovered
    /// during the parse is merged into the entity map, ref counts are
    /// incremented for everything the query now points at, entities the
    /// previous version of this query held but the new one dropped are
    /// released (cascading further evictions the same way
    /// [`Store::delete_document`] does), and both the entities and the
    /// query's own normalized value are written to disk.
    pub async fn save_document(
        &self,
        query_key: u32,
        value: &Normalized,
        extracted: Vec<ExtractedEntity>,
    ) -> QueryResult<()> {
        let previous = self.load_query(query_key).await?;

        for entity in &extracted {
            self.entity_map
                .upsert(entity.key, entity.typename.clone(), entity.id.clone(), entity.value.clone());
            self.entity_map.retain_all(&entity.ref_ids);

            let persisted = PersistedEntity {
                typename: entity.typename.clone(),
                id: PersistedId::from(&entity.id),
                value: entity.value.to_json(),
            };
            let raw = serde_json::to_string(&persisted).map_err(|_| QueryError::CacheCorruption(entity.key))?;
            self.kv.set(&entity_storage_key(entity.key), raw).await;
        }

        let top_level_refs = collect_entity_refs(value);
        self.entity_map.retain_all(&top_level_refs);

        if let Some((previous_value, _)) = previous {
            let previous_refs = collect_entity_refs(&previous_value);
            let dropped: std::collections::HashSet<u32> =
                previous_refs.difference(&top_level_refs).copied().collect();
            let evicted = self.entity_map.release_all(&dropped);
            for key in &evicted {
                self.kv.remove(&entity_storage_key(*key)).await;
            }
        }

        let persisted = PersistedQuery {
            value: value.to_json(),
            updated_at: Instant::now().as_millis(),
        };
        let raw = serde_json::to_string(&persisted).map_err(|_| QueryError::CacheCorruption(query_key))?;
        self.kv.set(&query_storage_key(query_key), raw).await;
        Ok(())
    }

    /// Releases a query's hold on every entity it referenced, persisting
    /// the resulting cascade eviction, and removes the query's own record.
    pub async fn delete_document(&self, query_key: u32, value: &Normalized) -> QueryResult<()> {
        let refs = collect_entity_refs(value);
        let evicted = self.entity_map.release_all(&refs);
        for key in &evicted {
            self.kv.remove(&entity_storage_key(*key)).await;
        }
        self.kv.remove(&query_storage_key(query_key)).await;
        Ok(())
    }

    /// Loads a persisted query's normalized value alongside the instant it
    /// was last saved, so a caller can decide whether the record is stale
    /// without a separate round trip.
    pub async fn load_query(&self, query_key: u32) -> QueryResult<Option<(Normalized, Instant)>> {
        match self.kv.get(&query_storage_key(query_key)).await {
            Some(raw) => {
                let persisted: PersistedQuery =
                    serde_json::from_str(&raw).map_err(|_| QueryError::CacheCorruption(query_key))?;
                Ok(Some((
                    Normalized::from_json(&persisted.value),
                    Instant::from_millis(persisted.updated_at),
                )))
            }
            None => Ok(None),
        }
    }

    /// Reactivates every entity a just-restored query value references:
    /// loads each one from disk that isn't already resident in the entity
    /// map, and retains them on the query's behalf. A reference whose
    /// entity record is missing from disk (e.g. deleted out from under a
    /// stale persisted query) is treated as a cache miss for that entity,
    /// not a hard failure — the rest of the query still activates.
    pub async fn activate_query(&self, value: &Normalized) -> QueryResult<HashSet<u32>> {
        let refs = collect_entity_refs(value);
        for key in &refs {
            if self.entity_map.contains(*key) {
                continue;
            }
            if let Some(raw) = self.kv.get(&entity_storage_key(*key)).await {
                let persisted: PersistedEntity =
                    serde_json::from_str(&raw).map_err(|_| QueryError::CacheCorruption(*key))?;
                self.entity_map.upsert(
                    *key,
                    persisted.typename,
                    EntityId::from(persisted.id),
                    Normalized::from_json(&persisted.value),
                );
            }
        }
        self.entity_map.retain_all(&refs);
        Ok(refs)
    }

    pub fn entity_map(&self) -> &EntityMap {
        &self.entity_map
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kv::MemoryKv;
    use futures::executor::block_on;

    fn store() -> Store {
        Store::new(Arc::new(MemoryKv::new()), EntityMap::new())
    }

    #[test]
    fn save_then_load_round_trips() {
        block_on(async {
            let store = store();
            let entity_key_val = entity_key("User", &EntityId::Str("u1".into()), 1);
            let value = Normalized::EntityRef(entity_key_val);
            let extracted = vec![ExtractedEntity {
                key: entity_key_val,
                typename: "User".to_string(),
                id: EntityId::Str("u1".into()),
                value: Normalized::Object(vec![("name".into(), Normalized::Str("Ada".into()))]),
                ref_ids: HashSet::new(),
            }];
            store.save_document(99, &value, extracted).await.unwrap();

            let (loaded, _updated_at) = store.load_query(99).await.unwrap().unwrap();
            assert_eq!(loaded, Normalized::EntityRef(entity_key_val));
            assert_eq!(store.entity_map().ref_count(entity_key_val), 1);
        });
    }

    #[test]
    fn delete_document_cascades_through_store() {
        block_on(async {
            let store = store();
            let entity_key_val = entity_key("User", &EntityId::Str("u1".into()), 1);
            let value = Normalized::EntityRef(entity_key_val);
            let extracted = vec![ExtractedEntity {
                key: entity_key_val,
                typename: "User".to_string(),
                id: EntityId::Str("u1".into()),
                value: Normalized::Null,
                ref_ids: HashSet::new(),
            }];
            store.save_document(99, &value, extracted).await.unwrap();
            store.delete_document(99, &value).await.unwrap();

            assert!(store.load_query(99).await.unwrap().is_none());
            assert!(!store.entity_map().contains(entity_key_val));
        });
    }

    #[test]
    fn save_document_releases_entities_dropped_by_a_refetch() {
        block_on(async {
            let store = store();
            let user_key = entity_key("User", &EntityId::Str("u1".into()), 1);
            let profile_key = entity_key("Profile", &EntityId::Str("p1".into()), 1);

            let first_value = Normalized::Object(vec![
                ("user".into(), Normalized::EntityRef(user_key)),
                ("profile".into(), Normalized::EntityRef(profile_key)),
            ]);
            let first_extracted = vec![
                ExtractedEntity {
                    key: user_key,
                    typename: "User".to_string(),
                    id: EntityId::Str("u1".into()),
                    value: Normalized::Null,
                    ref_ids: HashSet::new(),
                },
                ExtractedEntity {
                    key: profile_key,
                    typename: "Profile".to_string(),
                    id: EntityId::Str("p1".into()),
                    value: Normalized::Null,
                    ref_ids: HashSet::new(),
                },
            ];
            store.save_document(99, &first_value, first_extracted).await.unwrap();
            assert_eq!(store.entity_map().ref_count(profile_key), 1);

            // A refetch whose new shape drops the profile entity entirely.
            let second_value = Normalized::Object(vec![("user".into(), Normalized::EntityRef(user_key))]);
            let second_extracted = vec![ExtractedEntity {
                key: user_key,
                typename: "User".to_string(),
                id: EntityId::Str("u1".into()),
                value: Normalized::Null,
                ref_ids: HashSet::new(),
            }];
            store.save_document(99, &second_value, second_extracted).await.unwrap();

            assert!(
                !store.entity_map().contains(profile_key),
                "an entity dropped by a refetch should be released, not leaked"
            );
            assert_eq!(
                store.entity_map().ref_count(user_key),
                2,
                "the still-referenced entity is retained again on every save, once per save_document call"
            );
        });
    }

    #[test]
    fn activate_reloads_entities_from_disk() {
        block_on(async {
            let kv = Arc::new(MemoryKv::new());
            let entity_key_val = entity_key("User", &EntityId::Str("u1".into()), 1);
            {
                let store = Store::new(kv.clone(), EntityMap::new());
                let value = Normalized::EntityRef(entity_key_val);
                let extracted = vec![ExtractedEntity {
                    key: entity_key_val,
                    typename: "User".to_string(),
                    id: EntityId::Str("u1".into()),
                    value: Normalized::Object(vec![("name".into(), Normalized::Str("Ada".into()))]),
                    ref_ids: HashSet::new(),
                }];
                store.save_document(99, &value, extracted).await.unwrap();
            }

            // Fresh entity map, as after a process restart.
            let store = Store::new(kv, EntityMap::new());
            let (value, _updated_at) = store.load_query(99).await.unwrap().unwrap();
            store.activate_query(&value).await.unwrap();
            assert!(store.entity_map().contains(entity_key_val));
            assert_eq!(store.entity_map().typename(entity_key_val), Some("User".to_string()));
        });
    }
}
