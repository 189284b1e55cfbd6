//! Query Client: the coordinator that ties one query-cache engine, one
//! entity map, one store façade, and a client-wide configuration together
//! into the single handle an application provides via context.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use leptos::prelude::*;
use serde_json::Value as Json;

use crate::config::ClientConfig;
use crate::definition::{select_fields, CachePolicy, QueryDefinition};
use crate::entity::EntityMap;
use crate::error::{QueryError, QueryResult};
use crate::kv::{KvStore, MemoryKv};
use crate::parser::normalized::Normalized;
use crate::parser::parse::{parse_root, ParseContext};
use crate::query_cache::QueryCache;
use crate::schema::Schema;
use crate::store::Store;
use crate::transport::TransportRequest;
use crate::util::time_until_stale;
use crate::Instant;
use std::time::Duration;

/// Whether a record last written at `updated_at` has outlived `stale_time`.
/// `None` means the definition never declared a staleness window, so the
/// record is never considered stale by this check.
fn is_stale(updated_at: Instant, stale_time: Option<Duration>) -> bool {
    match stale_time {
        Some(stale_time) => time_until_stale(updated_at, stale_time).is_zero(),
        None => false,
    }
}

/// The value a normalizing query instance holds: a normalized result graph
/// plus the id of the definition that produced it, so the client can group
/// instances for LRU accounting without re-deriving it from the key.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct QueryRecord {
    pub value: Normalized,
    pub definition_id: String,
}

/// Per-definition least-recently-used tracking for the on-disk cache. A
/// definition's entries are evicted in a batch once the live count exceeds
/// `disk_capacity * eviction_multiplier`, back down to `disk_capacity`,
/// rather than one at a time — this keeps a definition that churns near its
/// limit from paying an eviction on every single fetch.
#[derive(Default)]
struct GcHeap {
    lanes: Mutex<HashMap<String, VecDeque<u32>>>,
}

impl GcHeap {
    /// Evicts back down to `capacity` once the lane crosses its trigger,
    /// skipping any key `is_activated` reports as currently observed — an
    /// activated key stays on disk (and in the lane) no matter how stale
    /// its position, so eviction keeps walking older entries until it
    /// finds enough inactive ones to make room.
    fn touch(
        &self,
        definition_id: &str,
        query_key: u32,
        capacity: usize,
        multiplier: f64,
        is_activated: impl Fn(u32) -> bool,
    ) -> Vec<u32> {
        let mut lanes = self.lanes.lock().unwrap();
        let lane = lanes.entry(definition_id.to_string()).or_default();
        lane.retain(|k| *k != query_key);
        lane.push_back(query_key);

        let trigger = ((capacity as f64) * multiplier).ceil() as usize;
        let mut evicted = Vec::new();
        if lane.len() > trigger.max(capacity + 1) {
            let mut survivors = VecDeque::new();
            while lane.len() + survivors.len() > capacity {
                let Some(k) = lane.pop_front() else { break };
                if is_activated(k) {
                    survivors.push_back(k);
                } else {
                    evicted.push(k);
                }
            }
            for k in survivors.into_iter().rev() {
                lane.push_front(k);
            }
        }
        evicted
    }

    fn forget(&self, definition_id: &str, query_key: u32) {
        if let Some(lane) = self.lanes.lock().unwrap().get_mut(definition_id) {
            lane.retain(|k| *k != query_key);
        }
    }
}

#[derive(Clone)]
pub struct QueryClient {
    pub cache: QueryCache,
    pub config: ClientConfig,
    entity_map: EntityMap,
    store: Arc<Store>,
    gc_heap: Arc<GcHeap>,
    definition_keys: Arc<Mutex<HashMap<String, HashSet<u32>>>>,
}

impl QueryClient {
    pub fn new(owner: Owner, config: ClientConfig) -> Self {
        Self::with_kv(owner, config, Arc::new(MemoryKv::new()))
    }

    pub fn with_kv(owner: Owner, config: ClientConfig, kv: Arc<dyn KvStore>) -> Self {
        let entity_map = EntityMap::new();
        let store = Arc::new(Store::new(kv, entity_map.clone()));
        QueryClient {
            cache: QueryCache::new(owner),
            config,
            entity_map,
            store,
            gc_heap: Arc::new(GcHeap::default()),
            definition_keys: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn entity_map(&self) -> &EntityMap {
        &self.entity_map
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Restores a persisted query instance if one exists on disk,
    /// reactivating every entity it references; falls back to a live fetch
    /// otherwise. A persisted record older than `cache_policy.stale_time`
    /// is still returned immediately (so a caller isn't blocked waiting on
    /// the network) but triggers a background refetch to bring it current.
    pub async fn load_or_fetch(&self, definition: &QueryDefinition, args: Json) -> QueryResult<QueryRecord> {
        let query_key = definition.query_key(&args);
        self.track_key(&definition.id, query_key);

        if let Some((value, updated_at)) = self.store.load_query(query_key).await? {
            self.store.activate_query(&value).await?;

            if is_stale(updated_at, definition.cache_policy.stale_time) {
                let client = self.clone();
                let definition = definition.clone();
                leptos::task::spawn_local(async move {
                    if let Err(err) = client.fetch(&definition, args).await {
                        (client.config.warn)(&format!(
                            "background refetch of stale query '{}' failed: {err}",
                            definition.id
                        ));
                    }
                });
            }

            return Ok(QueryRecord {
                value,
                definition_id: definition.id.clone(),
            });
        }
        self.fetch(definition, args).await
    }

    /// Executes a definition against the configured transport: validates
    /// arguments, builds the request, parses and normalizes the response,
    /// and persists it before returning.
    pub async fn fetch(&self, definition: &QueryDefinition, args: Json) -> QueryResult<QueryRecord> {
        for schema in [&definition.path_schema, &definition.search_schema, &definition.body_schema]
            .into_iter()
            .flatten()
        {
            let mut ctx = ParseContext::new(warn_sink(&self.config));
            parse_root(schema, &args, &mut ctx)?;
        }

        let transport = self
            .config
            .transport
            .as_ref()
            .ok_or_else(|| QueryError::Usage("QueryClient has no transport configured".to_string()))?;

        let path = definition.path.render(&args)?;
        let url = format!("{}{}", self.config.base_url.get_untracked(), path);
        let search = definition
            .search_schema
            .as_ref()
            .map(|schema| select_fields(schema, &args))
            .transpose()?;
        let body = definition
            .body_schema
            .as_ref()
            .map(|schema| select_fields(schema, &args))
            .transpose()?;
        let request = TransportRequest {
            method: definition.method,
            url,
            search,
            body,
        };
        let response = transport.send(request).await?;

        let mut ctx = ParseContext::new(warn_sink(&self.config));
        let value = parse_root(&definition.result_schema, &response, &mut ctx)?;

        let query_key = definition.query_key(&args);
        self.track_key(&definition.id, query_key);
        self.store.save_document(query_key, &value, ctx.extracted).await?;

        if let Some(capacity) = definition.cache_policy.disk_capacity {
            let evicted = self.gc_heap.touch(
                &definition.id,
                query_key,
                capacity,
                self.config.eviction_multiplier,
                |key| self.is_query_activated(key),
            );
            for evicted_key in evicted {
                if evicted_key == query_key {
                    continue;
                }
                if let Ok(Some((old_value, _))) = self.store.load_query(evicted_key).await {
                    let _ = self.store.delete_document(evicted_key, &old_value).await;
                }
                self.forget_key(&definition.id, evicted_key);
                self.cache.evict_query::<u32, QueryRecord>(&evicted_key);
            }
        }

        Ok(QueryRecord {
            value,
            definition_id: definition.id.clone(),
        })
    }

    /// Whether a query key currently has any live in-memory observers —
    /// what the disk-side LRU consults so it never evicts the entry behind
    /// a query instance a caller is actively rendering.
    fn is_query_activated(&self, key: u32) -> bool {
        self.cache
            .get_query::<u32, QueryRecord>(&key)
            .map(|query| query.has_observers())
            .unwrap_or(false)
    }

    pub fn invalidate_query(&self, definition: &QueryDefinition, args: &Json) {
        let key = definition.query_key(args);
        if let Some(query) = self.cache.get_query::<u32, QueryRecord>(&key) {
            query.mark_invalid();
        }
    }

    /// Invalidates every live instance tracked under `definition_id`.
    pub fn invalidate_definition(&self, definition_id: &str) {
        let keys: Vec<u32> = self
            .definition_keys
            .lock()
            .unwrap()
            .get(definition_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for key in keys {
            if let Some(query) = self.cache.get_query::<u32, QueryRecord>(&key) {
                query.mark_invalid();
            }
        }
    }

    pub fn clear(&self) {
        self.cache.clear_all_queries();
    }

    fn track_key(&self, definition_id: &str, query_key: u32) {
        self.definition_keys
            .lock()
            .unwrap()
            .entry(definition_id.to_string())
            .or_default()
            .insert(query_key);
    }

    fn forget_key(&self, definition_id: &str, query_key: u32) {
        if let Some(set) = self.definition_keys.lock().unwrap().get_mut(definition_id) {
            set.remove(&query_key);
        }
        self.gc_heap.forget(definition_id, query_key);
    }
}

fn warn_sink(config: &ClientConfig) -> impl Fn(&str) + 'static {
    let warn = config.warn.clone();
    move |message: &str| warn(message)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::ObjectSchema;
    use crate::transport::Transport;
    use futures::executor::block_on;
    use futures::future::LocalBoxFuture;
    use futures::FutureExt;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        seen: Arc<StdMutex<Option<TransportRequest>>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, request: TransportRequest) -> LocalBoxFuture<'_, QueryResult<Json>> {
            *self.seen.lock().unwrap() = Some(request);
            async move { Ok(Json::Bool(true)) }.boxed_local()
        }
    }

    #[test]
    fn fetch_splits_path_search_and_body_params() {
        let seen = Arc::new(StdMutex::new(None));
        let mut config = ClientConfig::default();
        config.transport = Some(Arc::new(RecordingTransport { seen: seen.clone() }));

        let client = QueryClient::new(Owner::new(), config);

        let path_schema = Schema::Object(ObjectSchema::object(|| {
            Ok(vec![("userId".to_string(), Schema::Str)])
        }));
        let search_schema = Schema::Object(ObjectSchema::object(|| {
            Ok(vec![
                ("draft".to_string(), Schema::Bool),
                ("notify".to_string(), Schema::Bool),
            ])
        }));
        let body_schema = Schema::Object(ObjectSchema::object(|| {
            Ok(vec![
                ("title".to_string(), Schema::Str),
                ("content".to_string(), Schema::Str),
            ])
        }));

        let definition = QueryDefinition::new(
            "createPost",
            crate::transport::HttpMethod::Post,
            "/users/[userId]/posts",
            Schema::Bool,
        )
        .with_path_schema(path_schema)
        .with_search_schema(search_schema)
        .with_body_schema(body_schema);

        let args = serde_json::json!({
            "userId": "42",
            "draft": true,
            "notify": false,
            "title": "My Post Title",
            "content": "...",
        });

        block_on(client.fetch(&definition, args)).unwrap();

        let request = seen.lock().unwrap().take().unwrap();
        assert_eq!(request.url, "/users/42/posts");
        let search = request.search.unwrap();
        assert_eq!(search, serde_json::json!({"draft": true, "notify": false}));
        let body = request.body.unwrap();
        assert_eq!(body, serde_json::json!({"title": "My Post Title", "content": "..."}));
        assert!(body.get("userId").is_none());
        assert!(body.get("draft").is_none());
    }

    struct ScriptedTransport {
        responses: StdMutex<std::collections::VecDeque<Json>>,
    }

    impl Transport for ScriptedTransport {
        fn send(&self, _request: TransportRequest) -> LocalBoxFuture<'_, QueryResult<Json>> {
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted response left");
            async move { Ok(response) }.boxed_local()
        }
    }

    struct CountingTransport {
        calls: Arc<std::sync::atomic::AtomicU32>,
        response: Json,
    }

    impl Transport for CountingTransport {
        fn send(&self, _request: TransportRequest) -> LocalBoxFuture<'_, QueryResult<Json>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let response = self.response.clone();
            async move { Ok(response) }.boxed_local()
        }
    }

    #[test]
    fn load_or_fetch_reuses_the_persisted_record_on_repeat_calls() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut config = ClientConfig::default();
        config.transport = Some(Arc::new(CountingTransport {
            calls: calls.clone(),
            response: serde_json::json!({"__typename": "User", "id": 1, "name": "Alice"}),
        }));
        let client = QueryClient::new(Owner::new(), config);

        let definition = QueryDefinition::new("getUser", crate::transport::HttpMethod::Get, "/users/[id]", user_entity_schema());
        let args = serde_json::json!({"id": "1"});

        let first = block_on(client.load_or_fetch(&definition, args.clone())).unwrap();
        let second = block_on(client.load_or_fetch(&definition, args)).unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(first.value, second.value);
    }

    #[test]
    fn disk_capacity_evicts_the_oldest_query_and_its_orphaned_entity() {
        let responses = std::collections::VecDeque::from(vec![
            serde_json::json!({"__typename": "User", "id": 1, "name": "Alice"}),
            serde_json::json!({"__typename": "User", "id": 2, "name": "Bob"}),
            serde_json::json!({"__typename": "User", "id": 3, "name": "Cora"}),
        ]);
        let mut config = ClientConfig::default();
        config.transport = Some(Arc::new(ScriptedTransport {
            responses: StdMutex::new(responses),
        }));
        let client = QueryClient::new(Owner::new(), config);

        let definition = QueryDefinition::new("getUser", crate::transport::HttpMethod::Get, "/users/[id]", user_entity_schema())
            .with_cache_policy(CachePolicy {
                disk_capacity: Some(1),
                ..Default::default()
            });

        let key1 = definition.query_key(&serde_json::json!({"id": "1"}));
        let key3 = definition.query_key(&serde_json::json!({"id": "3"}));

        block_on(client.fetch(&definition, serde_json::json!({"id": "1"}))).unwrap();
        block_on(client.fetch(&definition, serde_json::json!({"id": "2"}))).unwrap();
        block_on(client.fetch(&definition, serde_json::json!({"id": "3"}))).unwrap();

        assert!(
            block_on(client.store().load_query(key1)).unwrap().is_none(),
            "oldest query should have been evicted once 3 distinct instances piled up over capacity 1"
        );
        assert!(block_on(client.store().load_query(key3)).unwrap().is_some());

        let Schema::Object(obj) = user_entity_schema() else {
            panic!("expected an object schema");
        };
        let shape_key = obj.shape_key().unwrap();
        let user1_key = crate::entity::entity_key("User", &crate::entity::EntityId::Number(1), shape_key);
        assert_eq!(client.entity_map().ref_count(user1_key), 0);
        assert!(!client.entity_map().contains(user1_key));
    }

    fn user_entity_schema() -> Schema {
        use crate::schema::IdKind;
        Schema::Object(ObjectSchema::entity("User", IdKind::Number, || {
            Ok(vec![("name".to_string(), Schema::Str)])
        }))
    }

    #[test]
    fn fetch_shares_entities_across_distinct_queries() {
        let responses = std::collections::VecDeque::from(vec![
            serde_json::json!({"user": {"__typename": "User", "id": 1, "name": "Alice"}}),
            serde_json::json!({"users": [{"__typename": "User", "id": 1, "name": "Alice"}]}),
        ]);
        let mut config = ClientConfig::default();
        config.transport = Some(Arc::new(ScriptedTransport {
            responses: StdMutex::new(responses),
        }));
        let client = QueryClient::new(Owner::new(), config);

        let get_user = QueryDefinition::new(
            "getUser",
            crate::transport::HttpMethod::Get,
            "/users/[id]",
            Schema::Object(ObjectSchema::object(|| {
                Ok(vec![("user".to_string(), user_entity_schema())])
            })),
        );
        let list_users = QueryDefinition::new(
            "listUsers",
            crate::transport::HttpMethod::Get,
            "/users",
            Schema::Object(ObjectSchema::object(|| {
                Ok(vec![("users".to_string(), user_entity_schema().array())])
            })),
        );

        let single = block_on(client.fetch(&get_user, serde_json::json!({"id": "1"}))).unwrap();
        let list = block_on(client.fetch(&list_users, serde_json::json!({}))).unwrap();

        let single_ref = single.value.get_field("user").cloned().unwrap();
        let list_ref = match list.value.get_field("users").cloned().unwrap() {
            crate::parser::normalized::Normalized::Array(items) => items[0].clone(),
            other => panic!("expected array, got {other:?}"),
        };
        assert_eq!(single_ref, list_ref, "both queries should reference the same entity key");

        let crate::parser::normalized::Normalized::EntityRef(key) = single_ref else {
            panic!("expected an entity reference");
        };
        assert_eq!(client.entity_map().ref_count(key), 2);
    }

    #[test]
    fn gc_heap_evicts_in_batches_not_one_at_a_time() {
        let heap = GcHeap::default();
        for key in 0..10u32 {
            let evicted = heap.touch("def", key, 5, 2.0, |_| false);
            assert!(evicted.is_empty(), "should not evict below the trigger threshold");
        }
        // Trigger is ceil(5*2.0)=10, so the 11th distinct key crosses it and
        // evicts back down to capacity (5) in one sweep.
        let evicted = heap.touch("def", 10, 5, 2.0, |_| false);
        assert_eq!(evicted.len(), 6);
    }

    #[test]
    fn touching_an_existing_key_does_not_duplicate_it() {
        let heap = GcHeap::default();
        heap.touch("def", 1, 10, 1.0, |_| false);
        heap.touch("def", 1, 10, 1.0, |_| false);
        let lanes = heap.lanes.lock().unwrap();
        assert_eq!(lanes.get("def").unwrap().len(), 1);
    }

    #[test]
    fn gc_heap_skips_activated_keys_and_evicts_the_next_oldest_instead() {
        let heap = GcHeap::default();
        for key in 0..10u32 {
            heap.touch("def", key, 5, 2.0, |_| false);
        }
        // Key 0 is the oldest and would normally be the first evicted; mark
        // it activated so the sweep has to reach past it to key 1 instead.
        let evicted = heap.touch("def", 10, 5, 2.0, |key| key == 0);
        assert!(!evicted.contains(&0), "an activated key must survive eviction");
        assert_eq!(evicted.len(), 6, "eviction still reaches capacity by walking further back");

        let lanes = heap.lanes.lock().unwrap();
        let lane = lanes.get("def").unwrap();
        assert!(lane.contains(&0), "the activated key remains in the lane");
    }

    #[test]
    fn is_stale_reads_the_definitions_stale_time_window() {
        let past = Instant::from_millis(0);
        assert!(is_stale(past, Some(Duration::from_secs(1))));
        assert!(!is_stale(Instant::now(), Some(Duration::from_secs(60))));
        assert!(!is_stale(past, None), "no stale_time configured means never stale");
    }
}
