//! Reactive hook for subscription-backed queries: opens a subscription
//! through the configured [`SubscriptionTransport`] and parses every
//! pushed value through the same normalizing path a fetched query uses, so
//! a streamed entity updates the same shared [`crate::entity::EntityMap`]
//! record a polled query would.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use leptos::prelude::*;
use serde_json::Value as Json;

use crate::client::QueryClient;
use crate::definition::QueryDefinition;
use crate::entity::EntityMap;
use crate::error::QueryError;
use crate::parser::normalized::{collect_entity_refs, Normalized};
use crate::parser::parse::{parse_root, ParseContext};
use crate::parser::proxy::ValueProxy;
use crate::stream::StreamState;
use crate::transport::TransportRequest;
use crate::use_query_client;

/// Merges a freshly parsed push update into the shared entity map: new
/// entity bodies are upserted, refs the previous update held are released,
/// and refs the new update holds are retained — so a stream behaves like
/// any other query instance holding a live reference to the entities it
/// last resolved to, per the normalizing merge rule streamed entities
/// follow.
fn merge_stream_update(entity_map: &EntityMap, held_refs: &Mutex<HashSet<u32>>, value: &Normalized, extracted: Vec<crate::parser::parse::ExtractedEntity>) {
    for entity in &extracted {
        entity_map.upsert(entity.key, entity.typename.clone(), entity.id.clone(), entity.value.clone());
        entity_map.retain_all(&entity.ref_ids);
    }

    let fresh_refs = collect_entity_refs(value);
    let mut held = held_refs.lock().unwrap();
    entity_map.release_all(&held);
    entity_map.retain_all(&fresh_refs);
    *held = fresh_refs;
}

#[derive(Clone)]
pub struct QueryStreamResult {
    pub data: Signal<Option<ValueProxy>>,
    pub is_connected: Signal<bool>,
    /// The error from the most recently pushed payload, if it failed to
    /// parse against the declared result schema. Cleared the next time a
    /// payload parses successfully. `data` keeps whatever the stream last
    /// resolved to, so a caller must check `error` to learn a rejected
    /// payload was dropped rather than applied.
    pub error: Signal<Option<QueryError>>,
}

/// Subscribes for as long as the owning reactive scope lives, tearing the
/// subscription down automatically on cleanup.
pub fn use_query_stream(
    definition: impl Fn() -> QueryDefinition + Send + Sync + 'static,
    args: impl Fn() -> Json + Send + Sync + 'static,
) -> QueryStreamResult {
    let client = use_query_client();
    let entity_map = client.entity_map().clone();
    let stream: StreamState<crate::parser::normalized::Normalized> = StreamState::new();
    let held_refs: Arc<Mutex<HashSet<u32>>> = Arc::new(Mutex::new(HashSet::new()));
    let error: RwSignal<Option<QueryError>> = RwSignal::new(None);

    {
        let client = client.clone();
        let stream = stream.clone();
        let entity_map = entity_map.clone();
        let held_refs = held_refs.clone();
        Effect::new_isomorphic(move |_| {
            let definition = definition();
            let args = args();

            let Some(transport) = client.config.subscription_transport.clone() else {
                (client.config.warn)(&format!(
                    "query '{}' has no subscription transport configured",
                    definition.id
                ));
                return;
            };

            let request = match build_request(&client, &definition, &args) {
                Ok(request) => request,
                Err(err) => {
                    (client.config.warn)(&format!("stream '{}' failed to build request: {err}", definition.id));
                    return;
                }
            };

            let result_schema = definition.result_schema.clone();
            let definition_id = definition.id.clone();
            let warn = client.config.warn.clone();
            let stream_for_update = stream.clone();
            let entity_map_for_update = entity_map.clone();
            let held_refs_for_update = held_refs.clone();

            let handle = transport.subscribe(
                request,
                Box::new(move |payload: Json| {
                    let mut ctx = ParseContext::new({
                        let warn = warn.clone();
                        move |message: &str| warn(message)
                    });
                    match parse_root(&result_schema, &payload, &mut ctx) {
                        Ok(value) => {
                            merge_stream_update(&entity_map_for_update, &held_refs_for_update, &value, ctx.extracted);
                            stream_for_update.on_update(value);
                            error.set(None);
                        }
                        Err(err) => {
                            warn(&format!("stream '{definition_id}' received an invalid payload: {err}"));
                            error.set(Some(err));
                        }
                    }
                }),
            );
            stream.attach(handle);
        });
    }

    on_cleanup({
        let stream = stream.clone();
        let entity_map = entity_map.clone();
        move || {
            stream.detach();
            let held = held_refs.lock().unwrap();
            entity_map.release_all(&held);
        }
    });

    let is_connected = Signal::derive({
        let stream = stream.clone();
        move || stream.is_attached()
    });

    let data = Signal::derive(move || {
        stream
            .value
            .get()
            .map(|value| ValueProxy::new(entity_map.clone(), value))
    });

    QueryStreamResult {
        data,
        is_connected,
        error: error.into(),
    }
}

fn build_request(
    client: &QueryClient,
    definition: &QueryDefinition,
    args: &Json,
) -> Result<TransportRequest, QueryError> {
    let path = definition.path.render(args)?;
    let url = format!("{}{}", client.config.base_url.get_untracked(), path);
    Ok(TransportRequest {
        method: definition.method,
        url,
        search: None,
        body: None,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entity::EntityId;
    use crate::parser::parse::{parse_root, ParseContext};
    use crate::schema::{IdKind, ObjectSchema, Schema};

    fn user_schema() -> Schema {
        Schema::Object(ObjectSchema::entity("User", IdKind::Number, || {
            Ok(vec![("name".to_string(), Schema::Str)])
        }))
    }

    #[test]
    fn merge_stream_update_makes_the_pushed_entity_resolvable() {
        let entity_map = EntityMap::new();
        let held_refs: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());

        let mut ctx = ParseContext::new(|_| {});
        let value = parse_root(
            &user_schema(),
            &serde_json::json!({"__typename": "User", "id": 1, "name": "Alice"}),
            &mut ctx,
        )
        .unwrap();
        merge_stream_update(&entity_map, &held_refs, &value, ctx.extracted);

        let Normalized::EntityRef(key) = value else {
            panic!("expected an entity reference");
        };
        assert!(entity_map.contains(key));
        assert_eq!(entity_map.id(key), Some(EntityId::Number(1)));
        assert_eq!(entity_map.ref_count(key), 1);
    }

    #[test]
    fn merge_stream_update_releases_the_previous_entity_once_superseded() {
        let entity_map = EntityMap::new();
        let held_refs: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());

        let mut first_ctx = ParseContext::new(|_| {});
        let first_value = parse_root(
            &user_schema(),
            &serde_json::json!({"__typename": "User", "id": 1, "name": "Alice"}),
            &mut first_ctx,
        )
        .unwrap();
        merge_stream_update(&entity_map, &held_refs, &first_value, first_ctx.extracted);
        let Normalized::EntityRef(first_key) = first_value else {
            panic!("expected an entity reference");
        };

        let mut second_ctx = ParseContext::new(|_| {});
        let second_value = parse_root(
            &user_schema(),
            &serde_json::json!({"__typename": "User", "id": 2, "name": "Bob"}),
            &mut second_ctx,
        )
        .unwrap();
        merge_stream_update(&entity_map, &held_refs, &second_value, second_ctx.extracted);

        assert!(!entity_map.contains(first_key), "superseded entity should be released, not leaked");
    }
}
