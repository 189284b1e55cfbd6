//! The primary reactive hook: wires a [`QueryDefinition`] and a reactive
//! argument signal into the generic query engine, fetching through
//! [`QueryClient::load_or_fetch`] and exposing the result as a
//! [`ValueProxy`] so callers read fields without ever seeing the
//! normalized wire representation.

use leptos::prelude::*;
use serde_json::Value as Json;

use crate::client::{QueryClient, QueryRecord};
use crate::definition::QueryDefinition;
use crate::error::QueryError;
use crate::parser::normalized::Normalized;
use crate::parser::proxy::ValueProxy;
use crate::{use_query_client, QueryOptions, QueryState, RefetchFn};

/// The signal bundle [`use_entity_query`] returns. Shaped like
/// [`crate::query_result::QueryResult`] but fixed to [`ValueProxy`] so
/// `state` stays meaningful without re-deriving `QueryState<QueryRecord>`
/// into a second, parallel representation.
pub struct EntityQueryResult<R: RefetchFn> {
    pub data: Signal<Option<ValueProxy>>,
    pub is_loading: Signal<bool>,
    pub is_fetching: Signal<bool>,
    pub is_invalid: Signal<bool>,
    /// The error from the most recent fetch attempt, if it failed. Cleared
    /// on the next successful fetch. A caller that only reads `data` would
    /// otherwise see a failed fetch as an indistinguishable null result —
    /// checking `error` is how it tells the two apart.
    pub error: Signal<Option<QueryError>>,
    pub refetch: R,
}

impl<R: RefetchFn> Clone for EntityQueryResult<R> {
    fn clone(&self) -> Self {
        EntityQueryResult {
            data: self.data,
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_invalid: self.is_invalid,
            error: self.error,
            refetch: self.refetch.clone(),
        }
    }
}

/// Runs `definition` against the reactive arguments produced by `args`,
/// normalizing and caching the result under the client in context.
///
/// `definition` and `args` are re-evaluated on every fetch, so a caller
/// driving `args` from a signal gets a new query instance (and a fresh
/// cache entry) whenever the argument value changes.
pub fn use_entity_query(
    definition: impl Fn() -> QueryDefinition + Clone + Send + Sync + 'static,
    args: impl Fn() -> Json + Clone + Send + Sync + 'static,
    options: QueryOptions,
) -> EntityQueryResult<impl RefetchFn> {
    let client = use_query_client();
    let error: RwSignal<Option<QueryError>> = RwSignal::new(None);

    let key_fn = {
        let definition = definition.clone();
        let args = args.clone();
        move || definition().query_key(&args())
    };

    let fetcher = {
        let client = client.clone();
        let definition = definition.clone();
        let args = args.clone();
        move |_key: u32| {
            let client = client.clone();
            let definition = definition();
            let args = args();
            fetch_record(client, definition, args, error)
        }
    };

    let result = crate::use_query::use_query(key_fn, fetcher, options);
    let entity_map = client.entity_map().clone();
    let raw_data = result.data;

    let data = Signal::derive(move || {
        raw_data
            .get()
            .map(|record| ValueProxy::new(entity_map.clone(), record.value))
    });

    EntityQueryResult {
        data,
        is_loading: result.is_loading,
        is_fetching: result.is_fetching,
        is_invalid: result.is_invalid,
        error: error.into(),
        refetch: result.refetch,
    }
}

/// The generic engine's fetcher must return a `QueryRecord` directly, not a
/// `Result` — so there is no channel back into `QueryState` for a failure.
/// A failed fetch is surfaced through the `error` side-channel signal
/// instead: the engine still sees a `Normalized::Null` record (it has
/// nothing else to call `Loaded`), but a caller that reads `error` learns
/// the fetch actually failed rather than mistaking a null result for one.
async fn fetch_record(client: QueryClient, definition: QueryDefinition, args: Json, error: RwSignal<Option<QueryError>>) -> QueryRecord {
    match client.load_or_fetch(&definition, args).await {
        Ok(record) => {
            error.set(None);
            record
        }
        Err(err) => {
            (client.config.warn)(&format!("query '{}' failed: {err}", definition.id));
            error.set(Some(err));
            QueryRecord {
                value: Normalized::Null,
                definition_id: definition.id,
            }
        }
    }
}

/// Re-derives `QueryState<QueryRecord>`'s loading/fetching/invalid facets
/// for a caller that wants the raw enum instead of the derived booleans.
pub fn is_settled<V>(state: &QueryState<V>) -> bool {
    matches!(state, QueryState::Loaded(_) | QueryState::Invalid(_))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ClientConfig;
    use crate::schema::{IdKind, ObjectSchema, Schema};
    use crate::transport::{HttpMethod, Transport, TransportRequest};
    use futures::executor::block_on;
    use futures::future::LocalBoxFuture;
    use futures::FutureExt;
    use std::sync::Arc;

    struct RejectingTransport;

    impl Transport for RejectingTransport {
        fn send(&self, _request: TransportRequest) -> LocalBoxFuture<'_, crate::error::QueryResult<Json>> {
            async move { Ok(serde_json::json!({"__typename": "User", "id": 1, "name": 7})) }.boxed_local()
        }
    }

    struct AcceptingTransport;

    impl Transport for AcceptingTransport {
        fn send(&self, _request: TransportRequest) -> LocalBoxFuture<'_, crate::error::QueryResult<Json>> {
            async move { Ok(Json::Bool(true)) }.boxed_local()
        }
    }

    fn user_entity_schema() -> Schema {
        Schema::Object(ObjectSchema::entity("User", IdKind::Number, || {
            Ok(vec![("name".to_string(), Schema::Str)])
        }))
    }

    #[test]
    fn fetch_record_surfaces_validation_errors_through_the_error_signal_without_panicking() {
        let mut config = ClientConfig::default();
        config.transport = Some(Arc::new(RejectingTransport));
        let client = QueryClient::new(Owner::new(), config);
        let error: RwSignal<Option<QueryError>> = RwSignal::new(None);

        let definition = QueryDefinition::new("getUser", HttpMethod::Get, "/users/[id]", user_entity_schema());
        let record = block_on(fetch_record(client, definition, serde_json::json!({"id": "1"}), error));

        assert_eq!(record.value, Normalized::Null);
        assert!(matches!(error.get_untracked(), Some(QueryError::Validation { .. })));
    }

    #[test]
    fn fetch_record_clears_a_previous_error_once_a_fetch_succeeds() {
        let mut config = ClientConfig::default();
        config.transport = Some(Arc::new(AcceptingTransport));
        let client = QueryClient::new(Owner::new(), config);
        let error: RwSignal<Option<QueryError>> = RwSignal::new(Some(QueryError::Usage("stale".into())));

        let definition = QueryDefinition::new("getBool", HttpMethod::Get, "/bool", Schema::Bool);
        block_on(fetch_record(client, definition, serde_json::json!({}), error));

        assert_eq!(error.get_untracked(), None);
    }
}
