//! Reactive hook for paginated queries: accumulates pages fetched through
//! one [`QueryDefinition`], feeding each page's cursor forward into the
//! next page's arguments until the caller-supplied cursor extractor
//! returns `None`.

use leptos::prelude::*;
use serde_json::Value as Json;

use crate::client::QueryClient;
use crate::definition::QueryDefinition;
use crate::error::QueryError;
use crate::pagination::{InfiniteState, Page};
use crate::parser::proxy::ValueProxy;
use crate::use_query_client;

#[derive(Clone)]
pub struct InfiniteQueryResult<F: Fn() + Clone + 'static> {
    pub pages: Signal<Vec<ValueProxy>>,
    pub has_next_page: Signal<bool>,
    pub is_fetching_next_page: Signal<bool>,
    /// The error from the most recent `fetch_next_page` call, if it failed.
    /// Cleared the next time a page fetch succeeds. `fetch_next_page` itself
    /// returns nothing, so this is the only way a caller learns a page
    /// fetch was rejected rather than just slow.
    pub error: Signal<Option<QueryError>>,
    pub fetch_next_page: F,
}

/// `cursor_param` names the argument field the next page's cursor is
/// written into; `next_cursor` reads the cursor for the following page
/// (if any) out of a just-fetched page's result.
pub fn use_infinite_query(
    definition: impl Fn() -> QueryDefinition + Clone + Send + Sync + 'static,
    base_args: impl Fn() -> Json + Clone + Send + Sync + 'static,
    cursor_param: &'static str,
    next_cursor: impl Fn(&ValueProxy) -> Option<Json> + Clone + Send + Sync + 'static,
) -> InfiniteQueryResult<impl Fn() + Clone + 'static> {
    let client = use_query_client();
    let entity_map = client.entity_map().clone();
    let state: RwSignal<InfiniteState<ValueProxy>> = RwSignal::new(InfiniteState::default());
    let is_fetching_next_page = RwSignal::new(false);
    let error: RwSignal<Option<QueryError>> = RwSignal::new(None);

    let fetch_next_page = {
        let client = client.clone();
        let definition = definition.clone();
        let base_args = base_args.clone();
        let next_cursor = next_cursor.clone();
        let entity_map = entity_map.clone();
        move || {
            if is_fetching_next_page.get_untracked() {
                return;
            }
            if !state.get_untracked().has_next_page() {
                return;
            }
            is_fetching_next_page.set(true);

            let client = client.clone();
            let definition = definition();
            let cursor = state.get_untracked().next_cursor.clone();
            let mut args = base_args();
            if let Some(cursor) = cursor {
                if let Json::Object(map) = &mut args {
                    map.insert(cursor_param.to_string(), cursor);
                }
            }
            let next_cursor = next_cursor.clone();
            let entity_map = entity_map.clone();

            leptos::task::spawn_local(async move {
                let result = run_page_fetch(&client, &definition, args).await;
                match result {
                    Ok(value) => {
                        let proxy = ValueProxy::new(entity_map.clone(), value);
                        let cursor = next_cursor(&proxy);
                        state.update(|s| {
                            s.pages.push(Page { value: proxy });
                            s.next_cursor = cursor;
                        });
                        error.set(None);
                    }
                    Err(err) => {
                        (client.config.warn)(&format!("infinite query '{}' failed: {err}", definition.id));
                        error.set(Some(err));
                    }
                }
                is_fetching_next_page.set(false);
            });
        }
    };

    if state.get_untracked().pages.is_empty() {
        fetch_next_page();
    }

    let pages = Signal::derive(move || state.get().pages.into_iter().map(|p| p.value).collect());
    let has_next_page = Signal::derive(move || state.get().has_next_page());

    InfiniteQueryResult {
        pages,
        has_next_page,
        is_fetching_next_page: is_fetching_next_page.into(),
        error: error.into(),
        fetch_next_page,
    }
}

async fn run_page_fetch(
    client: &QueryClient,
    definition: &QueryDefinition,
    args: Json,
) -> crate::error::QueryResult<crate::parser::normalized::Normalized> {
    client.fetch(definition, args).await.map(|record| record.value)
}
