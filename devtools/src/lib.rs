//! Introspection for a normalizing query client: a [`leptos_norm_query`]
//! `CacheObserver` that keeps a bounded, reactive log of cache lifecycle
//! events (query created/updated/removed, observer added/removed) for an
//! application's own inspector UI to read. Carries no view markup of its
//! own — the panel is left to the host application, the same way the
//! cache engine itself carries no opinion on how a query's data is
//! rendered.

mod timeout;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use leptos::prelude::*;
use leptos_norm_query::cache_observer::{CacheEvent, CacheObserver};
use leptos_norm_query::query_cache::CacheObserverKey;
use leptos_norm_query::QueryClient;

pub use timeout::time_until_stale;

/// Bound on how many events a [`DevtoolsLog`] retains; the oldest entry is
/// dropped once a fetch-heavy client would otherwise grow this without
/// limit for the lifetime of the page.
const MAX_LOG_ENTRIES: usize = 500;

#[derive(Clone, Debug)]
pub struct LoggedEvent {
    pub sequence: u64,
    pub event: CacheEvent,
}

/// A reactive, bounded log of every event observed on one `QueryCache`.
/// Cheap to clone: the log itself lives behind a reactive signal shared by
/// every clone.
#[derive(Clone)]
pub struct DevtoolsLog {
    entries: RwSignal<VecDeque<LoggedEvent>>,
    next_sequence: Arc<AtomicU64>,
}

impl Default for DevtoolsLog {
    fn default() -> Self {
        DevtoolsLog {
            entries: RwSignal::new(VecDeque::new()),
            next_sequence: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl DevtoolsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Signal<VecDeque<LoggedEvent>> {
        self.entries.into()
    }

    pub fn len(&self) -> usize {
        self.entries.with(|log| log.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.set(VecDeque::new());
    }

    fn push(&self, event: CacheEvent) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.entries.update(|log| {
            log.push_back(LoggedEvent { sequence, event });
            while log.len() > MAX_LOG_ENTRIES {
                log.pop_front();
            }
        });
    }
}

impl CacheObserver for DevtoolsLog {
    fn process_cache_event(&self, event: CacheEvent) {
        self.push(event);
    }
}

/// Registers a fresh [`DevtoolsLog`] against `client`'s cache, provides it
/// as reactive context, and returns the handle (along with the key needed
/// to unregister it) so an application can tear devtools down again.
pub fn provide_query_devtools(client: &QueryClient) -> (DevtoolsLog, CacheObserverKey) {
    let log = DevtoolsLog::new();
    let observer_key = client.cache.register_observer(log.clone());
    provide_context(log.clone());
    (log, observer_key)
}

pub fn use_devtools_log() -> DevtoolsLog {
    use_context::<DevtoolsLog>().expect("No DevtoolsLog found. Call provide_query_devtools() first.")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_assigns_increasing_sequence_numbers() {
        let log = DevtoolsLog::new();
        log.push(CacheEvent::Removed("a".into()));
        log.push(CacheEvent::Removed("b".into()));
        let entries = log.entries.get_untracked();
        assert_eq!(entries[0].sequence, 0);
        assert_eq!(entries[1].sequence, 1);
    }

    #[test]
    fn log_is_capped_at_max_entries() {
        let log = DevtoolsLog::new();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            log.push(CacheEvent::Removed(format!("key-{i}")));
        }
        assert_eq!(log.len(), MAX_LOG_ENTRIES);
    }
}
