//! Subscription-backed queries: a live value updated by push rather than by
//! poll, with a teardown callback so the hook layer can cancel the
//! underlying subscription when the reactive owner disposes.

use std::sync::{Arc, Mutex};

use leptos::prelude::*;

/// Cancels whatever subscription produced the values feeding a
/// [`StreamState`]. Constructed by the transport that opened the
/// subscription (e.g. a websocket) and stashed until teardown.
#[derive(Clone)]
pub struct StreamHandle {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl StreamHandle {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        StreamHandle {
            cancel: Arc::new(cancel),
        }
    }

    pub fn teardown(&self) {
        (self.cancel)()
    }
}

/// The reactive half of a streamed query: the latest value pushed by the
/// subscription, plus whichever handle is currently open so a re-subscribe
/// can tear down the old one first.
#[derive(Clone)]
pub struct StreamState<V: 'static> {
    pub value: RwSignal<Option<V>>,
    handle: Arc<Mutex<Option<StreamHandle>>>,
}

impl<V: Clone + Send + Sync + 'static> Default for StreamState<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> StreamState<V> {
    pub fn new() -> Self {
        StreamState {
            value: RwSignal::new(None),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces the active subscription, tearing down whatever was open
    /// before it.
    pub fn attach(&self, handle: StreamHandle) {
        self.detach();
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub fn detach(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.teardown();
        }
    }

    pub fn on_update(&self, value: V) {
        self.value.set(Some(value));
    }

    pub fn is_attached(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn attach_tears_down_previous_handle() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let state: StreamState<i32> = StreamState::new();

        let first_flag = torn_down.clone();
        state.attach(StreamHandle::new(move || {
            first_flag.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(state.is_attached());

        let second_flag = torn_down.clone();
        state.attach(StreamHandle::new(move || {
            second_flag.fetch_add(10, Ordering::SeqCst);
        }));
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);

        state.detach();
        assert_eq!(torn_down.load(Ordering::SeqCst), 11);
        assert!(!state.is_attached());
    }

    #[test]
    fn on_update_replaces_value() {
        let state = StreamState::new();
        state.on_update(1);
        state.on_update(2);
        assert_eq!(state.value.get_untracked(), Some(2));
    }
}
