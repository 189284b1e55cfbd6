//! Infinite-query pagination: accumulated pages plus the cursor needed to
//! fetch the next one.

use serde_json::Value as Json;

#[derive(Clone, Debug)]
pub struct Page<V> {
    pub value: V,
}

#[derive(Clone, Debug)]
pub struct InfiniteState<V> {
    pub pages: Vec<Page<V>>,
    pub next_cursor: Option<Json>,
}

impl<V> Default for InfiniteState<V> {
    fn default() -> Self {
        InfiniteState {
            pages: Vec::new(),
            next_cursor: None,
        }
    }
}

impl<V> InfiniteState<V> {
    pub fn has_next_page(&self) -> bool {
        self.pages.is_empty() || self.next_cursor.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_state_has_next_page_to_fetch_first_page() {
        let state: InfiniteState<()> = InfiniteState::default();
        assert!(state.has_next_page());
    }

    #[test]
    fn exhausted_state_has_no_next_page() {
        let state = InfiniteState {
            pages: vec![Page { value: 1 }],
            next_cursor: None,
        };
        assert!(!state.has_next_page());
    }
}
