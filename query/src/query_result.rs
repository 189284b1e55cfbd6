//! The signal bundle a reactive hook returns to its caller.

use leptos::prelude::*;

pub struct QueryResult<V, R>
where
    R: crate::RefetchFn,
{
    pub data: Signal<Option<V>>,
    pub state: Signal<crate::QueryState<V>>,
    pub is_loading: Signal<bool>,
    pub is_fetching: Signal<bool>,
    pub is_invalid: Signal<bool>,
    pub refetch: R,
}

impl<V: Clone, R: crate::RefetchFn> Clone for QueryResult<V, R> {
    fn clone(&self) -> Self {
        QueryResult {
            data: self.data,
            state: self.state,
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_invalid: self.is_invalid,
            refetch: self.refetch.clone(),
        }
    }
}
