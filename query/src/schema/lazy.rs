//! One-shot reification for cyclic schemas.
//!
//! Entity and extended-object schemas must be constructible before every
//! field is known, because entities reference one another. A `Lazy<T>` holds
//! a thunk that runs at most once; a `computing` flag guards against a
//! schema that (incorrectly) recurses into itself during reification,
//! raising `InvariantViolation` instead of deadlocking or stack-overflowing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::error::{QueryError, QueryResult};

type Thunk<T> = Box<dyn FnOnce() -> QueryResult<T> + Send>;

pub struct Lazy<T> {
    thunk: Mutex<Option<Thunk<T>>>,
    value: OnceLock<QueryResult<T>>,
    computing: AtomicBool,
}

impl<T: Clone> Lazy<T> {
    pub fn new(thunk: impl FnOnce() -> QueryResult<T> + Send + 'static) -> Self {
        Lazy {
            thunk: Mutex::new(Some(Box::new(thunk))),
            value: OnceLock::new(),
            computing: AtomicBool::new(false),
        }
    }

    pub fn ready(value: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Ok(value));
        Lazy {
            thunk: Mutex::new(None),
            value: cell,
            computing: AtomicBool::new(false),
        }
    }

    /// Force reification, memoizing the result (success or failure) after
    /// the first call.
    pub fn get(&self) -> QueryResult<T> {
        if let Some(result) = self.value.get() {
            return result.clone();
        }

        if self.computing.swap(true, Ordering::SeqCst) {
            return Err(QueryError::InvariantViolation(
                "schema cycle detected during reification".into(),
            ));
        }

        let thunk = self.thunk.lock().unwrap().take();
        let result = match thunk {
            Some(f) => f(),
            None => Err(QueryError::InvariantViolation(
                "lazy schema thunk already consumed".into(),
            )),
        };

        // OnceLock::set only fails if already set, which cannot happen here
        // since `computing` serializes all callers onto this single path.
        let _ = self.value.set(result.clone());
        self.computing.store(false, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn runs_thunk_once() {
        use std::sync::atomic::AtomicU32;
        use std::sync::Arc;

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let lazy = Lazy::new(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });

        assert_eq!(lazy.get(), Ok(42));
        assert_eq!(lazy.get(), Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memoizes_failure_too() {
        let lazy: Lazy<i32> =
            Lazy::new(|| Err(QueryError::InvariantViolation("boom".into())));
        assert!(lazy.get().is_err());
        assert!(lazy.get().is_err());
    }
}
