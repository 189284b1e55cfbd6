//! Error taxonomy for the cache engine.
//!
//! `Validation`, `Network`, `InvariantViolation` and `Usage` are surfaced to
//! callers. `CacheCorruption` never is: it is raised internally on the
//! cache-load path, caught, logged, and converted into a plain cache miss by
//! whoever walks the Store (see `query::store::Store::load_query`).

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    /// Wire data did not match the declared schema at a required position.
    #[error("Validation error at {path}: expected {expected}, got {observed}")]
    Validation {
        path: String,
        expected: String,
        observed: String,
    },

    /// Transport-level failure surfaced by a `Transport` implementation.
    #[error("Network error: {0}")]
    Network(String),

    /// Cache-load parse/shape/ref failure. Recovered locally; never surfaced
    /// to a query caller. Kept as a distinct variant so the cache-load path
    /// can pattern-match on it instead of string-sniffing a `Validation`.
    #[error("Cache corruption at key {0}")]
    CacheCorruption(u32),

    /// Extension field collision, duplicate case-insensitive enum member, or
    /// any other structural schema mistake, surfaced on first touch.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Caller misuse: `fetchNextPage` while exhausted or while refetching
    /// (and vice versa), missing client context, etc.
    #[error("Usage error: {0}")]
    Usage(String),
}

impl QueryError {
    pub fn validation(
        path: impl Into<String>,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        QueryError::Validation {
            path: path.into(),
            expected: expected.into(),
            observed: observed.into(),
        }
    }

    /// True for the variant that the cache-load path should swallow rather
    /// than surface as a query error.
    pub fn is_cache_corruption(&self) -> bool {
        matches!(self, QueryError::CacheCorruption(_))
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation_message_shape() {
        let err = QueryError::validation("user.name", "string", "number");
        assert_eq!(
            err.to_string(),
            "Validation error at user.name: expected string, got number"
        );
    }

    #[test]
    fn cache_corruption_is_recoverable() {
        assert!(QueryError::CacheCorruption(7).is_cache_corruption());
        assert!(!QueryError::Usage("x".into()).is_cache_corruption());
    }
}
