//! The HTTP contract a [`crate::client::QueryClient`] drives query
//! definitions through. Left dependency-free (no `reqwest`) so the crate
//! works the same way whether the application reaches for `gloo-net`,
//! `reqwest`, or a hand-rolled `fetch` binding.

use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::error::QueryResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub search: Option<Value>,
    pub body: Option<Value>,
}

/// Implemented by the host application to actually move bytes over the
/// wire. A `QueryClient` never constructs one of these itself.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> LocalBoxFuture<'_, QueryResult<Value>>;
}

/// Implemented by the host application to open a live subscription (e.g. a
/// websocket) backing a streamed query. `on_update` is called by the
/// application every time a new value arrives; the returned handle tears
/// the subscription down on request.
pub trait SubscriptionTransport: Send + Sync {
    fn subscribe(
        &self,
        request: TransportRequest,
        on_update: Box<dyn Fn(Value) + Send + Sync>,
    ) -> crate::stream::StreamHandle;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn method_strings_are_uppercase_verbs() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Patch.as_str(), "PATCH");
    }
}
