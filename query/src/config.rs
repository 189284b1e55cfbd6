//! Client-wide configuration: where requests go, how they're sent, how
//! aggressively the disk cache evicts, and where warnings surface.

use std::sync::Arc;

use leptos::prelude::*;

use crate::transport::{SubscriptionTransport, Transport};

/// Configuration shared by every query definition registered against one
/// [`crate::client::QueryClient`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Reactive so an application can point at a different backend (e.g.
    /// after a tenant switch) without recreating the client.
    pub base_url: RwSignal<String>,
    pub transport: Option<Arc<dyn Transport>>,
    /// Backs streamed queries; unset if the application never uses them.
    pub subscription_transport: Option<Arc<dyn SubscriptionTransport>>,
    /// Multiplies a definition's disk-cache capacity to decide how many
    /// entries the LRU evicts per GC sweep once over budget.
    pub eviction_multiplier: f64,
    pub warn: Arc<dyn Fn(&str) + Send + Sync>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: RwSignal::new(String::new()),
            transport: None,
            subscription_transport: None,
            eviction_multiplier: 1.5,
            warn: Arc::new(|message| leptos::logging::warn!("{message}")),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.get_untracked())
            .field("has_transport", &self.transport.is_some())
            .field("eviction_multiplier", &self.eviction_multiplier)
            .finish()
    }
}
