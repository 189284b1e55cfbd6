//! Key-value storage contract for the store façade, plus an in-memory
//! default and feature-gated browser-backed implementations.

use futures::future::LocalBoxFuture;
use futures::FutureExt;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> LocalBoxFuture<'_, Option<String>>;
    fn set(&self, key: &str, value: String) -> LocalBoxFuture<'_, ()>;
    fn remove(&self, key: &str) -> LocalBoxFuture<'_, ()>;
    fn keys_with_prefix(&self, prefix: &str) -> LocalBoxFuture<'_, Vec<String>>;
}

/// Default store: a process-lifetime `HashMap`. Used in tests and whenever
/// no durable backend is configured.
#[derive(Default, Clone)]
pub struct MemoryKv {
    inner: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> LocalBoxFuture<'_, Option<String>> {
        let value = self.inner.read().unwrap().get(key).cloned();
        async move { value }.boxed_local()
    }

    fn set(&self, key: &str, value: String) -> LocalBoxFuture<'_, ()> {
        self.inner.write().unwrap().insert(key.to_string(), value);
        async move {}.boxed_local()
    }

    fn remove(&self, key: &str) -> LocalBoxFuture<'_, ()> {
        self.inner.write().unwrap().remove(key);
        async move {}.boxed_local()
    }

    fn keys_with_prefix(&self, prefix: &str) -> LocalBoxFuture<'_, Vec<String>> {
        let keys: Vec<String> = self
            .inner
            .read()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        async move { keys }.boxed_local()
    }
}

#[cfg(feature = "local_storage")]
pub struct LocalStorageKv;

#[cfg(feature = "local_storage")]
impl LocalStorageKv {
    fn storage() -> Option<web_sys::Storage> {
        web_sys::window()?.local_storage().ok()?
    }
}

#[cfg(feature = "local_storage")]
impl KvStore for LocalStorageKv {
    fn get(&self, key: &str) -> LocalBoxFuture<'_, Option<String>> {
        let value = Self::storage().and_then(|s| s.get_item(key).ok().flatten());
        async move { value }.boxed_local()
    }

    fn set(&self, key: &str, value: String) -> LocalBoxFuture<'_, ()> {
        if let Some(storage) = Self::storage() {
            let _ = storage.set_item(key, &value);
        }
        async move {}.boxed_local()
    }

    fn remove(&self, key: &str) -> LocalBoxFuture<'_, ()> {
        if let Some(storage) = Self::storage() {
            let _ = storage.remove_item(key);
        }
        async move {}.boxed_local()
    }

    fn keys_with_prefix(&self, prefix: &str) -> LocalBoxFuture<'_, Vec<String>> {
        let mut keys = Vec::new();
        if let Some(storage) = Self::storage() {
            if let Ok(len) = storage.length() {
                for i in 0..len {
                    if let Ok(Some(key)) = storage.key(i) {
                        if key.starts_with(prefix) {
                            keys.push(key);
                        }
                    }
                }
            }
        }
        async move { keys }.boxed_local()
    }
}

#[cfg(feature = "indexed_db")]
pub struct IndexedDbKv {
    db_name: String,
    store_name: &'static str,
}

#[cfg(feature = "indexed_db")]
impl IndexedDbKv {
    pub fn new(db_name: impl Into<String>) -> Self {
        IndexedDbKv {
            db_name: db_name.into(),
            store_name: "leptos_norm_query_kv",
        }
    }

    async fn open(&self) -> Result<indexed_db_futures::database::Database, indexed_db_futures::error::Error> {
        use indexed_db_futures::prelude::*;
        let store_name = self.store_name;
        indexed_db_futures::database::Database::open(&self.db_name)
            .with_version(1u8)
            .with_on_upgrade_needed(move |_event, db| {
                db.create_object_store(store_name).build()?;
                Ok(())
            })
            .await
    }
}

#[cfg(feature = "indexed_db")]
impl KvStore for IndexedDbKv {
    fn get(&self, key: &str) -> LocalBoxFuture<'_, Option<String>> {
        let key = key.to_string();
        async move {
            let db = self.open().await.ok()?;
            let tx = db.transaction(self.store_name).build().ok()?;
            let store = tx.object_store(self.store_name).ok()?;
            let value = store.get(key.as_str()).await.ok()??;
            value.as_string()
        }
        .boxed_local()
    }

    fn set(&self, key: &str, value: String) -> LocalBoxFuture<'_, ()> {
        let key = key.to_string();
        async move {
            if let Ok(db) = self.open().await {
                if let Ok(tx) = db.transaction(self.store_name).with_mode(indexed_db_futures::transaction::TransactionMode::Readwrite).build() {
                    if let Ok(store) = tx.object_store(self.store_name) {
                        let _ = store.put(wasm_bindgen::JsValue::from_str(&value)).with_key(wasm_bindgen::JsValue::from_str(&key)).await;
                        let _ = tx.commit().await;
                    }
                }
            }
        }
        .boxed_local()
    }

    fn remove(&self, key: &str) -> LocalBoxFuture<'_, ()> {
        let key = key.to_string();
        async move {
            if let Ok(db) = self.open().await {
                if let Ok(tx) = db.transaction(self.store_name).with_mode(indexed_db_futures::transaction::TransactionMode::Readwrite).build() {
                    if let Ok(store) = tx.object_store(self.store_name) {
                        let _ = store.delete(key.as_str()).await;
                        let _ = tx.commit().await;
                    }
                }
            }
        }
        .boxed_local()
    }

    fn keys_with_prefix(&self, prefix: &str) -> LocalBoxFuture<'_, Vec<String>> {
        let prefix = prefix.to_string();
        async move {
            let mut out = Vec::new();
            if let Ok(db) = self.open().await {
                if let Ok(tx) = db.transaction(self.store_name).build() {
                    if let Ok(store) = tx.object_store(self.store_name) {
                        if let Ok(keys) = store.get_all_keys().await {
                            for key in keys {
                                if let Some(key) = key.as_string() {
                                    if key.starts_with(&prefix) {
                                        out.push(key);
                                    }
                                }
                            }
                        }
                    }
                }
            }
            out
        }
        .boxed_local()
    }
}
