//! Reactive materialization of normalized values: turning a `Normalized`
//! tree plus an `EntityMap` back into something callers can read field by
//! field, with entity references resolved live instead of frozen at parse
//! time.

use std::collections::HashSet;

use leptos::prelude::*;
use serde_json::{Map, Value as Json};

use crate::entity::EntityId;
use crate::entity::EntityMap;

use super::normalized::Normalized;

/// A live view onto a single entity record. Reading through it tracks the
/// entity's signal, so any component calling `.field()` inside a reactive
/// scope re-renders exactly when that entity (not the whole query) changes.
#[derive(Clone)]
pub struct EntityProxy {
    entity_map: EntityMap,
    key: u32,
}

impl EntityProxy {
    pub fn new(entity_map: EntityMap, key: u32) -> Self {
        EntityProxy { entity_map, key }
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    fn snapshot(&self) -> Normalized {
        self.entity_map
            .get(self.key)
            .map(|sig| sig.get())
            .unwrap_or(Normalized::Null)
    }

    pub fn field(&self, name: &str) -> ValueProxy {
        let value = self
            .snapshot()
            .get_field(name)
            .cloned()
            .unwrap_or(Normalized::Null);
        ValueProxy::new(self.entity_map.clone(), value)
    }

    pub fn typename(&self) -> Option<String> {
        self.entity_map.typename(self.key)
    }

    pub fn id(&self) -> Option<EntityId> {
        self.entity_map.id(self.key)
    }
}

/// A live view onto an arbitrary normalized value (primitive, array, plain
/// object, or entity reference) reached while walking a query's result.
#[derive(Clone)]
pub struct ValueProxy {
    entity_map: EntityMap,
    value: Normalized,
}

impl ValueProxy {
    pub fn new(entity_map: EntityMap, value: Normalized) -> Self {
        ValueProxy { entity_map, value }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, Normalized::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Normalized::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            Normalized::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Normalized::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Resolves this value as an entity reference, if it is one.
    pub fn as_entity(&self) -> Option<EntityProxy> {
        match self.value {
            Normalized::EntityRef(key) => Some(EntityProxy::new(self.entity_map.clone(), key)),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<Vec<ValueProxy>> {
        match &self.value {
            Normalized::Array(items) => Some(
                items
                    .iter()
                    .map(|v| ValueProxy::new(self.entity_map.clone(), v.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<ValueProxy> {
        self.value
            .get_field(name)
            .map(|v| ValueProxy::new(self.entity_map.clone(), v.clone()))
    }
}

/// Fully dereferences a normalized value into plain JSON, re-expanding every
/// `EntityRef` into its current entity body with `__typename`/`id`
/// reattached as ordinary fields. A value revisited along the same path is
/// truncated to a bare `{__typename, id}` stub rather than recursed into
/// again, so cyclic entity graphs (`User.bestFriend -> User`) still
/// terminate.
pub fn clone_deep(value: &Normalized, entity_map: &EntityMap) -> Json {
    let mut visiting = HashSet::new();
    deref(value, entity_map, &mut visiting)
}

fn deref(value: &Normalized, entity_map: &EntityMap, visiting: &mut HashSet<u32>) -> Json {
    match value {
        Normalized::Null => Json::Null,
        Normalized::Bool(b) => Json::Bool(*b),
        Normalized::Number(n) => serde_json::Number::from_f64(*n).map(Json::Number).unwrap_or(Json::Null),
        Normalized::Str(s) => Json::String(s.clone()),
        Normalized::Array(items) => Json::Array(items.iter().map(|v| deref(v, entity_map, visiting)).collect()),
        Normalized::Object(fields) => {
            let mut map = Map::new();
            for (k, v) in fields {
                map.insert(k.clone(), deref(v, entity_map, visiting));
            }
            Json::Object(map)
        }
        Normalized::EntityRef(key) => {
            let Some(sig) = entity_map.get(*key) else {
                return Json::Null;
            };
            if !visiting.insert(*key) {
                return stub(*key, entity_map);
            }
            let body = sig.get_untracked();
            let mut resolved = deref(&body, entity_map, visiting);
            if let Json::Object(map) = &mut resolved {
                if let Some(typename) = entity_map.typename(*key) {
                    map.insert("__typename".to_string(), Json::String(typename));
                }
                if let Some(id) = entity_map.id(*key) {
                    map.insert("id".to_string(), id_to_json(&id));
                }
            }
            visiting.remove(key);
            resolved
        }
    }
}

fn stub(key: u32, entity_map: &EntityMap) -> Json {
    let mut map = Map::new();
    if let Some(typename) = entity_map.typename(key) {
        map.insert("__typename".to_string(), Json::String(typename));
    }
    if let Some(id) = entity_map.id(key) {
        map.insert("id".to_string(), id_to_json(&id));
    }
    Json::Object(map)
}

fn id_to_json(id: &EntityId) -> Json {
    match id {
        EntityId::Str(s) => Json::String(s.clone()),
        EntityId::Number(n) => Json::Number((*n).into()),
    }
}

pub fn entity_id_from_value(value: &Normalized) -> Option<EntityId> {
    match value {
        Normalized::Str(s) => Some(EntityId::Str(s.clone())),
        Normalized::Number(n) => Some(EntityId::Number(*n as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entity::entity_key;

    #[test]
    fn value_proxy_resolves_entity_ref() {
        let entity_map = EntityMap::new();
        let key = entity_key("User", &EntityId::Str("u1".into()), 1);
        entity_map.upsert(
            key,
            "User".into(),
            EntityId::Str("u1".into()),
            Normalized::Object(vec![("name".into(), Normalized::Str("Ada".into()))]),
        );
        let proxy = ValueProxy::new(entity_map, Normalized::EntityRef(key));
        let entity = proxy.as_entity().unwrap();
        assert_eq!(entity.field("name").as_str(), Some("Ada"));
    }

    #[test]
    fn clone_deep_terminates_on_self_reference() {
        let entity_map = EntityMap::new();
        let key = entity_key("User", &EntityId::Str("u1".into()), 1);
        entity_map.upsert(
            key,
            "User".into(),
            EntityId::Str("u1".into()),
            Normalized::Object(vec![
                ("__typename".into(), Normalized::Str("User".into())),
                ("id".into(), Normalized::Str("u1".into())),
                ("bestFriend".into(), Normalized::EntityRef(key)),
            ]),
        );
        let json = clone_deep(&Normalized::EntityRef(key), &entity_map);
        let best_friend = &json["bestFriend"];
        assert_eq!(best_friend["__typename"], "User");
        assert!(best_friend.get("bestFriend").is_none());
    }
}
