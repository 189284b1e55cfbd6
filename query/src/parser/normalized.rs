//! The normalized form produced by the parser: a JSON-shaped tree where
//! entity positions have been replaced with `EntityRef` placeholders. This
//! is what query instances hold and what gets written to the store —
//! entity bodies themselves live only in the entity map.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub const ENTITY_REF_TAG: &str = "__entityRef";

#[derive(Clone, Debug, PartialEq)]
pub enum Normalized {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    EntityRef(u32),
    Array(Vec<Normalized>),
    /// Field order is preserved only for readability; it carries no
    /// semantic weight (object equality is per-field, not positional).
    Object(Vec<(String, Normalized)>),
}

impl Normalized {
    pub fn to_json(&self) -> Value {
        match self {
            Normalized::Null => Value::Null,
            Normalized::Bool(b) => Value::Bool(*b),
            Normalized::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Normalized::Str(s) => Value::String(s.clone()),
            Normalized::EntityRef(key) => {
                let mut map = Map::new();
                map.insert(ENTITY_REF_TAG.to_string(), Value::from(*key));
                Value::Object(map)
            }
            Normalized::Array(items) => Value::Array(items.iter().map(Normalized::to_json).collect()),
            Normalized::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                Value::Object(map)
            }
        }
    }

    pub fn from_json(value: &Value) -> Normalized {
        match value {
            Value::Null => Normalized::Null,
            Value::Bool(b) => Normalized::Bool(*b),
            Value::Number(n) => Normalized::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => Normalized::Str(s.clone()),
            Value::Array(items) => Normalized::Array(items.iter().map(Normalized::from_json).collect()),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(Value::Number(n)) = map.get(ENTITY_REF_TAG) {
                        if let Some(key) = n.as_u64() {
                            return Normalized::EntityRef(key as u32);
                        }
                    }
                }
                Normalized::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Normalized::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    pub fn get_field(&self, name: &str) -> Option<&Normalized> {
        match self {
            Normalized::Object(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Serializes through the same `__entityRef`-tagged JSON shape `to_json`
/// produces, so a persisted query's normalized body round-trips through the
/// store identically to how it'd round-trip over the wire.
impl Serialize for Normalized {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Normalized {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Normalized::from_json(&value))
    }
}

/// Every entity key referenced anywhere within `value`, deduplicated. Used
/// both for a query's own `refIds` and for an entity's references to other
/// entities.
pub fn collect_entity_refs(value: &Normalized) -> HashSet<u32> {
    let mut out = HashSet::new();
    collect_into(value, &mut out);
    out
}

fn collect_into(value: &Normalized, out: &mut HashSet<u32>) {
    match value {
        Normalized::EntityRef(key) => {
            out.insert(*key);
        }
        Normalized::Array(items) => {
            for item in items {
                collect_into(item, out);
            }
        }
        Normalized::Object(fields) => {
            for (_, v) in fields {
                collect_into(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let n = Normalized::Object(vec![
            ("id".into(), Normalized::Number(1.0)),
            ("friend".into(), Normalized::EntityRef(42)),
            ("tags".into(), Normalized::Array(vec![Normalized::Str("a".into())])),
        ]);
        let json = n.to_json();
        let back = Normalized::from_json(&json);
        assert_eq!(n, back);
    }

    #[test]
    fn serializes_through_entity_ref_tag() {
        let n = Normalized::Object(vec![("friend".into(), Normalized::EntityRef(7))]);
        let json = serde_json::to_string(&n).unwrap();
        let back: Normalized = serde_json::from_str(&json).unwrap();
        assert_eq!(n, back);
    }

    #[test]
    fn collects_nested_refs() {
        let n = Normalized::Array(vec![
            Normalized::EntityRef(1),
            Normalized::Object(vec![("x".into(), Normalized::EntityRef(2))]),
            Normalized::EntityRef(1),
        ]);
        let refs = collect_entity_refs(&n);
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&1));
        assert!(refs.contains(&2));
    }
}
