//! Type Schema: a lazy, self-describing structural schema used by the
//! parser to validate and coerce wire JSON, and to compute the per-entity
//! shape key that isolates schema versions in the store.

mod composite;
mod format;
mod lazy;

pub use composite::{EnumSchema, IdKind, ObjectSchema, UnionSchema};
pub use format::Format;
pub use lazy::Lazy;

use std::sync::Arc;

use crate::error::QueryResult;

/// A schema node. Leaves are primitive markers; composites hold `Arc`'d
/// children so cloning a `Schema` is cheap and shared structure (e.g. an
/// entity referenced from many places) stays a single reified instance.
#[derive(Clone)]
pub enum Schema {
    Null,
    Bool,
    Number,
    Str,
    Const(serde_json::Value),
    Enum(Arc<EnumSchema>),
    Format(Format),
    Optional(Arc<Schema>),
    Nullable(Arc<Schema>),
    Array(Arc<Schema>),
    Record(Arc<Schema>),
    Object(Arc<ObjectSchema>),
    Union(Arc<UnionSchema>),
}

impl Schema {
    pub fn optional(self) -> Schema {
        Schema::Optional(Arc::new(self))
    }

    pub fn nullable(self) -> Schema {
        Schema::Nullable(Arc::new(self))
    }

    pub fn array(self) -> Schema {
        Schema::Array(Arc::new(self))
    }

    pub fn record(self) -> Schema {
        Schema::Record(Arc::new(self))
    }

    pub fn is_optional_or_nullable(&self) -> bool {
        matches!(self, Schema::Optional(_) | Schema::Nullable(_))
    }

    /// True for `Object` schemas that declare a `__typename`.
    pub fn as_entity(&self) -> Option<&Arc<ObjectSchema>> {
        match self {
            Schema::Object(obj) if obj.is_entity() => Some(obj),
            _ => None,
        }
    }

    /// Human string for ValidationError messages, e.g. `"string"`,
    /// `"Active" | "Inactive" | "Pending"`, `"array<number>"`.
    pub fn type_to_string(&self) -> String {
        match self {
            Schema::Null => "null".to_string(),
            Schema::Bool => "boolean".to_string(),
            Schema::Number => "number".to_string(),
            Schema::Str => "string".to_string(),
            Schema::Const(v) => v.to_string(),
            Schema::Enum(e) => e.type_string(),
            Schema::Format(f) => f.type_string().to_string(),
            Schema::Optional(inner) => inner.type_to_string(),
            Schema::Nullable(inner) => format!("{} | null", inner.type_to_string()),
            Schema::Array(inner) => format!("array<{}>", inner.type_to_string()),
            Schema::Record(inner) => format!("record<{}>", inner.type_to_string()),
            Schema::Object(obj) => match &obj.typename {
                Some(typename) => typename.clone(),
                None => "object".to_string(),
            },
            Schema::Union(u) => {
                let mut keys: Vec<&String> = u.variants.keys().collect();
                keys.sort();
                keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(" | ")
            }
        }
    }
}

/// Structural descriptor used by `ObjectSchema::shape_key`. Entity
/// references are abbreviated to `entityref:<typename>` so that cyclic
/// entity graphs terminate (see the cycle test in `composite.rs`);
/// everything else recurses fully.
pub(crate) fn describe(schema: &Schema) -> QueryResult<String> {
    Ok(match schema {
        Schema::Null => "null".to_string(),
        Schema::Bool => "bool".to_string(),
        Schema::Number => "number".to_string(),
        Schema::Str => "string".to_string(),
        Schema::Const(v) => format!("const:{v}"),
        Schema::Enum(e) => e.shape_descriptor(),
        Schema::Format(f) => format!("format:{}", f.type_string()),
        Schema::Optional(inner) => format!("optional<{}>", describe(inner)?),
        Schema::Nullable(inner) => format!("nullable<{}>", describe(inner)?),
        Schema::Array(inner) => format!("array<{}>", describe(inner)?),
        Schema::Record(inner) => format!("record<{}>", describe(inner)?),
        Schema::Union(u) => u.shape_descriptor(),
        Schema::Object(obj) => match &obj.typename {
            Some(typename) => format!("entityref:{typename}"),
            None => {
                let fields = obj.fields()?;
                let mut names: Vec<&String> = fields.iter().map(|(n, _)| n).collect();
                names.sort();
                let mut parts = Vec::with_capacity(names.len());
                for name in names {
                    let (_, s) = fields.iter().find(|(n, _)| n == name).unwrap();
                    parts.push(format!("{name}:{}", describe(s)?));
                }
                format!("object{{{}}}", parts.join(","))
            }
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn type_to_string_primitives() {
        assert_eq!(Schema::Str.type_to_string(), "string");
        assert_eq!(Schema::Number.type_to_string(), "number");
        assert_eq!(Schema::Str.array().type_to_string(), "array<string>");
    }

    #[test]
    fn type_to_string_nullable() {
        assert_eq!(Schema::Str.nullable().type_to_string(), "string | null");
    }
}
