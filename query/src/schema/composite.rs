//! Composite schema kinds: enum (exact and case-insensitive), object/entity,
//! and tag-dispatched union.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::schema::lazy::Lazy;
use crate::schema::Schema;

/// `enum(...)` / `enum.caseInsensitive(...)`.
#[derive(Clone)]
pub struct EnumSchema {
    members: Vec<String>,
    /// Present only for the case-insensitive variant: lowercased member ->
    /// canonical member.
    lowercase_index: Option<HashMap<String, String>>,
}

impl EnumSchema {
    pub fn exact(members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        EnumSchema {
            members: members.into_iter().map(Into::into).collect(),
            lowercase_index: None,
        }
    }

    /// Fails if two members would collapse under ASCII lowercasing.
    pub fn case_insensitive(
        members: impl IntoIterator<Item = impl Into<String>>,
    ) -> QueryResult<Self> {
        let members: Vec<String> = members.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(members.len());
        for member in &members {
            let lower = member.to_ascii_lowercase();
            if let Some(existing) = index.insert(lower.clone(), member.clone()) {
                return Err(QueryError::InvariantViolation(format!(
                    "enum.caseInsensitive: members '{existing}' and '{member}' collapse to the same case-insensitive value '{lower}'"
                )));
            }
        }
        Ok(EnumSchema {
            members,
            lowercase_index: Some(index),
        })
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.lowercase_index.is_some()
    }

    pub fn has(&self, value: &str) -> bool {
        self.canonicalize(value).is_some()
    }

    /// Returns the canonical member for `value`, or `None` on a miss.
    pub fn canonicalize(&self, value: &str) -> Option<String> {
        match &self.lowercase_index {
            Some(index) => index.get(&value.to_ascii_lowercase()).cloned(),
            None => self.members.iter().find(|m| m.as_str() == value).cloned(),
        }
    }

    /// `"Active" | "Inactive" | "Pending"`, used verbatim in validation-error
    /// messages.
    pub fn type_string(&self) -> String {
        self.members
            .iter()
            .map(|m| format!("{m:?}"))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    pub(crate) fn shape_descriptor(&self) -> String {
        format!(
            "enum{}[{}]",
            if self.is_case_insensitive() { "_ci" } else { "" },
            self.members.join("|")
        )
    }
}

/// Identifies whether `id` is a string or a number for an entity schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Str,
    Number,
}

const RESERVED_FIELD_NAMES: [&str; 2] = ["id", "__typename"];

/// Backs both plain `object`/`record` shapes and `entity` shapes. An
/// `ObjectSchema` is an entity iff `typename` is `Some`; this mirrors the
/// parser's own identification rule (a `__typename` matching a declared
/// entity schema plus a non-null `id`) instead of introducing a second
/// schema type.
pub struct ObjectSchema {
    pub typename: Option<String>,
    pub id_kind: Option<IdKind>,
    fields: Lazy<Vec<(String, Schema)>>,
}

impl ObjectSchema {
    pub fn object(thunk: impl FnOnce() -> QueryResult<Vec<(String, Schema)>> + Send + 'static) -> Arc<Self> {
        Arc::new(ObjectSchema {
            typename: None,
            id_kind: None,
            fields: Lazy::new(thunk),
        })
    }

    pub fn entity(
        typename: impl Into<String>,
        id_kind: IdKind,
        thunk: impl FnOnce() -> QueryResult<Vec<(String, Schema)>> + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(ObjectSchema {
            typename: Some(typename.into()),
            id_kind: Some(id_kind),
            fields: Lazy::new(thunk),
        })
    }

    pub fn is_entity(&self) -> bool {
        self.typename.is_some()
    }

    pub fn fields(&self) -> QueryResult<Vec<(String, Schema)>> {
        self.fields.get()
    }

    pub fn field(&self, name: &str) -> QueryResult<Option<Schema>> {
        Ok(self
            .fields()?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s))
    }

    /// Extends `self` with additional fields, raising `InvariantViolation`
    /// on any name collision (including the reserved `id`/`__typename`)
    /// when the result is first reified.
    pub fn extend(
        self: &Arc<Self>,
        extra_thunk: impl FnOnce() -> QueryResult<Vec<(String, Schema)>> + Send + 'static,
    ) -> Arc<Self> {
        let parent = self.clone();
        let typename = self.typename.clone();
        let id_kind = self.id_kind;
        Arc::new(ObjectSchema {
            typename,
            id_kind,
            fields: Lazy::new(move || {
                let base = parent.fields()?;
                let extra = extra_thunk()?;
                let mut seen: std::collections::HashSet<String> =
                    base.iter().map(|(n, _)| n.clone()).collect();
                seen.extend(RESERVED_FIELD_NAMES.iter().map(|s| s.to_string()));
                let mut merged = base;
                for (name, schema) in extra {
                    if seen.contains(&name) {
                        return Err(QueryError::InvariantViolation(format!(
                            "Cannot extend: field '{name}' already exists"
                        )));
                    }
                    seen.insert(name.clone());
                    merged.push((name, schema));
                }
                Ok(merged)
            }),
        })
    }

    pub fn shape_key(&self) -> QueryResult<u32> {
        let fields = self.fields()?;
        let mut names: Vec<&String> = fields.iter().map(|(n, _)| n).collect();
        names.sort();

        let mut desc = String::new();
        match &self.typename {
            Some(typename) => {
                desc.push_str("entity:");
                desc.push_str(typename);
            }
            None => desc.push_str("object:"),
        }
        desc.push('{');
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                desc.push(',');
            }
            let (_, schema) = fields.iter().find(|(n, _)| n == *name).unwrap();
            desc.push_str(name);
            desc.push(':');
            desc.push_str(&crate::schema::describe(schema)?);
        }
        desc.push('}');
        Ok(crate::fingerprint::fnv1a(desc.as_bytes()))
    }
}

/// Tag-dispatched union of entity/object variants, keyed by `__typename`.
pub struct UnionSchema {
    pub variants: HashMap<String, Schema>,
}

impl UnionSchema {
    pub fn new(variants: impl IntoIterator<Item = (impl Into<String>, Schema)>) -> Self {
        UnionSchema {
            variants: variants.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn dispatch(&self, typename: &str) -> Option<&Schema> {
        self.variants.get(typename)
    }

    pub(crate) fn shape_descriptor(&self) -> String {
        let mut keys: Vec<&String> = self.variants.keys().collect();
        keys.sort();
        format!("union{{{}}}", keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(","))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::Schema;

    #[test]
    fn case_insensitive_enum_canonicalizes() {
        let e = EnumSchema::case_insensitive(["Active", "Inactive", "Pending"]).unwrap();
        assert_eq!(e.canonicalize("PENDING"), Some("Pending".to_string()));
        assert_eq!(e.canonicalize("invalid"), None);
        assert_eq!(e.type_string(), "\"Active\" | \"Inactive\" | \"Pending\"");
    }

    #[test]
    fn case_insensitive_enum_rejects_collisions() {
        let err = EnumSchema::case_insensitive(["active", "Active"]).unwrap_err();
        assert!(matches!(err, QueryError::InvariantViolation(_)));
    }

    #[test]
    fn exact_enum_is_case_sensitive() {
        let e = EnumSchema::exact(["Active", "Inactive"]);
        assert!(e.has("Active"));
        assert!(!e.has("active"));
    }

    #[test]
    fn extend_rejects_field_collision() {
        let base = ObjectSchema::entity("User", IdKind::Str, || {
            Ok(vec![("name".to_string(), Schema::Str)])
        });
        let extended = base.extend(|| Ok(vec![("name".to_string(), Schema::Str)]));
        let err = extended.fields().unwrap_err();
        assert!(matches!(err, QueryError::InvariantViolation(msg) if msg.contains("'name'")));
    }

    #[test]
    fn extend_rejects_reserved_names() {
        let base = ObjectSchema::entity("User", IdKind::Str, || Ok(vec![]));
        let extended = base.extend(|| Ok(vec![("id".to_string(), Schema::Str)]));
        assert!(extended.fields().is_err());
    }

    #[test]
    fn shape_key_changes_when_field_added() {
        let a = ObjectSchema::entity("User", IdKind::Str, || {
            Ok(vec![("name".to_string(), Schema::Str)])
        });
        let b = ObjectSchema::entity("User", IdKind::Str, || {
            Ok(vec![
                ("name".to_string(), Schema::Str),
                ("email".to_string(), Schema::Str),
            ])
        });
        assert_ne!(a.shape_key().unwrap(), b.shape_key().unwrap());
    }

    #[test]
    fn shape_key_is_stable_for_identical_structure() {
        let a = ObjectSchema::entity("User", IdKind::Str, || {
            Ok(vec![("name".to_string(), Schema::Str)])
        });
        let b = ObjectSchema::entity("User", IdKind::Str, || {
            Ok(vec![("name".to_string(), Schema::Str)])
        });
        assert_eq!(a.shape_key().unwrap(), b.shape_key().unwrap());
    }

    #[test]
    fn self_referential_entity_does_not_loop() {
        use std::sync::{Arc, OnceLock};
        let slot: Arc<OnceLock<Schema>> = Arc::new(OnceLock::new());
        let slot2 = slot.clone();
        let user = ObjectSchema::entity("User", IdKind::Str, move || {
            let friend = slot2.get().cloned().expect("placeholder installed");
            Ok(vec![("bestFriend".to_string(), Schema::Optional(Arc::new(friend)))])
        });
        let _ = slot.set(Schema::Object(user.clone()));
        // Describing a reference to `user` must not recurse into its own
        // field list (it would loop); shape_key() on the field itself must
        // still terminate.
        assert!(user.shape_key().is_ok());
    }
}
