//! Wire JSON -> normalized form. Entities are identified by a declared
//! entity schema at the current position plus a matching `__typename` and
//! non-null `id`; everything else validates structurally and is filtered or
//! rejected per the table below.
//!
//! | failure                         | field kind         | outcome                |
//! |----------------------------------|--------------------|------------------------|
//! | primitive/shape mismatch         | required           | fail whole parse        |
//! | primitive/shape mismatch         | optional/nullable  | treated as absent, warn |
//! | array/record element mismatch    | any                | element filtered, warn  |
//! | union tag unrecognized           | any                | as above (by position)  |

use std::collections::HashSet;

use serde_json::Value as Json;

use crate::entity::EntityId;
use crate::error::{QueryError, QueryResult};
use crate::schema::{IdKind, Schema};

use super::normalized::{collect_entity_refs, Normalized};

/// An entity body extracted mid-parse, ready for the caller to merge into
/// the entity map and persist.
pub struct ExtractedEntity {
    pub key: u32,
    pub typename: String,
    pub id: EntityId,
    pub value: Normalized,
    pub ref_ids: HashSet<u32>,
}

/// Accumulates extracted entities and surfaces non-fatal coercion warnings
/// during a single parse pass.
pub struct ParseContext {
    pub extracted: Vec<ExtractedEntity>,
    warn: Box<dyn Fn(&str)>,
}

impl ParseContext {
    pub fn new(warn: impl Fn(&str) + 'static) -> Self {
        ParseContext {
            extracted: Vec::new(),
            warn: Box::new(warn),
        }
    }

    fn warn(&self, path: &str, message: &str) {
        (self.warn)(&format!("{path}: {message}"));
    }
}

/// Parses `value` against `schema` at the query root, returning the
/// normalized form and leaving every extracted entity in `ctx.extracted`.
pub fn parse_root(schema: &Schema, value: &Json, ctx: &mut ParseContext) -> QueryResult<Normalized> {
    parse_required(schema, value, "$", ctx)
}

fn fail(path: &str, expected: impl Into<String>, observed: &Json) -> QueryError {
    QueryError::Validation {
        path: path.to_string(),
        expected: expected.into(),
        observed: describe_json_kind(observed),
    }
}

fn describe_json_kind(value: &Json) -> String {
    match value {
        Json::Null => "null".to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        Json::String(s) => format!("{s:?}"),
        Json::Array(_) => "array".to_string(),
        Json::Object(_) => "object".to_string(),
    }
}

fn parse_required(schema: &Schema, value: &Json, path: &str, ctx: &mut ParseContext) -> QueryResult<Normalized> {
    match schema {
        Schema::Null => {
            if value.is_null() {
                Ok(Normalized::Null)
            } else {
                Err(fail(path, "null", value))
            }
        }
        Schema::Bool => value
            .as_bool()
            .map(Normalized::Bool)
            .ok_or_else(|| fail(path, "boolean", value)),
        Schema::Number => value
            .as_f64()
            .map(Normalized::Number)
            .ok_or_else(|| fail(path, "number", value)),
        Schema::Str => value
            .as_str()
            .map(|s| Normalized::Str(s.to_string()))
            .ok_or_else(|| fail(path, "string", value)),
        Schema::Const(expected) => {
            if value == expected {
                Ok(Normalized::from_json(value))
            } else {
                Err(fail(path, expected.to_string(), value))
            }
        }
        Schema::Enum(e) => {
            let s = value.as_str().ok_or_else(|| fail(path, e.type_string(), value))?;
            e.canonicalize(s)
                .map(Normalized::Str)
                .ok_or_else(|| fail(path, e.type_string(), value))
        }
        Schema::Format(f) => {
            let s = value
                .as_str()
                .ok_or_else(|| fail(path, f.type_string().to_string(), value))?;
            if f.validate(s) {
                Ok(Normalized::Str(s.to_string()))
            } else {
                Err(fail(path, f.type_string().to_string(), value))
            }
        }
        Schema::Optional(inner) | Schema::Nullable(inner) => {
            if value.is_null() {
                Ok(Normalized::Null)
            } else {
                parse_required(inner, value, path, ctx)
            }
        }
        Schema::Array(inner) => {
            let items = value.as_array().ok_or_else(|| fail(path, "array", value))?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                match parse_required(inner, item, &item_path, ctx) {
                    Ok(normalized) => out.push(normalized),
                    Err(e) => ctx.warn(&item_path, &format!("array element filtered: {e}")),
                }
            }
            Ok(Normalized::Array(out))
        }
        Schema::Record(inner) => {
            let map = value.as_object().ok_or_else(|| fail(path, "record", value))?;
            let mut out = Vec::with_capacity(map.len());
            for (key, item) in map {
                let item_path = format!("{path}.{key}");
                match parse_required(inner, item, &item_path, ctx) {
                    Ok(normalized) => out.push((key.clone(), normalized)),
                    Err(e) => ctx.warn(&item_path, &format!("record entry filtered: {e}")),
                }
            }
            Ok(Normalized::Object(out))
        }
        Schema::Union(u) => {
            let typename = value
                .get("__typename")
                .and_then(Json::as_str)
                .ok_or_else(|| fail(path, "object with __typename", value))?;
            let variant = u
                .dispatch(typename)
                .ok_or_else(|| fail(path, format!("one of {}", u.shape_descriptor()), value))?;
            parse_required(variant, value, path, ctx)
        }
        Schema::Object(obj) => {
            let map = value.as_object().ok_or_else(|| fail(path, "object", value))?;
            let fields = obj.fields()?;

            let mut parsed = Vec::with_capacity(fields.len());
            for (name, field_schema) in &fields {
                let field_path = format!("{path}.{name}");
                let field_value = map.get(name).cloned().unwrap_or(Json::Null);
                if field_schema.is_optional_or_nullable() {
                    match parse_required(field_schema, &field_value, &field_path, ctx) {
                        Ok(Normalized::Null) if map.get(name).is_none() => {}
                        Ok(normalized) => parsed.push((name.clone(), normalized)),
                        Err(e) => ctx.warn(&field_path, &format!("treated as absent: {e}")),
                    }
                } else {
                    parsed.push((name.clone(), parse_required(field_schema, &field_value, &field_path, ctx)?));
                }
            }
            let body = Normalized::Object(parsed);

            match (&obj.typename, obj.id_kind) {
                (Some(typename), Some(id_kind)) => {
                    let observed_typename = map.get("__typename").and_then(Json::as_str);
                    if observed_typename != Some(typename.as_str()) {
                        return Err(fail(path, format!("entity {typename}"), value));
                    }
                    let id = parse_entity_id(map.get("id"), id_kind, path)?;
                    let shape_key = obj.shape_key()?;
                    let key = crate::entity::entity_key(typename, &id, shape_key);
                    let ref_ids = collect_entity_refs(&body);
                    ctx.extracted.push(ExtractedEntity {
                        key,
                        typename: typename.clone(),
                        id,
                        value: body,
                        ref_ids,
                    });
                    Ok(Normalized::EntityRef(key))
                }
                _ => Ok(body),
            }
        }
    }
}

fn parse_entity_id(id: Option<&Json>, kind: IdKind, path: &str) -> QueryResult<EntityId> {
    match (id, kind) {
        (Some(Json::String(s)), IdKind::Str) => Ok(EntityId::Str(s.clone())),
        (Some(Json::Number(n)), IdKind::Number) => n
            .as_i64()
            .map(EntityId::Number)
            .ok_or_else(|| fail(path, "integer id", &Json::Number(n.clone()))),
        (None, _) | (Some(Json::Null), _) => Err(QueryError::Validation {
            path: format!("{path}.id"),
            expected: "non-null id".to_string(),
            observed: "null".to_string(),
        }),
        (Some(other), _) => Err(fail(&format!("{path}.id"), "matching id kind", other)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::{IdKind, ObjectSchema};
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::Object(ObjectSchema::entity("User", IdKind::Str, || {
            Ok(vec![
                ("name".to_string(), Schema::Str),
                ("nickname".to_string(), Schema::Str.optional()),
            ])
        }))
    }

    #[test]
    fn parses_plain_object() {
        let schema = Schema::Object(ObjectSchema::object(|| Ok(vec![("x".to_string(), Schema::Number)])));
        let mut ctx = ParseContext::new(|_| {});
        let out = parse_root(&schema, &json!({"x": 3.0}), &mut ctx).unwrap();
        assert_eq!(out, Normalized::Object(vec![("x".to_string(), Normalized::Number(3.0))]));
        assert!(ctx.extracted.is_empty());
    }

    #[test]
    fn extracts_entity_and_returns_ref() {
        let schema = user_schema();
        let mut ctx = ParseContext::new(|_| {});
        let out = parse_root(
            &schema,
            &json!({"__typename": "User", "id": "u1", "name": "Ada"}),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(ctx.extracted.len(), 1);
        let extracted = &ctx.extracted[0];
        assert_eq!(extracted.typename, "User");
        assert_eq!(extracted.id, EntityId::Str("u1".to_string()));
        assert_eq!(out, Normalized::EntityRef(extracted.key));
    }

    #[test]
    fn missing_entity_id_fails() {
        let schema = user_schema();
        let mut ctx = ParseContext::new(|_| {});
        let err = parse_root(&schema, &json!({"__typename": "User", "name": "Ada"}), &mut ctx).unwrap_err();
        assert!(matches!(err, QueryError::Validation { .. }));
    }

    #[test]
    fn optional_field_mismatch_is_dropped_not_fatal() {
        let schema = user_schema();
        let mut ctx = ParseContext::new(|_| {});
        let out = parse_root(
            &schema,
            &json!({"__typename": "User", "id": "u1", "name": "Ada", "nickname": 42}),
            &mut ctx,
        )
        .unwrap();
        let extracted = &ctx.extracted[0];
        assert!(extracted.value.get_field("nickname").is_none());
        let _ = out;
    }

    #[test]
    fn array_element_mismatch_is_filtered() {
        let schema = Schema::Str.array();
        let mut ctx = ParseContext::new(|_| {});
        let out = parse_root(&schema, &json!(["a", 1, "b"]), &mut ctx).unwrap();
        assert_eq!(
            out,
            Normalized::Array(vec![Normalized::Str("a".into()), Normalized::Str("b".into())])
        );
    }

    #[test]
    fn required_field_mismatch_fails_whole_object() {
        let schema = user_schema();
        let mut ctx = ParseContext::new(|_| {});
        let err = parse_root(
            &schema,
            &json!({"__typename": "User", "id": "u1", "name": 5}),
            &mut ctx,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Validation { path, .. } if path == "$.name"));
    }

    #[test]
    fn nested_entity_extracted_before_outer_ref() {
        let friend_schema = || {
            Schema::Object(ObjectSchema::entity("User", IdKind::Str, || {
                Ok(vec![("name".to_string(), Schema::Str)])
            }))
        };
        let schema = Schema::Object(ObjectSchema::entity("User", IdKind::Str, move || {
            Ok(vec![
                ("name".to_string(), Schema::Str),
                ("bestFriend".to_string(), friend_schema()),
            ])
        }));
        let mut ctx = ParseContext::new(|_| {});
        parse_root(
            &schema,
            &json!({
                "__typename": "User", "id": "u1", "name": "Ada",
                "bestFriend": {"__typename": "User", "id": "u2", "name": "Bea"}
            }),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(ctx.extracted.len(), 2);
        assert_eq!(ctx.extracted[0].id, EntityId::Str("u2".to_string()));
        assert_eq!(ctx.extracted[1].id, EntityId::Str("u1".to_string()));
    }
}
