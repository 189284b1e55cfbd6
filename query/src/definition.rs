//! Query Definition: the static description of one kind of request — its
//! path, method, argument/result shapes, and default cache policy. A
//! definition plus a concrete argument value is what produces a Query Key.

use std::time::Duration;

use serde_json::{Map, Value as Json};

use crate::error::{QueryError, QueryResult};
use crate::fingerprint::{fingerprint_args, query_key};
use crate::schema::Schema;
use crate::transport::HttpMethod;

/// Builds the JSON object sent as search params or request body from a
/// schema that names exactly the fields belonging there: copies only the
/// declared fields out of the full argument object, so a field consumed by
/// `PathTemplate::render` (or by a sibling schema) never leaks into both
/// places at once.
pub(crate) fn select_fields(schema: &Schema, args: &Json) -> QueryResult<Json> {
    let Schema::Object(obj) = schema else {
        return Ok(args.clone());
    };
    let fields = obj.fields()?;
    let mut out = Map::new();
    if let Json::Object(map) = args {
        for (name, _) in &fields {
            if let Some(value) = map.get(name) {
                out.insert(name.clone(), value.clone());
            }
        }
    }
    Ok(Json::Object(out))
}

/// A path template with `[name]` holes, e.g. `/users/[id]/posts`.
#[derive(Clone, Debug)]
pub struct PathTemplate(String);

impl PathTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        PathTemplate(template.into())
    }

    /// Substitutes every `[name]` hole with the matching field of `params`.
    pub fn render(&self, params: &Json) -> QueryResult<String> {
        let params = params.as_object();
        let mut out = String::new();
        let mut chars = self.0.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '[' {
                out.push(c);
                continue;
            }
            let mut name = String::new();
            let mut closed = false;
            for c2 in chars.by_ref() {
                if c2 == ']' {
                    closed = true;
                    break;
                }
                name.push(c2);
            }
            if !closed {
                return Err(QueryError::Usage(format!("unterminated path hole in template '{}'", self.0)));
            }
            let value = params
                .and_then(|m| m.get(&name))
                .ok_or_else(|| QueryError::Usage(format!("missing path parameter '{name}'")))?;
            out.push_str(&path_segment(value));
        }
        Ok(out)
    }
}

fn path_segment(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Number(n) => n.to_string(),
        Json::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Disk-cache policy for every query instance of one definition: how long
/// results stay fresh, how long an unobserved instance survives, and how
/// many entries the definition's LRU table holds on disk.
#[derive(Clone, Debug, Default)]
pub struct CachePolicy {
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    pub disk_capacity: Option<usize>,
}

/// The static description of one kind of request.
#[derive(Clone)]
pub struct QueryDefinition {
    pub id: String,
    pub method: HttpMethod,
    pub path: PathTemplate,
    pub path_schema: Option<Schema>,
    pub search_schema: Option<Schema>,
    pub body_schema: Option<Schema>,
    pub result_schema: Schema,
    pub cache_policy: CachePolicy,
}

impl QueryDefinition {
    pub fn new(id: impl Into<String>, method: HttpMethod, path: impl Into<String>, result_schema: Schema) -> Self {
        QueryDefinition {
            id: id.into(),
            method,
            path: PathTemplate::new(path),
            path_schema: None,
            search_schema: None,
            body_schema: None,
            result_schema,
            cache_policy: CachePolicy::default(),
        }
    }

    pub fn with_path_schema(mut self, schema: Schema) -> Self {
        self.path_schema = Some(schema);
        self
    }

    pub fn with_search_schema(mut self, schema: Schema) -> Self {
        self.search_schema = Some(schema);
        self
    }

    pub fn with_body_schema(mut self, schema: Schema) -> Self {
        self.body_schema = Some(schema);
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Digest of this definition's id plus the argument fingerprint — the
    /// Query Key that identifies one instance of this definition.
    pub fn query_key(&self, args: &Json) -> u32 {
        query_key(&self.id, fingerprint_args(args))
    }
}
