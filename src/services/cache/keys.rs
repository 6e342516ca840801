use serde_json::Value;

use super::pattern::GlobPattern;
use crate::models::Arguments;

/// Derives cache keys and invalidation patterns under one namespace.
///
/// Keys look like `<prefix>:<resource>:item:<id>:<query>` or
/// `<prefix>:<resource>:list:<query>`, where `<query>` is the sorted,
/// url-encoded parameter set. Identical inputs always map to the same key.
#[derive(Clone, Debug)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn item(&self, resource: &str, id: &str, params: &Arguments) -> String {
        format!(
            "{}:{}:item:{}:{}",
            self.prefix,
            resource,
            urlencoding::encode(id),
            canonical_query(params)
        )
    }

    pub fn list(&self, resource: &str, params: &Arguments) -> String {
        format!("{}:{}:list:{}", self.prefix, resource, canonical_query(params))
    }

    /// Matches every cached listing of `resource`.
    pub fn list_pattern(&self, resource: &str) -> GlobPattern {
        GlobPattern::new(&format!(
            "{}:{}:list:*",
            GlobPattern::escape(&self.prefix),
            GlobPattern::escape(resource)
        ))
    }

    /// Matches every cached entry of `resource`, items and listings alike.
    pub fn resource_pattern(&self, resource: &str) -> GlobPattern {
        GlobPattern::new(&format!(
            "{}:{}:*",
            GlobPattern::escape(&self.prefix),
            GlobPattern::escape(resource)
        ))
    }
}

fn canonical_query(params: &Arguments) -> String {
    // BTreeMap iteration is already sorted by name.
    params
        .iter()
        .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(&param_text(value))))
        .collect::<Vec<_>>()
        .join("&")
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
