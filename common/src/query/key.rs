//! Query keys.

use std::hash::{Hash, Hasher};

use serde_json::Value;

/// Ordered list of JSON segments identifying one cached query.
///
/// Two keys are equal when their segments serialize identically, so
/// `["projects", "abc", "pooling-configuration"]` built in different places
/// resolves to the same cache entry.
#[derive(Debug, Clone)]
pub struct QueryKey {
    segments: Vec<Value>,
    hash: String,
}

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Value>,
    {
        let segments: Vec<Value> = segments.into_iter().map(Into::into).collect();
        let hash = Value::Array(segments.clone()).to_string();
        Self { segments, hash }
    }

    pub fn segments(&self) -> &[Value] {
        &self.segments
    }

    /// Stable string form used for equality and logging.
    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hash)
    }
}
