use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A fully specified GET lookup against a remote endpoint.
///
/// Parameters live in a sorted map so two requests built in different orders
/// share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub endpoint: String,
    pub params: BTreeMap<String, String>,
    pub accept: Option<String>,
    pub language: String,
}

impl RemoteRequest {
    pub fn new(endpoint: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            accept: None,
            language: language.into(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn accept(mut self, content_type: impl Into<String>) -> Self {
        self.accept = Some(content_type.into());
        self
    }

    /// Stable SHA-256 over the normalized request.
    ///
    /// Whitespace runs in the `query` parameter collapse to a single space
    /// outside quoted literals, so reformatted SPARQL text still hits the same
    /// cache entry. Every other value is hashed verbatim.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"GET\n");
        hasher.update(self.endpoint.trim_end_matches('/').as_bytes());
        hasher.update(b"\n");
        for (key, value) in &self.params {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            if key == "query" {
                hasher.update(normalize_query(value).as_bytes());
            } else {
                hasher.update(value.as_bytes());
            }
            hasher.update(b"\n");
        }
        hasher.update(b"accept=");
        hasher.update(self.accept.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\nlang=");
        hasher.update(self.language.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Collapse whitespace outside `"..."` and `'...'` literals
fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut pending_space = false;

    for c in query.chars() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
        }
        out.push(c);
    }
    out
}
