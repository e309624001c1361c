//! Outbound lookups: deterministic requests, the transport seam, the shared
//! token bucket, and the cache-backed client that ties them together.

pub mod client;
pub mod rate_limit;
pub mod request;
pub mod transport;

pub use client::{CachedClient, FetchedResponse, RetryPolicy};
pub use rate_limit::TokenBucket;
pub use request::RemoteRequest;
pub use transport::{HttpTransport, Transport, TransportError};

pub const WIKIDATA_SPARQL: &str = "https://query.wikidata.org/sparql";
pub const WIKIDATA_API: &str = "https://www.wikidata.org/w/api.php";

/// MediaWiki API endpoint for a language edition of Wikipedia
pub fn wikipedia_api(language: &str) -> String {
    format!("https://{}.wikipedia.org/w/api.php", language)
}

/// Coerce a decoded body into a typed response at the fetch boundary
pub fn decode_as<T: serde::de::DeserializeOwned>(endpoint: &str, body: serde_json::Value) -> crate::Result<T> {
    serde_json::from_value(body).map_err(|e| crate::WikinetError::MalformedResponse {
        endpoint: endpoint.to_string(),
        detail: e.to_string(),
    })
}
