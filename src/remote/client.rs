//! Cache-backed, rate-limited client for every remote lookup.
//!
//! Lookup order is memo → SQLite store → network. Only the network path
//! consumes a token from the shared bucket; identical in-flight requests are
//! collapsed behind a per-fingerprint gate.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{RemoteRequest, TokenBucket, Transport};
use crate::cache::{CacheOutcome, CachedResponse, ResponseMemo, ResponseStore};
use crate::error::{Result, WikinetError};

/// Bounded retry with exponential backoff and jitter
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base * 2^attempt` plus up to 50% jitter
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let half_ms = (exp.as_millis() / 2) as u64;
        let jitter = if half_ms > 0 {
            rand::thread_rng().gen_range(0..=half_ms)
        } else {
            0
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Decoded response plus its capture time
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub body: serde_json::Value,
    /// When the response was originally captured (stable across cache replays)
    pub retrieved_at: DateTime<Utc>,
    pub from_cache: bool,
}

pub struct CachedClient {
    transport: Arc<dyn Transport>,
    store: ResponseStore,
    memo: ResponseMemo,
    bucket: Arc<TokenBucket>,
    retry: RetryPolicy,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CachedClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: ResponseStore,
        bucket: Arc<TokenBucket>,
        retry: RetryPolicy,
        memo_capacity: usize,
    ) -> Self {
        Self {
            transport,
            store,
            memo: ResponseMemo::new(memo_capacity),
            bucket,
            retry,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ResponseStore {
        &self.store
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }

    /// Fetch a request, serving from cache when possible
    pub async fn fetch(&self, request: &RemoteRequest) -> Result<FetchedResponse> {
        let fingerprint = request.fingerprint();

        if let Some(hit) = self.memo.get(&fingerprint) {
            log::debug!("Memo hit for {} ({})", request.endpoint, &fingerprint[..12]);
            self.store
                .record(&fingerprint, &request.endpoint, CacheOutcome::HitMemory)
                .await?;
            return decode(request, hit, true);
        }

        if let Some(hit) = self.lookup_store(request, &fingerprint).await? {
            return Ok(hit);
        }

        let gate = self.gate_for(&fingerprint);
        let result = {
            let _guard = gate.lock().await;
            // Another task may have stored this fingerprint while we waited
            match self.lookup_store(request, &fingerprint).await {
                Ok(Some(hit)) => Ok(hit),
                Ok(None) => self.fetch_and_store(request, &fingerprint).await,
                Err(e) => Err(e),
            }
        };
        self.release_gate(&fingerprint, gate);

        result
    }

    async fn lookup_store(&self, request: &RemoteRequest, fingerprint: &str) -> Result<Option<FetchedResponse>> {
        match self.store.get(fingerprint).await? {
            Some(hit) => {
                log::debug!("Cache hit for {} ({})", request.endpoint, &fingerprint[..12]);
                self.memo.put(fingerprint.to_string(), hit.clone());
                self.store
                    .record(fingerprint, &request.endpoint, CacheOutcome::HitStore)
                    .await?;
                decode(request, hit, true).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn fetch_and_store(&self, request: &RemoteRequest, fingerprint: &str) -> Result<FetchedResponse> {
        let body = match self.fetch_with_retry(request).await {
            Ok(body) => body,
            Err(e) => {
                self.store
                    .record(fingerprint, &request.endpoint, CacheOutcome::Failed)
                    .await?;
                return Err(e);
            }
        };

        let response = CachedResponse {
            body,
            retrieved_at: Utc::now(),
        };

        // Decode before storing: an undecodable body must not poison the cache
        let fetched = match decode(request, response.clone(), false) {
            Ok(fetched) => fetched,
            Err(e) => {
                self.store
                    .record(fingerprint, &request.endpoint, CacheOutcome::Failed)
                    .await?;
                return Err(e);
            }
        };

        self.store.put(fingerprint, &request.endpoint, &response).await?;
        self.memo.put(fingerprint.to_string(), response);

        Ok(fetched)
    }

    async fn fetch_with_retry(&self, request: &RemoteRequest) -> Result<String> {
        let start = std::time::Instant::now();
        let mut attempt = 0;

        loop {
            self.bucket.acquire().await;

            match self.transport.execute(request).await {
                Ok(body) => {
                    log::debug!(
                        "{} answered in {:?} (attempt {})",
                        request.endpoint,
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(body);
                }
                Err(e) if e.retryable && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    log::warn!(
                        "Retry {}/{} for {} in {:?} after error (status {:?}): {}",
                        attempt + 1,
                        self.retry.max_attempts - 1,
                        request.endpoint,
                        delay,
                        e.status,
                        e.detail
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(WikinetError::RemoteUnavailable {
                        endpoint: request.endpoint.clone(),
                        status: e.status,
                        detail: e.detail,
                    });
                }
            }
        }
    }

    fn gate_for(&self, fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.in_flight.lock().unwrap();
        map.entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_gate(&self, fingerprint: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.in_flight.lock().unwrap();
        // Map entry + our handle: nobody else is waiting on this fingerprint
        if Arc::strong_count(&gate) <= 2 {
            map.remove(fingerprint);
        }
    }
}

fn decode(request: &RemoteRequest, response: CachedResponse, from_cache: bool) -> Result<FetchedResponse> {
    let body = serde_json::from_str(&response.body).map_err(|e| WikinetError::MalformedResponse {
        endpoint: request.endpoint.clone(),
        detail: format!("invalid JSON: {}", e),
    })?;

    Ok(FetchedResponse {
        body,
        retrieved_at: response.retrieved_at,
        from_cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::TransportError;
    use crate::testing::ScriptedTransport;
    use tempfile::TempDir;

    async fn client_with(transport: Arc<ScriptedTransport>, temp: &TempDir) -> CachedClient {
        let store = ResponseStore::open(temp.path().join("cache.sqlite")).await.unwrap();
        CachedClient::new(
            transport,
            store,
            Arc::new(TokenBucket::new(1000.0, 100)),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            16,
        )
    }

    fn request() -> RemoteRequest {
        RemoteRequest::new("https://example.org/api", "en").param("q", "x")
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Ok("{\"ok\":true}".to_string())));
        let client = client_with(transport.clone(), &temp).await;

        let first = client.fetch(&request()).await.unwrap();
        assert!(!first.from_cache);
        let second = client.fetch(&request()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.body["ok"], true);
        assert_eq!(second.retrieved_at, first.retrieved_at);
        assert_eq!(transport.call_count(), 1);

        // One audit row per call
        let fp = request().fingerprint();
        assert_eq!(client.store().log_count(&fp).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cache_survives_new_client() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Ok("[1,2]".to_string())));
        {
            let client = client_with(transport.clone(), &temp).await;
            client.fetch(&request()).await.unwrap();
        }
        let client = client_with(transport.clone(), &temp).await;
        let hit = client.fetch(&request()).await.unwrap();
        assert!(hit.from_cache);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::sequence(vec![
            Err(TransportError::from_status(503, "busy")),
            Err(TransportError::from_status(429, "slow down")),
            Ok("{}".to_string()),
        ]));
        let client = client_with(transport.clone(), &temp).await;

        let fetched = client.fetch(&request()).await.unwrap();
        assert!(!fetched.from_cache);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_remote_unavailable() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Err(TransportError::from_status(502, "bad gateway"))));
        let client = client_with(transport.clone(), &temp).await;

        let err = client.fetch(&request()).await.unwrap_err();
        match err {
            WikinetError::RemoteUnavailable { status, detail, .. } => {
                assert_eq!(status, Some(502));
                assert_eq!(detail, "bad gateway");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.call_count(), 3);

        // Failures are not cached
        assert!(client.store().get(&request().fingerprint()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Err(TransportError::from_status(404, "nope"))));
        let client = client_with(transport.clone(), &temp).await;

        assert!(client.fetch(&request()).await.is_err());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_is_not_cached() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Ok("<html>".to_string())));
        let client = client_with(transport.clone(), &temp).await;

        let err = client.fetch(&request()).await.unwrap_err();
        assert!(matches!(err, WikinetError::MalformedResponse { .. }));
        assert!(client.store().get(&request().fingerprint()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_hit_network_once() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(
            ScriptedTransport::always(Ok("{\"v\":1}".to_string())).with_latency(Duration::from_millis(50)),
        );
        let client = Arc::new(client_with(transport.clone(), &temp).await);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let client = client.clone();
            handles.push(tokio::spawn(async move { client.fetch(&request()).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn test_backoff_grows_exponentially_with_bounded_jitter() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        for _ in 0..20 {
            let d0 = policy.delay(0);
            let d2 = policy.delay(2);
            assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(150));
            assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(600));
        }
    }
}
