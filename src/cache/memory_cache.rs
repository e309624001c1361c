use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use super::CachedResponse;

/// Thread-safe LRU memo of recently fetched responses, keyed by request fingerprint
///
/// Sits in front of the SQLite store so repeated lookups within one run
/// (labels, page props of popular titles) skip the blocking database read.
pub struct ResponseMemo {
    cache: Mutex<LruCache<String, CachedResponse>>,
}

impl ResponseMemo {
    /// Create a new memo with the specified capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Get a cached response for a fingerprint
    pub fn get(&self, fingerprint: &str) -> Option<CachedResponse> {
        self.cache
            .lock()
            .unwrap()
            .get(fingerprint)
            .cloned()
    }

    /// Store a response in the memo
    pub fn put(&self, fingerprint: String, response: CachedResponse) {
        self.cache
            .lock()
            .unwrap()
            .put(fingerprint, response);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }
}
