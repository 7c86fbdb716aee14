use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use parley_protocol::{CompletionError, CompletionPort, CompletionRequest, CompletionResponse};
use sha2::{Digest, Sha256};
use tracing::debug;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Bounded LRU of successful completions keyed by a SHA-256 of the request.
///
/// Failures are never cached. Insertion order in the map doubles as recency
/// order: the front is the least recently used entry.
pub struct CachedCompletion {
    inner: Arc<dyn CompletionPort>,
    capacity: usize,
    entries: Mutex<IndexMap<String, CompletionResponse>>,
}

impl CachedCompletion {
    pub fn new(inner: Arc<dyn CompletionPort>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn cache_key(request: &CompletionRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.prompt.as_bytes());
        hasher.update([0u8]);
        hasher.update(request.system_prompt.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(request.temperature.to_le_bytes());
        hasher.update(request.max_tokens.to_le_bytes());
        hasher.update([request.response_format as u8]);
        hex::encode(hasher.finalize())
    }

    fn get(&self, key: &str) -> Option<CompletionResponse> {
        let mut entries = self.entries.lock();
        let hit = entries.shift_remove(key)?;
        entries.insert(key.to_owned(), hit.clone());
        Some(hit)
    }

    fn put(&self, key: String, response: CompletionResponse) {
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        while entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(key, response);
    }
}

#[async_trait]
impl CompletionPort for CachedCompletion {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let key = Self::cache_key(&request);
        if let Some(hit) = self.get(&key) {
            debug!(key = %&key[..12], "completion cache hit");
            return Ok(hit);
        }
        let response = self.inner.complete(request).await?;
        self.put(key, response.clone());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPort {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CompletionPort for CountingPort {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CompletionError::Unreachable("down".to_owned()));
            }
            Ok(CompletionResponse {
                content: format!("echo:{}", request.prompt),
                model_id: "counting".to_owned(),
                elapsed_ms: 1,
            })
        }
    }

    #[tokio::test]
    async fn repeated_request_is_served_from_cache() -> Result<()> {
        let port = Arc::new(CountingPort::default());
        let cache = CachedCompletion::new(port.clone(), 4);

        let first = cache.complete(CompletionRequest::new("a")).await?;
        let second = cache.complete(CompletionRequest::new("a")).await?;
        assert_eq!(first, second);
        assert_eq!(port.calls.load(Ordering::SeqCst), 1);

        cache.complete(CompletionRequest::new("a").json()).await?;
        assert_eq!(port.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() -> Result<()> {
        let port = Arc::new(CountingPort::default());
        let cache = CachedCompletion::new(port.clone(), 2);

        cache.complete(CompletionRequest::new("a")).await?;
        cache.complete(CompletionRequest::new("b")).await?;
        // touch "a" so "b" becomes the eviction candidate
        cache.complete(CompletionRequest::new("a")).await?;
        cache.complete(CompletionRequest::new("c")).await?;
        assert_eq!(cache.len(), 2);
        assert_eq!(port.calls.load(Ordering::SeqCst), 3);

        cache.complete(CompletionRequest::new("a")).await?;
        assert_eq!(port.calls.load(Ordering::SeqCst), 3);
        cache.complete(CompletionRequest::new("b")).await?;
        assert_eq!(port.calls.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let port = Arc::new(CountingPort {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cache = CachedCompletion::new(port.clone(), 4);
        assert!(cache.complete(CompletionRequest::new("a")).await.is_err());
        assert!(cache.complete(CompletionRequest::new("a")).await.is_err());
        assert_eq!(port.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
