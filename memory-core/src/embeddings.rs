//! Text -> fixed-dimension unit vector, with a content-hash cache in front of
//! the provider call.
//!
//! The cache-miss path is the only path that calls the provider. The cache
//! key is derived from content rather than a raw `md5(content)` digest: this
//! implementation uses the same `SHA-256` helper `content_hash` already used
//! for deduplication rather than pulling in a dedicated `md5` crate purely
//! for a cache key nobody observes externally (see DESIGN.md).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::types::content_hash;

/// Default cache TTL for embeddings
pub const EMBEDDING_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Collaborator contract: an embedding provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single piece of text into a unit-normalized vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. Implementations may parallelize internally.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }

    /// The fixed dimension this provider's vectors have.
    fn dimensions(&self) -> usize;
}

/// Deterministic provider for tests and default configuration: hashes the
/// text into a fixed-size vector and L2-normalizes it. Not semantically
/// meaningful, but stable, dependency-free, and unit-norm like a real
/// provider's output.
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        MockEmbeddingProvider { dimensions }
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        MockEmbeddingProvider::new(8)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let hash = content_hash(text);
        let bytes = hash.as_bytes();
        let mut v: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let b = bytes[i % bytes.len()] as f32;
                (b / 255.0) * 2.0 - 1.0
            })
            .collect();
        normalize_in_place(&mut v);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn normalize_in_place(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity. Returns `0.0` on zero-norm or dimension-mismatched
/// inputs rather than erroring
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// Wraps an [`EmbeddingProvider`], caching by content hash with a 1-hour TTL.
/// The cache-miss path is the only path that reaches the inner provider.
pub struct CachedEmbeddingProvider<P: EmbeddingProvider> {
    inner: P,
    ttl: Duration,
    cache: Mutex<lru::LruCache<String, CacheEntry>>,
}

impl<P: EmbeddingProvider> CachedEmbeddingProvider<P> {
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self::with_ttl(inner, EMBEDDING_CACHE_TTL)
    }

    #[must_use]
    pub fn with_ttl(inner: P, ttl: Duration) -> Self {
        CachedEmbeddingProvider {
            inner,
            ttl,
            cache: Mutex::new(lru::LruCache::new(std::num::NonZeroUsize::new(10_000).unwrap())),
        }
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbeddingProvider<P> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = content_hash(text);
        if let Some(entry) = self.cache.lock().get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Ok(entry.vector.clone());
            }
        }
        let vector = self.inner.embed(text).await?;
        self.cache.lock().put(
            key,
            CacheEntry {
                vector: vector.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<(usize, &str)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let key = content_hash(text);
            let cached = self.cache.lock().get(&key).and_then(|entry| {
                (entry.inserted_at.elapsed() < self.ttl).then(|| entry.vector.clone())
            });
            out.push(cached);
            if out[i].is_none() {
                misses.push((i, text));
            }
        }

        let fetched = futures::future::try_join_all(
            misses.iter().map(|(_, text)| self.inner.embed(text)),
        )
        .await?;

        for ((i, text), vector) in misses.into_iter().zip(fetched) {
            self.cache.lock().put(
                content_hash(text),
                CacheEntry {
                    vector: vector.clone(),
                    inserted_at: Instant::now(),
                },
            );
            out[i] = Some(vector);
        }

        Ok(out.into_iter().map(|v| v.expect("every index filled by cache hit or fetch")).collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Type-erased provider handle shared across services.
pub type SharedEmbeddingProvider = Arc<dyn EmbeddingProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_is_one_for_identical_vectors() {
        let v = vec![0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_is_zero_on_dimension_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_is_zero_on_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn mock_provider_produces_unit_vectors() {
        let p = MockEmbeddingProvider::new(8);
        let v = p.embed("hello world").await.unwrap();
        assert_eq!(v.len(), 8);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let p = MockEmbeddingProvider::new(8);
        assert_eq!(
            p.embed("same text").await.unwrap(),
            p.embed("same text").await.unwrap()
        );
    }

    #[tokio::test]
    async fn cached_provider_serves_repeat_calls_from_cache() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        struct Counting {
            calls: Arc<std::sync::atomic::AtomicUsize>,
        }
        #[async_trait]
        impl EmbeddingProvider for Counting {
            async fn embed(&self, text: &str) -> Result<Vec<f32>> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![text.len() as f32, 0.0])
            }
            fn dimensions(&self) -> usize {
                2
            }
        }

        let provider = CachedEmbeddingProvider::new(Counting {
            calls: calls.clone(),
        });
        provider.embed("abc").await.unwrap();
        provider.embed("abc").await.unwrap();
        provider.embed("abc").await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_provider_batch_only_fetches_misses() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        struct Counting {
            calls: Arc<std::sync::atomic::AtomicUsize>,
        }
        #[async_trait]
        impl EmbeddingProvider for Counting {
            async fn embed(&self, text: &str) -> Result<Vec<f32>> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![text.len() as f32, 0.0])
            }
            fn dimensions(&self) -> usize {
                2
            }
        }

        let provider = CachedEmbeddingProvider::new(Counting {
            calls: calls.clone(),
        });
        provider.embed("warm").await.unwrap();

        let texts = vec!["warm".to_string(), "cold-a".to_string(), "cold-b".to_string()];
        let vectors = provider.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vec![4.0, 0.0]);
        assert_eq!(vectors[1], vec![6.0, 0.0]);
        assert_eq!(vectors[2], vec![6.0, 0.0]);
        // one call to warm it up, then exactly two more for the two misses
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
