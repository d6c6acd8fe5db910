//! Preview hydration cache.
//!
//! Terminal and persistence sinks repeatedly render summaries of the same
//! attachments (events embed a content id, not bulk bytes).  [`PreviewCache`]
//! wraps a [`moka`] future cache keyed by content id so hydration work is
//! done once per distinct content.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Total cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Concurrent LRU cache of rendered previews keyed by content id.
#[derive(Clone)]
pub struct PreviewCache {
    cache: Cache<String, Arc<String>>,
    stats: Arc<CacheStats>,
}

impl PreviewCache {
    /// Create a cache holding up to `max_capacity` previews for `ttl`.
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Look up a preview, rendering it with `render` on a miss.
    pub async fn get_or_render<F>(&self, content_id: &str, render: F) -> Arc<String>
    where
        F: FnOnce() -> String,
    {
        if let Some(hit) = self.cache.get(content_id).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        debug!(content_id, "preview cache miss");
        let rendered = Arc::new(render());
        self.cache
            .insert(content_id.to_owned(), Arc::clone(&rendered))
            .await;
        rendered
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self::new(1024, Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_once_per_content_id() {
        let cache = PreviewCache::new(16, Duration::from_secs(60));

        let first = cache.get_or_render("c1", || "rendered".to_owned()).await;
        let second = cache
            .get_or_render("c1", || unreachable!("must be cached"))
            .await;

        assert_eq!(*first, "rendered");
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }
}
