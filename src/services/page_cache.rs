//! In-process TTL cache for rendered page sets. Re-running extraction or
//! grading against the same document within the window skips the conversion
//! service round trip.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::providers::types::RenderedPage;

#[derive(Clone)]
pub struct RenderCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

struct CacheEntry {
    pages: Arc<Vec<RenderedPage>>,
    stored_at: Instant,
}

impl RenderCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub async fn get(&self, document_url: &str) -> Option<Arc<Vec<RenderedPage>>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(document_url) {
                if entry.stored_at.elapsed() < self.ttl {
                    return Some(Arc::clone(&entry.pages));
                }
            } else {
                return None;
            }
        }

        // The entry exists but is expired; drop it under the write lock.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(document_url) {
            if entry.stored_at.elapsed() < self.ttl {
                return Some(Arc::clone(&entry.pages));
            }
            entries.remove(document_url);
        }
        None
    }

    pub async fn put(&self, document_url: &str, pages: Vec<RenderedPage>) -> Arc<Vec<RenderedPage>> {
        let pages = Arc::new(pages);
        let mut entries = self.entries.write().await;
        entries.insert(
            document_url.to_string(),
            CacheEntry { pages: Arc::clone(&pages), stored_at: Instant::now() },
        );
        pages
    }

    /// Drops one document's pages, used when its source file is replaced.
    pub async fn evict(&self, document_url: &str) {
        self.entries.write().await.remove(document_url);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: i32) -> RenderedPage {
        RenderedPage { number, image_bytes: vec![0xFF], width: 800, height: 1100 }
    }

    #[tokio::test]
    async fn hit_within_ttl_returns_the_stored_pages() {
        let cache = RenderCache::new(Duration::from_secs(60));
        cache.put("doc-1", vec![page(1), page(2)]).await;

        let hit = cache.get("doc-1").await.expect("cache hit");
        assert_eq!(hit.len(), 2);
        assert!(cache.get("doc-2").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_miss_and_are_removed() {
        let cache = RenderCache::new(Duration::ZERO);
        cache.put("doc-1", vec![page(1)]).await;

        assert!(cache.get("doc-1").await.is_none());
        assert!(cache.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn evict_drops_only_the_named_document() {
        let cache = RenderCache::new(Duration::from_secs(60));
        cache.put("doc-1", vec![page(1)]).await;
        cache.put("doc-2", vec![page(1)]).await;

        cache.evict("doc-1").await;

        assert!(cache.get("doc-1").await.is_none());
        assert!(cache.get("doc-2").await.is_some());
    }
}
