use std::sync::Arc;

use sqlx::PgPool;

use crate::core::config::Settings;
use crate::core::errors::PipelineError;
use crate::providers::chain::ProviderChain;
use crate::services::page_cache::RenderCache;
use crate::services::renderer::DocumentRenderer;
use crate::services::storage::BlobStorage;

/// Shared handle threaded through services and background pipelines. Cloning
/// is cheap; everything lives behind one `Arc`.
#[derive(Clone)]
pub struct PipelineContext {
    inner: Arc<InnerContext>,
}

struct InnerContext {
    settings: Settings,
    db: PgPool,
    chain: Arc<ProviderChain>,
    renderer: Arc<dyn DocumentRenderer>,
    render_cache: RenderCache,
    storage: Option<Arc<dyn BlobStorage>>,
}

impl PipelineContext {
    pub fn new(
        settings: Settings,
        db: PgPool,
        chain: Arc<ProviderChain>,
        renderer: Arc<dyn DocumentRenderer>,
        render_cache: RenderCache,
        storage: Option<Arc<dyn BlobStorage>>,
    ) -> Self {
        Self {
            inner: Arc::new(InnerContext { settings, db, chain, renderer, render_cache, storage }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.inner.chain
    }

    pub fn renderer(&self) -> &dyn DocumentRenderer {
        self.inner.renderer.as_ref()
    }

    pub fn render_cache(&self) -> &RenderCache {
        &self.inner.render_cache
    }

    pub fn storage(&self) -> Option<&dyn BlobStorage> {
        self.inner.storage.as_deref()
    }

    pub fn require_storage(&self) -> Result<&dyn BlobStorage, PipelineError> {
        self.storage()
            .ok_or_else(|| PipelineError::Storage("blob storage is not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::providers::types::RenderedPage;
    use crate::services::renderer::DocumentRenderer;

    struct NoopRenderer;

    #[async_trait]
    impl DocumentRenderer for NoopRenderer {
        async fn render(&self, _document_url: &str) -> Result<Vec<RenderedPage>, PipelineError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn missing_storage_surfaces_a_storage_error() {
        std::env::set_var("SCRIPTMARK_ENV", "test");
        std::env::set_var("SCRIPTMARK_STRICT_CONFIG", "0");
        let settings = Settings::load().expect("settings");
        let db = PgPoolOptions::new()
            .connect_lazy("postgresql://scriptmark@localhost:5432/scriptmark_db")
            .expect("lazy pool");

        let ctx = PipelineContext::new(
            settings,
            db,
            Arc::new(ProviderChain::new(Vec::new())),
            Arc::new(NoopRenderer),
            RenderCache::new(Duration::from_secs(1)),
            None,
        );

        assert!(ctx.storage().is_none());
        assert!(matches!(ctx.require_storage(), Err(PipelineError::Storage(_))));
    }
}
