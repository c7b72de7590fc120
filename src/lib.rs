//! Scriptmark: an assessment-processing pipeline. Question papers and answer
//! sheets come in as documents; provider adapters extract questions, partition
//! combined sheets by student and grade answers; teachers verify and approve
//! the results. The crate exposes the service layer in [`services`] over a
//! shared [`core::state::PipelineContext`].

pub mod core;
pub mod db;
pub mod providers;
pub(crate) mod repositories;
pub mod schemas;
pub mod services;
pub mod tasks;

use std::sync::Arc;
use std::time::Duration;

use crate::core::{config::Settings, state::PipelineContext, telemetry};
use crate::providers::chain::ProviderChain;
use crate::providers::gemini::GeminiAdapter;
use crate::providers::openai::OpenAiAdapter;
use crate::providers::ProviderAdapter;
use crate::services::page_cache::RenderCache;
use crate::services::renderer::{ConversionRenderer, DocumentRenderer};
use crate::services::storage::{BlobStorage, S3Storage};

/// Loads configuration from the environment and wires up the full pipeline:
/// telemetry, database (with migrations), the provider chain, the document
/// renderer with its cache, and blob storage.
pub async fn init() -> anyhow::Result<PipelineContext> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    if !settings.providers().openai.api_key.is_empty() {
        adapters.push(Arc::new(OpenAiAdapter::from_settings(&settings.providers().openai)?));
    }
    if !settings.providers().gemini.api_key.is_empty() {
        adapters.push(Arc::new(GeminiAdapter::from_settings(&settings.providers().gemini)?));
    }
    if adapters.is_empty() {
        tracing::warn!("No provider API keys configured; extraction and grading will fail");
    }
    let chain = Arc::new(ProviderChain::new(adapters));

    let renderer: Arc<dyn DocumentRenderer> =
        Arc::new(ConversionRenderer::from_settings(settings.renderer())?);
    let render_cache = RenderCache::new(Duration::from_secs(settings.cache().render_ttl_seconds));

    let storage = S3Storage::from_settings(settings.s3())
        .await?
        .map(|s3| Arc::new(s3) as Arc<dyn BlobStorage>);
    if storage.is_none() {
        tracing::warn!("Blob storage keys missing; document uploads are disabled");
    }

    tracing::info!(
        environment = %settings.runtime().environment.as_str(),
        providers = ?chain.provider_names(),
        "Scriptmark pipeline initialized"
    );

    Ok(PipelineContext::new(settings, db_pool, chain, renderer, render_cache, storage))
}
