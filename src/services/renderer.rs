//! Document-to-page rendering via the external conversion service: submit a
//! document URL, poll until the job completes, decode the page images. A
//! [`DocumentRenderer`] trait seam keeps the pipelines testable without the
//! service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;

use crate::core::config::RendererSettings;
use crate::core::errors::PipelineError;
use crate::providers::types::RenderedPage;
use crate::services::page_cache::RenderCache;

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Renders every page of the document behind `document_url`, in page
    /// order starting at 1.
    async fn render(&self, document_url: &str) -> Result<Vec<RenderedPage>, PipelineError>;
}

/// Renders through the cache first; a hit skips the conversion round trip.
pub async fn cached_render(
    renderer: &dyn DocumentRenderer,
    cache: &RenderCache,
    document_url: &str,
) -> Result<Arc<Vec<RenderedPage>>, PipelineError> {
    if let Some(pages) = cache.get(document_url).await {
        tracing::debug!(document_url, pages = pages.len(), "render cache hit");
        return Ok(pages);
    }

    let pages = renderer.render(document_url).await?;
    Ok(cache.put(document_url, pages).await)
}

#[derive(Debug, Clone)]
pub struct ConversionRenderer {
    client: Client,
    api_key: String,
    base_url: String,
    dpi: u32,
    poll_interval: Duration,
    max_poll_attempts: u32,
    max_submit_retries: u32,
}

#[derive(Debug, Clone)]
struct ConversionJobRef {
    request_id: String,
    request_check_url: String,
}

impl ConversionRenderer {
    pub fn from_settings(settings: &RendererSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to build conversion HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            dpi: settings.dpi,
            poll_interval: Duration::from_secs(settings.poll_interval_seconds),
            max_poll_attempts: settings.max_poll_attempts,
            max_submit_retries: settings.max_submit_retries,
        })
    }

    async fn submit_job(&self, document_url: &str) -> Result<ConversionJobRef> {
        let endpoint = format!("{}/convert", self.base_url);

        let mut last_error = None;

        for attempt in 0..=self.max_submit_retries {
            let form = Form::new()
                .text("file_url", document_url.to_string())
                .text("output_format", "page_images".to_string())
                .text("dpi", self.dpi.to_string());

            let response = self
                .client
                .post(&endpoint)
                .header("X-Api-Key", &self.api_key)
                .multipart(form)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let raw_body =
                        resp.text().await.context("Failed to read conversion submit response")?;

                    let parsed = serde_json::from_str::<Value>(&raw_body).map_err(|err| {
                        anyhow::anyhow!(
                            "conversion submit returned non-JSON body (status {}): {}: {}",
                            status,
                            err,
                            raw_body
                        )
                    })?;

                    if !status.is_success() {
                        last_error = Some(anyhow::anyhow!(
                            "conversion submit failed (status {}): {}",
                            status,
                            extract_error_message(&parsed)
                        ));
                    } else if let Some(job_ref) = extract_job_ref(&self.base_url, &parsed) {
                        return Ok(job_ref);
                    } else {
                        last_error = Some(anyhow::anyhow!(
                            "conversion submit response missing request reference"
                        ));
                    }
                }
                Err(err) => {
                    last_error =
                        Some(anyhow::anyhow!(err).context("Failed to call conversion API"));
                }
            }

            if attempt < self.max_submit_retries {
                let backoff = Duration::from_secs(2_u64.pow(attempt));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown conversion submit error")))
    }

    async fn poll_result(&self, job_ref: &ConversionJobRef) -> Result<Vec<RenderedPage>> {
        for attempt in 0..self.max_poll_attempts {
            let response = self
                .client
                .get(&job_ref.request_check_url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await
                .context("Failed to call conversion result endpoint")?;

            let status_code = response.status();
            let raw_body =
                response.text().await.context("Failed to read conversion poll response")?;
            let parsed: Value = serde_json::from_str(&raw_body).map_err(|err| {
                anyhow::anyhow!(
                    "conversion poll returned non-JSON body (status {}): {}: {}",
                    status_code,
                    err,
                    raw_body
                )
            })?;

            if !status_code.is_success() {
                return Err(anyhow::anyhow!(
                    "conversion poll failed (status {}): {}",
                    status_code,
                    extract_error_message(&parsed)
                ));
            }

            let status = parsed
                .get("status")
                .and_then(Value::as_str)
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or_else(|| "unknown".to_string());

            if status == "complete" || status == "completed" {
                return decode_pages(&parsed);
            }

            if status == "failed" || status == "error" {
                return Err(anyhow::anyhow!(
                    "conversion job {} failed: {}",
                    job_ref.request_id,
                    extract_error_message(&parsed)
                ));
            }

            if attempt + 1 >= self.max_poll_attempts {
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        Err(anyhow::anyhow!(
            "conversion polling timed out for request {} after {} attempts",
            job_ref.request_id,
            self.max_poll_attempts
        ))
    }
}

#[async_trait]
impl DocumentRenderer for ConversionRenderer {
    async fn render(&self, document_url: &str) -> Result<Vec<RenderedPage>, PipelineError> {
        let job_ref = self
            .submit_job(document_url)
            .await
            .map_err(|err| PipelineError::Render(format!("{err:#}")))?;

        let pages = self
            .poll_result(&job_ref)
            .await
            .map_err(|err| PipelineError::Render(format!("{err:#}")))?;

        if pages.is_empty() {
            return Err(PipelineError::Render(format!(
                "conversion job {} produced no pages",
                job_ref.request_id
            )));
        }

        Ok(pages)
    }
}

fn decode_pages(payload: &Value) -> Result<Vec<RenderedPage>> {
    let container = payload.get("result").unwrap_or(payload);
    let entries = container
        .get("pages")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("conversion result missing pages array"))?;

    let mut pages = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let number = entry
            .get("page")
            .and_then(Value::as_i64)
            .map(|value| value as i32)
            .unwrap_or(index as i32 + 1);
        let encoded = entry
            .get("image")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("page {number} missing image payload"))?;
        let image_bytes = base64::engine::general_purpose::STANDARD
            .decode(strip_data_url_prefix(encoded))
            .with_context(|| format!("page {number} image is not valid base64"))?;

        pages.push(RenderedPage {
            number,
            image_bytes,
            width: entry.get("width").and_then(Value::as_u64).unwrap_or(0) as u32,
            height: entry.get("height").and_then(Value::as_u64).unwrap_or(0) as u32,
        });
    }

    pages.sort_by_key(|page| page.number);
    Ok(pages)
}

fn strip_data_url_prefix(encoded: &str) -> &str {
    encoded.rsplit_once("base64,").map_or(encoded, |(_, rest)| rest)
}

fn extract_job_ref(base_url: &str, payload: &Value) -> Option<ConversionJobRef> {
    let request_check_url = extract_request_check_url(base_url, payload);
    let request_id = extract_request_id(payload).or_else(|| {
        request_check_url
            .clone()
            .and_then(|url| url.trim_end_matches('/').rsplit('/').next().map(ToString::to_string))
    })?;

    let request_check_url =
        request_check_url.unwrap_or_else(|| format!("{}/convert/{}", base_url, request_id));

    Some(ConversionJobRef { request_id, request_check_url })
}

fn extract_request_check_url(base_url: &str, payload: &Value) -> Option<String> {
    let raw = payload.get("request_check_url").and_then(Value::as_str)?;
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    let normalized_base = format!("{}/", base_url.trim_end_matches('/'));
    reqwest::Url::parse(&normalized_base)
        .ok()
        .and_then(|base| base.join(raw).ok())
        .map(|url| url.to_string())
}

fn extract_request_id(payload: &Value) -> Option<String> {
    payload
        .get("request_id")
        .or_else(|| payload.get("request_check_id"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_pages_sorts_by_page_number_and_decodes_base64() {
        let payload = serde_json::json!({
            "status": "complete",
            "result": {
                "pages": [
                    {"page": 2, "image": base64::engine::general_purpose::STANDARD.encode([2u8]), "width": 800, "height": 1100},
                    {"page": 1, "image": base64::engine::general_purpose::STANDARD.encode([1u8]), "width": 800, "height": 1100},
                ]
            }
        });

        let pages = decode_pages(&payload).expect("pages");

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[0].image_bytes, vec![1]);
        assert_eq!(pages[1].number, 2);
    }

    #[test]
    fn decode_pages_accepts_data_url_images_and_defaults_page_numbers() {
        let encoded =
            format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode([7u8]));
        let payload = serde_json::json!({"pages": [{"image": encoded}]});

        let pages = decode_pages(&payload).expect("pages");

        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[0].image_bytes, vec![7]);
    }

    #[test]
    fn decode_pages_rejects_a_result_without_pages() {
        let payload = serde_json::json!({"status": "complete", "result": {}});
        assert!(decode_pages(&payload).is_err());
    }

    #[test]
    fn job_ref_falls_back_to_the_check_url_tail_for_an_id() {
        let payload = serde_json::json!({
            "request_check_url": "https://convert.example/convert/abc-123"
        });

        let job_ref = extract_job_ref("https://convert.example", &payload).expect("job ref");

        assert_eq!(job_ref.request_id, "abc-123");
        assert_eq!(job_ref.request_check_url, "https://convert.example/convert/abc-123");
    }

    #[test]
    fn relative_check_urls_are_joined_onto_the_base() {
        let payload = serde_json::json!({
            "request_id": "abc-123",
            "request_check_url": "/convert/abc-123"
        });

        let job_ref = extract_job_ref("https://convert.example/api", &payload).expect("job ref");

        assert_eq!(job_ref.request_check_url, "https://convert.example/convert/abc-123");
    }
}
