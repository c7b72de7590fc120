use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::core::config::GeminiProviderSettings;
use crate::db::models::TopicWeight;
use crate::providers::types::{
    AnswerCandidate, AssessmentContext, GradingContext, PageHeader, PageRegion, ProviderError,
    QuestionCandidate, RenderedPage,
};
use crate::providers::ProviderAdapter;

const PROVIDER_NAME: &str = "gemini";

/// Adapter for generateContent-style backends that answer with compact
/// positional arrays instead of named fields. Each row shape is decoded by a
/// versioned function below; raw rows never leave this module.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    priority: u8,
}

const EXTRACTION_PROMPT: &str = "Extract every question from the attached exam pages. \
Answer with a JSON array only; one row per question, shaped \
[identifier, text, marks, page, [[topic, weight], ...], [x, y, width, height]]. \
Use null for unknown fields.";

const GRADING_PROMPT: &str = "Grade the student's answers on the attached pages. \
Answer with a JSON array only; one row per graded answer, shaped \
[question_number, marks, explanation, page].";

const HEADER_PROMPT: &str = "Read the student header at the top of this answer-sheet page. \
Answer with a single JSON row [name, identifier, roll_number, class, confidence], \
or null when no header is visible.";

impl GeminiAdapter {
    pub fn from_settings(settings: &GeminiProviderSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            priority: settings.priority,
        })
    }

    async fn generate(&self, prompt: String, pages: &[RenderedPage]) -> Result<Value, ProviderError> {
        let mut parts = vec![json!({"text": prompt})];
        for page in pages {
            parts.push(json!({
                "inline_data": {
                    "mime_type": "image/png",
                    "data": BASE64.encode(&page.image_bytes),
                }
            }));
        }

        let payload = json!({
            "contents": [{"parts": parts}],
            "generationConfig": {"response_mime_type": "application/json"}
        });

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::transient(PROVIDER_NAME, "request timed out")
                } else {
                    ProviderError::transient(PROVIDER_NAME, err.to_string())
                }
            })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let detail = body
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            let message = format!("status {status}: {detail}");
            return Err(match status {
                StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::TOO_MANY_REQUESTS => ProviderError::critical(PROVIDER_NAME, message),
                _ => ProviderError::transient(PROVIDER_NAME, message),
            });
        }

        let text = body
            .get("candidates")
            .and_then(|candidates| candidates.get(0))
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.get(0))
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::transient(PROVIDER_NAME, "missing candidate text"))?;

        serde_json::from_str(text).map_err(|err| {
            ProviderError::transient(PROVIDER_NAME, format!("non-JSON candidate text: {err}"))
        })
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn extract_questions(
        &self,
        pages: &[RenderedPage],
        context: &AssessmentContext,
    ) -> Result<Vec<QuestionCandidate>, ProviderError> {
        let prompt = format!(
            "{EXTRACTION_PROMPT}\nAssessment: {} / class {} / subject {}.",
            context.title, context.class_name, context.subject
        );

        let body = self.generate(prompt, pages).await?;
        let rows = body.as_array().cloned().unwrap_or_default();
        Ok(rows.iter().filter_map(decode_question_row_v1).collect())
    }

    async fn grade_answers(
        &self,
        pages: &[RenderedPage],
        context: &GradingContext,
    ) -> Result<Vec<AnswerCandidate>, ProviderError> {
        let questions = context
            .questions
            .iter()
            .map(|question| {
                format!(
                    "Q{} ({} marks): {}",
                    question.question_number, question.max_marks, question.question_text
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let body = self.generate(format!("{GRADING_PROMPT}\n{questions}"), pages).await?;
        let rows = body.as_array().cloned().unwrap_or_default();
        Ok(rows.iter().filter_map(decode_answer_row_v1).collect())
    }

    async fn detect_header(
        &self,
        page: &RenderedPage,
    ) -> Result<Option<PageHeader>, ProviderError> {
        let body = self.generate(HEADER_PROMPT.to_string(), std::slice::from_ref(page)).await?;
        Ok(decode_header_row_v1(&body))
    }
}

/// v1 question row: `[identifier, text, marks, page, topics, region]`. Rows
/// without text are skipped; trailing fields may be absent and take the
/// canonical defaults (marks 1, page 1, region = full page).
fn decode_question_row_v1(row: &Value) -> Option<QuestionCandidate> {
    let fields = row.as_array()?;
    let text = fields.get(1).and_then(Value::as_str)?;

    Some(QuestionCandidate {
        question_identifier: fields.first().and_then(Value::as_str).map(str::to_string),
        question_text: text.to_string(),
        max_marks: fields.get(2).and_then(Value::as_f64).unwrap_or(1.0),
        page_number: fields.get(3).and_then(Value::as_i64).unwrap_or(1) as i32,
        topics: fields.get(4).map(decode_topic_rows_v1).unwrap_or_default(),
        region: fields.get(5).map(decode_region_row_v1).unwrap_or_else(PageRegion::full_page),
    })
}

/// v1 answer row: `[question_number, marks, explanation, page]`.
fn decode_answer_row_v1(row: &Value) -> Option<AnswerCandidate> {
    let fields = row.as_array()?;
    let question_number = fields.first().and_then(Value::as_i64)?;

    Some(AnswerCandidate {
        question_number: question_number as i32,
        marks_obtained: fields.get(1).and_then(Value::as_f64).unwrap_or(0.0),
        explanation: fields.get(2).and_then(Value::as_str).map(str::to_string),
        page_number: fields.get(3).and_then(Value::as_i64).unwrap_or(1) as i32,
    })
}

/// v1 header row: `[name, identifier, roll_number, class, confidence]`, or
/// null / an all-null row for a continuation page.
fn decode_header_row_v1(row: &Value) -> Option<PageHeader> {
    let fields = row.as_array()?;
    let text_at =
        |index: usize| fields.get(index).and_then(Value::as_str).map(str::to_string);

    let header = PageHeader {
        name: text_at(0),
        identifier: text_at(1),
        roll_number: text_at(2),
        class_name: text_at(3),
        confidence: fields.get(4).and_then(Value::as_f64).unwrap_or(0.0),
    };

    if header.name.is_none() && header.identifier.is_none() {
        return None;
    }

    Some(header)
}

fn decode_topic_rows_v1(value: &Value) -> Vec<TopicWeight> {
    let Some(rows) = value.as_array() else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| {
            let fields = row.as_array()?;
            let topic = fields.first().and_then(Value::as_str)?;
            let weight = fields.get(1).and_then(Value::as_f64).unwrap_or(0.0);
            Some(TopicWeight { topic: topic.to_string(), weight })
        })
        .collect()
}

fn decode_region_row_v1(value: &Value) -> PageRegion {
    let Some(fields) = value.as_array() else {
        return PageRegion::full_page();
    };

    let field = |index: usize, default: f64| fields.get(index).and_then(Value::as_f64).unwrap_or(default);

    PageRegion {
        x: field(0, 0.0),
        y: field(1, 0.0),
        width: field(2, 1.0),
        height: field(3, 1.0),
    }
}
