use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::core::config::OpenAiProviderSettings;
use crate::db::models::TopicWeight;
use crate::providers::types::{
    AnswerCandidate, AssessmentContext, GradingContext, PageHeader, PageRegion, ProviderError,
    QuestionCandidate, RenderedPage,
};
use crate::providers::ProviderAdapter;

const PROVIDER_NAME: &str = "openai";

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an exam-paper analyst. Extract every question visible on the attached pages.

Respond with strict JSON:
{
  "questions": [
    {
      "identifier": "author-facing label such as 1(a), may be null",
      "text": "full question text",
      "marks": <number>,
      "page": <1-based page number>,
      "topics": [{"topic": "name", "weight": <number>}],
      "region": {"x": <0..1>, "y": <0..1>, "width": <0..1>, "height": <0..1>}
    }
  ]
}
"#;

const GRADING_SYSTEM_PROMPT: &str = r#"You are an experienced examiner. Grade the student's answers on the attached pages against the provided questions.

Respond with strict JSON:
{
  "answers": [
    {
      "question_number": <number matching the provided question list>,
      "marks": <number awarded>,
      "explanation": "rationale for the awarded marks",
      "page": <1-based page number where the answer appears>
    }
  ]
}
"#;

const HEADER_SYSTEM_PROMPT: &str = r#"Look at the top of the attached answer-sheet page and report the student header fields.

Respond with strict JSON:
{
  "present": <true when any header field is visible>,
  "name": "student name or null",
  "identifier": "student id or null",
  "roll_number": "roll number or null",
  "class": "class or null",
  "confidence": <0..1>
}
"#;

/// Adapter for OpenAI-compatible chat-completions backends with vision
/// input. The wire format uses named JSON fields; decoding still fills the
/// canonical defaults and skips malformed entries per page.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    priority: u8,
}

impl OpenAiAdapter {
    pub fn from_settings(settings: &OpenAiProviderSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            priority: settings.priority,
        })
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: String,
        pages: &[RenderedPage],
    ) -> Result<Value, ProviderError> {
        let mut content = vec![json!({"type": "text", "text": user_prompt})];
        for page in pages {
            let encoded = BASE64.encode(&page.image_bytes);
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/png;base64,{encoded}")}
            }));
        }

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": content}
            ],
            "max_completion_tokens": self.max_tokens,
            "response_format": {"type": "json_object"}
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| classify_request_error(&err))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::transient(PROVIDER_NAME, "missing response content")
            })?;

        serde_json::from_str(content).map_err(|err| {
            ProviderError::transient(PROVIDER_NAME, format!("non-JSON response content: {err}"))
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
        let user_prompt = format!(
            "Assessment: {}\nClass: {}\nSubject: {}\nExtract all questions from the {} attached pages.",
            context.title,
            context.class_name,
            context.subject,
            pages.len()
        );

        let body = self.complete(EXTRACTION_SYSTEM_PROMPT, user_prompt, pages).await?;
        Ok(decode_questions(&body))
    }

    async fn grade_answers(
        &self,
        pages: &[RenderedPage],
        context: &GradingContext,
    ) -> Result<Vec<AnswerCandidate>, ProviderError> {
        let mut question_lines = Vec::with_capacity(context.questions.len());
        for question in &context.questions {
            question_lines.push(format!(
                "Q{} [{} marks]{}: {}",
                question.question_number,
                question.max_marks,
                question
                    .question_identifier
                    .as_deref()
                    .map(|id| format!(" ({id})"))
                    .unwrap_or_default(),
                question.question_text
            ));
        }

        let user_prompt = format!(
            "Questions to grade against:\n{}\n\nGrade the student's work on the attached pages.",
            question_lines.join("\n")
        );

        let body = self.complete(GRADING_SYSTEM_PROMPT, user_prompt, pages).await?;
        Ok(decode_answers(&body))
    }

    async fn detect_header(
        &self,
        page: &RenderedPage,
    ) -> Result<Option<PageHeader>, ProviderError> {
        let user_prompt = "Report the student header fields on this page.".to_string();
        let body = self
            .complete(HEADER_SYSTEM_PROMPT, user_prompt, std::slice::from_ref(page))
            .await?;
        Ok(decode_header(&body))
    }
}

fn classify_request_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::transient(PROVIDER_NAME, "request timed out")
    } else {
        ProviderError::transient(PROVIDER_NAME, err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &Value) -> ProviderError {
    let detail = body
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = format!("status {status}: {detail}");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::PAYMENT_REQUIRED => {
            ProviderError::critical(PROVIDER_NAME, message)
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::critical(PROVIDER_NAME, message),
        _ => ProviderError::transient(PROVIDER_NAME, message),
    }
}

/// Entries missing question text are skipped rather than failing the call.
fn decode_questions(body: &Value) -> Vec<QuestionCandidate> {
    let Some(entries) = body.get("questions").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut candidates = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(text) = entry.get("text").and_then(Value::as_str) else {
            tracing::debug!(provider = PROVIDER_NAME, "Skipping question entry without text");
            continue;
        };

        candidates.push(QuestionCandidate {
            question_identifier: entry
                .get("identifier")
                .and_then(Value::as_str)
                .map(str::to_string),
            question_text: text.to_string(),
            max_marks: entry.get("marks").and_then(Value::as_f64).unwrap_or(1.0),
            page_number: entry.get("page").and_then(Value::as_i64).unwrap_or(1) as i32,
            topics: decode_topics(entry.get("topics")),
            region: decode_region(entry.get("region")),
        });
    }

    candidates
}

fn decode_answers(body: &Value) -> Vec<AnswerCandidate> {
    let Some(entries) = body.get("answers").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut candidates = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(question_number) = entry.get("question_number").and_then(Value::as_i64) else {
            tracing::debug!(provider = PROVIDER_NAME, "Skipping answer entry without question");
            continue;
        };

        candidates.push(AnswerCandidate {
            question_number: question_number as i32,
            marks_obtained: entry.get("marks").and_then(Value::as_f64).unwrap_or(0.0),
            explanation: entry.get("explanation").and_then(Value::as_str).map(str::to_string),
            page_number: entry.get("page").and_then(Value::as_i64).unwrap_or(1) as i32,
        });
    }

    candidates
}

fn decode_header(body: &Value) -> Option<PageHeader> {
    if !body.get("present").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }

    Some(PageHeader {
        name: body.get("name").and_then(Value::as_str).map(str::to_string),
        identifier: body.get("identifier").and_then(Value::as_str).map(str::to_string),
        roll_number: body.get("roll_number").and_then(Value::as_str).map(str::to_string),
        class_name: body.get("class").and_then(Value::as_str).map(str::to_string),
        confidence: body.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

fn decode_topics(value: Option<&Value>) -> Vec<TopicWeight> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let topic = entry.get("topic").and_then(Value::as_str)?;
            let weight = entry.get("weight").and_then(Value::as_f64).unwrap_or(0.0);
            Some(TopicWeight { topic: topic.to_string(), weight })
        })
        .collect()
}

fn decode_region(value: Option<&Value>) -> PageRegion {
    let Some(region) = value else {
        return PageRegion::full_page();
    };

    let field = |name: &str, default: f64| region.get(name).and_then(Value::as_f64).unwrap_or(default);

    PageRegion {
        x: field("x", 0.0),
        y: field("y", 0.0),
        width: field("width", 1.0),
        height: field("height", 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_question_entries_are_skipped_not_fatal() {
        let body = serde_json::json!({
            "questions": [
                {"identifier": "1(a)", "text": "Define momentum.", "marks": 2, "page": 1},
                {"identifier": "broken"},
                {"text": "State Newton's second law."}
            ]
        });

        let decoded = decode_questions(&body);

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].question_identifier.as_deref(), Some("1(a)"));
        assert_eq!(decoded[0].max_marks, 2.0);
        // Defaults fill the second survivor.
        assert_eq!(decoded[1].max_marks, 1.0);
        assert_eq!(decoded[1].page_number, 1);
        assert_eq!(decoded[1].region, PageRegion::full_page());
    }

    #[test]
    fn answer_defaults_are_filled() {
        let body = serde_json::json!({
            "answers": [
                {"question_number": 3, "explanation": "partial credit"},
                {"marks": 5.0}
            ]
        });

        let decoded = decode_answers(&body);

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].question_number, 3);
        assert_eq!(decoded[0].marks_obtained, 0.0);
        assert_eq!(decoded[0].page_number, 1);
    }

    #[test]
    fn absent_header_decodes_to_none() {
        let body = serde_json::json!({"present": false});
        assert!(decode_header(&body).is_none());

        let body = serde_json::json!({
            "present": true,
            "name": "Asha Rao",
            "identifier": "STU-042",
            "confidence": 0.92
        });
        let header = decode_header(&body).unwrap();
        assert_eq!(header.identifier.as_deref(), Some("STU-042"));
        assert_eq!(header.confidence, 0.92);
    }
}
