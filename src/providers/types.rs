use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::TopicWeight;

/// One page of a source document rendered to an image by the document
/// renderer collaborator.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number within the source document.
    pub number: i32,
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Context handed to adapters when extracting questions from a paper.
#[derive(Debug, Clone)]
pub struct AssessmentContext {
    pub title: String,
    pub class_name: String,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct GradingQuestion {
    pub question_number: i32,
    pub question_identifier: Option<String>,
    pub question_text: String,
    pub max_marks: f64,
}

/// Context handed to adapters when grading an answer sheet.
#[derive(Debug, Clone)]
pub struct GradingContext {
    pub questions: Vec<GradingQuestion>,
}

/// Normalized region of a page, in fractions of page size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PageRegion {
    /// Default position: the whole visible page.
    pub fn full_page() -> Self {
        Self { x: 0.0, y: 0.0, width: 1.0, height: 1.0 }
    }
}

/// Canonical, adapter-independent representation of an extracted question.
/// Adapters fill the documented defaults for optional wire fields.
#[derive(Debug, Clone)]
pub struct QuestionCandidate {
    pub question_identifier: Option<String>,
    pub question_text: String,
    /// Defaults to 1.0 when the backend omits marks.
    pub max_marks: f64,
    /// Defaults to 1 when the backend omits the page.
    pub page_number: i32,
    pub topics: Vec<TopicWeight>,
    pub region: PageRegion,
}

/// Canonical representation of one graded answer.
#[derive(Debug, Clone)]
pub struct AnswerCandidate {
    /// Question number the backend graded against, matched to stored
    /// questions at write time.
    pub question_number: i32,
    pub marks_obtained: f64,
    pub explanation: Option<String>,
    pub page_number: i32,
}

/// Student header tuple read from the top of an answer-sheet page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageHeader {
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub roll_number: Option<String>,
    pub class_name: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Authentication failure, exhausted quota. The chain logs and moves on.
    Critical,
    /// Timeout, malformed or empty response. The chain logs and moves on.
    Transient,
}

impl ProviderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Transient => "transient",
        }
    }
}

/// Failure of a single adapter attempt. Never crosses the chain boundary on
/// its own; see [`AllProvidersFailed`].
#[derive(Debug, Clone, Error)]
#[error("provider {provider} failed ({}): {message}", kind.as_str())]
pub struct ProviderError {
    pub provider: &'static str,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn critical(provider: &'static str, message: impl Into<String>) -> Self {
        Self { provider, kind: ProviderErrorKind::Critical, message: message.into() }
    }

    pub fn transient(provider: &'static str, message: impl Into<String>) -> Self {
        Self { provider, kind: ProviderErrorKind::Transient, message: message.into() }
    }
}

/// Aggregate failure raised when every adapter in the chain failed or
/// returned an empty result. Carries the last error seen plus the full
/// attempt log for diagnostics.
#[derive(Debug, Clone, Error)]
#[error("all providers failed for {operation} after {} attempts; last error: {last}", attempts.len())]
pub struct AllProvidersFailed {
    pub operation: &'static str,
    pub attempts: Vec<ProviderError>,
    pub last: ProviderError,
}
