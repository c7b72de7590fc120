pub mod chain;
pub mod gemini;
pub mod openai;
pub mod types;

use async_trait::async_trait;

use crate::providers::types::{
    AnswerCandidate, AssessmentContext, GradingContext, PageHeader, ProviderError,
    QuestionCandidate, RenderedPage,
};

/// One document-understanding backend, normalized to canonical types. Each
/// adapter owns the decoding of its backend's wire shape; raw payloads never
/// cross this boundary.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower values are tried first by the chain.
    fn priority(&self) -> u8;

    async fn extract_questions(
        &self,
        pages: &[RenderedPage],
        context: &AssessmentContext,
    ) -> Result<Vec<QuestionCandidate>, ProviderError>;

    async fn grade_answers(
        &self,
        pages: &[RenderedPage],
        context: &GradingContext,
    ) -> Result<Vec<AnswerCandidate>, ProviderError>;

    /// Reads the student header tuple from one page. `Ok(None)` means the
    /// page has no detectable header, which is a valid outcome (continuation
    /// pages), not a failure.
    async fn detect_header(&self, page: &RenderedPage) -> Result<Option<PageHeader>, ProviderError>;
}
