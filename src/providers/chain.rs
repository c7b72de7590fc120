use std::sync::Arc;

use crate::providers::types::{
    AllProvidersFailed, AnswerCandidate, AssessmentContext, GradingContext, PageHeader,
    ProviderError, QuestionCandidate, RenderedPage,
};
use crate::providers::ProviderAdapter;

/// Ordered failover list of provider adapters: adapters are consulted
/// strictly in ascending priority order and the first non-empty result wins.
/// Later adapters are never invoked once one succeeds, and no adapter is
/// retried within a single invocation.
#[derive(Clone)]
pub struct ProviderChain {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderChain {
    pub fn new(mut adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        adapters.sort_by_key(|adapter| adapter.priority());
        Self { adapters }
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|adapter| adapter.name()).collect()
    }

    pub async fn extract_questions(
        &self,
        pages: &[RenderedPage],
        context: &AssessmentContext,
    ) -> Result<Vec<QuestionCandidate>, AllProvidersFailed> {
        let mut attempts = Vec::new();

        for adapter in &self.adapters {
            match adapter.extract_questions(pages, context).await {
                Ok(candidates) if !candidates.is_empty() => {
                    record_attempt(adapter.name(), "extract", "success");
                    tracing::info!(
                        provider = adapter.name(),
                        candidates = candidates.len(),
                        "Question extraction succeeded"
                    );
                    return Ok(candidates);
                }
                Ok(_) => {
                    let err = ProviderError::transient(adapter.name(), "empty extraction result");
                    log_failure("extract", &err);
                    attempts.push(err);
                }
                Err(err) => {
                    log_failure("extract", &err);
                    attempts.push(err);
                }
            }
        }

        Err(aggregate("extract", attempts))
    }

    pub async fn grade_answers(
        &self,
        pages: &[RenderedPage],
        context: &GradingContext,
    ) -> Result<Vec<AnswerCandidate>, AllProvidersFailed> {
        let mut attempts = Vec::new();

        for adapter in &self.adapters {
            match adapter.grade_answers(pages, context).await {
                Ok(candidates) if !candidates.is_empty() => {
                    record_attempt(adapter.name(), "grade", "success");
                    tracing::info!(
                        provider = adapter.name(),
                        candidates = candidates.len(),
                        "Answer grading succeeded"
                    );
                    return Ok(candidates);
                }
                Ok(_) => {
                    let err = ProviderError::transient(adapter.name(), "empty grading result");
                    log_failure("grade", &err);
                    attempts.push(err);
                }
                Err(err) => {
                    log_failure("grade", &err);
                    attempts.push(err);
                }
            }
        }

        Err(aggregate("grade", attempts))
    }

    /// Header detection differs from the other operations: `Ok(None)` is a
    /// meaningful answer (a continuation page), so the first adapter that
    /// responds at all wins, empty or not.
    pub async fn detect_header(
        &self,
        page: &RenderedPage,
    ) -> Result<Option<PageHeader>, AllProvidersFailed> {
        let mut attempts = Vec::new();

        for adapter in &self.adapters {
            match adapter.detect_header(page).await {
                Ok(header) => {
                    record_attempt(adapter.name(), "detect_header", "success");
                    return Ok(header);
                }
                Err(err) => {
                    log_failure("detect_header", &err);
                    attempts.push(err);
                }
            }
        }

        Err(aggregate("detect_header", attempts))
    }
}

fn log_failure(operation: &'static str, err: &ProviderError) {
    record_attempt(err.provider, operation, err.kind.as_str());
    tracing::warn!(
        provider = err.provider,
        operation,
        kind = err.kind.as_str(),
        error = %err.message,
        "Provider attempt failed; advancing chain"
    );
}

fn record_attempt(provider: &'static str, operation: &'static str, outcome: &'static str) {
    metrics::counter!(
        "provider_attempts_total",
        "provider" => provider,
        "operation" => operation,
        "outcome" => outcome,
    )
    .increment(1);
}

fn aggregate(operation: &'static str, attempts: Vec<ProviderError>) -> AllProvidersFailed {
    let last = attempts
        .last()
        .cloned()
        .unwrap_or_else(|| ProviderError::critical("none", "no providers configured"));
    AllProvidersFailed { operation, attempts, last }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::providers::types::{PageRegion, ProviderErrorKind};

    struct ScriptedAdapter {
        name: &'static str,
        priority: u8,
        outcome: Outcome,
        calls: AtomicUsize,
    }

    enum Outcome {
        Questions(usize),
        Empty,
        Critical,
        Transient,
    }

    impl ScriptedAdapter {
        fn new(name: &'static str, priority: u8, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self { name, priority, outcome, calls: AtomicUsize::new(0) })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn respond(&self) -> Result<Vec<QuestionCandidate>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Questions(count) => Ok((0..count)
                    .map(|index| QuestionCandidate {
                        question_identifier: None,
                        question_text: format!("Q{}", index + 1),
                        max_marks: 1.0,
                        page_number: 1,
                        topics: Vec::new(),
                        region: PageRegion::full_page(),
                    })
                    .collect()),
                Outcome::Empty => Ok(Vec::new()),
                Outcome::Critical => Err(ProviderError::critical(self.name, "invalid api key")),
                Outcome::Transient => Err(ProviderError::transient(self.name, "request timed out")),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        async fn extract_questions(
            &self,
            _pages: &[RenderedPage],
            _context: &AssessmentContext,
        ) -> Result<Vec<QuestionCandidate>, ProviderError> {
            self.respond()
        }

        async fn grade_answers(
            &self,
            _pages: &[RenderedPage],
            _context: &GradingContext,
        ) -> Result<Vec<AnswerCandidate>, ProviderError> {
            self.respond().map(|candidates| {
                candidates
                    .iter()
                    .enumerate()
                    .map(|(index, _)| AnswerCandidate {
                        question_number: index as i32 + 1,
                        marks_obtained: 1.0,
                        explanation: None,
                        page_number: 1,
                    })
                    .collect()
            })
        }

        async fn detect_header(
            &self,
            _page: &RenderedPage,
        ) -> Result<Option<PageHeader>, ProviderError> {
            self.respond().map(|_| None)
        }
    }

    fn context() -> AssessmentContext {
        AssessmentContext {
            title: "Midterm".to_string(),
            class_name: "10".to_string(),
            subject: "Physics".to_string(),
        }
    }

    fn page() -> RenderedPage {
        RenderedPage { number: 1, image_bytes: vec![0xFF], width: 800, height: 1100 }
    }

    #[tokio::test]
    async fn first_success_wins_and_later_adapters_are_not_consulted() {
        let failing = ScriptedAdapter::new("p1", 1, Outcome::Critical);
        let winning = ScriptedAdapter::new("p2", 2, Outcome::Questions(5));
        let never = ScriptedAdapter::new("p3", 3, Outcome::Questions(9));

        let chain =
            ProviderChain::new(vec![failing.clone(), winning.clone(), never.clone()]);

        let result = chain.extract_questions(&[page()], &context()).await.unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(failing.call_count(), 1);
        assert_eq!(winning.call_count(), 1);
        assert_eq!(never.call_count(), 0);
    }

    #[tokio::test]
    async fn adapters_are_tried_in_priority_order_regardless_of_insert_order() {
        let second = ScriptedAdapter::new("low-priority", 5, Outcome::Questions(2));
        let first = ScriptedAdapter::new("high-priority", 1, Outcome::Questions(3));

        let chain = ProviderChain::new(vec![second.clone(), first.clone()]);
        let result = chain.extract_questions(&[page()], &context()).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_result_advances_the_chain() {
        let empty = ScriptedAdapter::new("p1", 1, Outcome::Empty);
        let winning = ScriptedAdapter::new("p2", 2, Outcome::Questions(1));

        let chain = ProviderChain::new(vec![empty.clone(), winning.clone()]);
        let result = chain.extract_questions(&[page()], &context()).await.unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(empty.call_count(), 1);
    }

    #[tokio::test]
    async fn all_failures_aggregate_with_last_error() {
        let critical = ScriptedAdapter::new("p1", 1, Outcome::Critical);
        let transient = ScriptedAdapter::new("p2", 2, Outcome::Transient);

        let chain = ProviderChain::new(vec![critical.clone(), transient.clone()]);
        let err = chain.extract_questions(&[page()], &context()).await.unwrap_err();

        assert_eq!(err.attempts.len(), 2);
        assert_eq!(err.last.provider, "p2");
        assert_eq!(err.last.kind, ProviderErrorKind::Transient);
        assert_eq!(critical.call_count(), 1);
        assert_eq!(transient.call_count(), 1);
    }

    #[tokio::test]
    async fn grading_follows_the_same_failover_rules() {
        let failing = ScriptedAdapter::new("p1", 1, Outcome::Transient);
        let winning = ScriptedAdapter::new("p2", 2, Outcome::Questions(4));

        let chain = ProviderChain::new(vec![failing, winning]);
        let graded = chain
            .grade_answers(&[page()], &GradingContext { questions: Vec::new() })
            .await
            .unwrap();

        assert_eq!(graded.len(), 4);
    }

    #[tokio::test]
    async fn header_detection_accepts_a_none_header_as_success() {
        let headerless = ScriptedAdapter::new("p1", 1, Outcome::Questions(1));
        let never = ScriptedAdapter::new("p2", 2, Outcome::Questions(1));

        let chain = ProviderChain::new(vec![headerless, never.clone()]);
        let header = chain.detect_header(&page()).await.unwrap();

        assert!(header.is_none());
        assert_eq!(never.call_count(), 0);
    }
}
