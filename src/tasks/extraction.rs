//! Background question-extraction pipeline. All provider and render I/O
//! completes before the single write transaction opens; a re-triggered
//! extraction replaces the previous question set instead of merging into it.

use anyhow::Context;
use sqlx::types::Json;
use uuid::Uuid;

use crate::core::errors::PipelineError;
use crate::core::state::PipelineContext;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Assessment, Question};
use crate::db::types::AssessmentStatus;
use crate::providers::types::{AssessmentContext, QuestionCandidate};
use crate::repositories;
use crate::services::renderer::cached_render;
use crate::tasks::job::Job;

/// Dispatches extraction for an assessment already moved to `Processing
/// Ques`. The job resolves to the number of questions written.
pub fn spawn_extraction(ctx: PipelineContext, assessment_id: String) -> Job<Result<usize, PipelineError>> {
    Job::spawn(async move {
        let result = run_extraction(&ctx, &assessment_id).await;

        match &result {
            Ok(count) => {
                metrics::counter!("extraction_jobs_total", "status" => "success").increment(1);
                tracing::info!(assessment_id, questions = count, "Question extraction succeeded");
            }
            Err(err) => {
                metrics::counter!("extraction_jobs_total", "status" => "failed").increment(1);
                tracing::error!(assessment_id, error = %err, "Question extraction failed");
                record_failure(&ctx, &assessment_id, err).await;
            }
        }

        result
    })
}

async fn run_extraction(
    ctx: &PipelineContext,
    assessment_id: &str,
) -> Result<usize, PipelineError> {
    let assessment = repositories::assessments::find_by_id(ctx.db(), assessment_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("assessment", assessment_id))?;

    if assessment.status != AssessmentStatus::ProcessingQues {
        tracing::info!(assessment_id, status = assessment.status.as_str(), "Skipping extraction");
        return Ok(0);
    }

    let paper_link = assessment
        .question_paper_link
        .as_deref()
        .ok_or_else(|| PipelineError::Validation("assessment has no question paper".to_string()))?;

    let pages = cached_render(ctx.renderer(), ctx.render_cache(), paper_link).await?;

    let context = AssessmentContext {
        title: assessment.title.clone(),
        class_name: assessment.class_name.clone(),
        subject: assessment.subject.clone(),
    };
    let candidates = ctx.chain().extract_questions(&pages, &context).await?;

    let questions = build_questions(&assessment, candidates);
    let count = questions.len();

    let mut tx = ctx.db().begin().await?;
    let now = primitive_now_utc();
    repositories::questions::delete_by_assessment(&mut tx, assessment_id).await?;
    repositories::questions::insert_batch(&mut tx, &questions).await?;
    repositories::assessments::refresh_question_totals(&mut tx, assessment_id, now).await?;
    repositories::assessments::mark_extraction_complete(&mut tx, assessment_id, now).await?;
    tx.commit().await?;

    Ok(count)
}

/// Dense sequential numbering in provider order, starting at 1.
fn build_questions(assessment: &Assessment, candidates: Vec<QuestionCandidate>) -> Vec<Question> {
    let now = primitive_now_utc();

    candidates
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| Question {
            id: Uuid::new_v4().to_string(),
            assessment_id: assessment.id.clone(),
            question_number: index as i32 + 1,
            question_identifier: candidate.question_identifier,
            question_text: candidate.question_text,
            max_marks: candidate.max_marks,
            page_number: candidate.page_number,
            topics: Json(candidate.topics),
            verified: false,
            created_at: now,
            updated_at: now,
        })
        .collect()
}

async fn record_failure(ctx: &PipelineContext, assessment_id: &str, err: &PipelineError) {
    let outcome = repositories::assessments::set_failure(
        ctx.db(),
        assessment_id,
        &[AssessmentStatus::ProcessingQues],
        AssessmentStatus::ExtractionFailed,
        &err.to_string(),
        primitive_now_utc(),
    )
    .await
    .context("Failed to record extraction failure");

    if let Err(persist_err) = outcome {
        tracing::error!(assessment_id, error = %persist_err, "Could not persist failure status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::PageRegion;

    fn assessment() -> Assessment {
        let now = primitive_now_utc();
        Assessment {
            id: "assessment-1".to_string(),
            organisation: "org-1".to_string(),
            title: "Midterm".to_string(),
            class_name: "10-A".to_string(),
            subject: "Physics".to_string(),
            status: AssessmentStatus::ProcessingQues,
            question_count: 0,
            total_marks: 0.0,
            question_paper_link: Some("https://cdn.example.com/paper.pdf".to_string()),
            owner_id: "owner-1".to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn candidate(text: &str, marks: f64) -> QuestionCandidate {
        QuestionCandidate {
            question_identifier: None,
            question_text: text.to_string(),
            max_marks: marks,
            page_number: 1,
            topics: Vec::new(),
            region: PageRegion::full_page(),
        }
    }

    #[test]
    fn questions_are_numbered_densely_in_provider_order() {
        let questions = build_questions(
            &assessment(),
            vec![candidate("Q one", 2.0), candidate("Q two", 3.0), candidate("Q three", 1.0)],
        );

        let numbers: Vec<i32> = questions.iter().map(|q| q.question_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(questions.iter().all(|q| !q.verified));
        assert!(questions.iter().all(|q| q.assessment_id == "assessment-1"));
    }
}
