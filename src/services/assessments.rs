//! Assessment operations. Each mutating operation commits its durable status
//! transition synchronously and dispatches any pipeline work as a detached
//! job afterwards.

use uuid::Uuid;
use validator::Validate;

use crate::core::errors::PipelineError;
use crate::core::state::PipelineContext;
use crate::core::time::primitive_now_utc;
use crate::db::models::Assessment;
use crate::db::types::AssessmentStatus;
use crate::repositories;
use crate::schemas::assessment::{AssessmentCreate, AssessmentResponse};
use crate::services::lifecycle::{assessment_transition, AssessmentEvent};
use crate::services::reconciliation::{self, RankedSubmission};
use crate::tasks::extraction::spawn_extraction;
use crate::tasks::job::Job;

pub struct CreatedAssessment {
    pub assessment: AssessmentResponse,
    pub extraction: Job<Result<usize, PipelineError>>,
}

/// Uploads the question paper, inserts the assessment in `Processing Ques`
/// and dispatches extraction. A blob-storage failure aborts before anything
/// is persisted.
pub async fn create_assessment(
    ctx: &PipelineContext,
    request: AssessmentCreate,
) -> Result<CreatedAssessment, PipelineError> {
    request.validate()?;

    let storage = ctx.require_storage()?;
    let paper_link = storage
        .upload(
            request.question_paper.bytes,
            &request.question_paper.file_name,
            "question-papers",
            &request.question_paper.content_type,
        )
        .await?;

    let now = primitive_now_utc();
    let assessment = Assessment {
        id: Uuid::new_v4().to_string(),
        organisation: request.organisation,
        title: request.title,
        class_name: request.class_name,
        subject: request.subject,
        status: AssessmentStatus::ProcessingQues,
        question_count: 0,
        total_marks: 0.0,
        question_paper_link: Some(paper_link),
        owner_id: request.owner_id,
        error_message: None,
        created_at: now,
        updated_at: now,
    };
    repositories::assessments::insert(ctx.db(), &assessment).await?;

    tracing::info!(assessment_id = %assessment.id, "Assessment created; extraction dispatched");
    let extraction = spawn_extraction(ctx.clone(), assessment.id.clone());

    Ok(CreatedAssessment { assessment: AssessmentResponse::from(assessment), extraction })
}

/// Re-runs extraction for an editable (or extraction-failed) assessment. The
/// job replaces the previous question set inside its write transaction.
pub async fn restart_extraction(
    ctx: &PipelineContext,
    actor_id: &str,
    assessment_id: &str,
) -> Result<Job<Result<usize, PipelineError>>, PipelineError> {
    let assessment = fetch_owned(ctx, actor_id, assessment_id).await?;

    let transition = assessment_transition(assessment.status, AssessmentEvent::StartExtraction)
        .map_err(|err| PipelineError::conflict(err.to_string()))?;

    let moved = repositories::assessments::update_status_if(
        ctx.db(),
        assessment_id,
        &[assessment.status],
        transition.next,
        primitive_now_utc(),
    )
    .await?;
    if !moved {
        return Err(PipelineError::conflict(format!(
            "assessment {assessment_id} changed state concurrently"
        )));
    }

    Ok(spawn_extraction(ctx.clone(), assessment_id.to_string()))
}

/// `Ques Pending Approval` → `Ready for Grading`.
pub async fn approve_questions(
    ctx: &PipelineContext,
    actor_id: &str,
    assessment_id: &str,
) -> Result<AssessmentResponse, PipelineError> {
    let assessment = fetch_owned(ctx, actor_id, assessment_id).await?;

    assessment_transition(assessment.status, AssessmentEvent::ApproveQuestions)
        .map_err(|err| PipelineError::conflict(err.to_string()))?;

    let moved = repositories::assessments::update_status_if(
        ctx.db(),
        assessment_id,
        &[AssessmentStatus::QuesPendingApproval],
        AssessmentStatus::ReadyForGrading,
        primitive_now_utc(),
    )
    .await?;
    if !moved {
        return Err(PipelineError::conflict(format!(
            "assessment {assessment_id} changed state concurrently"
        )));
    }

    let refreshed = repositories::assessments::find_by_id(ctx.db(), assessment_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("assessment", assessment_id))?;
    Ok(AssessmentResponse::from(refreshed))
}

pub async fn get_assessment(
    ctx: &PipelineContext,
    assessment_id: &str,
) -> Result<AssessmentResponse, PipelineError> {
    let assessment = repositories::assessments::find_by_id(ctx.db(), assessment_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("assessment", assessment_id))?;
    Ok(AssessmentResponse::from(assessment))
}

/// Class ranking over Approved submissions, derived entirely on read.
pub async fn assessment_report(
    ctx: &PipelineContext,
    assessment_id: &str,
) -> Result<Vec<RankedSubmission>, PipelineError> {
    reconciliation::assessment_ranking(ctx.db(), assessment_id).await
}

pub(crate) async fn fetch_owned(
    ctx: &PipelineContext,
    actor_id: &str,
    assessment_id: &str,
) -> Result<Assessment, PipelineError> {
    let assessment = repositories::assessments::find_by_id(ctx.db(), assessment_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("assessment", assessment_id))?;
    ensure_owner(&assessment, actor_id)?;
    Ok(assessment)
}

/// Every mutation in the service layer funnels through this check, including
/// answer-level writes reached via their submission's parent assessment.
pub(crate) fn ensure_owner(assessment: &Assessment, actor_id: &str) -> Result<(), PipelineError> {
    if assessment.owner_id != actor_id {
        return Err(PipelineError::AccessDenied(format!(
            "assessment {} is not owned by the caller",
            assessment.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn assessment(owner_id: &str) -> Assessment {
        let now = primitive_now_utc();
        Assessment {
            id: "assessment-1".to_string(),
            organisation: "org-1".to_string(),
            title: "Midterm".to_string(),
            class_name: "10-A".to_string(),
            subject: "Physics".to_string(),
            status: AssessmentStatus::ReadyForGrading,
            question_count: 3,
            total_marks: 10.0,
            question_paper_link: Some("https://cdn.example.com/paper.pdf".to_string()),
            owner_id: owner_id.to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn foreign_actor_is_denied() {
        let err = ensure_owner(&assessment("owner-1"), "intruder-9").unwrap_err();
        assert!(matches!(err, PipelineError::AccessDenied(_)));
    }

    #[test]
    fn owner_passes_the_check() {
        assert!(ensure_owner(&assessment("owner-1"), "owner-1").is_ok());
    }
}
