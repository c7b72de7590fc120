//! Submission operations: answer-sheet upload, the verification workflow
//! with the duplicate-Approved guard, teacher overrides and the answer
//! unverify cascade.

use uuid::Uuid;
use validator::Validate;

use crate::core::errors::PipelineError;
use crate::core::state::PipelineContext;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Answer, StudentSubmission};
use crate::db::types::{AssessmentStatus, SubmissionStatus};
use crate::repositories;
use crate::schemas::submission::{AnswerOverride, AnswerResponse, AnswerSheetUpload, SubmissionResponse, UploadMode};
use crate::services::assessments::fetch_owned;
use crate::services::lifecycle::{assessment_transition, submission_transition, AssessmentEvent, SubmissionEvent};
use crate::services::reconciliation::{self, SubmissionReport};
use crate::tasks::grading::{spawn_grading, GradingBatch, GradingReport};
use crate::tasks::job::Job;

pub struct AcceptedUpload {
    /// Present for single-student uploads; combined documents create their
    /// rows inside the grading job, after partitioning.
    pub submission: Option<SubmissionResponse>,
    pub grading: Job<Result<GradingReport, PipelineError>>,
}

/// Accepts an answer-sheet document, moves the assessment to `Processing
/// Ans` and dispatches grading. A blob-storage failure marks the assessment
/// `Upload Failed`.
pub async fn upload_answer_sheet(
    ctx: &PipelineContext,
    actor_id: &str,
    assessment_id: &str,
    request: AnswerSheetUpload,
) -> Result<AcceptedUpload, PipelineError> {
    request.validate()?;
    let assessment = fetch_owned(ctx, actor_id, assessment_id).await?;

    let transition = assessment_transition(assessment.status, AssessmentEvent::StartAnswerUpload)
        .map_err(|err| PipelineError::conflict(err.to_string()))?;

    if let UploadMode::SingleStudent { student_id } = &request.mode {
        repositories::students::find_by_id(ctx.db(), student_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("student", student_id))?;
    }

    // Resolved before the status transition commits: a deployment without
    // blob storage must not strand the assessment in `Processing Ans`.
    let storage = ctx.require_storage()?;

    if transition.changed {
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
    }

    let sheet_link = match storage
        .upload(
            request.document.bytes,
            &request.document.file_name,
            "answer-sheets",
            &request.document.content_type,
        )
        .await
    {
        Ok(link) => link,
        Err(err) => {
            repositories::assessments::set_failure(
                ctx.db(),
                assessment_id,
                &[AssessmentStatus::ProcessingAns],
                AssessmentStatus::UploadFailed,
                &err.to_string(),
                primitive_now_utc(),
            )
            .await?;
            return Err(err);
        }
    };

    match request.mode {
        UploadMode::SingleStudent { student_id } => {
            let now = primitive_now_utc();
            let submission = StudentSubmission {
                id: Uuid::new_v4().to_string(),
                assessment_id: assessment_id.to_string(),
                student_id: Some(student_id),
                answer_sheet_link: Some(sheet_link),
                extracted_student_info: None,
                page_numbers: None,
                status: SubmissionStatus::Pending,
                error_message: None,
                created_at: now,
                updated_at: now,
            };

            let mut tx = ctx.db().begin().await?;
            repositories::submissions::insert(&mut tx, &submission).await?;
            tx.commit().await?;

            let grading = spawn_grading(
                ctx.clone(),
                assessment_id.to_string(),
                GradingBatch::Submissions(vec![submission.id.clone()]),
            );

            Ok(AcceptedUpload { submission: Some(SubmissionResponse::from(submission)), grading })
        }
        UploadMode::MultiStudent => {
            let grading = spawn_grading(
                ctx.clone(),
                assessment_id.to_string(),
                GradingBatch::CombinedDocument { document_url: sheet_link },
            );

            Ok(AcceptedUpload { submission: None, grading })
        }
    }
}

pub async fn list_submissions(
    ctx: &PipelineContext,
    assessment_id: &str,
) -> Result<Vec<SubmissionResponse>, PipelineError> {
    let submissions =
        repositories::submissions::list_by_assessment(ctx.db(), assessment_id).await?;
    Ok(submissions.into_iter().map(SubmissionResponse::from).collect())
}

/// `Ready for Verification` → `Verifying`; re-entering `Verifying` is a
/// no-op, not an error.
pub async fn begin_verification(
    ctx: &PipelineContext,
    actor_id: &str,
    submission_id: &str,
) -> Result<(), PipelineError> {
    let submission = fetch_submission(ctx, actor_id, submission_id).await?;

    let transition = submission_transition(submission.status, SubmissionEvent::BeginVerification)
        .map_err(|err| PipelineError::conflict(err.to_string()))?;

    if transition.changed {
        repositories::submissions::update_status_if(
            ctx.db(),
            submission_id,
            &[SubmissionStatus::ReadyForVerification],
            SubmissionStatus::Verifying,
            primitive_now_utc(),
        )
        .await?;
    }

    Ok(())
}

/// `Verifying` → `Approved`, guarded against a sibling Approved submission
/// for the same student. If this approval makes every submission of the
/// assessment Approved, the assessment completes.
pub async fn approve_submission(
    ctx: &PipelineContext,
    actor_id: &str,
    submission_id: &str,
) -> Result<(), PipelineError> {
    let submission = fetch_submission(ctx, actor_id, submission_id).await?;
    let student_id = approvable_student(&submission)?.to_string();

    let sibling_approved = repositories::submissions::exists_approved_for_student(
        ctx.db(),
        &submission.assessment_id,
        &student_id,
        submission_id,
    )
    .await?;
    ensure_no_approved_sibling(&student_id, sibling_approved)?;

    let moved = repositories::submissions::update_status_if(
        ctx.db(),
        submission_id,
        &[SubmissionStatus::Verifying],
        SubmissionStatus::Approved,
        primitive_now_utc(),
    )
    .await?;
    if !moved {
        return Err(PipelineError::conflict(format!(
            "submission {submission_id} changed state concurrently"
        )));
    }

    let (total, approved) =
        repositories::submissions::completion_counts(ctx.db(), &submission.assessment_id).await?;
    if total > 0 && total == approved {
        repositories::assessments::update_status_if(
            ctx.db(),
            &submission.assessment_id,
            &[AssessmentStatus::AnsPendingApproval],
            AssessmentStatus::Completed,
            primitive_now_utc(),
        )
        .await?;
    }

    Ok(())
}

/// `Verifying` → `Rejected`.
pub async fn reject_submission(
    ctx: &PipelineContext,
    actor_id: &str,
    submission_id: &str,
) -> Result<(), PipelineError> {
    let submission = fetch_submission(ctx, actor_id, submission_id).await?;

    submission_transition(submission.status, SubmissionEvent::Reject)
        .map_err(|err| PipelineError::conflict(err.to_string()))?;

    let moved = repositories::submissions::update_status_if(
        ctx.db(),
        submission_id,
        &[SubmissionStatus::Verifying],
        SubmissionStatus::Rejected,
        primitive_now_utc(),
    )
    .await?;
    if !moved {
        return Err(PipelineError::conflict(format!(
            "submission {submission_id} changed state concurrently"
        )));
    }

    Ok(())
}

/// Teacher override of a graded answer. Marks and `user_feedback` are always
/// writable; the AI explanation survives unless explicitly replaced.
pub async fn set_answer_marks(
    ctx: &PipelineContext,
    actor_id: &str,
    answer_id: &str,
    body: AnswerOverride,
) -> Result<(), PipelineError> {
    body.validate()?;
    fetch_owned_answer(ctx, actor_id, answer_id).await?;

    let updated = repositories::answers::apply_override(
        ctx.db(),
        answer_id,
        body.marks_obtained,
        body.user_feedback.as_deref(),
        body.ai_explanation.as_deref(),
        primitive_now_utc(),
    )
    .await?;
    if !updated {
        return Err(PipelineError::not_found("answer", answer_id));
    }

    Ok(())
}

pub async fn verify_answer(
    ctx: &PipelineContext,
    actor_id: &str,
    answer_id: &str,
) -> Result<AnswerResponse, PipelineError> {
    fetch_owned_answer(ctx, actor_id, answer_id).await?;

    let answer =
        repositories::answers::set_verified(ctx.db(), answer_id, true, primitive_now_utc())
            .await?
            .ok_or_else(|| PipelineError::not_found("answer", answer_id))?;
    Ok(AnswerResponse::from(answer))
}

/// Clears an answer's `verified` flag and runs the demotion cascade: an
/// Approved owning submission reverts to Verifying, and if the assessment
/// was Completed it reopens as `Ans Pending Approval`. Both demotions are
/// single-row conditional updates, so concurrent unverifies apply each step
/// exactly once.
pub async fn unverify_answer(
    ctx: &PipelineContext,
    actor_id: &str,
    answer_id: &str,
) -> Result<AnswerResponse, PipelineError> {
    fetch_owned_answer(ctx, actor_id, answer_id).await?;

    let answer =
        repositories::answers::set_verified(ctx.db(), answer_id, false, primitive_now_utc())
            .await?
            .ok_or_else(|| PipelineError::not_found("answer", answer_id))?;

    let now = primitive_now_utc();
    let demoted = repositories::submissions::revert_approved_to_verifying(
        ctx.db(),
        &answer.submission_id,
        now,
    )
    .await?;

    if demoted {
        let submission = repositories::submissions::find_by_id(ctx.db(), &answer.submission_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("submission", &answer.submission_id))?;
        repositories::assessments::demote_completed(ctx.db(), &submission.assessment_id, now)
            .await?;
        tracing::info!(
            submission_id = %answer.submission_id,
            "Approved submission demoted to Verifying by answer unverify"
        );
    }

    Ok(AnswerResponse::from(answer))
}

pub async fn list_answers(
    ctx: &PipelineContext,
    submission_id: &str,
) -> Result<Vec<AnswerResponse>, PipelineError> {
    let answers = repositories::answers::list_by_submission(ctx.db(), submission_id).await?;
    Ok(answers.into_iter().map(AnswerResponse::from).collect())
}

/// Derived totals and percentage for one submission.
pub async fn submission_report(
    ctx: &PipelineContext,
    submission_id: &str,
) -> Result<SubmissionReport, PipelineError> {
    reconciliation::submission_report(ctx.db(), submission_id).await
}

async fn fetch_submission(
    ctx: &PipelineContext,
    actor_id: &str,
    submission_id: &str,
) -> Result<StudentSubmission, PipelineError> {
    let submission = repositories::submissions::find_by_id(ctx.db(), submission_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("submission", submission_id))?;
    fetch_owned(ctx, actor_id, &submission.assessment_id).await?;
    Ok(submission)
}

/// Ownership for answer-level writes runs through the answer's submission up
/// to the parent assessment.
async fn fetch_owned_answer(
    ctx: &PipelineContext,
    actor_id: &str,
    answer_id: &str,
) -> Result<Answer, PipelineError> {
    let answer = repositories::answers::find_by_id(ctx.db(), answer_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("answer", answer_id))?;
    let submission = repositories::submissions::find_by_id(ctx.db(), &answer.submission_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("submission", &answer.submission_id))?;
    fetch_owned(ctx, actor_id, &submission.assessment_id).await?;
    Ok(answer)
}

/// Pure half of the approval guard: the submission must be in `Verifying`
/// and must carry a resolved student.
fn approvable_student(submission: &StudentSubmission) -> Result<&str, PipelineError> {
    submission_transition(submission.status, SubmissionEvent::Approve)
        .map_err(|err| PipelineError::conflict(err.to_string()))?;

    submission.student_id.as_deref().ok_or_else(|| {
        PipelineError::conflict(format!(
            "submission {} has no resolved student and cannot be approved",
            submission.id
        ))
    })
}

/// Second half of the approval guard, fed by the sibling existence check.
fn ensure_no_approved_sibling(
    student_id: &str,
    sibling_approved: bool,
) -> Result<(), PipelineError> {
    if sibling_approved {
        return Err(PipelineError::conflict(format!(
            "student {student_id} already holds an approved submission for this assessment"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(status: SubmissionStatus, student_id: Option<&str>) -> StudentSubmission {
        let now = primitive_now_utc();
        StudentSubmission {
            id: "sub-2".to_string(),
            assessment_id: "assessment-1".to_string(),
            student_id: student_id.map(str::to_string),
            answer_sheet_link: Some("https://cdn.example.com/sheet.pdf".to_string()),
            extracted_student_info: None,
            page_numbers: None,
            status,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn approval_conflicts_while_a_sibling_holds_approved() {
        let candidate = submission(SubmissionStatus::Verifying, Some("student-x"));

        let student_id = approvable_student(&candidate).unwrap();
        let err = ensure_no_approved_sibling(student_id, true).unwrap_err();

        assert!(matches!(err, PipelineError::StateConflict(_)));
        assert!(err.to_string().contains("student-x"));
    }

    #[test]
    fn approval_succeeds_once_the_sibling_is_demoted() {
        let candidate = submission(SubmissionStatus::Verifying, Some("student-x"));

        // After the unverify cascade demotes the sibling out of Approved the
        // existence check comes back false and the same candidate passes.
        let student_id = approvable_student(&candidate).unwrap();
        assert!(ensure_no_approved_sibling(student_id, false).is_ok());
    }

    #[test]
    fn approval_requires_a_resolved_student() {
        let candidate = submission(SubmissionStatus::Verifying, None);
        assert!(matches!(
            approvable_student(&candidate),
            Err(PipelineError::StateConflict(_))
        ));
    }

    #[test]
    fn approval_requires_the_verifying_state() {
        for status in [
            SubmissionStatus::Pending,
            SubmissionStatus::ReadyForVerification,
            SubmissionStatus::Rejected,
        ] {
            let candidate = submission(status, Some("student-x"));
            assert!(approvable_student(&candidate).is_err(), "{status:?}");
        }
    }
}
