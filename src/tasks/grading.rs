//! Background answer-sheet grading pipeline. A combined document is
//! partitioned into per-student submissions first; every submission is then
//! graded independently and sequentially, so one student's provider failure
//! never takes down a sibling.

use std::collections::{HashMap, HashSet};

use anyhow::Context;
use sqlx::types::Json;
use uuid::Uuid;

use crate::core::errors::PipelineError;
use crate::core::state::PipelineContext;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Question, Student, StudentSubmission};
use crate::db::types::{AssessmentStatus, SubmissionStatus};
use crate::providers::types::{GradingContext, GradingQuestion, RenderedPage};
use crate::repositories;
use crate::services::identity::IdentityResolution;
use crate::services::partitioner::{self, StudentGroup};
use crate::services::renderer::cached_render;
use crate::tasks::job::Job;

/// What the grading job should work on.
pub enum GradingBatch {
    /// Submission rows already exist (single-student uploads).
    Submissions(Vec<String>),
    /// One combined document; the job partitions it and creates the rows.
    CombinedDocument { document_url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradingReport {
    pub graded: usize,
    pub failed: usize,
}

/// Dispatches grading for an assessment already moved to `Processing Ans`.
pub fn spawn_grading(
    ctx: PipelineContext,
    assessment_id: String,
    batch: GradingBatch,
) -> Job<Result<GradingReport, PipelineError>> {
    Job::spawn(async move {
        let result = run_grading(&ctx, &assessment_id, batch).await;

        match &result {
            Ok(report) => {
                metrics::counter!("grading_jobs_total", "status" => "success").increment(1);
                tracing::info!(
                    assessment_id,
                    graded = report.graded,
                    failed = report.failed,
                    "Grading batch finished"
                );
            }
            Err(err) => {
                metrics::counter!("grading_jobs_total", "status" => "failed").increment(1);
                tracing::error!(assessment_id, error = %err, "Grading batch failed");
                record_document_failure(&ctx, &assessment_id, err).await;
            }
        }

        result
    })
}

async fn run_grading(
    ctx: &PipelineContext,
    assessment_id: &str,
    batch: GradingBatch,
) -> Result<GradingReport, PipelineError> {
    let assessment = repositories::assessments::find_by_id(ctx.db(), assessment_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("assessment", assessment_id))?;

    let submission_ids = match batch {
        GradingBatch::Submissions(ids) => ids,
        GradingBatch::CombinedDocument { document_url } => {
            fan_out_combined_document(ctx, &assessment.organisation, assessment_id, &document_url)
                .await?
        }
    };

    let questions = repositories::questions::list_by_assessment(ctx.db(), assessment_id).await?;
    let grading_context = grading_context_for(&questions);

    let mut graded = 0usize;
    let mut failed = 0usize;

    for submission_id in &submission_ids {
        match grade_one_submission(ctx, submission_id, &questions, &grading_context).await {
            Ok(()) => graded += 1,
            Err(err) => {
                failed += 1;
                tracing::warn!(submission_id, error = %err, "Submission grading failed");
                let persisted = repositories::submissions::set_failed(
                    ctx.db(),
                    submission_id,
                    &err.to_string(),
                    primitive_now_utc(),
                )
                .await
                .context("Failed to record submission failure");
                if let Err(persist_err) = persisted {
                    tracing::error!(submission_id, error = %persist_err, "Could not persist failure");
                }
            }
        }
    }

    // Batch end: hand the assessment over to the teacher regardless of
    // per-submission failures, which are visible on the rows themselves.
    repositories::assessments::update_status_if(
        ctx.db(),
        assessment_id,
        &[AssessmentStatus::ProcessingAns],
        AssessmentStatus::AnsPendingApproval,
        primitive_now_utc(),
    )
    .await?;

    Ok(GradingReport { graded, failed })
}

/// Partitions the combined document and creates one submission row per
/// detected group. Group-local errors become `Failed` rows; only healthy
/// groups are queued for grading.
async fn fan_out_combined_document(
    ctx: &PipelineContext,
    organisation: &str,
    assessment_id: &str,
    document_url: &str,
) -> Result<Vec<String>, PipelineError> {
    let pages = cached_render(ctx.renderer(), ctx.render_cache(), document_url).await?;

    let groups =
        partitioner::partition_document(ctx.chain(), &pages, ctx.settings().partition()).await?;

    let roster = repositories::students::list_by_organisation(ctx.db(), organisation).await?;
    let approved: HashSet<String> =
        repositories::submissions::approved_student_ids(ctx.db(), assessment_id)
            .await?
            .into_iter()
            .collect();

    let groups = partitioner::resolve_groups(groups, &roster, &approved);

    let now = primitive_now_utc();
    let mut tx = ctx.db().begin().await?;
    let mut queued = Vec::new();

    for group in groups {
        let submission_id = Uuid::new_v4().to_string();
        let extracted_info = serde_json::to_value(&group)
            .unwrap_or_else(|_| serde_json::Value::Null);

        let (student_id, status, error_message) = match (&group.error, &group.resolution) {
            (Some(error), _) => (None, SubmissionStatus::Failed, Some(error.clone())),
            (None, Some(IdentityResolution::Existing { student_id, .. })) => {
                (Some(student_id.clone()), SubmissionStatus::Pending, None)
            }
            (None, Some(IdentityResolution::CreateNew { proposed, .. })) => {
                let identifier = proposed.student_identifier.clone().unwrap_or_default();

                // A create-new proposal can still carry the identifier of a
                // roster student who was excluded from matching (one already
                // holding an Approved submission). Attach to the existing row
                // rather than violating roster uniqueness; the duplicate is
                // caught again at approval time.
                let existing = repositories::students::find_by_identifier(
                    &mut tx,
                    organisation,
                    &identifier,
                )
                .await?;

                match existing {
                    Some(student) => (Some(student.id), SubmissionStatus::Pending, None),
                    None => {
                        let student = Student {
                            id: Uuid::new_v4().to_string(),
                            organisation: organisation.to_string(),
                            student_identifier: identifier,
                            student_name: proposed.student_name.clone().unwrap_or_default(),
                            class_name: proposed.class_name.clone(),
                            section: None,
                            roll_number: proposed.roll_number.clone(),
                            contact_email: None,
                            contact_phone: None,
                            created_at: now,
                            updated_at: now,
                        };
                        repositories::students::insert(&mut tx, &student).await?;
                        (Some(student.id), SubmissionStatus::Pending, None)
                    }
                }
            }
            (None, None) => (
                None,
                SubmissionStatus::Failed,
                Some("no identity resolution for this page range".to_string()),
            ),
        };

        let submission = StudentSubmission {
            id: submission_id.clone(),
            assessment_id: assessment_id.to_string(),
            student_id,
            answer_sheet_link: Some(document_url.to_string()),
            extracted_student_info: Some(Json(extracted_info)),
            page_numbers: Some(Json(group.page_numbers.clone())),
            status,
            error_message,
            created_at: now,
            updated_at: now,
        };
        repositories::submissions::insert(&mut tx, &submission).await?;

        if submission.status == SubmissionStatus::Pending {
            queued.push(submission_id);
        }
    }

    tx.commit().await?;
    Ok(queued)
}

async fn grade_one_submission(
    ctx: &PipelineContext,
    submission_id: &str,
    questions: &[Question],
    grading_context: &GradingContext,
) -> Result<(), PipelineError> {
    let submission = repositories::submissions::find_by_id(ctx.db(), submission_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("submission", submission_id))?;

    let claimed = repositories::submissions::update_status_if(
        ctx.db(),
        submission_id,
        &[SubmissionStatus::Pending],
        SubmissionStatus::Processing,
        primitive_now_utc(),
    )
    .await?;
    if !claimed {
        tracing::info!(submission_id, status = submission.status.as_str(), "Skipping grading");
        return Ok(());
    }

    let document_url = submission
        .answer_sheet_link
        .as_deref()
        .ok_or_else(|| PipelineError::Validation("submission has no answer sheet".to_string()))?;

    let pages = cached_render(ctx.renderer(), ctx.render_cache(), document_url).await?;
    let pages = select_pages(&pages, submission.page_numbers.as_ref().map(|list| list.0.as_slice()));

    let candidates = ctx.chain().grade_answers(&pages, grading_context).await?;
    let answers = build_answers(submission_id, questions, candidates);

    let mut tx = ctx.db().begin().await?;
    repositories::answers::replace_for_submission(&mut tx, submission_id, &answers).await?;
    tx.commit().await?;

    repositories::submissions::update_status_if(
        ctx.db(),
        submission_id,
        &[SubmissionStatus::Processing],
        SubmissionStatus::ReadyForVerification,
        primitive_now_utc(),
    )
    .await?;

    Ok(())
}

fn grading_context_for(questions: &[Question]) -> GradingContext {
    GradingContext {
        questions: questions
            .iter()
            .map(|question| GradingQuestion {
                question_number: question.question_number,
                question_identifier: question.question_identifier.clone(),
                question_text: question.question_text.clone(),
                max_marks: question.max_marks,
            })
            .collect(),
    }
}

/// `None` page list means the whole document belongs to this submission.
fn select_pages(pages: &[RenderedPage], page_numbers: Option<&[i32]>) -> Vec<RenderedPage> {
    match page_numbers {
        None => pages.to_vec(),
        Some(numbers) => {
            let wanted: HashSet<i32> = numbers.iter().copied().collect();
            pages.iter().filter(|page| wanted.contains(&page.number)).cloned().collect()
        }
    }
}

/// Matches graded candidates to stored questions by question number. Unknown
/// numbers and duplicate gradings of one question are dropped, first graded
/// entry wins.
fn build_answers(
    submission_id: &str,
    questions: &[Question],
    candidates: Vec<crate::providers::types::AnswerCandidate>,
) -> Vec<crate::db::models::Answer> {
    let by_number: HashMap<i32, &Question> =
        questions.iter().map(|question| (question.question_number, question)).collect();
    let now = primitive_now_utc();

    let mut seen = HashSet::new();
    let mut answers = Vec::new();

    for candidate in candidates {
        let Some(question) = by_number.get(&candidate.question_number) else {
            tracing::warn!(
                submission_id,
                question_number = candidate.question_number,
                "Dropping graded answer for unknown question number"
            );
            continue;
        };
        if !seen.insert(candidate.question_number) {
            continue;
        }

        answers.push(crate::db::models::Answer {
            id: Uuid::new_v4().to_string(),
            submission_id: submission_id.to_string(),
            question_id: question.id.clone(),
            marks_obtained: candidate.marks_obtained,
            ai_explanation: candidate.explanation,
            user_feedback: None,
            page_number: candidate.page_number,
            verified: false,
            created_at: now,
            updated_at: now,
        });
    }

    answers
}

async fn record_document_failure(ctx: &PipelineContext, assessment_id: &str, err: &PipelineError) {
    let outcome = repositories::assessments::set_failure(
        ctx.db(),
        assessment_id,
        &[AssessmentStatus::ProcessingAns],
        AssessmentStatus::UploadFailed,
        &err.to_string(),
        primitive_now_utc(),
    )
    .await
    .context("Failed to record upload failure");

    if let Err(persist_err) = outcome {
        tracing::error!(assessment_id, error = %persist_err, "Could not persist failure status");
    }
}
