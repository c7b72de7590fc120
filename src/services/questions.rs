//! Question mutation under the editability rules: content changes are legal
//! only while the assessment is in `Processing Ques`, `Ques Pending Approval`
//! or `Ready for Grading`; the `verified` flag is mutable in any state. Every
//! content mutation refreshes the cached totals in the same transaction.

use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

use crate::core::errors::PipelineError;
use crate::core::state::PipelineContext;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Assessment, Question};
use crate::repositories;
use crate::repositories::questions::QuestionUpdate;
use crate::schemas::assessment::{QuestionCreate, QuestionEdit, QuestionResponse};
use crate::services::assessments::fetch_owned;

pub async fn list_questions(
    ctx: &PipelineContext,
    assessment_id: &str,
) -> Result<Vec<QuestionResponse>, PipelineError> {
    let questions = repositories::questions::list_by_assessment(ctx.db(), assessment_id).await?;
    Ok(questions.into_iter().map(QuestionResponse::from).collect())
}

pub async fn add_question(
    ctx: &PipelineContext,
    actor_id: &str,
    assessment_id: &str,
    request: QuestionCreate,
) -> Result<QuestionResponse, PipelineError> {
    request.validate()?;
    let assessment = fetch_owned(ctx, actor_id, assessment_id).await?;
    require_editable(&assessment)?;

    let now = primitive_now_utc();
    let mut tx = ctx.db().begin().await?;
    let question_number =
        repositories::questions::next_question_number(&mut tx, assessment_id).await?;

    let question = Question {
        id: Uuid::new_v4().to_string(),
        assessment_id: assessment_id.to_string(),
        question_number,
        question_identifier: request.question_identifier,
        question_text: request.question_text,
        max_marks: request.max_marks,
        page_number: request.page_number,
        topics: Json(request.topics),
        verified: false,
        created_at: now,
        updated_at: now,
    };
    repositories::questions::insert_batch(&mut tx, std::slice::from_ref(&question)).await?;
    repositories::assessments::refresh_question_totals(&mut tx, assessment_id, now).await?;
    tx.commit().await?;

    Ok(QuestionResponse::from(question))
}

pub async fn update_question(
    ctx: &PipelineContext,
    actor_id: &str,
    question_id: &str,
    request: QuestionEdit,
) -> Result<QuestionResponse, PipelineError> {
    request.validate()?;

    let question = repositories::questions::find_by_id(ctx.db(), question_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("question", question_id))?;
    let assessment = fetch_owned(ctx, actor_id, &question.assessment_id).await?;
    require_editable(&assessment)?;

    let update = QuestionUpdate {
        question_identifier: request.question_identifier.or(question.question_identifier),
        question_text: request.question_text.unwrap_or(question.question_text),
        max_marks: request.max_marks.unwrap_or(question.max_marks),
        page_number: request.page_number.unwrap_or(question.page_number),
        topics: request.topics.unwrap_or(question.topics.0),
    };

    let now = primitive_now_utc();
    let mut tx = ctx.db().begin().await?;
    repositories::questions::update_content(&mut tx, question_id, update, now).await?;
    repositories::assessments::refresh_question_totals(&mut tx, &question.assessment_id, now)
        .await?;
    tx.commit().await?;

    let refreshed = repositories::questions::find_by_id(ctx.db(), question_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("question", question_id))?;
    Ok(QuestionResponse::from(refreshed))
}

pub async fn delete_question(
    ctx: &PipelineContext,
    actor_id: &str,
    question_id: &str,
) -> Result<(), PipelineError> {
    let question = repositories::questions::find_by_id(ctx.db(), question_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("question", question_id))?;
    let assessment = fetch_owned(ctx, actor_id, &question.assessment_id).await?;
    require_editable(&assessment)?;

    let now = primitive_now_utc();
    let mut tx = ctx.db().begin().await?;
    repositories::questions::delete(&mut tx, question_id).await?;
    repositories::assessments::refresh_question_totals(&mut tx, &question.assessment_id, now)
        .await?;
    tx.commit().await?;

    Ok(())
}

/// Allowed in any assessment state.
pub async fn set_question_verified(
    ctx: &PipelineContext,
    actor_id: &str,
    question_id: &str,
    verified: bool,
) -> Result<(), PipelineError> {
    let question = repositories::questions::find_by_id(ctx.db(), question_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("question", question_id))?;
    fetch_owned(ctx, actor_id, &question.assessment_id).await?;

    let updated = repositories::questions::set_verified(
        ctx.db(),
        question_id,
        verified,
        primitive_now_utc(),
    )
    .await?;
    if !updated {
        return Err(PipelineError::not_found("question", question_id));
    }

    Ok(())
}

fn require_editable(assessment: &Assessment) -> Result<(), PipelineError> {
    if !assessment.status.is_editable() {
        return Err(PipelineError::conflict(format!(
            "questions are frozen while the assessment is '{}'",
            assessment.status.as_str()
        )));
    }
    Ok(())
}
