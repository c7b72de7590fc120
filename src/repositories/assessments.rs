use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::Assessment;
use crate::db::types::AssessmentStatus;

pub(crate) const COLUMNS: &str = "\
    id, organisation, title, class_name, subject, status, question_count, total_marks, \
    question_paper_link, owner_id, error_message, created_at, updated_at";

pub(crate) async fn insert(pool: &PgPool, assessment: &Assessment) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO assessments ({COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
    ))
    .bind(&assessment.id)
    .bind(&assessment.organisation)
    .bind(&assessment.title)
    .bind(&assessment.class_name)
    .bind(&assessment.subject)
    .bind(assessment.status)
    .bind(assessment.question_count)
    .bind(assessment.total_marks)
    .bind(&assessment.question_paper_link)
    .bind(&assessment.owner_id)
    .bind(&assessment.error_message)
    .bind(assessment.created_at)
    .bind(assessment.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<Option<Assessment>, sqlx::Error> {
    sqlx::query_as::<_, Assessment>(&format!(
        "SELECT {COLUMNS} FROM assessments WHERE id = $1"
    ))
    .bind(assessment_id)
    .fetch_optional(pool)
    .await
}

/// Guarded status update: succeeds only when the row is still in one of the
/// expected source states, so racing transitions resolve to exactly one
/// winner.
pub(crate) async fn update_status_if(
    pool: &PgPool,
    assessment_id: &str,
    expected: &[AssessmentStatus],
    next: AssessmentStatus,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE assessments
         SET status = $1, error_message = NULL, updated_at = $2
         WHERE id = $3 AND status = ANY($4)",
    )
    .bind(next)
    .bind(now)
    .bind(assessment_id)
    .bind(expected)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Failure transition guarded on the in-flight source state, so a pipeline
/// failure lands exactly once and never clobbers a status the user has
/// already moved past.
pub(crate) async fn set_failure(
    pool: &PgPool,
    assessment_id: &str,
    expected: &[AssessmentStatus],
    status: AssessmentStatus,
    message: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE assessments
         SET status = $1, error_message = $2, updated_at = $3
         WHERE id = $4 AND status = ANY($5)",
    )
    .bind(status)
    .bind(message)
    .bind(now)
    .bind(assessment_id)
    .bind(expected)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Refreshes the cached `question_count` / `total_marks` sums. Always called
/// inside the same transaction as the question mutation so the cache can
/// never drift from the rows it summarizes.
pub(crate) async fn refresh_question_totals(
    conn: &mut PgConnection,
    assessment_id: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE assessments
         SET question_count = (SELECT COUNT(*) FROM questions WHERE assessment_id = $1),
             total_marks = (SELECT COALESCE(SUM(max_marks), 0) FROM questions WHERE assessment_id = $1),
             updated_at = $2
         WHERE id = $1",
    )
    .bind(assessment_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn mark_extraction_complete(
    conn: &mut PgConnection,
    assessment_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE assessments
         SET status = $1, error_message = NULL, updated_at = $2
         WHERE id = $3 AND status = $4",
    )
    .bind(AssessmentStatus::QuesPendingApproval)
    .bind(now)
    .bind(assessment_id)
    .bind(AssessmentStatus::ProcessingQues)
    .execute(&mut *conn)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Atomic demotion for the unverify cascade. Matches zero rows when a
/// concurrent caller already demoted the assessment.
pub(crate) async fn demote_completed(
    pool: &PgPool,
    assessment_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE assessments
         SET status = $1, updated_at = $2
         WHERE id = $3 AND status = $4",
    )
    .bind(AssessmentStatus::AnsPendingApproval)
    .bind(now)
    .bind(assessment_id)
    .bind(AssessmentStatus::Completed)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}
