use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::StudentSubmission;
use crate::db::types::SubmissionStatus;

pub(crate) const COLUMNS: &str = "\
    id, assessment_id, student_id, answer_sheet_link, extracted_student_info, page_numbers, \
    status, error_message, created_at, updated_at";

pub(crate) async fn insert(
    conn: &mut PgConnection,
    submission: &StudentSubmission,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO student_submissions ({COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    ))
    .bind(&submission.id)
    .bind(&submission.assessment_id)
    .bind(&submission.student_id)
    .bind(&submission.answer_sheet_link)
    .bind(&submission.extracted_student_info)
    .bind(&submission.page_numbers)
    .bind(submission.status)
    .bind(&submission.error_message)
    .bind(submission.created_at)
    .bind(submission.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    submission_id: &str,
) -> Result<Option<StudentSubmission>, sqlx::Error> {
    sqlx::query_as::<_, StudentSubmission>(&format!(
        "SELECT {COLUMNS} FROM student_submissions WHERE id = $1"
    ))
    .bind(submission_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_by_assessment(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<Vec<StudentSubmission>, sqlx::Error> {
    sqlx::query_as::<_, StudentSubmission>(&format!(
        "SELECT {COLUMNS}
         FROM student_submissions
         WHERE assessment_id = $1
         ORDER BY created_at"
    ))
    .bind(assessment_id)
    .fetch_all(pool)
    .await
}

/// Guarded status update: only moves the row when it is still in one of the
/// expected source states. Doubles as the claim primitive for grading.
pub(crate) async fn update_status_if(
    pool: &PgPool,
    submission_id: &str,
    expected: &[SubmissionStatus],
    next: SubmissionStatus,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE student_submissions
         SET status = $1, updated_at = $2
         WHERE id = $3 AND status = ANY($4)",
    )
    .bind(next)
    .bind(now)
    .bind(submission_id)
    .bind(expected)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn set_failed(
    pool: &PgPool,
    submission_id: &str,
    message: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE student_submissions
         SET status = $1, error_message = $2, updated_at = $3
         WHERE id = $4 AND status <> $1",
    )
    .bind(SubmissionStatus::Failed)
    .bind(message)
    .bind(now)
    .bind(submission_id)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Pre-transition existence check for the duplicate-Approved guard. A storage
/// constraint cannot express this because multiple non-approved submissions
/// for the same student are allowed during re-grading.
pub(crate) async fn exists_approved_for_student(
    pool: &PgPool,
    assessment_id: &str,
    student_id: &str,
    exclude_submission_id: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)
         FROM student_submissions
         WHERE assessment_id = $1
           AND student_id = $2
           AND status = $3
           AND id <> $4",
    )
    .bind(assessment_id)
    .bind(student_id)
    .bind(SubmissionStatus::Approved)
    .bind(exclude_submission_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Atomic demotion for the unverify cascade: matches zero rows when a
/// concurrent unverify already reverted the submission, making the cascade
/// idempotent without any lock.
pub(crate) async fn revert_approved_to_verifying(
    pool: &PgPool,
    submission_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE student_submissions
         SET status = $1, updated_at = $2
         WHERE id = $3 AND status = $4",
    )
    .bind(SubmissionStatus::Verifying)
    .bind(now)
    .bind(submission_id)
    .bind(SubmissionStatus::Approved)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Students that already hold an Approved submission for this assessment;
/// the partitioner excludes them from identity matching.
pub(crate) async fn approved_student_ids(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT student_id
         FROM student_submissions
         WHERE assessment_id = $1 AND status = $2 AND student_id IS NOT NULL",
    )
    .bind(assessment_id)
    .bind(SubmissionStatus::Approved)
    .fetch_all(pool)
    .await
}

/// (total, approved) submission counts used by the completion check.
pub(crate) async fn completion_counts(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<(i64, i64), sqlx::Error> {
    sqlx::query_as::<_, (i64, i64)>(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE status = $2)
         FROM student_submissions
         WHERE assessment_id = $1",
    )
    .bind(assessment_id)
    .bind(SubmissionStatus::Approved)
    .fetch_one(pool)
    .await
}

pub(crate) async fn list_approved_by_assessment(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<Vec<StudentSubmission>, sqlx::Error> {
    sqlx::query_as::<_, StudentSubmission>(&format!(
        "SELECT {COLUMNS}
         FROM student_submissions
         WHERE assessment_id = $1 AND status = $2
         ORDER BY created_at"
    ))
    .bind(assessment_id)
    .bind(SubmissionStatus::Approved)
    .fetch_all(pool)
    .await
}
