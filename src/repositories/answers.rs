use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::Answer;

pub(crate) const COLUMNS: &str = "\
    id, submission_id, question_id, marks_obtained, ai_explanation, user_feedback, \
    page_number, verified, created_at, updated_at";

/// Replaces the submission's answer set in one shot. Always called inside a
/// transaction so a failed batch leaves no partial answer set behind.
pub(crate) async fn replace_for_submission(
    conn: &mut PgConnection,
    submission_id: &str,
    answers: &[Answer],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM answers WHERE submission_id = $1")
        .bind(submission_id)
        .execute(&mut *conn)
        .await?;

    for answer in answers {
        sqlx::query(&format!(
            "INSERT INTO answers ({COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(&answer.id)
        .bind(&answer.submission_id)
        .bind(&answer.question_id)
        .bind(answer.marks_obtained)
        .bind(&answer.ai_explanation)
        .bind(&answer.user_feedback)
        .bind(answer.page_number)
        .bind(answer.verified)
        .bind(answer.created_at)
        .bind(answer.updated_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub(crate) async fn list_by_submission(
    pool: &PgPool,
    submission_id: &str,
) -> Result<Vec<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(
        "SELECT a.id, a.submission_id, a.question_id, a.marks_obtained, a.ai_explanation,
                a.user_feedback, a.page_number, a.verified, a.created_at, a.updated_at
         FROM answers a
         JOIN questions q ON q.id = a.question_id
         WHERE a.submission_id = $1
         ORDER BY q.question_number",
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_for_submissions(
    pool: &PgPool,
    submission_ids: &[String],
) -> Result<Vec<Answer>, sqlx::Error> {
    if submission_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS}
         FROM answers
         WHERE submission_id = ANY($1)"
    ))
    .bind(submission_ids)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    answer_id: &str,
) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!("SELECT {COLUMNS} FROM answers WHERE id = $1"))
        .bind(answer_id)
        .fetch_optional(pool)
        .await
}

/// Teacher override. `user_feedback` is always overwritable; `ai_explanation`
/// is preserved unless the caller explicitly supplies a replacement.
pub(crate) async fn apply_override(
    pool: &PgPool,
    answer_id: &str,
    marks_obtained: f64,
    user_feedback: Option<&str>,
    ai_explanation: Option<&str>,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE answers
         SET marks_obtained = $1,
             user_feedback = $2,
             ai_explanation = COALESCE($3, ai_explanation),
             updated_at = $4
         WHERE id = $5",
    )
    .bind(marks_obtained)
    .bind(user_feedback)
    .bind(ai_explanation)
    .bind(now)
    .bind(answer_id)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn set_verified(
    pool: &PgPool,
    answer_id: &str,
    verified: bool,
    now: PrimitiveDateTime,
) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "UPDATE answers
         SET verified = $1, updated_at = $2
         WHERE id = $3
         RETURNING {COLUMNS}"
    ))
    .bind(verified)
    .bind(now)
    .bind(answer_id)
    .fetch_optional(pool)
    .await
}
