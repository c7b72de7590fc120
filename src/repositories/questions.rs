use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::{Question, TopicWeight};

pub(crate) const COLUMNS: &str = "\
    id, assessment_id, question_number, question_identifier, question_text, max_marks, \
    page_number, topics, verified, created_at, updated_at";

pub(crate) async fn insert_batch(
    conn: &mut PgConnection,
    questions: &[Question],
) -> Result<(), sqlx::Error> {
    for question in questions {
        sqlx::query(&format!(
            "INSERT INTO questions ({COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(&question.id)
        .bind(&question.assessment_id)
        .bind(question.question_number)
        .bind(&question.question_identifier)
        .bind(&question.question_text)
        .bind(question.max_marks)
        .bind(question.page_number)
        .bind(&question.topics)
        .bind(question.verified)
        .bind(question.created_at)
        .bind(question.updated_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub(crate) async fn delete_by_assessment(
    conn: &mut PgConnection,
    assessment_id: &str,
) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM questions WHERE assessment_id = $1")
        .bind(assessment_id)
        .execute(&mut *conn)
        .await?;

    Ok(deleted.rows_affected())
}

pub(crate) async fn list_by_assessment(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {COLUMNS}
         FROM questions
         WHERE assessment_id = $1
         ORDER BY question_number"
    ))
    .bind(assessment_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    question_id: &str,
) -> Result<Option<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!("SELECT {COLUMNS} FROM questions WHERE id = $1"))
        .bind(question_id)
        .fetch_optional(pool)
        .await
}

/// Next dense sequential number for an insert, monotonic per assessment.
pub(crate) async fn next_question_number(
    conn: &mut PgConnection,
    assessment_id: &str,
) -> Result<i32, sqlx::Error> {
    let max: Option<i32> = sqlx::query_scalar(
        "SELECT MAX(question_number) FROM questions WHERE assessment_id = $1",
    )
    .bind(assessment_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(max.unwrap_or(0) + 1)
}

pub(crate) struct QuestionUpdate {
    pub(crate) question_identifier: Option<String>,
    pub(crate) question_text: String,
    pub(crate) max_marks: f64,
    pub(crate) page_number: i32,
    pub(crate) topics: Vec<TopicWeight>,
}

pub(crate) async fn update_content(
    conn: &mut PgConnection,
    question_id: &str,
    update: QuestionUpdate,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE questions
         SET question_identifier = $1,
             question_text = $2,
             max_marks = $3,
             page_number = $4,
             topics = $5,
             updated_at = $6
         WHERE id = $7",
    )
    .bind(&update.question_identifier)
    .bind(&update.question_text)
    .bind(update.max_marks)
    .bind(update.page_number)
    .bind(Json(&update.topics))
    .bind(now)
    .bind(question_id)
    .execute(&mut *conn)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn set_verified(
    pool: &PgPool,
    question_id: &str,
    verified: bool,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE questions SET verified = $1, updated_at = $2 WHERE id = $3",
    )
    .bind(verified)
    .bind(now)
    .bind(question_id)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn delete(
    conn: &mut PgConnection,
    question_id: &str,
) -> Result<bool, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM questions WHERE id = $1")
        .bind(question_id)
        .execute(&mut *conn)
        .await?;

    Ok(deleted.rows_affected() > 0)
}
