use sqlx::{PgConnection, PgPool};

use crate::db::models::Student;

pub(crate) const COLUMNS: &str = "\
    id, organisation, student_identifier, student_name, class_name, section, roll_number, \
    contact_email, contact_phone, created_at, updated_at";

pub(crate) async fn insert(conn: &mut PgConnection, student: &Student) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO students ({COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    ))
    .bind(&student.id)
    .bind(&student.organisation)
    .bind(&student.student_identifier)
    .bind(&student.student_name)
    .bind(&student.class_name)
    .bind(&student.section)
    .bind(&student.roll_number)
    .bind(&student.contact_email)
    .bind(&student.contact_phone)
    .bind(student.created_at)
    .bind(student.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    student_id: &str,
) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!("SELECT {COLUMNS} FROM students WHERE id = $1"))
        .bind(student_id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_by_identifier(
    conn: &mut PgConnection,
    organisation: &str,
    student_identifier: &str,
) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!(
        "SELECT {COLUMNS}
         FROM students
         WHERE organisation = $1 AND student_identifier = $2"
    ))
    .bind(organisation)
    .bind(student_identifier)
    .fetch_optional(&mut *conn)
    .await
}

pub(crate) async fn list_by_organisation(
    pool: &PgPool,
    organisation: &str,
) -> Result<Vec<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!(
        "SELECT {COLUMNS}
         FROM students
         WHERE organisation = $1
         ORDER BY student_name"
    ))
    .bind(organisation)
    .fetch_all(pool)
    .await
}
