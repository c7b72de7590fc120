use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{AssessmentStatus, SubmissionStatus};

/// One question paper and its grading lifecycle. `question_count` and
/// `total_marks` are cached sums refreshed inside every question mutation
/// transaction; everything derived from answers is computed on read.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assessment {
    pub id: String,
    pub organisation: String,
    pub title: String,
    pub class_name: String,
    pub subject: String,
    pub status: AssessmentStatus,
    pub question_count: i32,
    pub total_marks: f64,
    pub question_paper_link: Option<String>,
    pub owner_id: String,
    pub error_message: Option<String>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicWeight {
    pub topic: String,
    /// Provider-supplied; weights are not validated to sum to 100.
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: String,
    pub assessment_id: String,
    /// Dense sequential number assigned at insert time, monotonic per
    /// assessment. Distinct from the free-text author-facing identifier.
    pub question_number: i32,
    pub question_identifier: Option<String>,
    pub question_text: String,
    pub max_marks: f64,
    pub page_number: i32,
    pub topics: Json<Vec<TopicWeight>>,
    pub verified: bool,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub id: String,
    pub organisation: String,
    /// Unique within an organisation.
    pub student_identifier: String,
    pub student_name: String,
    pub class_name: Option<String>,
    pub section: Option<String>,
    pub roll_number: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

/// One student's answer sheet within an assessment. `student_id` stays NULL
/// until identity resolution succeeds; `page_numbers` is NULL when the whole
/// document belongs to this student.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentSubmission {
    pub id: String,
    pub assessment_id: String,
    pub student_id: Option<String>,
    pub answer_sheet_link: Option<String>,
    pub extracted_student_info: Option<Json<serde_json::Value>>,
    pub page_numbers: Option<Json<Vec<i32>>>,
    pub status: SubmissionStatus,
    pub error_message: Option<String>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

/// Authoritative source of score. Unique per (submission_id, question_id);
/// no sum of these rows is ever stored on the submission or assessment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub id: String,
    pub submission_id: String,
    pub question_id: String,
    pub marks_obtained: f64,
    pub ai_explanation: Option<String>,
    pub user_feedback: Option<String>,
    pub page_number: i32,
    pub verified: bool,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}
