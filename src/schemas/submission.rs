use serde::{Deserialize, Serialize};
use validator::Validate;

pub use crate::core::time::format_primitive;
use crate::db::models::{Answer, StudentSubmission};
use crate::db::types::SubmissionStatus;
use crate::schemas::DocumentUpload;

/// How an uploaded answer-sheet document maps to students.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UploadMode {
    /// The whole document belongs to one known student.
    SingleStudent {
        #[serde(alias = "studentId")]
        student_id: String,
    },
    /// One combined document covering several students; the partitioner
    /// splits it into per-student page ranges.
    MultiStudent,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnswerSheetUpload {
    #[serde(flatten)]
    pub mode: UploadMode,
    pub document: DocumentUpload,
}

/// Teacher override of one graded answer. `ai_explanation` is kept unless a
/// replacement is supplied.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct AnswerOverride {
    #[validate(range(min = 0.0, message = "marks_obtained must be non-negative"))]
    #[serde(alias = "marksObtained")]
    pub marks_obtained: f64,
    #[serde(default)]
    #[serde(alias = "userFeedback")]
    pub user_feedback: Option<String>,
    #[serde(default)]
    #[serde(alias = "aiExplanation")]
    pub ai_explanation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub id: String,
    pub assessment_id: String,
    pub student_id: Option<String>,
    pub answer_sheet_link: Option<String>,
    pub extracted_student_info: Option<serde_json::Value>,
    pub page_numbers: Option<Vec<i32>>,
    pub status: SubmissionStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<StudentSubmission> for SubmissionResponse {
    fn from(submission: StudentSubmission) -> Self {
        Self {
            id: submission.id,
            assessment_id: submission.assessment_id,
            student_id: submission.student_id,
            answer_sheet_link: submission.answer_sheet_link,
            extracted_student_info: submission.extracted_student_info.map(|info| info.0),
            page_numbers: submission.page_numbers.map(|pages| pages.0),
            status: submission.status,
            error_message: submission.error_message,
            created_at: format_primitive(submission.created_at),
            updated_at: format_primitive(submission.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub id: String,
    pub submission_id: String,
    pub question_id: String,
    pub marks_obtained: f64,
    pub ai_explanation: Option<String>,
    pub user_feedback: Option<String>,
    pub page_number: i32,
    pub verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Answer> for AnswerResponse {
    fn from(answer: Answer) -> Self {
        Self {
            id: answer.id,
            submission_id: answer.submission_id,
            question_id: answer.question_id,
            marks_obtained: answer.marks_obtained,
            ai_explanation: answer.ai_explanation,
            user_feedback: answer.user_feedback,
            page_number: answer.page_number,
            verified: answer.verified,
            created_at: format_primitive(answer.created_at),
            updated_at: format_primitive(answer.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_mode_deserializes_both_variants() {
        let single: UploadMode =
            serde_json::from_str(r#"{"mode": "single_student", "student_id": "stu-1"}"#).unwrap();
        assert!(matches!(single, UploadMode::SingleStudent { student_id } if student_id == "stu-1"));

        let multi: UploadMode = serde_json::from_str(r#"{"mode": "multi_student"}"#).unwrap();
        assert!(matches!(multi, UploadMode::MultiStudent));
    }

    #[test]
    fn answer_override_rejects_negative_marks() {
        let body = AnswerOverride { marks_obtained: -1.0, ..Default::default() };
        assert!(body.validate().is_err());
    }
}
