use serde::{Deserialize, Serialize};
use validator::Validate;

pub use crate::core::time::format_primitive;
use crate::db::models::{Assessment, Question, TopicWeight};
use crate::db::types::AssessmentStatus;
use crate::schemas::DocumentUpload;

#[derive(Debug, Deserialize, Validate)]
pub struct AssessmentCreate {
    pub organisation: String,
    pub owner_id: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[validate(length(min = 1, message = "class_name must not be empty"))]
    #[serde(alias = "className")]
    pub class_name: String,
    #[validate(length(min = 1, message = "subject must not be empty"))]
    pub subject: String,
    #[serde(alias = "questionPaper")]
    pub question_paper: DocumentUpload,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QuestionCreate {
    #[serde(default)]
    #[serde(alias = "questionIdentifier")]
    pub question_identifier: Option<String>,
    #[validate(length(min = 1, message = "question_text must not be empty"))]
    #[serde(alias = "questionText")]
    pub question_text: String,
    #[validate(range(exclusive_min = 0.0, message = "max_marks must be positive"))]
    #[serde(alias = "maxMarks")]
    pub max_marks: f64,
    #[validate(range(min = 1, message = "page_number must be at least 1"))]
    #[serde(alias = "pageNumber")]
    pub page_number: i32,
    #[serde(default)]
    pub topics: Vec<TopicWeight>,
}

/// Partial edit; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct QuestionEdit {
    #[serde(default)]
    #[serde(alias = "questionIdentifier")]
    pub question_identifier: Option<String>,
    #[serde(default)]
    #[serde(alias = "questionText")]
    pub question_text: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "max_marks must be positive"))]
    #[serde(default)]
    #[serde(alias = "maxMarks")]
    pub max_marks: Option<f64>,
    #[validate(range(min = 1, message = "page_number must be at least 1"))]
    #[serde(default)]
    #[serde(alias = "pageNumber")]
    pub page_number: Option<i32>,
    #[serde(default)]
    pub topics: Option<Vec<TopicWeight>>,
}

#[derive(Debug, Serialize)]
pub struct AssessmentResponse {
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
    pub created_at: String,
    pub updated_at: String,
}

impl From<Assessment> for AssessmentResponse {
    fn from(assessment: Assessment) -> Self {
        Self {
            id: assessment.id,
            organisation: assessment.organisation,
            title: assessment.title,
            class_name: assessment.class_name,
            subject: assessment.subject,
            status: assessment.status,
            question_count: assessment.question_count,
            total_marks: assessment.total_marks,
            question_paper_link: assessment.question_paper_link,
            owner_id: assessment.owner_id,
            error_message: assessment.error_message,
            created_at: format_primitive(assessment.created_at),
            updated_at: format_primitive(assessment.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuestionResponse {
    pub id: String,
    pub assessment_id: String,
    pub question_number: i32,
    pub question_identifier: Option<String>,
    pub question_text: String,
    pub max_marks: f64,
    pub page_number: i32,
    pub topics: Vec<TopicWeight>,
    pub verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Question> for QuestionResponse {
    fn from(question: Question) -> Self {
        Self {
            id: question.id,
            assessment_id: question.assessment_id,
            question_number: question.question_number,
            question_identifier: question.question_identifier,
            question_text: question.question_text,
            max_marks: question.max_marks,
            page_number: question.page_number,
            topics: question.topics.0,
            verified: question.verified,
            created_at: format_primitive(question.created_at),
            updated_at: format_primitive(question.updated_at),
        }
    }
}
