use serde::{Deserialize, Serialize};
use sqlx::Type;

/// Assessment lifecycle statuses. The labels are part of the wire contract
/// consumed by existing clients and must stay verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "assessment_status")]
pub enum AssessmentStatus {
    #[serde(rename = "Processing Ques")]
    #[sqlx(rename = "Processing Ques")]
    ProcessingQues,
    #[serde(rename = "Ques Pending Approval")]
    #[sqlx(rename = "Ques Pending Approval")]
    QuesPendingApproval,
    #[serde(rename = "Ready for Grading")]
    #[sqlx(rename = "Ready for Grading")]
    ReadyForGrading,
    #[serde(rename = "Processing Ans")]
    #[sqlx(rename = "Processing Ans")]
    ProcessingAns,
    #[serde(rename = "Ans Pending Approval")]
    #[sqlx(rename = "Ans Pending Approval")]
    AnsPendingApproval,
    #[serde(rename = "Completed")]
    #[sqlx(rename = "Completed")]
    Completed,
    #[serde(rename = "Extraction Failed")]
    #[sqlx(rename = "Extraction Failed")]
    ExtractionFailed,
    #[serde(rename = "Upload Failed")]
    #[sqlx(rename = "Upload Failed")]
    UploadFailed,
}

impl AssessmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessingQues => "Processing Ques",
            Self::QuesPendingApproval => "Ques Pending Approval",
            Self::ReadyForGrading => "Ready for Grading",
            Self::ProcessingAns => "Processing Ans",
            Self::AnsPendingApproval => "Ans Pending Approval",
            Self::Completed => "Completed",
            Self::ExtractionFailed => "Extraction Failed",
            Self::UploadFailed => "Upload Failed",
        }
    }

    /// Question mutation and re-extraction are allowed only from these states.
    pub fn is_editable(self) -> bool {
        matches!(self, Self::ProcessingQues | Self::QuesPendingApproval | Self::ReadyForGrading)
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::ExtractionFailed | Self::UploadFailed)
    }
}

/// Submission lifecycle statuses. Older clients send `Extracting` for the
/// initial state; it is accepted on input and normalized to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "submission_status")]
pub enum SubmissionStatus {
    #[serde(rename = "Pending", alias = "Extracting")]
    #[sqlx(rename = "Pending")]
    Pending,
    #[serde(rename = "Processing")]
    #[sqlx(rename = "Processing")]
    Processing,
    #[serde(rename = "Ready for Verification")]
    #[sqlx(rename = "Ready for Verification")]
    ReadyForVerification,
    #[serde(rename = "Verifying")]
    #[sqlx(rename = "Verifying")]
    Verifying,
    #[serde(rename = "Approved")]
    #[sqlx(rename = "Approved")]
    Approved,
    #[serde(rename = "Rejected")]
    #[sqlx(rename = "Rejected")]
    Rejected,
    #[serde(rename = "Failed")]
    #[sqlx(rename = "Failed")]
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::ReadyForVerification => "Ready for Verification",
            Self::Verifying => "Verifying",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Failed => "Failed",
        }
    }

    /// `Failed` is the only terminal state; `Approved` can still be demoted by
    /// the unverify cascade and `Rejected` submissions can be re-uploaded.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Processing | Self::ReadyForVerification | Self::Verifying
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_match_wire_contract() {
        assert_eq!(AssessmentStatus::ProcessingQues.as_str(), "Processing Ques");
        assert_eq!(AssessmentStatus::AnsPendingApproval.as_str(), "Ans Pending Approval");
        assert_eq!(SubmissionStatus::ReadyForVerification.as_str(), "Ready for Verification");

        let encoded = serde_json::to_string(&AssessmentStatus::UploadFailed).unwrap();
        assert_eq!(encoded, "\"Upload Failed\"");
    }

    #[test]
    fn extracting_is_accepted_as_pending_alias() {
        let decoded: SubmissionStatus = serde_json::from_str("\"Extracting\"").unwrap();
        assert_eq!(decoded, SubmissionStatus::Pending);
    }

    #[test]
    fn editable_states_are_limited_to_question_phase() {
        assert!(AssessmentStatus::ProcessingQues.is_editable());
        assert!(AssessmentStatus::QuesPendingApproval.is_editable());
        assert!(AssessmentStatus::ReadyForGrading.is_editable());
        assert!(!AssessmentStatus::ProcessingAns.is_editable());
        assert!(!AssessmentStatus::Completed.is_editable());
    }
}
