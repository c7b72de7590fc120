//! Pure lifecycle transition functions for assessments and submissions.
//!
//! Each function takes the current status and an event and returns the next
//! status, with an explicit `changed` flag so re-applying an already-applied
//! event is a no-op instead of an error. The answer → submission → assessment
//! cascade is composed from these functions; no layer reaches into its
//! parent's state.

use thiserror::Error;

use crate::db::types::{AssessmentStatus, SubmissionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub next: S,
    /// False when the event was legal but required no state change.
    pub changed: bool,
}

impl<S> Transition<S> {
    fn to(next: S) -> Self {
        Self { next, changed: true }
    }

    fn stay(next: S) -> Self {
        Self { next, changed: false }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot apply {event} while in status '{from}'")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionEvent {
    /// Grading pipeline picked the submission up.
    StartProcessing,
    /// Answers were written; ready for the teacher.
    GradingComplete,
    BeginVerification,
    Approve,
    Reject,
    /// A child answer's `verified` flag was cleared.
    AnswerUnverified,
    /// Unrecoverable provider or storage error.
    Fail,
}

impl SubmissionEvent {
    fn as_str(self) -> &'static str {
        match self {
            Self::StartProcessing => "StartProcessing",
            Self::GradingComplete => "GradingComplete",
            Self::BeginVerification => "BeginVerification",
            Self::Approve => "Approve",
            Self::Reject => "Reject",
            Self::AnswerUnverified => "AnswerUnverified",
            Self::Fail => "Fail",
        }
    }
}

/// Submission machine: `Pending → Processing → Ready for Verification →
/// Verifying → {Approved | Rejected}`, with terminal `Failed` reachable from
/// every in-flight state.
///
/// The duplicate-Approved guard is an existence check against sibling rows
/// and therefore lives in the service layer, not here.
pub fn submission_transition(
    current: SubmissionStatus,
    event: SubmissionEvent,
) -> Result<Transition<SubmissionStatus>, InvalidTransition> {
    use SubmissionStatus as S;

    let denied =
        || Err(InvalidTransition { from: current.as_str(), event: event.as_str() });

    match event {
        SubmissionEvent::StartProcessing => match current {
            S::Pending => Ok(Transition::to(S::Processing)),
            S::Processing => Ok(Transition::stay(S::Processing)),
            _ => denied(),
        },
        SubmissionEvent::GradingComplete => match current {
            S::Processing => Ok(Transition::to(S::ReadyForVerification)),
            _ => denied(),
        },
        SubmissionEvent::BeginVerification => match current {
            S::ReadyForVerification => Ok(Transition::to(S::Verifying)),
            S::Verifying => Ok(Transition::stay(S::Verifying)),
            _ => denied(),
        },
        SubmissionEvent::Approve => match current {
            S::Verifying => Ok(Transition::to(S::Approved)),
            _ => denied(),
        },
        SubmissionEvent::Reject => match current {
            S::Verifying => Ok(Transition::to(S::Rejected)),
            _ => denied(),
        },
        SubmissionEvent::AnswerUnverified => match current {
            // The cascade: an Approved submission reverts to Verifying.
            S::Approved => Ok(Transition::to(S::Verifying)),
            // Reverting an already-reverted submission is a no-op, which is
            // what makes concurrent unverify calls safe.
            other => Ok(Transition::stay(other)),
        },
        SubmissionEvent::Fail => match current {
            S::Failed => Ok(Transition::stay(S::Failed)),
            state if state.is_in_flight() => Ok(Transition::to(S::Failed)),
            _ => denied(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentEvent {
    /// Paper uploaded or extraction explicitly re-triggered.
    StartExtraction,
    ExtractionSucceeded,
    ExtractionFailed,
    ApproveQuestions,
    /// An answer-sheet upload was accepted.
    StartAnswerUpload,
    /// The grading batch for the current upload finished.
    GradingBatchComplete,
    UploadFailed,
    /// Every submission now holds Approved.
    AllSubmissionsApproved,
    /// A submission was demoted out of Approved by the unverify cascade.
    SubmissionDemoted,
}

impl AssessmentEvent {
    fn as_str(self) -> &'static str {
        match self {
            Self::StartExtraction => "StartExtraction",
            Self::ExtractionSucceeded => "ExtractionSucceeded",
            Self::ExtractionFailed => "ExtractionFailed",
            Self::ApproveQuestions => "ApproveQuestions",
            Self::StartAnswerUpload => "StartAnswerUpload",
            Self::GradingBatchComplete => "GradingBatchComplete",
            Self::UploadFailed => "UploadFailed",
            Self::AllSubmissionsApproved => "AllSubmissionsApproved",
            Self::SubmissionDemoted => "SubmissionDemoted",
        }
    }
}

/// Assessment machine: `Processing Ques → Ques Pending Approval → Ready for
/// Grading → Processing Ans → Ans Pending Approval → Completed`, with failure
/// branches from the two in-flight states. Re-extraction is allowed from the
/// editable states and from `Extraction Failed` (explicit user retry is the
/// only recovery path; there is no automatic one).
pub fn assessment_transition(
    current: AssessmentStatus,
    event: AssessmentEvent,
) -> Result<Transition<AssessmentStatus>, InvalidTransition> {
    use AssessmentStatus as A;

    let denied =
        || Err(InvalidTransition { from: current.as_str(), event: event.as_str() });

    match event {
        AssessmentEvent::StartExtraction => match current {
            state if state.is_editable() => Ok(Transition::to(A::ProcessingQues)),
            A::ExtractionFailed => Ok(Transition::to(A::ProcessingQues)),
            _ => denied(),
        },
        AssessmentEvent::ExtractionSucceeded => match current {
            A::ProcessingQues => Ok(Transition::to(A::QuesPendingApproval)),
            _ => denied(),
        },
        AssessmentEvent::ExtractionFailed => match current {
            A::ProcessingQues => Ok(Transition::to(A::ExtractionFailed)),
            _ => denied(),
        },
        AssessmentEvent::ApproveQuestions => match current {
            A::QuesPendingApproval => Ok(Transition::to(A::ReadyForGrading)),
            _ => denied(),
        },
        AssessmentEvent::StartAnswerUpload => match current {
            A::ReadyForGrading | A::AnsPendingApproval | A::Completed | A::UploadFailed => {
                Ok(Transition::to(A::ProcessingAns))
            }
            A::ProcessingAns => Ok(Transition::stay(A::ProcessingAns)),
            _ => denied(),
        },
        AssessmentEvent::GradingBatchComplete => match current {
            A::ProcessingAns => Ok(Transition::to(A::AnsPendingApproval)),
            _ => denied(),
        },
        AssessmentEvent::UploadFailed => match current {
            A::ProcessingAns => Ok(Transition::to(A::UploadFailed)),
            _ => denied(),
        },
        AssessmentEvent::AllSubmissionsApproved => match current {
            A::AnsPendingApproval => Ok(Transition::to(A::Completed)),
            A::Completed => Ok(Transition::stay(A::Completed)),
            _ => denied(),
        },
        AssessmentEvent::SubmissionDemoted => match current {
            A::Completed => Ok(Transition::to(A::AnsPendingApproval)),
            // Nothing to demote when the assessment never reached Completed.
            other => Ok(Transition::stay(other)),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnverifyCascade {
    pub submission: Transition<SubmissionStatus>,
    pub assessment: Transition<AssessmentStatus>,
}

/// Composition of the two machines for the answer-unverified cascade:
/// clearing an answer's `verified` flag may demote its Approved submission to
/// Verifying, which in turn may demote a Completed assessment to
/// `Ans Pending Approval`. Both steps are pure; both are idempotent.
pub fn cascade_answer_unverified(
    submission: SubmissionStatus,
    assessment: AssessmentStatus,
) -> UnverifyCascade {
    let submission_step = submission_transition(submission, SubmissionEvent::AnswerUnverified)
        .unwrap_or(Transition::stay(submission));

    let assessment_step = if submission_step.changed {
        assessment_transition(assessment, AssessmentEvent::SubmissionDemoted)
            .unwrap_or(Transition::stay(assessment))
    } else {
        Transition::stay(assessment)
    };

    UnverifyCascade { submission: submission_step, assessment: assessment_step }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::{AssessmentStatus as A, SubmissionStatus as S};

    #[test]
    fn submission_happy_path() {
        let steps = [
            (S::Pending, SubmissionEvent::StartProcessing, S::Processing),
            (S::Processing, SubmissionEvent::GradingComplete, S::ReadyForVerification),
            (S::ReadyForVerification, SubmissionEvent::BeginVerification, S::Verifying),
            (S::Verifying, SubmissionEvent::Approve, S::Approved),
        ];

        for (from, event, expected) in steps {
            let transition = submission_transition(from, event).unwrap();
            assert_eq!(transition.next, expected);
            assert!(transition.changed);
        }

        let rejected = submission_transition(S::Verifying, SubmissionEvent::Reject).unwrap();
        assert_eq!(rejected.next, S::Rejected);
    }

    #[test]
    fn failed_is_reachable_from_in_flight_states_only() {
        for state in [S::Pending, S::Processing, S::ReadyForVerification, S::Verifying] {
            let transition = submission_transition(state, SubmissionEvent::Fail).unwrap();
            assert_eq!(transition.next, S::Failed);
        }

        // Idempotent on an already-failed submission.
        let again = submission_transition(S::Failed, SubmissionEvent::Fail).unwrap();
        assert!(!again.changed);

        assert!(submission_transition(S::Approved, SubmissionEvent::Fail).is_err());
        assert!(submission_transition(S::Rejected, SubmissionEvent::Fail).is_err());
    }

    #[test]
    fn failed_is_terminal() {
        for event in [
            SubmissionEvent::StartProcessing,
            SubmissionEvent::GradingComplete,
            SubmissionEvent::BeginVerification,
            SubmissionEvent::Approve,
            SubmissionEvent::Reject,
        ] {
            assert!(submission_transition(S::Failed, event).is_err(), "{event:?}");
        }
    }

    #[test]
    fn approve_requires_verifying() {
        for state in [S::Pending, S::Processing, S::ReadyForVerification, S::Rejected] {
            let err = submission_transition(state, SubmissionEvent::Approve).unwrap_err();
            assert_eq!(err.event, "Approve");
        }
    }

    #[test]
    fn answer_unverified_reverts_approved_and_is_otherwise_a_noop() {
        let demoted =
            submission_transition(S::Approved, SubmissionEvent::AnswerUnverified).unwrap();
        assert_eq!(demoted.next, S::Verifying);
        assert!(demoted.changed);

        let repeat =
            submission_transition(S::Verifying, SubmissionEvent::AnswerUnverified).unwrap();
        assert_eq!(repeat.next, S::Verifying);
        assert!(!repeat.changed);
    }

    #[test]
    fn concurrent_unverify_applies_the_demotion_exactly_once() {
        // Two answers of the same Approved submission unverified in a row:
        // the first call demotes, the second observes Verifying and no-ops.
        let first = cascade_answer_unverified(S::Approved, A::Completed);
        assert_eq!(first.submission.next, S::Verifying);
        assert!(first.submission.changed);
        assert_eq!(first.assessment.next, A::AnsPendingApproval);
        assert!(first.assessment.changed);

        let second = cascade_answer_unverified(first.submission.next, first.assessment.next);
        assert!(!second.submission.changed);
        assert!(!second.assessment.changed);
        assert_eq!(second.submission.next, S::Verifying);
        assert_eq!(second.assessment.next, A::AnsPendingApproval);
    }

    #[test]
    fn cascade_leaves_non_completed_assessment_alone() {
        let cascade = cascade_answer_unverified(S::Approved, A::AnsPendingApproval);
        assert!(cascade.submission.changed);
        assert!(!cascade.assessment.changed);
        assert_eq!(cascade.assessment.next, A::AnsPendingApproval);
    }

    #[test]
    fn assessment_happy_path() {
        let steps = [
            (A::ProcessingQues, AssessmentEvent::ExtractionSucceeded, A::QuesPendingApproval),
            (A::QuesPendingApproval, AssessmentEvent::ApproveQuestions, A::ReadyForGrading),
            (A::ReadyForGrading, AssessmentEvent::StartAnswerUpload, A::ProcessingAns),
            (A::ProcessingAns, AssessmentEvent::GradingBatchComplete, A::AnsPendingApproval),
            (A::AnsPendingApproval, AssessmentEvent::AllSubmissionsApproved, A::Completed),
        ];

        for (from, event, expected) in steps {
            let transition = assessment_transition(from, event).unwrap();
            assert_eq!(transition.next, expected, "{event:?}");
            assert!(transition.changed);
        }
    }

    #[test]
    fn re_extraction_is_allowed_from_editable_and_failed_states_only() {
        for state in [A::ProcessingQues, A::QuesPendingApproval, A::ReadyForGrading, A::ExtractionFailed]
        {
            let transition =
                assessment_transition(state, AssessmentEvent::StartExtraction).unwrap();
            assert_eq!(transition.next, A::ProcessingQues);
        }

        for state in [A::ProcessingAns, A::AnsPendingApproval, A::Completed, A::UploadFailed] {
            assert!(assessment_transition(state, AssessmentEvent::StartExtraction).is_err());
        }
    }

    #[test]
    fn failure_branches_come_from_their_in_flight_states() {
        let extraction =
            assessment_transition(A::ProcessingQues, AssessmentEvent::ExtractionFailed).unwrap();
        assert_eq!(extraction.next, A::ExtractionFailed);

        let upload =
            assessment_transition(A::ProcessingAns, AssessmentEvent::UploadFailed).unwrap();
        assert_eq!(upload.next, A::UploadFailed);

        assert!(assessment_transition(A::Completed, AssessmentEvent::UploadFailed).is_err());
        assert!(
            assessment_transition(A::ReadyForGrading, AssessmentEvent::ExtractionFailed).is_err()
        );
    }

    #[test]
    fn failure_applies_exactly_once() {
        // A second failure report against an already-failed assessment is
        // rejected rather than re-applied.
        assert!(
            assessment_transition(A::ExtractionFailed, AssessmentEvent::ExtractionFailed).is_err()
        );
        assert!(assessment_transition(A::UploadFailed, AssessmentEvent::UploadFailed).is_err());
    }

    #[test]
    fn upload_is_re_entrant_while_processing() {
        let transition =
            assessment_transition(A::ProcessingAns, AssessmentEvent::StartAnswerUpload).unwrap();
        assert_eq!(transition.next, A::ProcessingAns);
        assert!(!transition.changed);

        // A new upload after completion re-opens the answer phase.
        let reopened =
            assessment_transition(A::Completed, AssessmentEvent::StartAnswerUpload).unwrap();
        assert_eq!(reopened.next, A::ProcessingAns);
    }

    #[test]
    fn demotion_from_completed_reopens_pending_approval() {
        let demoted =
            assessment_transition(A::Completed, AssessmentEvent::SubmissionDemoted).unwrap();
        assert_eq!(demoted.next, A::AnsPendingApproval);
        assert!(demoted.changed);

        let repeat =
            assessment_transition(A::AnsPendingApproval, AssessmentEvent::SubmissionDemoted)
                .unwrap();
        assert!(!repeat.changed);
    }
}
