//! Derived-score reconciliation. Totals, percentage and rank are computed on
//! read from the authoritative `Answer` rows; nothing here is ever written
//! back, so an edit to a single answer is reflected everywhere with no
//! invalidation step.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;

use crate::core::errors::PipelineError;
use crate::db::models::Answer;
use crate::repositories;

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub submission_id: String,
    pub student_id: Option<String>,
    pub total_marks_obtained: f64,
    pub total_marks: f64,
    pub percentage: f64,
    pub answered_questions: usize,
    pub verified_answers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedSubmission {
    pub submission_id: String,
    pub student_id: Option<String>,
    pub total_marks_obtained: f64,
    pub percentage: f64,
    pub rank: u32,
}

pub fn total_marks_obtained(answers: &[Answer]) -> f64 {
    answers.iter().map(|answer| answer.marks_obtained).sum()
}

/// `sum(marks) / total_marks * 100`, rounded to two decimals; 0 when the
/// assessment carries no marks.
pub fn percentage(marks_obtained: f64, total_marks: f64) -> f64 {
    if total_marks == 0.0 {
        return 0.0;
    }

    round2(marks_obtained / total_marks * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Standard competition ranking over `(key, percentage)` pairs: ties share a
/// rank and the next distinct score skips by the tie count (1, 1, 3).
pub fn competition_ranks(scores: &[(String, f64)]) -> Vec<(String, u32)> {
    let mut ordered: Vec<(String, f64)> = scores.to_vec();
    ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranked = Vec::with_capacity(ordered.len());
    let mut current_rank = 0u32;
    let mut previous_score: Option<f64> = None;

    for (position, (key, score)) in ordered.into_iter().enumerate() {
        if previous_score != Some(score) {
            current_rank = position as u32 + 1;
            previous_score = Some(score);
        }
        ranked.push((key, current_rank));
    }

    ranked
}

/// Report for one submission, derived entirely on read.
pub async fn submission_report(
    pool: &PgPool,
    submission_id: &str,
) -> Result<SubmissionReport, PipelineError> {
    let submission = repositories::submissions::find_by_id(pool, submission_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("submission", submission_id))?;
    let assessment = repositories::assessments::find_by_id(pool, &submission.assessment_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("assessment", &submission.assessment_id))?;

    let answers = repositories::answers::list_by_submission(pool, submission_id).await?;
    let obtained = total_marks_obtained(&answers);

    Ok(SubmissionReport {
        submission_id: submission.id,
        student_id: submission.student_id,
        total_marks_obtained: obtained,
        total_marks: assessment.total_marks,
        percentage: percentage(obtained, assessment.total_marks),
        answered_questions: answers.len(),
        verified_answers: answers.iter().filter(|answer| answer.verified).count(),
    })
}

/// Class ranking over all Approved submissions of an assessment.
pub async fn assessment_ranking(
    pool: &PgPool,
    assessment_id: &str,
) -> Result<Vec<RankedSubmission>, PipelineError> {
    let assessment = repositories::assessments::find_by_id(pool, assessment_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("assessment", assessment_id))?;

    let approved = repositories::submissions::list_approved_by_assessment(pool, assessment_id).await?;
    let submission_ids: Vec<String> =
        approved.iter().map(|submission| submission.id.clone()).collect();
    let answers = repositories::answers::list_for_submissions(pool, &submission_ids).await?;

    let mut totals: HashMap<&str, f64> = HashMap::new();
    for answer in &answers {
        *totals.entry(answer.submission_id.as_str()).or_default() += answer.marks_obtained;
    }

    let scores: Vec<(String, f64)> = approved
        .iter()
        .map(|submission| {
            let obtained = totals.get(submission.id.as_str()).copied().unwrap_or(0.0);
            (submission.id.clone(), percentage(obtained, assessment.total_marks))
        })
        .collect();

    let ranks: HashMap<String, u32> = competition_ranks(&scores).into_iter().collect();

    let mut ranked: Vec<RankedSubmission> = approved
        .into_iter()
        .map(|submission| {
            let obtained = totals.get(submission.id.as_str()).copied().unwrap_or(0.0);
            let pct = percentage(obtained, assessment.total_marks);
            RankedSubmission {
                rank: ranks.get(&submission.id).copied().unwrap_or(0),
                submission_id: submission.id,
                student_id: submission.student_id,
                total_marks_obtained: obtained,
                percentage: pct,
            }
        })
        .collect();

    ranked.sort_by_key(|entry| entry.rank);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn answer(marks: f64) -> Answer {
        let now = primitive_now_utc();
        Answer {
            id: uuid::Uuid::new_v4().to_string(),
            submission_id: "sub-1".to_string(),
            question_id: uuid::Uuid::new_v4().to_string(),
            marks_obtained: marks,
            ai_explanation: None,
            user_feedback: None,
            page_number: 1,
            verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn totals_follow_answer_rows_with_no_recompute_step() {
        let mut answers = vec![answer(2.0), answer(3.5), answer(0.0)];
        assert_eq!(total_marks_obtained(&answers), 5.5);

        // A later edit to one answer is reflected by the same read.
        answers[2].marks_obtained = 4.0;
        assert_eq!(total_marks_obtained(&answers), 9.5);
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(1.0, 3.0), 33.33);
        assert_eq!(percentage(2.0, 3.0), 66.67);
        assert_eq!(percentage(50.0, 50.0), 100.0);
    }

    #[test]
    fn percentage_is_zero_when_assessment_has_no_marks() {
        assert_eq!(percentage(5.0, 0.0), 0.0);
    }

    #[test]
    fn ties_share_a_rank_and_the_next_score_skips() {
        let scores = vec![
            ("s1".to_string(), 90.0),
            ("s2".to_string(), 90.0),
            ("s3".to_string(), 85.0),
        ];

        let ranks: HashMap<String, u32> = competition_ranks(&scores).into_iter().collect();

        assert_eq!(ranks["s1"], 1);
        assert_eq!(ranks["s2"], 1);
        // Skip-after-tie: tied_rank + 2.
        assert_eq!(ranks["s3"], 3);
    }

    #[test]
    fn distinct_scores_rank_densely() {
        let scores = vec![
            ("s1".to_string(), 70.0),
            ("s2".to_string(), 80.0),
            ("s3".to_string(), 60.0),
        ];

        let ranks: HashMap<String, u32> = competition_ranks(&scores).into_iter().collect();

        assert_eq!(ranks["s2"], 1);
        assert_eq!(ranks["s1"], 2);
        assert_eq!(ranks["s3"], 3);
    }

    #[test]
    fn empty_score_set_yields_no_ranks() {
        assert!(competition_ranks(&[]).is_empty());
    }
}
