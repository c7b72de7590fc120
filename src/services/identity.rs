//! Roster identity resolution for partitioned student groups. Strict
//! precedence, first match wins: exact identifier, then name similarity plus
//! roll-number equality within the same class, then a create-new proposal.

use std::collections::HashSet;

use serde::Serialize;

use crate::db::models::Student;
use crate::providers::types::PageHeader;

pub const EXACT_MATCH_CONFIDENCE: f64 = 1.0;
pub const NAME_ROLL_MATCH_CONFIDENCE: f64 = 0.85;
const NAME_OVERLAP_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct ProposedStudent {
    pub student_name: Option<String>,
    pub student_identifier: Option<String>,
    pub roll_number: Option<String>,
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityResolution {
    Existing { student_id: String, confidence: f64 },
    CreateNew { proposed: ProposedStudent, confidence: f64 },
}

impl IdentityResolution {
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Existing { confidence, .. } | Self::CreateNew { confidence, .. } => *confidence,
        }
    }
}

/// Resolves one group header against the organisation roster. `excluded`
/// holds students that already have an Approved submission for the current
/// assessment; matching onto them would set up a duplicate-approval conflict,
/// so they are never candidates. `fallback_confidence` is attached to a
/// create-new proposal (callers pass the group's average header confidence).
pub fn resolve_identity(
    header: &PageHeader,
    roster: &[Student],
    excluded: &HashSet<String>,
    fallback_confidence: f64,
) -> IdentityResolution {
    let candidates: Vec<&Student> =
        roster.iter().filter(|student| !excluded.contains(&student.id)).collect();

    if let Some(identifier) = header.identifier.as_deref().filter(|value| !value.trim().is_empty())
    {
        if let Some(student) = candidates
            .iter()
            .find(|student| student.student_identifier.eq_ignore_ascii_case(identifier.trim()))
        {
            return IdentityResolution::Existing {
                student_id: student.id.clone(),
                confidence: EXACT_MATCH_CONFIDENCE,
            };
        }
    }

    if let (Some(name), Some(roll)) = (header.name.as_deref(), header.roll_number.as_deref()) {
        if let Some(student) = candidates.iter().find(|student| {
            same_class(header.class_name.as_deref(), student.class_name.as_deref())
                && student
                    .roll_number
                    .as_deref()
                    .is_some_and(|candidate_roll| candidate_roll.trim() == roll.trim())
                && name_token_overlap(name, &student.student_name) >= NAME_OVERLAP_THRESHOLD
        }) {
            return IdentityResolution::Existing {
                student_id: student.id.clone(),
                confidence: NAME_ROLL_MATCH_CONFIDENCE,
            };
        }
    }

    IdentityResolution::CreateNew {
        proposed: ProposedStudent {
            student_name: header.name.clone(),
            student_identifier: header.identifier.clone(),
            roll_number: header.roll_number.clone(),
            class_name: header.class_name.clone(),
        },
        confidence: fallback_confidence,
    }
}

fn same_class(header_class: Option<&str>, student_class: Option<&str>) -> bool {
    match (header_class, student_class) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

/// Jaccard overlap over lowercased alphanumeric name tokens.
fn name_token_overlap(a: &str, b: &str) -> f64 {
    let tokens_a = tokens(a);
    let tokens_b = tokens(b);

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count() as f64;
    let union = tokens_a.union(&tokens_b).count() as f64;
    intersection / union
}

fn tokens(value: &str) -> HashSet<String> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn student(id: &str, identifier: &str, name: &str, class: &str, roll: &str) -> Student {
        let now = primitive_now_utc();
        Student {
            id: id.to_string(),
            organisation: "org-1".to_string(),
            student_identifier: identifier.to_string(),
            student_name: name.to_string(),
            class_name: Some(class.to_string()),
            section: None,
            roll_number: Some(roll.to_string()),
            contact_email: None,
            contact_phone: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn header(
        name: Option<&str>,
        identifier: Option<&str>,
        roll: Option<&str>,
        class: Option<&str>,
    ) -> PageHeader {
        PageHeader {
            name: name.map(str::to_string),
            identifier: identifier.map(str::to_string),
            roll_number: roll.map(str::to_string),
            class_name: class.map(str::to_string),
            confidence: 0.9,
        }
    }

    #[test]
    fn exact_identifier_match_wins_with_full_confidence() {
        let roster = vec![
            student("a", "STU-001", "Asha Rao", "10-A", "1"),
            student("b", "STU-002", "Ravi Kumar", "10-A", "2"),
        ];

        let resolved = resolve_identity(
            &header(Some("Completely Different"), Some("stu-002"), None, None),
            &roster,
            &HashSet::new(),
            0.5,
        );

        match resolved {
            IdentityResolution::Existing { student_id, confidence } => {
                assert_eq!(student_id, "b");
                assert_eq!(confidence, EXACT_MATCH_CONFIDENCE);
            }
            other => panic!("expected exact match, got {other:?}"),
        }
    }

    #[test]
    fn name_and_roll_match_is_second_precedence() {
        let roster = vec![student("a", "STU-001", "Asha K Rao", "10-A", "7")];

        let resolved = resolve_identity(
            &header(Some("Asha Rao"), Some("UNKNOWN-ID"), Some("7"), Some("10-A")),
            &roster,
            &HashSet::new(),
            0.5,
        );

        match resolved {
            IdentityResolution::Existing { student_id, confidence } => {
                assert_eq!(student_id, "a");
                assert_eq!(confidence, NAME_ROLL_MATCH_CONFIDENCE);
            }
            other => panic!("expected similarity match, got {other:?}"),
        }
    }

    #[test]
    fn name_match_requires_same_class_and_equal_roll() {
        let roster = vec![student("a", "STU-001", "Asha Rao", "10-A", "7")];

        // Wrong class.
        let resolved = resolve_identity(
            &header(Some("Asha Rao"), None, Some("7"), Some("10-B")),
            &roster,
            &HashSet::new(),
            0.4,
        );
        assert!(matches!(resolved, IdentityResolution::CreateNew { .. }));

        // Wrong roll number.
        let resolved = resolve_identity(
            &header(Some("Asha Rao"), None, Some("8"), Some("10-A")),
            &roster,
            &HashSet::new(),
            0.4,
        );
        assert!(matches!(resolved, IdentityResolution::CreateNew { .. }));
    }

    #[test]
    fn no_match_proposes_a_new_student_with_fallback_confidence() {
        let resolved = resolve_identity(
            &header(Some("New Student"), Some("STU-999"), Some("3"), Some("9-C")),
            &[],
            &HashSet::new(),
            0.72,
        );

        match resolved {
            IdentityResolution::CreateNew { proposed, confidence } => {
                assert_eq!(proposed.student_identifier.as_deref(), Some("STU-999"));
                assert_eq!(confidence, 0.72);
            }
            other => panic!("expected create-new, got {other:?}"),
        }
    }

    #[test]
    fn students_with_an_approved_submission_are_excluded_from_matching() {
        let roster = vec![student("a", "STU-001", "Asha Rao", "10-A", "7")];
        let excluded: HashSet<String> = ["a".to_string()].into_iter().collect();

        let resolved = resolve_identity(
            &header(Some("Asha Rao"), Some("STU-001"), Some("7"), Some("10-A")),
            &roster,
            &excluded,
            0.6,
        );

        assert!(matches!(resolved, IdentityResolution::CreateNew { .. }));
    }
}
