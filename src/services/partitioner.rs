//! Multi-student document partitioning: splits one combined answer-sheet
//! document into per-student page ranges and resolves each range to a roster
//! identity. Group-local problems are recorded on the group and never abort
//! sibling groups.

use std::collections::HashSet;

use serde::Serialize;

use crate::core::config::PartitionSettings;
use crate::db::models::Student;
use crate::providers::chain::ProviderChain;
use crate::providers::types::{AllProvidersFailed, PageHeader, RenderedPage};
use crate::services::identity::{self, IdentityResolution};

/// One contiguous page range attributed to a single student header tuple.
#[derive(Debug, Clone, Serialize)]
pub struct StudentGroup {
    /// Effective header of the group; `None` when not even an inherited
    /// header exists (a document whose first pages carry no header).
    pub header: Option<PageHeader>,
    pub page_numbers: Vec<i32>,
    /// Average effective-header confidence over the group's pages.
    pub confidence: f64,
    pub warnings: Vec<String>,
    /// Hard failure local to this group; set when the identifier is
    /// completely absent. Groups with an error are skipped by the fan-out.
    pub error: Option<String>,
    pub resolution: Option<IdentityResolution>,
}

/// Walks the document and asks the provider chain for a header tuple per
/// page, strictly in page order (adapters may rely on cross-page context, so
/// no parallelism here). Raises only when header detection itself is
/// impossible for a page (all providers failed).
pub async fn partition_document(
    chain: &ProviderChain,
    pages: &[RenderedPage],
    settings: &PartitionSettings,
) -> Result<Vec<StudentGroup>, AllProvidersFailed> {
    let mut headers = Vec::with_capacity(pages.len());
    for page in pages {
        let header = chain.detect_header(page).await?;
        headers.push((page.number, header));
    }

    Ok(group_pages(&headers, settings))
}

/// Pure grouping pass over detected headers.
///
/// Continuation rule (hard requirement, not a heuristic): a page with no
/// detectable header inherits the immediately preceding page's tuple. A new
/// group starts whenever the effective tuple's name or identifier differs
/// from the open group's; the final group closes at end of document.
pub fn group_pages(
    headers: &[(i32, Option<PageHeader>)],
    settings: &PartitionSettings,
) -> Vec<StudentGroup> {
    let mut groups: Vec<StudentGroup> = Vec::new();
    let mut open: Option<OpenGroup> = None;
    let mut previous_header: Option<PageHeader> = None;

    for (page_number, detected) in headers {
        let effective = match detected {
            Some(header) => {
                previous_header = Some(header.clone());
                Some(header.clone())
            }
            // Inherit the preceding page's tuple, confidence included.
            None => previous_header.clone(),
        };

        let starts_new_group = match (&open, &effective) {
            (None, _) => true,
            (Some(current), Some(header)) => !same_student(current.header.as_ref(), header),
            (Some(_), None) => false,
        };

        if starts_new_group {
            if let Some(finished) = open.take() {
                groups.push(finished.close(settings));
            }
            open = Some(OpenGroup { header: effective.clone(), pages: Vec::new() });
        }

        if let Some(current) = open.as_mut() {
            current.pages.push((*page_number, effective.as_ref().map_or(0.0, |h| h.confidence)));
        }
    }

    if let Some(finished) = open.take() {
        groups.push(finished.close(settings));
    }

    groups
}

/// Applies roster identity resolution to every group that survived
/// validation. `excluded` carries students already holding an Approved
/// submission for the current assessment.
pub fn resolve_groups(
    groups: Vec<StudentGroup>,
    roster: &[Student],
    excluded: &HashSet<String>,
) -> Vec<StudentGroup> {
    groups
        .into_iter()
        .map(|mut group| {
            if group.error.is_none() {
                if let Some(header) = &group.header {
                    group.resolution = Some(identity::resolve_identity(
                        header,
                        roster,
                        excluded,
                        group.confidence,
                    ));
                }
            }
            group
        })
        .collect()
}

struct OpenGroup {
    header: Option<PageHeader>,
    pages: Vec<(i32, f64)>,
}

impl OpenGroup {
    fn close(self, settings: &PartitionSettings) -> StudentGroup {
        let page_numbers: Vec<i32> = self.pages.iter().map(|(number, _)| *number).collect();
        let confidence = if self.pages.is_empty() {
            0.0
        } else {
            self.pages.iter().map(|(_, confidence)| confidence).sum::<f64>()
                / self.pages.len() as f64
        };

        let mut warnings = Vec::new();
        let page_count = page_numbers.len();
        if page_count < settings.min_pages_per_student
            || page_count > settings.max_pages_per_student
        {
            warnings.push(format!(
                "group spans {page_count} pages, outside the expected {}..={} range",
                settings.min_pages_per_student, settings.max_pages_per_student
            ));
        }
        if confidence < settings.min_group_confidence {
            warnings.push(format!(
                "average header confidence {confidence:.2} below threshold {:.2}",
                settings.min_group_confidence
            ));
        }

        let identifier_absent = self
            .header
            .as_ref()
            .and_then(|header| header.identifier.as_deref())
            .map_or(true, |identifier| identifier.trim().is_empty());

        let error = identifier_absent
            .then(|| "student identifier completely absent for this page range".to_string());

        StudentGroup {
            header: self.header,
            page_numbers,
            confidence,
            warnings,
            error,
            resolution: None,
        }
    }
}

fn same_student(current: Option<&PageHeader>, candidate: &PageHeader) -> bool {
    let Some(current) = current else {
        return false;
    };

    normalized(&current.name) == normalized(&candidate.name)
        && normalized(&current.identifier) == normalized(&candidate.identifier)
}

fn normalized(value: &Option<String>) -> Option<String> {
    value.as_deref().map(|v| v.trim().to_lowercase()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PartitionSettings;

    fn settings() -> PartitionSettings {
        PartitionSettings {
            min_pages_per_student: 1,
            max_pages_per_student: 4,
            min_group_confidence: 0.5,
        }
    }

    fn header(name: &str, identifier: &str, confidence: f64) -> PageHeader {
        PageHeader {
            name: Some(name.to_string()),
            identifier: Some(identifier.to_string()),
            roll_number: None,
            class_name: None,
            confidence,
        }
    }

    #[test]
    fn continuation_page_inherits_the_preceding_header() {
        let headers = vec![
            (1, Some(header("A", "STU-A", 0.9))),
            (2, None),
            (3, Some(header("B", "STU-B", 0.8))),
        ];

        let groups = group_pages(&headers, &settings());

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].page_numbers, vec![1, 2]);
        assert_eq!(groups[0].header.as_ref().unwrap().identifier.as_deref(), Some("STU-A"));
        assert_eq!(groups[1].page_numbers, vec![3]);
        assert_eq!(groups[1].header.as_ref().unwrap().identifier.as_deref(), Some("STU-B"));
    }

    #[test]
    fn identifier_change_starts_a_new_group_even_with_same_name() {
        let headers = vec![
            (1, Some(header("Twin", "STU-1", 0.9))),
            (2, Some(header("Twin", "STU-2", 0.9))),
        ];

        let groups = group_pages(&headers, &settings());

        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn repeated_identical_headers_stay_in_one_group() {
        let headers = vec![
            (1, Some(header("A", "STU-A", 0.9))),
            (2, Some(header("a ", "stu-a", 0.7))),
            (3, None),
        ];

        let groups = group_pages(&headers, &settings());

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].page_numbers, vec![1, 2, 3]);
    }

    #[test]
    fn group_confidence_averages_effective_headers() {
        let headers = vec![(1, Some(header("A", "STU-A", 0.9))), (2, None)];

        let groups = group_pages(&headers, &settings());

        // The inherited page carries the inherited confidence.
        assert!((groups[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_page_counts_warn_but_do_not_fail() {
        let headers: Vec<(i32, Option<PageHeader>)> = (1..=6)
            .map(|page| (page, (page == 1).then(|| header("A", "STU-A", 0.9))))
            .collect();

        let groups = group_pages(&headers, &settings());

        assert_eq!(groups.len(), 1);
        assert!(groups[0].error.is_none());
        assert!(groups[0].warnings.iter().any(|warning| warning.contains("6 pages")));
    }

    #[test]
    fn low_confidence_warns_but_does_not_fail() {
        let headers = vec![(1, Some(header("A", "STU-A", 0.2)))];

        let groups = group_pages(&headers, &settings());

        assert!(groups[0].error.is_none());
        assert!(groups[0].warnings.iter().any(|warning| warning.contains("confidence")));
    }

    #[test]
    fn absent_identifier_hard_fails_only_that_group() {
        let no_identifier = PageHeader {
            name: Some("Nameless Id".to_string()),
            identifier: None,
            roll_number: None,
            class_name: None,
            confidence: 0.9,
        };
        let headers = vec![
            (1, Some(no_identifier)),
            (2, Some(header("B", "STU-B", 0.9))),
        ];

        let groups = group_pages(&headers, &settings());

        assert_eq!(groups.len(), 2);
        assert!(groups[0].error.is_some());
        assert!(groups[1].error.is_none());
    }

    #[test]
    fn leading_headerless_pages_form_a_failed_group() {
        // The first page has no header to inherit; whether that is a provider
        // miss or a genuine continuation is unknowable here, so the group is
        // surfaced as failed rather than silently attached to a neighbour.
        let headers = vec![(1, None), (2, Some(header("A", "STU-A", 0.9)))];

        let groups = group_pages(&headers, &settings());

        assert_eq!(groups.len(), 2);
        assert!(groups[0].header.is_none());
        assert!(groups[0].error.is_some());
        assert_eq!(groups[1].page_numbers, vec![2]);
    }

    #[test]
    fn resolution_skips_failed_groups_and_resolves_the_rest() {
        use crate::core::time::primitive_now_utc;
        use crate::db::models::Student;

        let now = primitive_now_utc();
        let roster = vec![Student {
            id: "student-1".to_string(),
            organisation: "org-1".to_string(),
            student_identifier: "STU-A".to_string(),
            student_name: "A".to_string(),
            class_name: None,
            section: None,
            roll_number: None,
            contact_email: None,
            contact_phone: None,
            created_at: now,
            updated_at: now,
        }];

        let headers = vec![(1, None), (2, Some(header("A", "STU-A", 0.9)))];
        let groups = group_pages(&headers, &settings());
        let resolved = resolve_groups(groups, &roster, &HashSet::new());

        assert!(resolved[0].resolution.is_none());
        match resolved[1].resolution.as_ref().unwrap() {
            IdentityResolution::Existing { student_id, confidence } => {
                assert_eq!(student_id, "student-1");
                assert_eq!(*confidence, 1.0);
            }
            other => panic!("expected existing match, got {other:?}"),
        }
    }
}
