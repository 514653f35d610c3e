//! Qualification tag policy and candidate-name hygiene.
//!
//! The final tag is always derived from the final score; model-proposed tags
//! are advisory and get overwritten when they disagree.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualificationTag {
    #[serde(rename = "QUALIFIED")]
    Qualified,
    #[serde(rename = "NOT QUALIFIED")]
    NotQualified,
    #[serde(rename = "OVERQUALIFIED")]
    Overqualified,
}

impl QualificationTag {
    pub const LITERALS: &'static [&'static str] = &["QUALIFIED", "NOT QUALIFIED", "OVERQUALIFIED"];
    pub const FALLBACK: &'static str = "NOT QUALIFIED";

    pub fn as_str(self) -> &'static str {
        match self {
            QualificationTag::Qualified => "QUALIFIED",
            QualificationTag::NotQualified => "NOT QUALIFIED",
            QualificationTag::Overqualified => "OVERQUALIFIED",
        }
    }
}

impl fmt::Display for QualificationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score thresholds that decide the final tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualificationPolicy {
    /// Minimum score for QUALIFIED (inclusive).
    pub threshold: u8,
    /// Scores strictly above this, combined with the evaluator's explicit
    /// over-qualification signal, yield OVERQUALIFIED. `None` disables the tag.
    pub overqualification_ceiling: Option<u8>,
}

impl Default for QualificationPolicy {
    fn default() -> Self {
        Self {
            threshold: 75,
            overqualification_ceiling: Some(90),
        }
    }
}

impl QualificationPolicy {
    pub fn tag_for(&self, score: u8, overqualification_signal: bool) -> QualificationTag {
        if score < self.threshold {
            return QualificationTag::NotQualified;
        }
        match self.overqualification_ceiling {
            Some(ceiling) if overqualification_signal && score > ceiling => {
                QualificationTag::Overqualified
            }
            _ => QualificationTag::Qualified,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Candidate names
// ────────────────────────────────────────────────────────────────────────────

const PLACEHOLDER_NAMES: &[&str] = &[
    "john doe",
    "jane doe",
    "john smith",
    "jane smith",
    "[candidate name]",
    "candidate name",
    "actual_name_from_resume",
    "actual_name",
    "unknown",
    "candidate",
    "applicant",
    "test user",
    "sample candidate",
    "example candidate",
    "demo user",
    "n/a",
];

/// Lowercases and collapses runs of whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn names_match(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

pub fn is_placeholder_name(name: &str) -> bool {
    let normalized = normalize_name(name);
    normalized.is_empty() || PLACEHOLDER_NAMES.contains(&normalized.as_str())
}

/// `jane_q-public.txt` → `jane q public`.
pub fn name_from_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    };
    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive() {
        let policy = QualificationPolicy::default();
        assert_eq!(policy.tag_for(75, false), QualificationTag::Qualified);
        assert_eq!(policy.tag_for(74, false), QualificationTag::NotQualified);
    }

    #[test]
    fn test_overqualified_needs_signal_and_ceiling() {
        let policy = QualificationPolicy::default();
        assert_eq!(policy.tag_for(95, false), QualificationTag::Qualified);
        assert_eq!(policy.tag_for(90, true), QualificationTag::Qualified);
        assert_eq!(policy.tag_for(91, true), QualificationTag::Overqualified);
    }

    #[test]
    fn test_signal_below_threshold_is_not_qualified() {
        let policy = QualificationPolicy::default();
        assert_eq!(policy.tag_for(40, true), QualificationTag::NotQualified);
    }

    #[test]
    fn test_disabled_ceiling_never_overqualifies() {
        let policy = QualificationPolicy {
            threshold: 75,
            overqualification_ceiling: None,
        };
        assert_eq!(policy.tag_for(100, true), QualificationTag::Qualified);
    }

    #[test]
    fn test_tag_serde_uses_spaced_literals() {
        let json = serde_json::to_string(&QualificationTag::NotQualified).unwrap();
        assert_eq!(json, r#""NOT QUALIFIED""#);
        let tag: QualificationTag = serde_json::from_str(r#""OVERQUALIFIED""#).unwrap();
        assert_eq!(tag, QualificationTag::Overqualified);
    }

    #[test]
    fn test_names_match_ignores_case_and_spacing() {
        assert!(names_match("Ada  Lovelace", " ada lovelace"));
        assert!(!names_match("Ada Lovelace", "Ada King"));
    }

    #[test]
    fn test_placeholder_names() {
        assert!(is_placeholder_name("John Doe"));
        assert!(is_placeholder_name("  UNKNOWN "));
        assert!(is_placeholder_name(""));
        assert!(!is_placeholder_name("Grace Hopper"));
    }

    #[test]
    fn test_name_from_filename() {
        assert_eq!(name_from_filename("grace_hopper-resume.pdf"), "grace hopper resume");
        assert_eq!(name_from_filename("uploads/ada_lovelace.txt"), "ada lovelace");
        assert_eq!(name_from_filename("noext"), "noext");
    }
}
