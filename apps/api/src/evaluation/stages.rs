//! Stage descriptors, output contracts and the typed outputs each stage produces.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::evaluation::executor::StageAttempt;
use crate::evaluation::qualification::QualificationTag;
use crate::evaluation::validator::SoftDefect;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    ResumeAnalyzer,
    JobRequirements,
    AdvancedEvaluator,
    InterviewStrategist,
    QualityAssurance,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::ResumeAnalyzer,
        StageKind::JobRequirements,
        StageKind::AdvancedEvaluator,
        StageKind::InterviewStrategist,
        StageKind::QualityAssurance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageKind::ResumeAnalyzer => "ResumeAnalyzer",
            StageKind::JobRequirements => "JobRequirements",
            StageKind::AdvancedEvaluator => "AdvancedEvaluator",
            StageKind::InterviewStrategist => "InterviewStrategist",
            StageKind::QualityAssurance => "QualityAssurance",
        }
    }

    /// Position in the pipeline, 1–5.
    pub fn ordinal(self) -> u8 {
        match self {
            StageKind::ResumeAnalyzer => 1,
            StageKind::JobRequirements => 2,
            StageKind::AdvancedEvaluator => 3,
            StageKind::InterviewStrategist => 4,
            StageKind::QualityAssurance => 5,
        }
    }

    /// Infix used by per-stage environment overrides (`EVAL_<KEY>_MAX_RETRIES`).
    pub fn env_key(self) -> &'static str {
        match self {
            StageKind::ResumeAnalyzer => "RESUME_ANALYZER",
            StageKind::JobRequirements => "JOB_REQUIREMENTS",
            StageKind::AdvancedEvaluator => "ADVANCED_EVALUATOR",
            StageKind::InterviewStrategist => "INTERVIEW_STRATEGIST",
            StageKind::QualityAssurance => "QUALITY_ASSURANCE",
        }
    }

    pub fn required_inputs(self) -> &'static [&'static str] {
        match self {
            StageKind::ResumeAnalyzer => &["resume"],
            StageKind::JobRequirements => &["job_description"],
            StageKind::AdvancedEvaluator => &["resume", "requirements"],
            StageKind::InterviewStrategist => &["resume", "requirements", "evaluation"],
            StageKind::QualityAssurance => {
                &["resume", "requirements", "evaluation", "interview_plan"]
            }
        }
    }

    pub fn output_schema(self) -> &'static [FieldSpec] {
        match self {
            StageKind::ResumeAnalyzer => RESUME_SCHEMA,
            StageKind::JobRequirements => REQUIREMENTS_SCHEMA,
            StageKind::AdvancedEvaluator => EVALUATION_SCHEMA,
            StageKind::InterviewStrategist => INTERVIEW_SCHEMA,
            StageKind::QualityAssurance => REVIEW_SCHEMA,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output schema
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Boolean,
    /// Whole number; out-of-range values are clamped.
    Integer { min: i64, max: i64 },
    TextList,
    /// Objects checked field by field against `item`; keys not in `item` pass through.
    ObjectList { item: &'static [FieldSpec] },
    /// One of `allowed`; anything else becomes `fallback`.
    Enum {
        allowed: &'static [&'static str],
        fallback: &'static str,
    },
}

impl FieldKind {
    pub fn describe(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer { .. } => "number",
            FieldKind::TextList => "list of text",
            FieldKind::ObjectList { .. } => "list of objects",
            FieldKind::Enum { .. } => "enum literal",
        }
    }
}

/// One field of a stage's output contract. `path` is dot-separated for nested fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub path: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn req(path: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        path,
        kind,
        required: true,
    }
}

const fn opt(path: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        path,
        kind,
        required: false,
    }
}

const SCORE: FieldKind = FieldKind::Integer { min: 0, max: 100 };
const YEARS: FieldKind = FieldKind::Integer { min: 0, max: 60 };
const TAG: FieldKind = FieldKind::Enum {
    allowed: QualificationTag::LITERALS,
    fallback: QualificationTag::FALLBACK,
};

const EDUCATION_ITEM: &[FieldSpec] = &[
    opt("degree", FieldKind::Text),
    opt("institution", FieldKind::Text),
];

const WORK_HISTORY_ITEM: &[FieldSpec] = &[
    opt("company", FieldKind::Text),
    opt("title", FieldKind::Text),
    opt("start", FieldKind::Text),
    opt("end", FieldKind::Text),
];

const RESUME_SCHEMA: &[FieldSpec] = &[
    req("candidate_name", FieldKind::Text),
    opt("email", FieldKind::Text),
    opt("phone", FieldKind::Text),
    req("years_experience", YEARS),
    req("skills.technical", FieldKind::TextList),
    opt("skills.soft", FieldKind::TextList),
    opt("skills.domain", FieldKind::TextList),
    opt("education", FieldKind::ObjectList { item: EDUCATION_ITEM }),
    opt("work_history", FieldKind::ObjectList { item: WORK_HISTORY_ITEM }),
    opt("certifications", FieldKind::TextList),
];

const REQUIREMENTS_SCHEMA: &[FieldSpec] = &[
    req("job_title", FieldKind::Text),
    opt(
        "seniority",
        FieldKind::Enum {
            allowed: &["entry", "mid", "senior", "executive", "unspecified"],
            fallback: "unspecified",
        },
    ),
    opt("min_years_experience", YEARS),
    req("must_have_skills", FieldKind::TextList),
    opt("nice_to_have_skills", FieldKind::TextList),
    opt("responsibilities", FieldKind::TextList),
    opt("critical", FieldKind::TextList),
    opt("important", FieldKind::TextList),
    opt("preferred", FieldKind::TextList),
];

const EVALUATION_SCHEMA: &[FieldSpec] = &[
    req("candidate_name", FieldKind::Text),
    req("overall_score", SCORE),
    req("qualification_tag", TAG),
    req("category_scores.experience", SCORE),
    req("category_scores.skills", SCORE),
    req("category_scores.education", SCORE),
    req("category_scores.achievements", SCORE),
    req("category_scores.culture", SCORE),
    opt("strengths", FieldKind::TextList),
    opt("areas_of_concern", FieldKind::TextList),
    opt("recommendations", FieldKind::Text),
    opt("overqualification_signal", FieldKind::Boolean),
];

const INTERVIEW_SCHEMA: &[FieldSpec] = &[
    req("strategy", FieldKind::Text),
    req("technical_questions", FieldKind::TextList),
    req("behavioral_questions", FieldKind::TextList),
    opt("situational_questions", FieldKind::TextList),
    opt("cultural_fit_questions", FieldKind::TextList),
    opt("gap_assessment_questions", FieldKind::TextList),
    opt("interview_duration", FieldKind::Text),
    opt("panel_composition", FieldKind::Text),
    opt("evaluation_criteria", FieldKind::Text),
];

const REVIEW_SCHEMA: &[FieldSpec] = &[
    req("candidate_name", FieldKind::Text),
    req("overall_score", SCORE),
    req("qualification_tag", TAG),
    opt("strengths", FieldKind::TextList),
    opt("areas_of_concern", FieldKind::TextList),
    opt("recommendations", FieldKind::Text),
    opt("bias_flags", FieldKind::TextList),
];

// ────────────────────────────────────────────────────────────────────────────
// Stage descriptors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

/// Static descriptor for one stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub kind: StageKind,
    pub schema: &'static [FieldSpec],
    pub max_retries: u32,
    pub timeout: Duration,
}

impl StageSpec {
    pub fn new(kind: StageKind, limits: StageLimits) -> Self {
        Self {
            kind,
            schema: kind.output_schema(),
            max_retries: limits.max_retries.max(1),
            timeout: limits.timeout,
        }
    }
}

/// The five stage descriptors, indexed by ordinal.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    specs: Vec<StageSpec>,
}

impl StageCatalog {
    pub fn new(limits_for: impl Fn(StageKind) -> StageLimits) -> Self {
        Self {
            specs: StageKind::ALL
                .iter()
                .map(|&kind| StageSpec::new(kind, limits_for(kind)))
                .collect(),
        }
    }

    pub fn uniform(limits: StageLimits) -> Self {
        Self::new(|_| limits)
    }

    pub fn spec(&self, kind: StageKind) -> &StageSpec {
        &self.specs[usize::from(kind.ordinal() - 1)]
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::uniform(StageLimits::default())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Typed stage outputs
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillSet {
    #[serde(default)]
    pub technical: Vec<String>,
    #[serde(default)]
    pub soft: Vec<String>,
    #[serde(default)]
    pub domain: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EducationEntry {
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub grad_year: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkHistoryEntry {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeProfile {
    pub candidate_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub years_experience: u32,
    pub skills: SkillSet,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub work_history: Vec<WorkHistoryEntry>,
    #[serde(default)]
    pub certifications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequirements {
    pub job_title: String,
    #[serde(default = "unspecified")]
    pub seniority: String,
    #[serde(default)]
    pub min_years_experience: Option<u32>,
    pub must_have_skills: Vec<String>,
    #[serde(default)]
    pub nice_to_have_skills: Vec<String>,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub critical: Vec<String>,
    #[serde(default)]
    pub important: Vec<String>,
    #[serde(default)]
    pub preferred: Vec<String>,
}

fn unspecified() -> String {
    "unspecified".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub experience: u8,
    pub skills: u8,
    pub education: u8,
    pub achievements: u8,
    pub culture: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvaluation {
    pub candidate_name: String,
    pub overall_score: u8,
    pub qualification_tag: QualificationTag,
    pub category_scores: CategoryScores,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub areas_of_concern: Vec<String>,
    #[serde(default)]
    pub recommendations: Option<String>,
    #[serde(default)]
    pub overqualification_signal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterviewPlan {
    pub strategy: String,
    pub technical_questions: Vec<String>,
    pub behavioral_questions: Vec<String>,
    #[serde(default)]
    pub situational_questions: Vec<String>,
    #[serde(default)]
    pub cultural_fit_questions: Vec<String>,
    #[serde(default)]
    pub gap_assessment_questions: Vec<String>,
    #[serde(default)]
    pub interview_duration: Option<String>,
    #[serde(default)]
    pub panel_composition: Option<String>,
    #[serde(default)]
    pub evaluation_criteria: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReview {
    pub candidate_name: String,
    pub overall_score: u8,
    pub qualification_tag: QualificationTag,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub areas_of_concern: Vec<String>,
    #[serde(default)]
    pub recommendations: Option<String>,
    #[serde(default)]
    pub bias_flags: Vec<String>,
}

/// Typed output, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    Resume(ResumeProfile),
    Requirements(JobRequirements),
    Evaluation(CandidateEvaluation),
    Interview(InterviewPlan),
    Review(QualityReview),
}

impl StageOutput {
    /// Decodes an already-validated JSON value into the stage's typed output.
    pub fn decode(kind: StageKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            StageKind::ResumeAnalyzer => StageOutput::Resume(serde_json::from_value(value)?),
            StageKind::JobRequirements => {
                StageOutput::Requirements(serde_json::from_value(value)?)
            }
            StageKind::AdvancedEvaluator => {
                StageOutput::Evaluation(serde_json::from_value(value)?)
            }
            StageKind::InterviewStrategist => {
                StageOutput::Interview(serde_json::from_value(value)?)
            }
            StageKind::QualityAssurance => StageOutput::Review(serde_json::from_value(value)?),
        })
    }
}

/// Validated output of one stage. Recorded into a session behind an `Arc` and
/// never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub output: StageOutput,
    pub soft_defects: Vec<SoftDefect>,
    pub attempts: Vec<StageAttempt>,
    pub credential_id: String,
    pub produced_at: DateTime<Utc>,
}

impl StageResult {
    pub fn resume(&self) -> Option<&ResumeProfile> {
        match &self.output {
            StageOutput::Resume(r) => Some(r),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn requirements(&self) -> Option<&JobRequirements> {
        match &self.output {
            StageOutput::Requirements(r) => Some(r),
            _ => None,
        }
    }

    pub fn evaluation(&self) -> Option<&CandidateEvaluation> {
        match &self.output {
            StageOutput::Evaluation(e) => Some(e),
            _ => None,
        }
    }

    pub fn interview(&self) -> Option<&InterviewPlan> {
        match &self.output {
            StageOutput::Interview(i) => Some(i),
            _ => None,
        }
    }

    pub fn review(&self) -> Option<&QualityReview> {
        match &self.output {
            StageOutput::Review(r) => Some(r),
            _ => None,
        }
    }
}
