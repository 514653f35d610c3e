//! Prompts for the five analysis stages.
//!
//! The field list in each user prompt is generated from the stage's output
//! schema, so the model is asked for exactly what the validator checks.

use serde_json::Value;

use crate::evaluation::qualification::QualificationPolicy;
use crate::evaluation::stages::{FieldKind, StageKind};
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;

/// System and user messages for one stage call.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

fn persona(stage: StageKind) -> &'static str {
    match stage {
        StageKind::ResumeAnalyzer => {
            "You are a senior HR analyst. You extract facts from resumes without \
             inferring, expanding or inventing anything."
        }
        StageKind::JobRequirements => {
            "You are a job analysis specialist. You break job descriptions into \
             measurable requirements and separate hard requirements from preferences."
        }
        StageKind::AdvancedEvaluator => {
            "You are a senior talent evaluation specialist. You score candidates \
             conservatively and consistently using only the structured inputs provided."
        }
        StageKind::InterviewStrategist => {
            "You are an interview design expert. You build questions that validate \
             skills and examine the risks identified in an evaluation."
        }
        StageKind::QualityAssurance => {
            "You are a quality assurance reviewer for candidate evaluations. You check \
             scores and tags for consistency and remove non-job-related or biased language."
        }
    }
}

fn instructions(stage: StageKind, policy: &QualificationPolicy) -> String {
    match stage {
        StageKind::ResumeAnalyzer => "Use the real name from the resume header or contact block. \
             Never use a placeholder such as \"John Doe\". Count years of experience \
             conservatively. Prefer empty lists over guesses."
            .to_string(),
        StageKind::JobRequirements => "Critical lists eligibility requirements, important lists \
             strongly weighted ones, preferred lists nice-to-haves. Do not infer unstated \
             years of experience."
            .to_string(),
        StageKind::AdvancedEvaluator => format!(
            "Score each category from 0 to 100. {} Set overqualification_signal to true only \
             when the evidence substantially exceeds the level of the role. Never reference \
             protected attributes.",
            tag_rule(policy)
        ),
        StageKind::InterviewStrategist => "Derive every question from the role's critical \
             requirements or the evaluation's areas of concern. No trivia and no generic openers."
            .to_string(),
        StageKind::QualityAssurance => format!(
            "Keep the candidate's real name. Adjust the overall score only to correct \
             inconsistencies. {}",
            tag_rule(policy)
        ),
    }
}

fn tag_rule(policy: &QualificationPolicy) -> String {
    let mut rule = format!(
        "Tag QUALIFIED when the overall score is at least {}, otherwise NOT QUALIFIED.",
        policy.threshold
    );
    if let Some(ceiling) = policy.overqualification_ceiling {
        rule.push_str(&format!(
            " Tag OVERQUALIFIED only when the score is above {ceiling} and the candidate \
             clearly exceeds the level of the role."
        ));
    }
    rule
}

fn input_heading(key: &str) -> &'static str {
    match key {
        "resume" => "RESUME",
        "job_description" => "JOB DESCRIPTION",
        "requirements" => "JOB REQUIREMENTS",
        "evaluation" => "EVALUATION",
        "interview_plan" => "INTERVIEW PLAN",
        _ => "INPUT",
    }
}

fn describe_field(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Integer { min, max } => format!("integer {min}-{max}"),
        FieldKind::Enum { allowed, .. } => format!("one of {}", allowed.join(" | ")),
        FieldKind::ObjectList { item } => format!(
            "list of objects with {}",
            item.iter().map(|f| f.path).collect::<Vec<_>>().join(", ")
        ),
        other => other.describe().to_string(),
    }
}

/// Builds the messages for `stage` from its input context.
pub fn render(
    stage: StageKind,
    context: &Value,
    correction: Option<&str>,
    policy: &QualificationPolicy,
) -> RenderedPrompt {
    let system = format!("{} {}", persona(stage), JSON_ONLY_SYSTEM);

    let mut user = String::new();
    for key in stage.required_inputs() {
        let body = match context.get(*key) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => serde_json::to_string_pretty(other).unwrap_or_default(),
            None => String::new(),
        };
        user.push_str(&format!("{}:\n{}\n\n", input_heading(key), body));
    }

    user.push_str(&instructions(stage, policy));
    user.push_str("\n\nReturn one JSON object with these fields (dots denote nesting):\n");
    for field in stage.output_schema() {
        let presence = if field.required { "required" } else { "optional" };
        user.push_str(&format!(
            "- {} ({}, {})\n",
            field.path,
            describe_field(&field.kind),
            presence
        ));
    }

    if let Some(note) = correction {
        user.push('\n');
        user.push_str(note);
        user.push('\n');
    }

    RenderedPrompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_lists_schema_fields() {
        let prompt = render(
            StageKind::AdvancedEvaluator,
            &json!({ "resume": { "candidate_name": "Ada" }, "requirements": { "job_title": "SRE" } }),
            None,
            &QualificationPolicy::default(),
        );
        assert!(prompt.user.starts_with("RESUME:"));
        assert!(prompt.user.contains("JOB REQUIREMENTS:"));
        assert!(prompt.user.contains("- overall_score (integer 0-100, required)"));
        assert!(prompt
            .user
            .contains("- qualification_tag (one of QUALIFIED | NOT QUALIFIED | OVERQUALIFIED, required)"));
        assert!(prompt.system.contains("JSON"));
    }

    #[test]
    fn test_render_passes_text_inputs_verbatim_and_appends_correction() {
        let prompt = render(
            StageKind::ResumeAnalyzer,
            &json!({ "resume": "5 years Python, BS CS" }),
            Some("`years_experience` is missing"),
            &QualificationPolicy::default(),
        );
        assert!(prompt.user.contains("RESUME:\n5 years Python, BS CS\n"));
        assert!(prompt.user.trim_end().ends_with("`years_experience` is missing"));
    }

    #[test]
    fn test_tag_rule_follows_configured_policy() {
        let policy = QualificationPolicy {
            threshold: 60,
            overqualification_ceiling: Some(95),
        };
        let context = json!({ "resume": {}, "requirements": {} });
        let prompt = render(StageKind::AdvancedEvaluator, &context, None, &policy);
        assert!(prompt.user.contains("at least 60"));
        assert!(prompt.user.contains("above 95"));
        assert!(!prompt.user.contains("at least 75"));

        let without_ceiling = QualificationPolicy {
            threshold: 80,
            overqualification_ceiling: None,
        };
        let prompt = render(StageKind::QualityAssurance, &json!({}), None, &without_ceiling);
        assert!(prompt.user.contains("at least 80"));
        assert!(!prompt.user.contains("OVERQUALIFIED only"));
    }

    #[test]
    fn test_object_lists_name_their_item_fields() {
        let prompt = render(
            StageKind::ResumeAnalyzer,
            &json!({ "resume": "text" }),
            None,
            &QualificationPolicy::default(),
        );
        assert!(prompt
            .user
            .contains("- work_history (list of objects with company, title, start, end, optional)"));
    }
}
