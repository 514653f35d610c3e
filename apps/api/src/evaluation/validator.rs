//! Contract Validator: turns raw model text into a schema-conforming JSON value.
//!
//! Hard defects (unparseable output, missing required fields, wrong types) reject
//! the attempt. Soft defects (out-of-range numbers, unknown enum literals,
//! fractional integers, numbers where text belongs) are corrected in place and
//! reported for audit. Null optional fields are dropped so the typed output
//! falls back to its defaults.
//! The validator is pure: identical input always yields identical output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::evaluation::stages::{FieldKind, FieldSpec};

// ────────────────────────────────────────────────────────────────────────────
// Defect types
// ────────────────────────────────────────────────────────────────────────────

/// A correction applied to a stage output instead of rejecting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SoftDefect {
    Clamped {
        field: String,
        original: f64,
        clamped: i64,
    },
    Rounded {
        field: String,
        original: f64,
        rounded: i64,
    },
    UnknownEnumValue {
        field: String,
        original: String,
        fallback: String,
    },
    /// A number or boolean where text was expected, kept as its text form.
    Stringified { field: String, original: String },
    /// A later stage disagreed with the resume's candidate name; the resume's value was kept.
    NameReconciled {
        field: String,
        proposed: String,
        kept: String,
    },
    /// The resume analyzer returned a placeholder; the filename-derived name replaced it.
    PlaceholderName {
        field: String,
        original: String,
        replacement: String,
    },
    /// The proposed tag contradicted the final score and was recomputed.
    TagRecomputed {
        field: String,
        proposed: String,
        recomputed: String,
    },
}

impl SoftDefect {
    pub fn field(&self) -> &str {
        match self {
            SoftDefect::Clamped { field, .. }
            | SoftDefect::Rounded { field, .. }
            | SoftDefect::UnknownEnumValue { field, .. }
            | SoftDefect::Stringified { field, .. }
            | SoftDefect::NameReconciled { field, .. }
            | SoftDefect::PlaceholderName { field, .. }
            | SoftDefect::TagRecomputed { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HardDefect {
    Unparseable,
    Missing { field: String },
    Malformed { field: String, expected: String },
}

/// The attempt's output cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub defects: Vec<HardDefect>,
}

impl SchemaViolation {
    pub fn unparseable() -> Self {
        Self {
            defects: vec![HardDefect::Unparseable],
        }
    }

    /// The value passed every field check but still did not fit the typed output.
    pub fn undecodable(error: &serde_json::Error) -> Self {
        let message = error.to_string();
        let field = message
            .split('`')
            .nth(1)
            .filter(|name| !name.is_empty())
            .unwrap_or("output")
            .to_string();
        Self {
            defects: vec![HardDefect::Malformed {
                field,
                expected: format!("decodable ({message})"),
            }],
        }
    }

    pub fn is_unparseable(&self) -> bool {
        self.defects.iter().any(|d| matches!(d, HardDefect::Unparseable))
    }

    /// Names of missing or malformed fields, in schema order.
    pub fn field_names(&self) -> Vec<String> {
        self.defects
            .iter()
            .filter_map(|d| match d {
                HardDefect::Unparseable => None,
                HardDefect::Missing { field } | HardDefect::Malformed { field, .. } => {
                    Some(field.clone())
                }
            })
            .collect()
    }

    /// Note appended to the next attempt's prompt so the model can fix its output.
    pub fn correction_note(&self) -> String {
        if self.is_unparseable() {
            return "Your previous response was not a valid JSON object. \
                    Respond with exactly one JSON object and nothing else."
                .to_string();
        }
        let details = self
            .defects
            .iter()
            .filter_map(|d| match d {
                HardDefect::Missing { field } => Some(format!("`{field}` is missing")),
                HardDefect::Malformed { field, expected } => {
                    Some(format!("`{field}` must be {expected}"))
                }
                HardDefect::Unparseable => None,
            })
            .collect::<Vec<_>>()
            .join("; ");
        format!("Your previous response was rejected: {details}. Return the complete JSON object with these fields corrected.")
    }
}

/// Schema-conforming JSON plus the corrections made to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOutput {
    pub value: Value,
    pub soft_defects: Vec<SoftDefect>,
}

// ────────────────────────────────────────────────────────────────────────────
// Decoding
// ────────────────────────────────────────────────────────────────────────────

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start()),
        None => text,
    }
}

/// Returns the first balanced top-level `{...}` in `text`, ignoring braces inside strings.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn decode_object(raw: &str) -> Option<Value> {
    let text = strip_json_fences(raw);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    let candidate = first_json_object(text)?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────────────

/// Validates `raw` against `schema`.
pub fn validate(schema: &[FieldSpec], raw: &str) -> Result<ValidatedOutput, SchemaViolation> {
    let mut value = decode_object(raw).ok_or_else(SchemaViolation::unparseable)?;
    let mut report = Report::default();
    check_object(&mut value, schema, "", &mut report);

    if report.hard.is_empty() {
        Ok(ValidatedOutput {
            value,
            soft_defects: report.soft,
        })
    } else {
        Err(SchemaViolation {
            defects: report.hard,
        })
    }
}

#[derive(Default)]
struct Report {
    hard: Vec<HardDefect>,
    soft: Vec<SoftDefect>,
}

/// Checks `schema` against `object` in place. `prefix` is prepended to field
/// paths in defects, e.g. `work_history[2].`.
fn check_object(object: &mut Value, schema: &[FieldSpec], prefix: &str, report: &mut Report) {
    for field in schema {
        let path = format!("{prefix}{}", field.path);
        let current = lookup(object, field.path).filter(|v| !v.is_null()).cloned();
        let Some(current) = current else {
            if field.required {
                report.hard.push(HardDefect::Missing { field: path });
            } else if matches!(field.kind, FieldKind::TextList | FieldKind::ObjectList { .. }) {
                assign(object, field.path, Value::Array(Vec::new()));
            } else {
                remove(object, field.path);
            }
            continue;
        };

        match check_field(&path, field.kind, current, report) {
            Ok(Some(normalized)) => assign(object, field.path, normalized),
            Ok(None) => {}
            Err(defect) => report.hard.push(defect),
        }
    }
}

/// Checks one present, non-null field. `Ok(Some(v))` means the value was rewritten.
fn check_field(
    path: &str,
    kind: FieldKind,
    current: Value,
    report: &mut Report,
) -> Result<Option<Value>, HardDefect> {
    let malformed = || HardDefect::Malformed {
        field: path.to_string(),
        expected: kind.describe().to_string(),
    };

    match kind {
        FieldKind::Text => match current {
            Value::String(_) => Ok(None),
            Value::Number(_) | Value::Bool(_) => {
                let text = current.to_string();
                report.soft.push(SoftDefect::Stringified {
                    field: path.to_string(),
                    original: text.clone(),
                });
                Ok(Some(Value::String(text)))
            }
            _ => Err(malformed()),
        },
        FieldKind::Boolean => current.is_boolean().then_some(None).ok_or_else(malformed),
        FieldKind::TextList => match &current {
            Value::Array(items) if items.iter().all(Value::is_string) => Ok(None),
            _ => Err(malformed()),
        },
        FieldKind::ObjectList { item } => {
            let Value::Array(mut items) = current else {
                return Err(malformed());
            };
            if !items.iter().all(Value::is_object) {
                return Err(malformed());
            }
            for (index, entry) in items.iter_mut().enumerate() {
                check_object(entry, item, &format!("{path}[{index}]."), report);
            }
            Ok(Some(Value::Array(items)))
        }
        FieldKind::Integer { min, max } => {
            let number = current.as_f64().ok_or_else(malformed)?;
            let mut whole = number.round() as i64;
            if number.fract() != 0.0 {
                report.soft.push(SoftDefect::Rounded {
                    field: path.to_string(),
                    original: number,
                    rounded: whole,
                });
            }
            if whole < min || whole > max {
                let clamped = whole.clamp(min, max);
                report.soft.push(SoftDefect::Clamped {
                    field: path.to_string(),
                    original: number,
                    clamped,
                });
                whole = clamped;
            }
            let normalized = Value::from(whole);
            Ok((normalized != current).then_some(normalized))
        }
        FieldKind::Enum { allowed, fallback } => {
            let literal = current.as_str().ok_or_else(malformed)?;
            let wanted = canonical_literal(literal);
            let matched = allowed
                .iter()
                .find(|candidate| canonical_literal(candidate) == wanted);
            match matched {
                Some(&canonical) if canonical == literal => Ok(None),
                Some(&canonical) => Ok(Some(Value::from(canonical))),
                None => {
                    report.soft.push(SoftDefect::UnknownEnumValue {
                        field: path.to_string(),
                        original: literal.to_string(),
                        fallback: fallback.to_string(),
                    });
                    Ok(Some(Value::from(fallback)))
                }
            }
        }
    }
}

/// `not_qualified`, ` Not Qualified ` and `NOT QUALIFIED` all compare equal.
fn canonical_literal(literal: &str) -> String {
    literal
        .replace(['_', '-'], " ")
        .split_whitespace()
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |node, key| node.get(key))
}

/// Deletes the key at `path` if its parent object exists.
fn remove(value: &mut Value, path: &str) {
    let (parent, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (
            parent
                .split('.')
                .try_fold(value, |node, segment| node.get_mut(segment)),
            key,
        ),
        None => (Some(value), path),
    };
    if let Some(Value::Object(map)) = parent {
        map.remove(key);
    }
}

/// Writes `new` at `path`, creating intermediate objects as needed.
fn assign(value: &mut Value, path: &str, new: Value) {
    let mut node = value;
    let mut keys = path.split('.').peekable();
    while let Some(key) = keys.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if keys.peek().is_none() {
            map.insert(key.to_string(), new);
            return;
        }
        node = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
