use serde_json::{Map, Value};

pub const FIELD_CORE_MOTIVATION: &str = "core_motivation";
pub const FIELD_DESIRED_OUTCOME: &str = "desired_outcome";
pub const FIELD_TIMELINE: &str = "timeline";
pub const FIELD_IS_DECISION_MAKER: &str = "is_decision_maker";

pub const DEFAULT_REQUIRED_FIELDS: [&str; 4] = [
    FIELD_CORE_MOTIVATION,
    FIELD_DESIRED_OUTCOME,
    FIELD_TIMELINE,
    FIELD_IS_DECISION_MAKER,
];

/// Free-form qualification facts recorded against a lead.
pub type QualificationBlob = Map<String, Value>;

/// A field counts as answered when its value is non-empty after trimming.
/// Booleans and numbers are always answers, `null` never is.
pub fn field_present(blob: &QualificationBlob, field: &str) -> bool {
    match blob.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => true,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(entries)) => !entries.is_empty(),
    }
}

pub fn missing_fields(blob: &QualificationBlob, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|field| !field_present(blob, field))
        .cloned()
        .collect()
}

/// Percentage of required fields present, rounded to the nearest integer.
pub fn completion_score(required: usize, missing: usize) -> u8 {
    if required == 0 {
        return 100;
    }
    let present = required.saturating_sub(missing) as f64;
    (present * 100.0 / required as f64).round().clamp(0.0, 100.0) as u8
}

/// Human readable name for a qualification key (`desired_outcome` -> `desired outcome`).
pub fn field_label(field: &str) -> String {
    field.replace('_', " ")
}
