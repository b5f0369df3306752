use crate::domain::model::{DomainVocabulary, RawCandidate, ValidationConstraints};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Amount,
    Category,
    Type,
    Confidence,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Amount => "amount",
            Field::Category => "category",
            Field::Type => "type",
            Field::Confidence => "confidence",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub field: Field,
    pub message: String,
}

impl Violation {
    fn new(field: Field, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Every problem found in one record; empty means valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has_violation(&self, field: Field) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    pub(crate) fn extend(&mut self, other: ValidationReport) {
        self.violations.extend(other.violations);
    }

    fn push(&mut self, field: Field, message: impl Into<String>) {
        self.violations.push(Violation::new(field, message));
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Checks a parsed record against the vocabulary and numeric bounds.
///
/// All four fields are checked; one failure never hides another.
pub fn validate_prediction(
    raw: &RawCandidate,
    vocabulary: &DomainVocabulary,
    constraints: &ValidationConstraints,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    match raw.amount.as_ref() {
        None | Some(Value::Null) => report.push(Field::Amount, "Missing 'amount' field"),
        Some(Value::Number(n)) => {
            let amount = n.as_f64().unwrap_or(f64::NAN);
            if amount.is_nan() || amount < constraints.min_amount as f64 {
                report.push(
                    Field::Amount,
                    format!(
                        "'amount' ({}) is below minimum ({})",
                        n, constraints.min_amount
                    ),
                );
            } else if amount > constraints.max_amount as f64 {
                report.push(
                    Field::Amount,
                    format!(
                        "'amount' ({}) exceeds maximum ({})",
                        n, constraints.max_amount
                    ),
                );
            }
        }
        Some(other) => report.push(
            Field::Amount,
            format!("'amount' must be a number, got {}", json_type_name(other)),
        ),
    }

    match raw.category.as_ref() {
        None | Some(Value::Null) => report.push(Field::Category, "Missing 'category' field"),
        Some(Value::String(category)) => {
            if !vocabulary.accepts_category(category) {
                report.push(
                    Field::Category,
                    format!(
                        "Category '{}' is not in valid categories: {:?}",
                        category,
                        vocabulary.categories()
                    ),
                );
            }
        }
        Some(other) => report.push(
            Field::Category,
            format!("'category' must be a string, got {}", json_type_name(other)),
        ),
    }

    match raw.kind.as_ref() {
        None | Some(Value::Null) => report.push(Field::Type, "Missing 'type' field"),
        Some(Value::String(kind)) => {
            if !vocabulary.accepts_type(kind) {
                report.push(
                    Field::Type,
                    format!(
                        "Type '{}' is not in valid types: {:?}",
                        kind,
                        vocabulary.types()
                    ),
                );
            }
        }
        Some(other) => report.push(
            Field::Type,
            format!("'type' must be a string, got {}", json_type_name(other)),
        ),
    }

    match raw.confidence.as_ref() {
        None | Some(Value::Null) => report.push(Field::Confidence, "Missing 'confidence' field"),
        Some(Value::Number(n)) => {
            let confidence = n.as_f64().unwrap_or(f64::NAN);
            if confidence.is_nan() || confidence < constraints.confidence_min {
                report.push(
                    Field::Confidence,
                    format!(
                        "'confidence' ({}) is below minimum ({})",
                        n, constraints.confidence_min
                    ),
                );
            } else if confidence > constraints.confidence_max {
                report.push(
                    Field::Confidence,
                    format!(
                        "'confidence' ({}) exceeds maximum ({})",
                        n, constraints.confidence_max
                    ),
                );
            }
        }
        Some(other) => report.push(
            Field::Confidence,
            format!(
                "'confidence' must be a number, got {}",
                json_type_name(other)
            ),
        ),
    }

    report
}
