use crate::core::cleaner::clean_llm_output;
use crate::core::fixer::{coerce_unrepaired, create_fallback, fix_prediction};
use crate::core::validator::{json_type_name, validate_prediction, ValidationReport, Violation};
use crate::domain::model::{
    DomainVocabulary, MultiTransaction, Prediction, RawCandidate, RawEnvelope,
    TransactionCandidate, ValidationConstraints,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Recoverable failures while reading a model answer. Never leaves this
/// module: every variant ends as a fallback record.
#[derive(Error, Debug)]
pub enum PostprocessError {
    #[error("Model returned an empty answer")]
    EmptyOutput,

    #[error("Invalid JSON in model answer: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected a JSON object or array, got {0}")]
    UnexpectedShape(&'static str),

    #[error("Transaction list is empty")]
    EmptyTransactions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPayload {
    Single(RawCandidate),
    Multi(RawEnvelope),
}

/// Result of postprocessing one answer.
///
/// `report` lists what was wrong before repair; `parse_error` is set when the
/// answer could not be parsed and `prediction` is the fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessOutcome {
    pub prediction: Prediction,
    pub report: ValidationReport,
    pub parse_error: Option<String>,
}

/// Cleans and parses a model answer into a single record or a transaction list.
pub fn parse_json_response(raw_output: &str) -> Result<ParsedPayload, PostprocessError> {
    let cleaned = clean_llm_output(raw_output);
    if cleaned.is_empty() {
        return Err(PostprocessError::EmptyOutput);
    }

    let value: Value = serde_json::from_str(&cleaned)?;
    let is_envelope = value
        .as_object()
        .is_some_and(|map| map.contains_key("transactions"));

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(PostprocessError::EmptyTransactions);
            }
            let transactions = items
                .into_iter()
                .map(serde_json::from_value::<RawCandidate>)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ParsedPayload::Multi(RawEnvelope {
                transactions,
                ..RawEnvelope::default()
            }))
        }
        Value::Object(_) if is_envelope => {
            let envelope: RawEnvelope = serde_json::from_value(value)?;
            if envelope.transactions.is_empty() {
                return Err(PostprocessError::EmptyTransactions);
            }
            Ok(ParsedPayload::Multi(envelope))
        }
        Value::Object(_) => Ok(ParsedPayload::Single(serde_json::from_value(value)?)),
        other => Err(PostprocessError::UnexpectedShape(json_type_name(&other))),
    }
}

/// Full postprocessing of one raw model answer.
///
/// Parse failures become the fallback record. With `fix_invalid == false`
/// records come back unrepaired, with their violations in the report.
pub fn process_llm_response(
    raw_output: &str,
    vocabulary: &DomainVocabulary,
    constraints: &ValidationConstraints,
    fix_invalid: bool,
) -> PostprocessOutcome {
    let payload = match parse_json_response(raw_output) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("⚠️ 無法解析模型回應，改用 fallback: {}", e);
            return PostprocessOutcome {
                prediction: Prediction::Single(create_fallback(
                    raw_output,
                    vocabulary,
                    constraints,
                )),
                report: ValidationReport::default(),
                parse_error: Some(e.to_string()),
            };
        }
    };

    let (prediction, report) = match payload {
        ParsedPayload::Single(raw) => {
            let report = validate_prediction(&raw, vocabulary, constraints);
            let mut candidate = repair(&raw, vocabulary, constraints, fix_invalid);
            candidate.item = None;
            (Prediction::Single(candidate), report)
        }
        ParsedPayload::Multi(envelope) => {
            process_multi(&envelope, vocabulary, constraints, fix_invalid)
        }
    };

    if report.is_valid() {
        debug!("✅ 模型回應通過驗證");
    } else {
        warn!("⚠️ 驗證錯誤: {:?}", report.messages());
    }

    PostprocessOutcome {
        prediction,
        report,
        parse_error: None,
    }
}

fn repair(
    raw: &RawCandidate,
    vocabulary: &DomainVocabulary,
    constraints: &ValidationConstraints,
    fix_invalid: bool,
) -> TransactionCandidate {
    if fix_invalid {
        fix_prediction(raw, vocabulary, constraints)
    } else {
        coerce_unrepaired(raw)
    }
}

/// Each item is validated and repaired on its own; the envelope takes the
/// summed amount and the first item's category and type.
fn process_multi(
    envelope: &RawEnvelope,
    vocabulary: &DomainVocabulary,
    constraints: &ValidationConstraints,
    fix_invalid: bool,
) -> (Prediction, ValidationReport) {
    let mut report = ValidationReport::default();
    let mut items = Vec::with_capacity(envelope.transactions.len());

    for (index, raw) in envelope.transactions.iter().enumerate() {
        let item_report = validate_prediction(raw, vocabulary, constraints);
        report.extend(ValidationReport {
            violations: item_report
                .violations
                .into_iter()
                .map(|v| Violation {
                    field: v.field,
                    message: format!("transactions[{}]: {}", index, v.message),
                })
                .collect(),
        });
        items.push(repair(raw, vocabulary, constraints, fix_invalid));
    }

    if items.len() == 1 {
        let mut only = items.remove(0);
        only.item = None;
        return (Prediction::Single(only), report);
    }

    let amount = items
        .iter()
        .fold(0i64, |total, item| total.saturating_add(item.amount));
    let confidence = envelope
        .confidence
        .as_ref()
        .and_then(Value::as_f64)
        .map(|c| constraints.clamp_confidence(c))
        .unwrap_or_else(|| {
            items
                .iter()
                .map(|item| item.confidence)
                .fold(f64::INFINITY, f64::min)
        });

    let (category, kind) = match items.first() {
        Some(first) => (first.category.clone(), first.kind.clone()),
        None => (vocabulary.fallback_category().to_string(), String::new()),
    };

    debug!("🧾 多筆交易: {} 筆, 合計 {}", items.len(), amount);

    (
        Prediction::Multi(MultiTransaction {
            items,
            amount,
            category,
            kind,
            confidence,
        }),
        report,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::Field;

    fn english() -> DomainVocabulary {
        DomainVocabulary::new(
            vec!["Food".to_string(), "Other".to_string()],
            vec!["Income".to_string(), "Expense".to_string()],
            "Other",
        )
    }

    fn vietnamese() -> DomainVocabulary {
        DomainVocabulary::new(
            vec!["Ăn uống".to_string(), "Mua sắm".to_string()],
            vec!["Thu nhập".to_string(), "Chi phí".to_string()],
            "Khác",
        )
    }

    #[test]
    fn test_fenced_answer_with_unknown_category() {
        let raw = "```json\n{\"amount\": 50000, \"category\": \"Snacks\", \"type\": \"Expense\", \"confidence\": 0.9}\n```";
        let outcome =
            process_llm_response(raw, &english(), &ValidationConstraints::default(), true);

        assert!(outcome.parse_error.is_none());
        assert!(outcome.report.has_violation(Field::Category));
        assert!(english()
            .categories()
            .contains(&outcome.prediction.category().to_string()));
        assert_eq!(outcome.prediction.category(), "Food");
        assert_eq!(outcome.prediction.amount(), 50_000);
        assert_eq!(outcome.prediction.confidence(), 0.9);
    }

    #[test]
    fn test_prose_answer_becomes_fallback() {
        let raw = "Tôi không chắc về giao dịch này.";
        let outcome =
            process_llm_response(raw, &english(), &ValidationConstraints::default(), true);

        assert!(outcome.parse_error.is_some());
        assert!(outcome.prediction.is_fallback());
        assert_eq!(outcome.prediction.amount(), 0);
        assert_eq!(outcome.prediction.category(), "Other");
        assert_eq!(outcome.prediction.kind(), "Expense");
        assert_eq!(outcome.prediction.confidence(), 0.0);
    }

    #[test]
    fn test_two_items_are_summed() {
        let raw = r#"{"transactions": [
            {"item": "Kem", "amount": 50000, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.9},
            {"item": "Sữa chua", "amount": 42000, "category": "Đồ ăn vặt", "type": "Chi phí", "confidence": 0.8}
        ]}"#;
        let outcome =
            process_llm_response(raw, &vietnamese(), &ValidationConstraints::default(), true);

        let items = outcome.prediction.items().expect("multi prediction");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item.as_deref(), Some("Kem"));
        assert_eq!(items[1].category, "Ăn uống");
        assert_eq!(outcome.prediction.amount(), 92_000);
        assert_eq!(outcome.prediction.category(), "Ăn uống");
        assert_eq!(outcome.prediction.kind(), "Chi phí");
        assert_eq!(outcome.prediction.confidence(), 0.8);
        assert_eq!(outcome.report.violations.len(), 1);
        assert!(outcome.report.violations[0]
            .message
            .starts_with("transactions[1]: "));
    }

    #[test]
    fn test_envelope_confidence_wins_over_items() {
        let raw = r#"{"transactions": [
            {"amount": 1, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.9},
            {"amount": 2, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.9}
        ], "confidence": 1.7}"#;
        let outcome =
            process_llm_response(raw, &vietnamese(), &ValidationConstraints::default(), true);
        assert_eq!(outcome.prediction.confidence(), 1.0);
        assert_eq!(outcome.prediction.amount(), 3);
    }

    #[test]
    fn test_bare_array_is_multi() {
        let raw = r#"[{"amount": 10, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.6},
                      {"amount": 20, "category": "Mua sắm", "type": "Chi phí", "confidence": 0.7}]"#;
        match parse_json_response(raw).unwrap() {
            ParsedPayload::Multi(envelope) => assert_eq!(envelope.transactions.len(), 2),
            other => panic!("expected multi payload, got {:?}", other),
        }
    }

    #[test]
    fn test_single_item_collapses() {
        let raw = r#"{"transactions": [{"item": "Kem", "amount": 50000, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.9}]}"#;
        let outcome =
            process_llm_response(raw, &vietnamese(), &ValidationConstraints::default(), true);
        match outcome.prediction {
            Prediction::Single(candidate) => {
                assert_eq!(candidate.amount, 50_000);
                assert!(candidate.item.is_none());
            }
            other => panic!("expected single prediction, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_list_is_parse_failure() {
        assert!(matches!(
            parse_json_response(r#"{"transactions": []}"#),
            Err(PostprocessError::EmptyTransactions)
        ));
        assert!(matches!(
            parse_json_response("[]"),
            Err(PostprocessError::EmptyTransactions)
        ));

        let outcome = process_llm_response(
            r#"{"transactions": []}"#,
            &vietnamese(),
            &ValidationConstraints::default(),
            true,
        );
        assert!(outcome.prediction.is_fallback());
        assert_eq!(outcome.prediction.category(), "Khác");
    }

    #[test]
    fn test_parse_error_kinds() {
        assert!(matches!(
            parse_json_response("   "),
            Err(PostprocessError::EmptyOutput)
        ));
        assert!(matches!(
            parse_json_response("{\"amount\": }"),
            Err(PostprocessError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_json_response("\"just a string\""),
            Err(PostprocessError::UnexpectedShape("string"))
        ));
        // unknown keys are rejected at the parse boundary
        assert!(matches!(
            parse_json_response(r#"{"amount": 1, "note": "x"}"#),
            Err(PostprocessError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_unrepaired_mode_keeps_model_values() {
        let raw = r#"{"amount": 50000, "category": "Snacks", "type": "Expense", "confidence": 0.9}"#;
        let outcome =
            process_llm_response(raw, &english(), &ValidationConstraints::default(), false);

        assert!(!outcome.report.is_valid());
        assert_eq!(outcome.prediction.category(), "Snacks");
        assert!(!outcome.prediction.is_fallback());
    }

    #[test]
    fn test_unrepaired_mode_still_falls_back_on_garbage() {
        let outcome = process_llm_response(
            "not json",
            &english(),
            &ValidationConstraints::default(),
            false,
        );
        assert!(outcome.prediction.is_fallback());
    }
}
