use crate::utils::error::{ExtractError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catch-all category ("Other").
pub const DEFAULT_FALLBACK_CATEGORY: &str = "Khác";
/// Type used when nothing better can be inferred.
pub const DEFAULT_EXPENSE_TYPE: &str = "Chi phí";
pub const MAX_TEXT_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    /// Canonical Vietnamese label.
    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::Income => "Thu nhập",
            TransactionKind::Expense => DEFAULT_EXPENSE_TYPE,
            TransactionKind::Transfer => "Chuyển khoản",
        }
    }
}

/// One extracted line item. Every field is schema-valid once it leaves the fixer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCandidate {
    pub amount: i64,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    /// Set only by the full-failure fallback.
    #[serde(skip)]
    pub fallback: bool,
}

/// Record as it arrives from the model, before any checks.
///
/// Fields stay as raw JSON values so the validator can report type errors
/// instead of the parser rejecting them. Unknown keys are a parse error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCandidate {
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub category: Option<Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<Value>,
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub item: Option<Value>,
}

/// Multi-transaction payload: `{"transactions": [...]}` plus optional aggregate fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEnvelope {
    pub transactions: Vec<RawCandidate>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub category: Option<Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<Value>,
    #[serde(default)]
    pub confidence: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConstraints {
    pub min_amount: i64,
    pub max_amount: i64,
    pub confidence_min: f64,
    pub confidence_max: f64,
}

impl Default for ValidationConstraints {
    fn default() -> Self {
        Self {
            min_amount: 0,
            max_amount: 10_000_000_000, // 10 tỷ VND
            confidence_min: 0.0,
            confidence_max: 1.0,
        }
    }
}

impl ValidationConstraints {
    pub fn amount_in_range(&self, amount: f64) -> bool {
        amount >= self.min_amount as f64 && amount <= self.max_amount as f64
    }

    /// Amount used when the model's amount cannot be kept: zero, pulled into range.
    pub fn default_amount(&self) -> i64 {
        0i64.min(self.max_amount).max(self.min_amount)
    }

    pub fn clamp_confidence(&self, confidence: f64) -> f64 {
        if confidence.is_nan() {
            return self.confidence_min;
        }
        confidence.min(self.confidence_max).max(self.confidence_min)
    }
}

/// Valid categories and types for one request.
///
/// An empty category list means open-domain mode. In closed-domain mode the
/// fallback category is always a member.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainVocabulary {
    categories: Vec<String>,
    types: Vec<String>,
    fallback_category: String,
}

impl DomainVocabulary {
    pub fn new(
        categories: Vec<String>,
        types: Vec<String>,
        fallback_category: impl Into<String>,
    ) -> Self {
        let fallback_category = fallback_category.into();
        let mut categories = categories;
        let wanted = fallback_category.to_lowercase();
        if !categories.is_empty() && !categories.iter().any(|c| c.to_lowercase() == wanted) {
            categories.push(fallback_category.clone());
        }

        Self {
            categories,
            types,
            fallback_category,
        }
    }

    pub fn open(types: Vec<String>, fallback_category: impl Into<String>) -> Self {
        Self::new(Vec::new(), types, fallback_category)
    }

    pub fn is_open(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// The designated catch-all entry, spelled as the vocabulary spells it.
    pub fn fallback_category(&self) -> &str {
        let wanted = self.fallback_category.to_lowercase();
        self.categories
            .iter()
            .find(|c| c.to_lowercase() == wanted)
            .map(String::as_str)
            .unwrap_or(&self.fallback_category)
    }

    pub fn accepts_category(&self, category: &str) -> bool {
        self.is_open() || self.categories.iter().any(|c| c == category)
    }

    pub fn accepts_type(&self, kind: &str) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiTransaction {
    pub items: Vec<TransactionCandidate>,
    pub amount: i64,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f64,
}

/// Final outcome of postprocessing one model answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Single(TransactionCandidate),
    Multi(MultiTransaction),
}

impl Prediction {
    pub fn amount(&self) -> i64 {
        match self {
            Prediction::Single(c) => c.amount,
            Prediction::Multi(m) => m.amount,
        }
    }

    pub fn category(&self) -> &str {
        match self {
            Prediction::Single(c) => &c.category,
            Prediction::Multi(m) => &m.category,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Prediction::Single(c) => &c.kind,
            Prediction::Multi(m) => &m.kind,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Prediction::Single(c) => c.confidence,
            Prediction::Multi(m) => m.confidence,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Prediction::Single(c) if c.fallback)
    }

    pub fn items(&self) -> Option<&[TransactionCandidate]> {
        match self {
            Prediction::Single(_) => None,
            Prediction::Multi(m) => Some(&m.items),
        }
    }
}

/// Deserializing goes through [`PredictRequest::sanitized`], so a decoded
/// request is always trimmed and de-duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedRequest")]
pub struct PredictRequest {
    pub text: String,
    pub categories: Vec<String>,
    pub locale: String,
    pub currency: String,
}

#[derive(Deserialize)]
struct UncheckedRequest {
    text: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default = "default_locale")]
    locale: String,
    #[serde(default = "default_currency")]
    currency: String,
}

impl TryFrom<UncheckedRequest> for PredictRequest {
    type Error = ExtractError;

    fn try_from(raw: UncheckedRequest) -> Result<Self> {
        PredictRequest {
            text: raw.text,
            categories: raw.categories,
            locale: raw.locale,
            currency: raw.currency,
        }
        .sanitized()
    }
}

fn default_locale() -> String {
    "vi-VN".to_string()
}

fn default_currency() -> String {
    "VND".to_string()
}

impl PredictRequest {
    /// Builds a sanitized request: trimmed text, de-duplicated categories.
    pub fn new(text: impl Into<String>, categories: Vec<String>) -> Result<Self> {
        Self {
            text: text.into(),
            categories,
            locale: default_locale(),
            currency: default_currency(),
        }
        .sanitized()
    }

    pub fn sanitized(mut self) -> Result<Self> {
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(ExtractError::InvalidRequestError {
                field: "text".to_string(),
                reason: "Text cannot be empty".to_string(),
            });
        }
        let length = text.chars().count();
        if length > MAX_TEXT_LENGTH {
            return Err(ExtractError::InvalidRequestError {
                field: "text".to_string(),
                reason: format!(
                    "Text has {} characters, maximum is {}",
                    length, MAX_TEXT_LENGTH
                ),
            });
        }

        let mut unique: Vec<String> = Vec::with_capacity(self.categories.len());
        for category in self.categories.drain(..) {
            let category = category.trim().to_string();
            if !category.is_empty() && !unique.contains(&category) {
                unique.push(category);
            }
        }

        self.text = text;
        self.categories = unique;
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub amount: i64,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<TransactionCandidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    /// What was wrong with an unrepaired answer; only set in no-fix mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
}

impl PredictionResponse {
    pub fn from_prediction(prediction: Prediction, raw_output: Option<String>) -> Self {
        match prediction {
            Prediction::Single(c) => Self {
                amount: c.amount,
                category: c.category,
                kind: c.kind,
                confidence: c.confidence,
                transactions: None,
                raw_output,
                validation_errors: None,
            },
            Prediction::Multi(m) => Self {
                amount: m.amount,
                category: m.category,
                kind: m.kind,
                confidence: m.confidence,
                transactions: Some(m.items),
                raw_output,
                validation_errors: None,
            },
        }
    }

    /// Placeholder row for a failed item of a batch.
    pub fn failed(fallback_category: &str, error: &ExtractError) -> Self {
        Self {
            amount: 0,
            category: fallback_category.to_string(),
            kind: DEFAULT_EXPENSE_TYPE.to_string(),
            confidence: 0.0,
            transactions: None,
            raw_output: Some(format!("Error: {}", error)),
            validation_errors: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl From<&ExtractError> for ErrorResponse {
    fn from(error: &ExtractError) -> Self {
        Self {
            error: error.code().to_string(),
            message: error.to_string(),
            details: None,
            raw_output: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub llm_available: bool,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types() -> Vec<String> {
        vec!["Thu nhập".to_string(), "Chi phí".to_string()]
    }

    #[test]
    fn test_closed_vocabulary_appends_fallback() {
        let vocab = DomainVocabulary::new(
            vec!["Ăn uống".to_string(), "Lương".to_string()],
            types(),
            DEFAULT_FALLBACK_CATEGORY,
        );
        assert_eq!(vocab.categories().last().unwrap(), "Khác");
        assert_eq!(vocab.fallback_category(), "Khác");
    }

    #[test]
    fn test_closed_vocabulary_keeps_existing_fallback_spelling() {
        let vocab = DomainVocabulary::new(
            vec!["Food".to_string(), "other".to_string()],
            types(),
            "Other",
        );
        assert_eq!(vocab.categories().len(), 2);
        assert_eq!(vocab.fallback_category(), "other");
    }

    #[test]
    fn test_open_vocabulary_accepts_anything() {
        let vocab = DomainVocabulary::open(types(), DEFAULT_FALLBACK_CATEGORY);
        assert!(vocab.is_open());
        assert!(vocab.accepts_category("Sửa chữa"));
        assert!(!vocab.accepts_type("Expense"));
    }

    #[test]
    fn test_request_sanitizes_categories() {
        let request = PredictRequest::new(
            "  Mẹ cho 1tr  ",
            vec![
                " Quà tặng ".to_string(),
                "Lương".to_string(),
                "Quà tặng".to_string(),
                "   ".to_string(),
            ],
        )
        .unwrap();

        assert_eq!(request.text, "Mẹ cho 1tr");
        assert_eq!(request.categories, vec!["Quà tặng", "Lương"]);
        assert_eq!(request.locale, "vi-VN");
    }

    #[test]
    fn test_request_rejects_blank_and_long_text() {
        assert!(PredictRequest::new("   ", vec![]).is_err());
        let long_text = "a".repeat(MAX_TEXT_LENGTH + 1);
        assert!(PredictRequest::new(long_text, vec![]).is_err());
        let max_text = "ă".repeat(MAX_TEXT_LENGTH);
        assert!(PredictRequest::new(max_text, vec![]).is_ok());
    }

    #[test]
    fn test_deserialized_request_is_sanitized() {
        let request: PredictRequest = serde_json::from_str(
            r#"{"text": "  Cafe 35k ", "categories": ["Ăn uống", " Ăn uống ", ""]}"#,
        )
        .unwrap();
        assert_eq!(request.text, "Cafe 35k");
        assert_eq!(request.categories, vec!["Ăn uống"]);
        assert_eq!(request.currency, "VND");

        let err = serde_json::from_str::<PredictRequest>(r#"{"text": "   "}"#).unwrap_err();
        assert!(err.to_string().contains("Text cannot be empty"));
    }

    #[test]
    fn test_raw_candidate_rejects_unknown_fields() {
        let parsed: std::result::Result<RawCandidate, _> =
            serde_json::from_str(r#"{"amount": 1, "note": "x"}"#);
        assert!(parsed.is_err());

        let parsed: RawCandidate =
            serde_json::from_str(r#"{"amount": 1, "type": "Chi phí"}"#).unwrap();
        assert_eq!(parsed.kind, Some(Value::String("Chi phí".to_string())));
        assert!(parsed.category.is_none());
    }

    #[test]
    fn test_response_omits_empty_optionals() {
        let response = PredictionResponse::from_prediction(
            Prediction::Single(TransactionCandidate {
                amount: 1_000_000,
                category: "Quà tặng".to_string(),
                kind: "Thu nhập".to_string(),
                confidence: 0.9,
                item: None,
                fallback: false,
            }),
            None,
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "Thu nhập");
        assert!(json.get("transactions").is_none());
        assert!(json.get("raw_output").is_none());
        assert!(json.get("validation_errors").is_none());
    }

    #[test]
    fn test_error_response_carries_code() {
        let error = ExtractError::LlmTimeoutError { seconds: 60 };
        let response = ErrorResponse::from(&error);
        assert_eq!(response.error, error.code());
        assert!(response.message.contains("60"));
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("details").is_none());
    }
}
