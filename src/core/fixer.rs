use crate::domain::model::{
    DomainVocabulary, RawCandidate, TransactionCandidate, TransactionKind, ValidationConstraints,
    DEFAULT_EXPENSE_TYPE,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Confidence assumed when the model gives none.
const MISSING_CONFIDENCE: f64 = 0.5;

/// Keywords that point to one canonical category, in Vietnamese and English.
///
/// A group only applies when one of its `targets` is in the vocabulary.
struct SynonymGroup {
    targets: &'static [&'static str],
    keys: &'static [&'static str],
}

// 順序有意義: "trả nợ" 要先於 "cho"，"điện thoại" 要先於 "điện"
static SYNONYMS: &[SynonymGroup] = &[
    SynonymGroup {
        targets: &["Ăn uống", "Food", "Food & Drink"],
        keys: &[
            "đồ ăn", "ăn", "uống", "cà phê", "cafe", "coffee", "trà sữa", "snack", "drink",
            "restaurant", "lunch", "dinner", "breakfast",
        ],
    },
    SynonymGroup {
        targets: &["Mua sắm", "Shopping"],
        keys: &["shop", "mua sắm", "quần áo", "clothes", "grocer", "siêu thị"],
    },
    SynonymGroup {
        targets: &["Di chuyển", "Transport", "Transportation"],
        keys: &[
            "di chuyển", "đi lại", "grab", "taxi", "vé", "xăng", "gửi xe", "fuel", "parking",
            "transport", "travel",
        ],
    },
    SynonymGroup {
        targets: &["Giải trí", "Entertainment"],
        keys: &["giải trí", "game", "phim", "movie", "cinema", "music", "karaoke"],
    },
    SynonymGroup {
        targets: &["Sức khỏe", "Health", "Healthcare"],
        keys: &[
            "sức khỏe", "thuốc", "bệnh viện", "khám", "medicine", "hospital", "doctor", "pharmacy",
            "health",
        ],
    },
    SynonymGroup {
        targets: &["Viễn thông", "Telecom", "Phone"],
        keys: &["điện thoại", "nạp thẻ", "phone", "mobile", "telecom"],
    },
    SynonymGroup {
        targets: &["Hóa đơn", "Bills", "Utilities"],
        keys: &[
            "hóa đơn", "điện", "nước", "wifi", "internet", "bill", "utilit", "electric", "water",
        ],
    },
    SynonymGroup {
        targets: &["Lương", "Salary"],
        keys: &["lương", "thưởng", "salary", "bonus", "wage", "payroll"],
    },
    SynonymGroup {
        targets: &["Mượn tiền", "Debt", "Loan"],
        keys: &["trả nợ", "vay", "nợ", "loan", "debt", "borrow", "lend"],
    },
    SynonymGroup {
        targets: &["Quà tặng", "Gift", "Gifts"],
        keys: &["quà", "tặng", "cho", "gift", "present", "donation"],
    },
    SynonymGroup {
        targets: &["Giáo dục", "Education"],
        keys: &["khóa học", "học", "sách", "book", "course", "tuition", "school"],
    },
    SynonymGroup {
        targets: &["Làm đẹp", "Beauty"],
        keys: &["làm đẹp", "mỹ phẩm", "spa", "salon", "cắt tóc", "cosmetic", "beauty"],
    },
];

const TRANSFER_INDICATORS: &[&str] = &["chuyển", "khoản", "banking", "transfer"];
const INCOME_INDICATORS: &[&str] = &["thu", "nhận", "lương", "bonus", "thưởng", "vào", "income"];
const EXPENSE_INDICATORS: &[&str] = &[
    "chi", "tiêu", "trả", "mua", "ra", "支出", "expense", "spend",
];

static FALLBACK_AMOUNT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)"amount"\s*:\s*(\d+(?:\.\d+)?)"#,
        r"(?i)amount[:\s]+(\d+(?:\.\d+)?)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("fallback amount regex"))
    .collect()
});
static FALLBACK_CURRENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:\.\d{3})+|\d+)\s*(?:vnd|đồng|đ)\b").expect("currency regex")
});
static FALLBACK_CATEGORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""category"\s*:\s*"([^"]+)""#).expect("category regex"));
static FALLBACK_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""type"\s*:\s*"([^"]+)""#).expect("type regex"));

fn find_ignore_case<'a>(entries: &'a [String], wanted: &str) -> Option<&'a String> {
    let wanted = wanted.to_lowercase();
    entries.iter().find(|e| e.to_lowercase() == wanted)
}

/// Maps a model category onto the vocabulary.
///
/// Exact (case-insensitive), then substring in either direction, then the
/// synonym table, then the fallback entry. In open-domain mode a non-empty
/// category is kept as is.
pub fn normalize_category(category: &str, vocabulary: &DomainVocabulary) -> String {
    let trimmed = category.trim();

    if vocabulary.is_open() {
        return if trimmed.is_empty() {
            vocabulary.fallback_category().to_string()
        } else {
            category.to_string()
        };
    }
    if trimmed.is_empty() {
        return vocabulary.fallback_category().to_string();
    }

    let categories = vocabulary.categories();
    if let Some(exact) = find_ignore_case(categories, trimmed) {
        return exact.clone();
    }

    let lower = trimmed.to_lowercase();
    if let Some(partial) = categories.iter().find(|valid| {
        let valid = valid.to_lowercase();
        valid.contains(&lower) || lower.contains(&valid)
    }) {
        return partial.clone();
    }

    for group in SYNONYMS {
        if !group.keys.iter().any(|key| lower.contains(key)) {
            continue;
        }
        if let Some(target) = group
            .targets
            .iter()
            .find_map(|target| find_ignore_case(categories, target))
        {
            debug!("🔁 類別同義詞對應: '{}' -> '{}'", category, target);
            return target.clone();
        }
    }

    find_ignore_case(categories, vocabulary.fallback_category())
        .or_else(|| categories.last())
        .cloned()
        .unwrap_or_else(|| vocabulary.fallback_category().to_string())
}

/// Buckets free-form type text by indicator words. Transfer is checked first
/// so "transfer" is not read as expense ("ra").
pub fn classify_type_text(text: &str) -> Option<TransactionKind> {
    let lower = text.to_lowercase();
    let hit = |indicators: &[&str]| indicators.iter().any(|ind| lower.contains(ind));

    if hit(TRANSFER_INDICATORS) {
        Some(TransactionKind::Transfer)
    } else if hit(INCOME_INDICATORS) {
        Some(TransactionKind::Income)
    } else if hit(EXPENSE_INDICATORS) {
        Some(TransactionKind::Expense)
    } else {
        None
    }
}

fn canonical_terms(kind: TransactionKind) -> &'static [&'static str] {
    match kind {
        TransactionKind::Income => &["thu nhập", "thu", "income"],
        TransactionKind::Expense => &["chi phí", "chi tiêu", "chi", "expense"],
        TransactionKind::Transfer => &["chuyển khoản", "khoản", "transfer"],
    }
}

/// Vocabulary entry standing for `kind`, or its Vietnamese label when the
/// type list is empty.
pub fn type_for_kind(kind: TransactionKind, vocabulary: &DomainVocabulary) -> Option<String> {
    let types = vocabulary.types();
    if types.is_empty() {
        return Some(kind.label().to_string());
    }

    canonical_terms(kind).iter().find_map(|term| {
        types
            .iter()
            .find(|t| t.to_lowercase().contains(term))
            .cloned()
    })
}

/// Second entry (expense in the usual ordering), else the only entry.
pub fn default_type(vocabulary: &DomainVocabulary) -> String {
    let types = vocabulary.types();
    types
        .get(1)
        .or_else(|| types.first())
        .cloned()
        .unwrap_or_else(|| DEFAULT_EXPENSE_TYPE.to_string())
}

pub fn normalize_type(kind: &str, vocabulary: &DomainVocabulary) -> String {
    let trimmed = kind.trim();
    if trimmed.is_empty() {
        return default_type(vocabulary);
    }

    if vocabulary.types().is_empty() {
        return kind.to_string();
    }

    if let Some(exact) = find_ignore_case(vocabulary.types(), trimmed) {
        return exact.clone();
    }

    classify_type_text(trimmed)
        .and_then(|bucket| type_for_kind(bucket, vocabulary))
        .unwrap_or_else(|| default_type(vocabulary))
}

fn repair_amount(value: Option<&Value>, constraints: &ValidationConstraints) -> i64 {
    match value.and_then(Value::as_f64) {
        Some(amount) if constraints.amount_in_range(amount) => amount.trunc() as i64,
        _ => constraints.default_amount(),
    }
}

fn string_field(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str)
}

fn item_label(value: Option<&Value>) -> Option<String> {
    string_field(value)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Repairs every field of a parsed record. Total: always returns a
/// record whose category and type belong to the vocabulary.
pub fn fix_prediction(
    raw: &RawCandidate,
    vocabulary: &DomainVocabulary,
    constraints: &ValidationConstraints,
) -> TransactionCandidate {
    let category = match string_field(raw.category.as_ref()) {
        Some(c) if vocabulary.accepts_category(c) && !c.trim().is_empty() => c.to_string(),
        other => normalize_category(other.unwrap_or(""), vocabulary),
    };

    let kind = match string_field(raw.kind.as_ref()) {
        Some(k) if vocabulary.accepts_type(k) && !k.trim().is_empty() => k.to_string(),
        other => normalize_type(other.unwrap_or(""), vocabulary),
    };

    let confidence = raw
        .confidence
        .as_ref()
        .and_then(Value::as_f64)
        .unwrap_or(MISSING_CONFIDENCE);

    TransactionCandidate {
        amount: repair_amount(raw.amount.as_ref(), constraints),
        category,
        kind,
        confidence: constraints.clamp_confidence(confidence),
        item: item_label(raw.item.as_ref()),
        fallback: false,
    }
}

/// Best-effort conversion without repair, for callers that asked for the
/// model's answer as is. Wrong-typed fields become zero values.
pub fn coerce_unrepaired(raw: &RawCandidate) -> TransactionCandidate {
    TransactionCandidate {
        amount: raw
            .amount
            .as_ref()
            .and_then(Value::as_f64)
            .map(|a| a.trunc() as i64)
            .unwrap_or(0),
        category: string_field(raw.category.as_ref())
            .unwrap_or_default()
            .to_string(),
        kind: string_field(raw.kind.as_ref()).unwrap_or_default().to_string(),
        confidence: raw
            .confidence
            .as_ref()
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        item: item_label(raw.item.as_ref()),
        fallback: false,
    }
}

fn recover_amount(raw_output: &str) -> Option<f64> {
    for re in FALLBACK_AMOUNT_PATTERNS.iter() {
        if let Some(value) = re
            .captures(raw_output)
            .and_then(|caps| caps[1].parse::<f64>().ok())
        {
            return Some(value);
        }
    }

    FALLBACK_CURRENCY_RE
        .captures(raw_output)
        .and_then(|caps| caps[1].replace('.', "").parse::<f64>().ok())
}

/// Salvages what it can from an answer that failed to parse.
///
/// Never fails. Confidence is always 0.0 and the record is tagged as a fallback.
pub fn create_fallback(
    raw_output: &str,
    vocabulary: &DomainVocabulary,
    constraints: &ValidationConstraints,
) -> TransactionCandidate {
    let amount = match recover_amount(raw_output) {
        Some(value) if constraints.amount_in_range(value) => value.trunc() as i64,
        _ => constraints.default_amount(),
    };

    let category = FALLBACK_CATEGORY_RE
        .captures(raw_output)
        .map(|caps| normalize_category(&caps[1], vocabulary))
        .unwrap_or_else(|| vocabulary.fallback_category().to_string());

    let kind = FALLBACK_TYPE_RE
        .captures(raw_output)
        .map(|caps| normalize_type(&caps[1], vocabulary))
        .unwrap_or_else(|| default_type(vocabulary));

    TransactionCandidate {
        amount,
        category,
        kind,
        confidence: 0.0,
        item: None,
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn english() -> DomainVocabulary {
        DomainVocabulary::new(
            vec!["Food".to_string(), "Other".to_string()],
            vec!["Income".to_string(), "Expense".to_string()],
            "Other",
        )
    }

    fn vietnamese() -> DomainVocabulary {
        DomainVocabulary::new(
            [
                "Quà tặng", "Lương", "Ăn uống", "Mượn tiền", "Chuyển khoản", "Mua sắm",
                "Di chuyển", "Giải trí", "Sức khỏe", "Hóa đơn", "Giáo dục", "Khác",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vec![
                "Thu nhập".to_string(),
                "Chi phí".to_string(),
                "Chuyển khoản".to_string(),
            ],
            "Khác",
        )
    }

    fn raw(value: Value) -> RawCandidate {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_category_exact_ignores_case() {
        assert_eq!(normalize_category("ăn uống", &vietnamese()), "Ăn uống");
        assert_eq!(normalize_category("FOOD", &english()), "Food");
    }

    #[test]
    fn test_category_substring() {
        assert_eq!(normalize_category("Food and drinks", &english()), "Food");
        assert_eq!(normalize_category("Quà", &vietnamese()), "Quà tặng");
    }

    #[test]
    fn test_category_synonyms() {
        assert_eq!(normalize_category("Snacks", &english()), "Food");
        assert_eq!(normalize_category("Cafe sáng", &vietnamese()), "Ăn uống");
        assert_eq!(normalize_category("Grab bike", &vietnamese()), "Di chuyển");
        assert_eq!(normalize_category("Tiền điện", &vietnamese()), "Hóa đơn");
        assert_eq!(normalize_category("Trả nợ bạn", &vietnamese()), "Mượn tiền");
    }

    #[test]
    fn test_synonym_needs_target_in_vocabulary() {
        // "Giải trí" is not in this vocabulary
        assert_eq!(normalize_category("Movie night", &english()), "Other");
    }

    #[test]
    fn test_category_falls_back() {
        assert_eq!(normalize_category("xyz", &vietnamese()), "Khác");
        assert_eq!(normalize_category("", &english()), "Other");
    }

    #[test]
    fn test_open_domain_keeps_category() {
        let open = DomainVocabulary::open(vec![], "Khác");
        assert_eq!(normalize_category("Sửa xe", &open), "Sửa xe");
        assert_eq!(normalize_category("  ", &open), "Khác");
    }

    #[test]
    fn test_type_repair() {
        let vocab = vietnamese();
        assert_eq!(normalize_type("thu nhập", &vocab), "Thu nhập");
        assert_eq!(normalize_type("Income", &vocab), "Thu nhập");
        assert_eq!(normalize_type("Expense", &vocab), "Chi phí");
        assert_eq!(normalize_type("chi tiêu", &vocab), "Chi phí");
        assert_eq!(normalize_type("Transfer", &vocab), "Chuyển khoản");
        assert_eq!(normalize_type("???", &vocab), "Chi phí");
        assert_eq!(normalize_type("", &vocab), "Chi phí");

        let vocab = english();
        assert_eq!(normalize_type("Chi phí", &vocab), "Expense");
        assert_eq!(normalize_type("Thu nhập", &vocab), "Income");
    }

    #[test]
    fn test_default_type_with_short_lists() {
        let single = DomainVocabulary::new(vec![], vec!["Thu nhập".to_string()], "Khác");
        assert_eq!(default_type(&single), "Thu nhập");
        let empty = DomainVocabulary::new(vec![], vec![], "Khác");
        assert_eq!(default_type(&empty), "Chi phí");
    }

    #[test]
    fn test_fix_snacks_record() {
        let fixed = fix_prediction(
            &raw(json!({"amount": 50000, "category": "Snacks", "type": "Expense", "confidence": 0.9})),
            &english(),
            &ValidationConstraints::default(),
        );
        assert_eq!(fixed.amount, 50_000);
        assert_eq!(fixed.category, "Food");
        assert_eq!(fixed.kind, "Expense");
        assert_eq!(fixed.confidence, 0.9);
        assert!(!fixed.fallback);
    }

    #[test]
    fn test_fix_amount_and_confidence() {
        let constraints = ValidationConstraints::default();
        let fixed = fix_prediction(
            &raw(json!({"amount": "50k", "category": "Food", "type": "Expense"})),
            &english(),
            &constraints,
        );
        assert_eq!(fixed.amount, 0);
        assert_eq!(fixed.confidence, 0.5);

        let fixed = fix_prediction(
            &raw(json!({"amount": 1234.9, "confidence": 7})),
            &english(),
            &constraints,
        );
        assert_eq!(fixed.amount, 1234);
        assert_eq!(fixed.confidence, 1.0);
        assert_eq!(fixed.category, "Other");
        assert_eq!(fixed.kind, "Expense");

        let fixed = fix_prediction(
            &raw(json!({"amount": -5, "confidence": -0.3})),
            &english(),
            &constraints,
        );
        assert_eq!(fixed.amount, 0);
        assert_eq!(fixed.confidence, 0.0);
    }

    #[test]
    fn test_vocabulary_closure() {
        let candidates = [
            "", " ", "Snacks", "food", "Khác", "other", "Lương tháng", "???", "chuyển khoản",
            "Thu", "tiền", "🍜", "a very long category that matches nothing at all",
        ];
        let constraints = ValidationConstraints::default();
        for vocab in [english(), vietnamese()] {
            for category in candidates {
                for kind in candidates {
                    let fixed = fix_prediction(
                        &raw(json!({"amount": 1, "category": category, "type": kind, "confidence": 0.5})),
                        &vocab,
                        &constraints,
                    );
                    assert!(
                        vocab.categories().contains(&fixed.category),
                        "{:?} -> {:?}",
                        category,
                        fixed.category
                    );
                    assert!(
                        vocab.types().contains(&fixed.kind),
                        "{:?} -> {:?}",
                        kind,
                        fixed.kind
                    );
                }
            }
        }
    }

    #[test]
    fn test_confidence_always_in_bounds() {
        let constraints = ValidationConstraints::default();
        for value in [json!(-1e308), json!(-1), json!(0.3), json!(1), json!(42.5), json!(1e308)] {
            let fixed = fix_prediction(&raw(json!({"confidence": value})), &english(), &constraints);
            assert!((0.0..=1.0).contains(&fixed.confidence), "{:?}", value);
        }
        assert_eq!(constraints.clamp_confidence(f64::NAN), 0.0);
        assert_eq!(constraints.clamp_confidence(f64::INFINITY), 1.0);
    }

    #[test]
    fn test_coerce_unrepaired_keeps_values() {
        let candidate = coerce_unrepaired(&raw(
            json!({"amount": 99.7, "category": "Snacks", "type": "spend", "confidence": 3}),
        ));
        assert_eq!(candidate.amount, 99);
        assert_eq!(candidate.category, "Snacks");
        assert_eq!(candidate.kind, "spend");
        assert_eq!(candidate.confidence, 3.0);
    }

    #[test]
    fn test_fallback_from_prose() {
        let fallback = create_fallback(
            "Xin lỗi, tôi không hiểu giao dịch này.",
            &english(),
            &ValidationConstraints::default(),
        );
        assert_eq!(fallback.amount, 0);
        assert_eq!(fallback.category, "Other");
        assert_eq!(fallback.kind, "Expense");
        assert_eq!(fallback.confidence, 0.0);
        assert!(fallback.fallback);
    }

    #[test]
    fn test_fallback_salvages_fields() {
        let vocab = vietnamese();
        let constraints = ValidationConstraints::default();

        let fallback = create_fallback(
            r#"{"amount": 1000000, "category": "quà tặng", "type": "income", oops"#,
            &vocab,
            &constraints,
        );
        assert_eq!(fallback.amount, 1_000_000);
        assert_eq!(fallback.category, "Quà tặng");
        assert_eq!(fallback.kind, "Thu nhập");

        let fallback = create_fallback("amount: 42000 maybe", &vocab, &constraints);
        assert_eq!(fallback.amount, 42_000);

        let fallback = create_fallback("Tổng cộng 1.500.000 đ", &vocab, &constraints);
        assert_eq!(fallback.amount, 1_500_000);

        let fallback = create_fallback("amount: 99999999999999", &vocab, &constraints);
        assert_eq!(fallback.amount, 0);
    }

    #[test]
    fn test_fallback_never_panics() {
        let vocab = english();
        let constraints = ValidationConstraints::default();
        let inputs = [
            "",
            "{",
            "}{",
            "\"amount\": ",
            "amount: 1e999",
            "\u{0}\u{1}garbage",
            "999999999999999999999999999999 vnd",
            "\"category\": \"\"",
        ];
        for input in inputs {
            let fallback = create_fallback(input, &vocab, &constraints);
            assert!(fallback.fallback);
            assert!(vocab.categories().contains(&fallback.category));
            assert!(constraints.amount_in_range(fallback.amount as f64));
        }
    }
}
