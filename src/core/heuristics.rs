use crate::core::normalizer::{normalize_text, MILLION_RE, THOUSAND_RE};
use crate::domain::model::TransactionKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Below this model confidence the heuristic hints take over.
pub const HINT_CONFIDENCE_THRESHOLD: f64 = 0.5;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("heuristic regex"))
        .collect()
}

static TRANSFER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"chuyển\s*khoản",
        r"chuyển\s*tiền",
        r"vietqr",
        r"transfer",
        r"banking",
        r"ví\s*điện\s*tử",
    ])
});

static INCOME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"nhận\s*lương",
        r"lương",
        r"thưởng",
        r"bonus",
        r"quà\s*tặng",
        r"được\s*cho",
        r"được\s*tặng",
        r"thu\s*nhập",
        r"hoàn\s*tiền",
        r"hoàn\s*trả",
        r"bán\s*đồ",
        r"\bbán\b",
        r"tiền\s*từ",
        // "Mẹ cho tiền", "Bố cho 500k", ...
        r"\b(?:mẹ|bố|ba|cha|anh|chị|em|bạn)\s*cho\s*tiền",
        r"\b(?:mẹ|bố|ba|cha|anh|chị|em|bạn)\s*cho\s*\d",
    ])
});

static EXPENSE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"mua",
        r"trả",
        r"thanh\s*toán",
        r"chi\s*tiêu",
        r"支出",
        r"cà\s*phê",
        r"ăn\s*uống",
        r"di\s*chuyển",
        r"xăng",
        r"vé",
        r"hóa\s*đơn",
        r"điện",
        r"nước",
        r"wifi",
        r"internet",
        r"shopping",
        r"mua\s*sắm",
        r"giải\s*trí",
        r"sức\s*khỏe",
    ])
});

// 金額後面直接接消費動詞
static AMOUNT_THEN_SPEND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d+\s*(?:k|tr)\s*(?:cho|mua|thanh\s*toán)").expect("spend regex")
});

static LITERAL_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}(?:\.\d{3})+|\d+)").expect("literal amount regex"));

static MONEY_IN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"nhận",
        r"được",
        r"\bcho\b",
        r"tặng",
        r"lương",
        r"\bthu\b",
        r"tiền\s*vào",
        r"hoàn\s*trả",
        r"hoàn\s*tiền",
        r"bonus",
        r"thưởng",
    ])
});

static MONEY_OUT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"trả",
        r"thanh\s*toán",
        r"mua",
        r"chi\s*tiêu",
        r"支出",
        r"\bpay\b",
        r"gửi",
        r"nạp",
        r"chuyển\s*đi",
        r"tiền\s*ra",
    ])
});

static PERSON_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bmẹ\b",
        r"\bbố\b",
        r"\bcha\b",
        r"\bba\b",
        r"\bchồng\b",
        r"\bvợ\b",
        r"\banh\b",
        r"\bchị\b",
        r"\bem\b",
        r"\bbạn\b",
        r"đồng\s*nghiệp",
        r"\bsếp\b",
        r"\bcô\b",
        r"\bthầy\b",
    ])
});

static ACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\băn\b",
        r"uống",
        r"cà\s*phê",
        r"đi\s*xe",
        r"grab",
        r"uber",
        r"shopping",
        r"mua\s*sắm",
        r"điện\s*thoại",
        r"wifi",
        r"điện",
        r"nước",
        r"\bgas\b",
        r"xăng",
        r"\d+",
    ])
});

/// Keyword hits grouped by what they suggest. Diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeywordGroups {
    pub money_in: Vec<String>,
    pub money_out: Vec<String>,
    pub persons: Vec<String>,
    pub actions: Vec<String>,
}

/// Normalized text plus the advisory hints derived from the raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub normalized: String,
    pub kind_hint: Option<TransactionKind>,
    pub amount_hint: Option<i64>,
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// Guesses the transaction direction from the original (not normalized) text.
///
/// Transfer markers win over income markers, which win over expense markers.
pub fn detect_transaction_type(text: &str) -> Option<TransactionKind> {
    let text = text.to_lowercase();

    if any_match(&TRANSFER_PATTERNS, &text) {
        return Some(TransactionKind::Transfer);
    }
    if any_match(&INCOME_PATTERNS, &text) {
        return Some(TransactionKind::Income);
    }
    if any_match(&EXPENSE_PATTERNS, &text) {
        return Some(TransactionKind::Expense);
    }
    if AMOUNT_THEN_SPEND_RE.is_match(&text) {
        return Some(TransactionKind::Expense);
    }

    None
}

/// Extracts the dominant amount in VND, or `None` when no number is present.
///
/// Pattern classes are tried in order (million marker, thousand marker, plain
/// literal); inside the first class that matches, the largest value wins.
pub fn extract_amount_from_text(text: &str) -> Option<i64> {
    let marked = [
        (&*MILLION_RE, 1_000_000.0),
        (&*THOUSAND_RE, 1_000.0),
    ];

    for (re, multiplier) in marked {
        let largest = re
            .captures_iter(text)
            .filter_map(|caps| caps[1].parse::<f64>().ok())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        if let Some(value) = largest {
            return Some((value * multiplier).round() as i64);
        }
    }

    LITERAL_AMOUNT_RE
        .captures_iter(text)
        .filter_map(|caps| caps[1].replace('.', "").parse::<i64>().ok())
        .max()
}

fn first_hits(patterns: &[Regex], text: &str) -> Vec<String> {
    patterns
        .iter()
        .filter_map(|re| re.find(text).map(|m| m.as_str().to_string()))
        .collect()
}

pub fn extract_keywords(text: &str) -> KeywordGroups {
    let text = text.to_lowercase();

    KeywordGroups {
        money_in: first_hits(&MONEY_IN_PATTERNS, &text),
        money_out: first_hits(&MONEY_OUT_PATTERNS, &text),
        persons: first_hits(&PERSON_PATTERNS, &text),
        actions: first_hits(&ACTION_PATTERNS, &text),
    }
}

/// Type detection runs on the raw text so "Mẹ cho ..." survives;
/// amount extraction runs on the normalized text.
pub fn preprocess_transaction(text: &str) -> Preprocessed {
    let normalized = normalize_text(text);
    let kind_hint = detect_transaction_type(text);
    let amount_hint = extract_amount_from_text(&normalized);

    Preprocessed {
        normalized,
        kind_hint,
        amount_hint,
    }
}
