use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

// 數字後接單位: "1tr", "1.5 triệu", "200k", "50 nghìn"
pub(crate) static MILLION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:triệu|tr)\b").expect("million regex")
});
pub(crate) static THOUSAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:nghìn|ngàn|k)\b").expect("thousand regex")
});

static RELATIVE_GIVES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(mẹ|bố|cha|ba|chồng|vợ|anh|chị|em)\s*cho\b").expect("relative regex")
});
static PAYMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:thanh toán|trả tiền|pay)\b").expect("payment regex")
});
static PURCHASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:mua sắm|mua|sắm|shopping)\b").expect("purchase regex")
});
static SALARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:nhận\s*)?lương\b").expect("salary regex"));
static DEPOSIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:gửi tiền|nạp tiền)\b").expect("deposit regex")
});

/// Normalizes a Vietnamese transaction description before prompting.
///
/// Collapses whitespace, expands magnitude shorthand ("1tr" → "1.000.000",
/// "200k" → "200.000") and rewrites a few colloquial phrasings into canonical
/// connector words. Running it twice yields the same text.
pub fn normalize_text(text: &str) -> String {
    let text = collapse_whitespace(text);
    if text.is_empty() {
        return text;
    }

    let text = normalize_number_abbreviations(&text);
    let text = normalize_common_patterns(&text);

    collapse_whitespace(&text)
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

pub fn normalize_number_abbreviations(text: &str) -> String {
    let result = MILLION_RE.replace_all(text, |caps: &Captures| expand(&caps[1], 1_000_000.0));
    THOUSAND_RE
        .replace_all(&result, |caps: &Captures| expand(&caps[1], 1_000.0))
        .into_owned()
}

fn expand(numeral: &str, multiplier: f64) -> String {
    match numeral.parse::<f64>() {
        Ok(value) => group_thousands((value * multiplier).round() as i64),
        // 理論上不會發生，保留原字串
        Err(_) => numeral.to_string(),
    }
}

pub fn normalize_common_patterns(text: &str) -> String {
    // 保留親屬稱謂，"Mẹ cho" -> "nhận từ Mẹ"
    let result = RELATIVE_GIVES_RE.replace_all(text, " nhận từ $1 ");
    let result = PAYMENT_RE.replace_all(&result, " thanh toán ");
    let result = PURCHASE_RE.replace_all(&result, " mua ");
    let result = SALARY_RE.replace_all(&result, " nhận lương ");
    let result = DEPOSIT_RE.replace_all(&result, " gửi tiền ");
    result.into_owned()
}

/// Formats an integer with dot thousand separators: 1000000 → "1.000.000".
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_whitespace() {
        assert_eq!(normalize_text("  hello world  "), "hello world");
    }

    #[test]
    fn test_multiple_spaces() {
        assert_eq!(normalize_text("hello    world"), "hello world");
        assert_eq!(normalize_text("hello\t\n world"), "hello world");
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_million_shorthand() {
        let result = normalize_text("Mẹ cho 1tr");
        assert!(result.contains("1.000.000"), "got {}", result);

        let result = normalize_text("Lương 5 triệu");
        assert!(result.contains("5.000.000"), "got {}", result);

        let result = normalize_text("Vay 1.5TR");
        assert!(result.contains("1.500.000"), "got {}", result);
    }

    #[test]
    fn test_thousand_shorthand() {
        let result = normalize_text("Mua cà phê 200k");
        assert!(result.contains("200.000"), "got {}", result);

        let result = normalize_text("Gửi xe 5 nghìn");
        assert!(result.contains("5.000"), "got {}", result);

        let result = normalize_text("Trà sữa 45K");
        assert!(result.contains("45.000"), "got {}", result);
    }

    #[test]
    fn test_marker_needs_word_boundary() {
        // "trả" 裡的 "tr" 不是百萬單位
        assert_eq!(normalize_text("5 trả góp"), "5 trả góp");
        assert_eq!(normalize_text("Gạo 5kg"), "Gạo 5kg");
    }

    #[test]
    fn test_relative_gift_keeps_relative() {
        assert_eq!(normalize_text("Mẹ cho 1tr"), "nhận từ Mẹ 1.000.000");
    }

    #[test]
    fn test_common_patterns() {
        assert_eq!(normalize_text("Trả tiền điện 500k"), "thanh toán điện 500.000");
        assert_eq!(normalize_text("Shopping 300k"), "mua 300.000");
        assert_eq!(normalize_text("lương tháng 5 15tr"), "nhận lương tháng 5 15.000.000");
        assert_eq!(normalize_text("Nạp tiền điện thoại 50k"), "gửi tiền điện thoại 50.000");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "Mẹ cho 1tr",
            "  Mua   sắm quần áo 1.5tr và 200k  ",
            "Nhận lương tháng 5 15tr thưởng 3tr",
            "Trả tiền wifi 220 nghìn",
            "Kem 50k sữa chua 42k",
            "Chuyển khoản cho bạn 2tr",
            "",
        ];
        for sample in samples {
            let once = normalize_text(sample);
            assert_eq!(normalize_text(&once), once, "input: {:?}", sample);
        }
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1.000");
        assert_eq!(group_thousands(15_000_000), "15.000.000");
    }
}
