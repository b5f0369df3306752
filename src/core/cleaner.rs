use once_cell::sync::Lazy;
use regex::Regex;

// ```json / ```JSON / ``` 以及前後空白
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*```[A-Za-z0-9_+-]*\s*").expect("fence regex"));

/// Strips markdown fences and chatter around a model answer and returns the
/// best-guess JSON substring. Does not parse.
pub fn clean_llm_output(raw_output: &str) -> String {
    if raw_output.trim().is_empty() {
        return String::new();
    }

    let cleaned = FENCE_RE.replace_all(raw_output, " ");
    let cleaned = cleaned.trim();

    let object_span = span(cleaned, '{', '}');
    let array_span = span(cleaned, '[', ']');

    match (object_span, array_span) {
        // 只有物件陣列 [{...}, {...}] 才取陣列，"[Kết quả] {...}" 仍取物件
        (Some((obj_start, obj_end)), Some((arr_start, arr_end)))
            if arr_start < obj_start
                && arr_end > obj_end
                && cleaned[arr_start + 1..].trim_start().starts_with('{') =>
        {
            cleaned[arr_start..=arr_end].to_string()
        }
        (Some((start, end)), _) => cleaned[start..=end].to_string(),
        (None, Some((start, end))) if !cleaned.contains('{') => cleaned[start..=end].to_string(),
        _ => cleaned.to_string(),
    }
}

/// First `open` to last `close`, when the close follows the open.
fn span(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then_some((start, end))
}
