use crate::domain::model::DEFAULT_FALLBACK_CATEGORY;
use crate::utils::cache::{BoundedCache, EvictionPolicy, OldestFirst};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptMode {
    /// One record per text.
    Single,
    /// The model may split the text into a `transactions` list.
    Multi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub user: String,
}

pub type PromptKey = (PromptMode, Vec<String>);

// 已知類別的簡短說明，放進 closed-domain prompt
static CATEGORY_DESCRIPTIONS: &[(&str, &str)] = &[
    ("Ăn uống", "Đồ ăn, thức uống, cà phê, trà sữa, nhà hàng"),
    ("Di chuyển", "Grab, taxi, xăng, vé xe, gửi xe"),
    ("Mua sắm", "Quần áo, giày dép, đồ dùng, shopping"),
    ("Giải trí", "Phim, game, nhạc, Netflix, karaoke"),
    ("Hóa đơn", "Điện, nước, internet, wifi, gas"),
    ("Sức khỏe", "Khám bệnh, thuốc, bệnh viện, gym"),
    ("Giáo dục", "Học phí, sách vở, khóa học"),
    ("Lương", "Lương, thưởng, bonus từ công ty"),
    ("Quà tặng", "Tiền được người thân, bạn bè cho hoặc tặng"),
    ("Mượn tiền", "Vay, mượn hoặc trả nợ"),
    ("Chuyển khoản", "Chuyển tiền qua ngân hàng, ví điện tử"),
    ("Mỹ phẩm", "Son, kem dưỡng, serum, skincare"),
    ("Viễn thông", "Cước điện thoại, data 4G/5G, nạp thẻ"),
    ("Làm đẹp", "Cắt tóc, spa, nail, nhuộm tóc"),
    ("Khác", "Giao dịch không thuộc danh mục nào ở trên"),
];

const OPEN_DOMAIN_SYSTEM_PROMPT: &str = r#"Bạn là trợ lý phân loại giao dịch tài chính cá nhân bằng tiếng Việt.

Nhiệm vụ: đọc câu mô tả giao dịch và tự chọn category ngắn gọn (1-3 từ tiếng Việt).

Quy tắc:
- type: "Thu nhập" khi tiền vào (lương, quà, được cho, bán đồ, hoàn tiền), "Chi phí" khi tiền ra (mua, thanh toán), "Chuyển khoản" khi chuyển tiền giữa tài khoản.
- amount: quy đổi ra VND ("1tr" = 1000000, "500k" = 500000). Không có số tiền thì amount = 0.
- category gợi ý: Ăn uống, Di chuyển, Mua sắm, Giải trí, Hóa đơn, Sức khỏe, Giáo dục, Lương, Quà tặng, Mượn tiền, Khác.
- confidence từ 0.0 đến 1.0.

Ví dụ:
"Mẹ cho 1tr" -> {"amount": 1000000, "category": "Quà tặng", "type": "Thu nhập", "confidence": 0.95}
"Grab đi làm 45k" -> {"amount": 45000, "category": "Di chuyển", "type": "Chi phí", "confidence": 0.95}
"Sửa xe máy 300k" -> {"amount": 300000, "category": "Sửa chữa", "type": "Chi phí", "confidence": 0.9}

Chỉ trả về một object JSON hợp lệ, không markdown, không giải thích."#;

const MULTI_OPEN_SYSTEM_PROMPT: &str = r#"Bạn là trợ lý phân loại giao dịch tài chính cá nhân bằng tiếng Việt.

Nhiệm vụ: nếu câu có NHIỀU món với giá riêng, tách thành từng giao dịch.

Quy tắc:
- amount quy đổi ra VND ("1tr" = 1000000, "50k" = 50000).
- type: "Thu nhập" (tiền vào) hoặc "Chi phí" (tiền ra).
- Một giao dịch: {"amount": 50000, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.95}
- Nhiều giao dịch: {"transactions": [{"item": "Kem", "amount": 50000, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.95}, {"item": "Sữa chua", "amount": 42000, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.95}]}

Ví dụ:
"Grab 45k cafe 35k" -> {"transactions": [{"item": "Grab", "amount": 45000, "category": "Di chuyển", "type": "Chi phí", "confidence": 0.95}, {"item": "Cafe", "amount": 35000, "category": "Ăn uống", "type": "Chi phí", "confidence": 0.95}]}

Chỉ trả về JSON hợp lệ, không markdown, không giải thích."#;

fn quoted_list(categories: &[String]) -> String {
    categories
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe(category: &str) -> String {
    match CATEGORY_DESCRIPTIONS.iter().find(|(name, _)| *name == category) {
        Some((_, description)) => format!("- {}: {}", category, description),
        None => format!("- {}", category),
    }
}

fn catch_all(categories: &[String]) -> &str {
    categories
        .iter()
        .find(|c| c.as_str() == DEFAULT_FALLBACK_CATEGORY)
        .or_else(|| categories.last())
        .map(String::as_str)
        .unwrap_or(DEFAULT_FALLBACK_CATEGORY)
}

fn closed_domain_system_prompt(categories: &[String]) -> String {
    let list = quoted_list(categories);
    let details = categories
        .iter()
        .map(|c| describe(c))
        .collect::<Vec<_>>()
        .join("\n");
    let other = catch_all(categories);

    format!(
        r#"Bạn là trợ lý phân loại giao dịch tài chính.

Danh sách category được phép (chỉ chọn từ đây): [{list}]

Quy tắc:
1. category BẮT BUỘC là một giá trị trong danh sách. Không tự tạo category mới. Không khớp thì dùng "{other}".
2. type: "Thu nhập" (tiền vào) hoặc "Chi phí" (tiền ra).
3. amount quy đổi ra VND (1tr = 1000000, 500k = 500000).

Mô tả category:
{details}

Định dạng (chỉ JSON):
{{"amount": <số>, "category": "<từ danh sách>", "type": "<Thu nhập|Chi phí>", "confidence": <0-1>}}"#
    )
}

fn multi_closed_system_prompt(categories: &[String]) -> String {
    let list = quoted_list(categories);
    let other = catch_all(categories);

    format!(
        r#"Bạn là trợ lý phân loại giao dịch tài chính.

Danh sách category được phép: [{list}]

Nếu câu có NHIỀU món với giá riêng, tách thành mảng "transactions". Category phải nằm trong danh sách, không khớp thì dùng "{other}".

Một giao dịch:
{{"amount": 50000, "category": "<từ danh sách>", "type": "Chi phí", "confidence": 0.95}}

Nhiều giao dịch:
{{"transactions": [{{"item": "Kem", "amount": 50000, "category": "<từ danh sách>", "type": "Chi phí", "confidence": 0.95}}, {{"item": "Sữa chua", "amount": 42000, "category": "<từ danh sách>", "type": "Chi phí", "confidence": 0.95}}]}}

Chỉ trả về JSON hợp lệ."#
    )
}

fn user_prompt(text: &str, categories: &[String], mode: PromptMode) -> String {
    match (mode, categories.is_empty()) {
        (PromptMode::Single, true) => format!("Phân loại giao dịch sau:\n\n\"{}\"\n\nTrả về JSON:", text),
        (PromptMode::Single, false) => format!(
            "Giao dịch: \"{}\"\n\nCHỈ chọn category từ: [{}]\n\nTrả về JSON:",
            text,
            quoted_list(categories)
        ),
        (PromptMode::Multi, true) => format!(
            "Giao dịch: \"{}\"\n\nNếu có nhiều giao dịch, tách thành mảng \"transactions\".\n\nTrả về JSON:",
            text
        ),
        (PromptMode::Multi, false) => format!(
            "Giao dịch: \"{}\"\n\nCHỈ chọn category từ: [{}]\nNếu có nhiều giao dịch, tách thành mảng \"transactions\".\n\nTrả về JSON:",
            text,
            quoted_list(categories)
        ),
    }
}

/// Builds system and user prompts. System prompts depend only on the mode
/// and the category list, so they are memoized.
pub struct PromptBuilder<P = OldestFirst<PromptKey>> {
    cache: Mutex<BoundedCache<PromptKey, String, P>>,
}

impl PromptBuilder {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OldestFirst::default())
    }
}

impl<P: EvictionPolicy<PromptKey>> PromptBuilder<P> {
    pub fn with_policy(capacity: usize, policy: P) -> Self {
        Self {
            cache: Mutex::new(BoundedCache::with_policy(capacity, policy)),
        }
    }

    /// Empty `categories` selects the open-domain templates.
    pub fn system_prompt(&self, mode: PromptMode, categories: &[String]) -> String {
        let key = (mode, categories.to_vec());

        // 鎖中毒時直接重建，不影響結果
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return hit;
            }
            let prompt = render_system_prompt(mode, categories);
            debug!("📝 建立 {:?} system prompt ({} 個類別)", mode, categories.len());
            cache.insert(key, prompt.clone());
            return prompt;
        }

        render_system_prompt(mode, categories)
    }

    pub fn build(&self, text: &str, categories: &[String], mode: PromptMode) -> Prompts {
        Prompts {
            system: self.system_prompt(mode, categories),
            user: user_prompt(text, categories, mode),
        }
    }

    /// Number of memoized system prompts.
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }
}

fn render_system_prompt(mode: PromptMode, categories: &[String]) -> String {
    match (mode, categories.is_empty()) {
        (PromptMode::Single, true) => OPEN_DOMAIN_SYSTEM_PROMPT.to_string(),
        (PromptMode::Single, false) => closed_domain_system_prompt(categories),
        (PromptMode::Multi, true) => MULTI_OPEN_SYSTEM_PROMPT.to_string(),
        (PromptMode::Multi, false) => multi_closed_system_prompt(categories),
    }
}
