use crate::domain::model::{DomainVocabulary, ValidationConstraints, DEFAULT_FALLBACK_CATEGORY};
use crate::utils::error::{ExtractError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_url, Validate,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

static ENV_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var regex"));

pub const ENV_LLM_BASE_URL: &str = "LLM_BASE_URL";
pub const ENV_LLM_MODEL: &str = "LLM_MODEL";
pub const ENV_LLM_TEMPERATURE: &str = "LLM_TEMPERATURE";
pub const ENV_LLM_TIMEOUT: &str = "LLM_TIMEOUT";
pub const ENV_DEBUG: &str = "EXTRACT_DEBUG";

/// Whole application configuration. Built once, then shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmConfig,
    pub output: OutputConfig,
    pub app: AppConfig,
    pub validation: ValidationConstraints,
    pub logging: LoggingConfig,
}

/// llama.cpp server (OpenAI-compatible API).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    /// Idle keep-alive connections kept per host.
    pub pool_size: usize,
    /// Responses memoized at temperature 0; 0 disables.
    pub response_cache_size: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: "no-key-required".to_string(),
            model: "gemma-2-9b-it-Q4_K_M.gguf".to_string(),
            temperature: 0.0,
            max_tokens: 512,
            timeout_seconds: 60,
            pool_size: 4,
            response_cache_size: 128,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 回應中附上模型原始輸出
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub default_categories: Vec<String>,
    pub transaction_types: Vec<String>,
    pub fallback_category: String,
    pub default_currency: String,
    pub prompt_cache_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let categories = [
            "Quà tặng",
            "Lương",
            "Ăn uống",
            "Mượn tiền",
            "Chuyển khoản",
            "Mua sắm",
            "Di chuyển",
            "Giải trí",
            "Sức khỏe",
            "Hóa đơn",
            "Giáo dục",
            DEFAULT_FALLBACK_CATEGORY,
        ];

        Self {
            default_categories: categories.iter().map(|c| c.to_string()).collect(),
            transaction_types: vec![
                "Thu nhập".to_string(),
                "Chi phí".to_string(),
                "Chuyển khoản".to_string(),
            ],
            fallback_category: DEFAULT_FALLBACK_CATEGORY.to_string(),
            default_currency: "VND".to_string(),
            prompt_cache_size: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "compact" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Settings {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ExtractError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| ExtractError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${LLM_API_KEY})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_RE
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// File (or defaults), then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                debug!("📄 載入配置檔: {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup` (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(ENV_LLM_BASE_URL) {
            self.llm.base_url = base_url;
        }
        if let Some(model) = lookup(ENV_LLM_MODEL) {
            self.llm.model = model;
        }
        if let Some(raw) = lookup(ENV_LLM_TEMPERATURE) {
            self.llm.temperature = parse_override(ENV_LLM_TEMPERATURE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LLM_TIMEOUT) {
            self.llm.timeout_seconds = parse_override(ENV_LLM_TIMEOUT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DEBUG) {
            self.output.debug = parse_flag(ENV_DEBUG, &raw)?;
        }
        Ok(())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_url("llm.base_url", &self.llm.base_url)?;
        validate_non_empty_string("llm.model", &self.llm.model)?;
        validate_range("llm.temperature", self.llm.temperature, 0.0, 2.0)?;
        validate_positive_number("llm.max_tokens", u64::from(self.llm.max_tokens), 1)?;
        validate_positive_number("llm.timeout_seconds", self.llm.timeout_seconds, 1)?;
        validate_positive_number("llm.pool_size", self.llm.pool_size as u64, 1)?;

        validate_non_empty_string("app.fallback_category", &self.app.fallback_category)?;

        let constraints = &self.validation;
        if constraints.min_amount > constraints.max_amount {
            return Err(ExtractError::ConfigValidationError {
                field: "validation.min_amount".to_string(),
                message: format!(
                    "min_amount ({}) is greater than max_amount ({})",
                    constraints.min_amount, constraints.max_amount
                ),
            });
        }
        validate_range(
            "validation.confidence_min",
            constraints.confidence_min,
            0.0,
            1.0,
        )?;
        validate_range(
            "validation.confidence_max",
            constraints.confidence_max,
            constraints.confidence_min,
            1.0,
        )?;

        let valid_formats = ["compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(ExtractError::InvalidConfigValueError {
                field: "logging.format".to_string(),
                value: self.logging.format.clone(),
                reason: format!(
                    "Unsupported format. Valid formats: {}",
                    valid_formats.join(", ")
                ),
            });
        }

        Ok(())
    }

    /// Vocabulary for one request. Requested categories give closed-domain
    /// mode. An empty request is open-domain unless `use_defaults` asks for
    /// the configured default categories.
    pub fn vocabulary(&self, requested: &[String], use_defaults: bool) -> DomainVocabulary {
        let types = self.app.transaction_types.clone();
        let fallback = self.app.fallback_category.clone();

        if !requested.is_empty() {
            DomainVocabulary::new(requested.to_vec(), types, fallback)
        } else if use_defaults {
            DomainVocabulary::new(self.app.default_categories.clone(), types, fallback)
        } else {
            DomainVocabulary::open(types, fallback)
        }
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ExtractError::InvalidConfigValueError {
            field: name.to_string(),
            value: raw.to_string(),
            reason: "Cannot parse environment override".to_string(),
        })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ExtractError::InvalidConfigValueError {
            field: name.to_string(),
            value: raw.to_string(),
            reason: "Expected true/false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::PredictRequest;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.llm.timeout_seconds, 60);
        assert_eq!(settings.app.default_categories.len(), 12);
        assert_eq!(settings.validation.max_amount, 10_000_000_000);
        assert!(!settings.output.debug);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_content = r#"
[llm]
base_url = "http://localhost:9000"
temperature = 0.2

[app]
default_categories = ["Food", "Other"]
transaction_types = ["Income", "Expense"]
fallback_category = "Other"

[validation]
max_amount = 1000000
"#;

        let settings = Settings::from_toml_str(toml_content).unwrap();
        assert_eq!(settings.llm.base_url, "http://localhost:9000");
        assert_eq!(settings.llm.temperature, 0.2);
        assert_eq!(settings.llm.model, "gemma-2-9b-it-Q4_K_M.gguf");
        assert_eq!(settings.validation.max_amount, 1_000_000);
        assert_eq!(settings.validation.min_amount, 0);
        assert_eq!(settings.logging.format, "compact");
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("VN_TXN_TEST_API_KEY", "secret-123");

        let toml_content = r#"
[llm]
api_key = "${VN_TXN_TEST_API_KEY}"
model = "${VN_TXN_TEST_UNSET_VAR}"
"#;

        let settings = Settings::from_toml_str(toml_content).unwrap();
        assert_eq!(settings.llm.api_key, "secret-123");
        assert_eq!(settings.llm.model, "${VN_TXN_TEST_UNSET_VAR}");

        std::env::remove_var("VN_TXN_TEST_API_KEY");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_LLM_BASE_URL, "http://10.0.0.2:8080"),
            (ENV_LLM_TEMPERATURE, "0.7"),
            (ENV_LLM_TIMEOUT, "15"),
            (ENV_DEBUG, "true"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_overrides_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.llm.base_url, "http://10.0.0.2:8080");
        assert_eq!(settings.llm.temperature, 0.7);
        assert_eq!(settings.llm.timeout_seconds, 15);
        assert!(settings.output.debug);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides_from(|name| (name == ENV_LLM_TIMEOUT).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfigValueError { .. }));
    }

    #[test]
    fn test_config_validation() {
        let mut settings = Settings::default();
        settings.llm.base_url = "invalid-url".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.validation.min_amount = 10;
        settings.validation.max_amount = 5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.logging.format = "xml".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[output]\ndebug = true\n\n[llm]\ntimeout_seconds = 5\n")
            .unwrap();

        let settings = Settings::from_file(temp_file.path()).unwrap();
        assert!(settings.output.debug);
        assert_eq!(settings.llm.timeout_seconds, 5);
    }

    #[test]
    fn test_vocabulary_selection() {
        let settings = Settings::default();

        let requested = vec!["Ăn uống".to_string()];
        let vocab = settings.vocabulary(&requested, true);
        assert_eq!(vocab.categories(), &["Ăn uống".to_string(), "Khác".to_string()]);

        let vocab = settings.vocabulary(&[], true);
        assert_eq!(vocab.categories().len(), 12);

        let vocab = settings.vocabulary(&[], false);
        assert!(vocab.is_open());
        assert_eq!(vocab.types().len(), 3);
    }

    #[test]
    fn test_request_without_categories_is_open_domain() {
        let request = PredictRequest::new("Sửa xe 300k", vec![]).unwrap();
        let vocab = Settings::default().vocabulary(&request.categories, false);
        assert!(vocab.is_open());
        assert!(vocab.accepts_category("Sửa chữa"));
    }
}
