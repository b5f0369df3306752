use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("LLM request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("LLM service error: {message}")]
    LlmServiceError { message: String },

    #[error("LLM request timed out after {seconds}s")]
    LlmTimeoutError { seconds: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid request field '{field}': {reason}")]
    InvalidRequestError { field: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Service,
    Configuration,
    Request,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ExtractError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExtractError::HttpError(_)
            | ExtractError::LlmServiceError { .. }
            | ExtractError::LlmTimeoutError { .. } => ErrorCategory::Service,
            ExtractError::ConfigValidationError { .. }
            | ExtractError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            ExtractError::InvalidRequestError { .. } => ErrorCategory::Request,
            ExtractError::IoError(_)
            | ExtractError::SerializationError(_)
            | ExtractError::CsvError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // 模型服務暫時不可用，可重試
            ErrorCategory::Service => ErrorSeverity::Medium,
            ErrorCategory::Request => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 模型伺服器無法使用 (對應 HTTP 503)
    pub fn is_service_unavailable(&self) -> bool {
        self.category() == ErrorCategory::Service
    }

    /// Short machine-readable code used in error responses.
    pub fn code(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Service => "LLM_SERVICE_ERROR",
            ErrorCategory::Configuration => "CONFIG_ERROR",
            ErrorCategory::Request => "INVALID_REQUEST",
            ErrorCategory::System => "INTERNAL_ERROR",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ExtractError::HttpError(_) | ExtractError::LlmServiceError { .. } => {
                format!("The language model service is unavailable: {}", self)
            }
            ExtractError::LlmTimeoutError { seconds } => format!(
                "The language model did not answer within {} seconds",
                seconds
            ),
            ExtractError::ConfigValidationError { field, .. }
            | ExtractError::InvalidConfigValueError { field, .. } => {
                format!("Configuration problem with '{}': {}", field, self)
            }
            ExtractError::InvalidRequestError { field, reason } => {
                format!("Request field '{}' is invalid: {}", field, reason)
            }
            ExtractError::IoError(_)
            | ExtractError::SerializationError(_)
            | ExtractError::CsvError(_) => format!("Internal error: {}", self),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ExtractError::HttpError(_) | ExtractError::LlmServiceError { .. } => {
                "Check that the llama.cpp server is running and llm.base_url points to it"
            }
            ExtractError::LlmTimeoutError { .. } => {
                "Increase llm.timeout_seconds or use a smaller model"
            }
            ExtractError::ConfigValidationError { .. }
            | ExtractError::InvalidConfigValueError { .. } => {
                "Fix the configuration file or the overriding environment variables"
            }
            ExtractError::InvalidRequestError { .. } => {
                "Send non-empty text of at most 1000 characters"
            }
            ExtractError::IoError(_) => "Check file paths and permissions",
            ExtractError::SerializationError(_) | ExtractError::CsvError(_) => {
                "Check the input file format"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
