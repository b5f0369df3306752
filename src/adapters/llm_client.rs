use crate::config::settings::LlmConfig;
use crate::domain::ports::{CompletionClient, CompletionRequest};
use crate::utils::cache::BoundedCache;
use crate::utils::error::{ExtractError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, warn};

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// (system prompt, user prompt, temperature bits)
type ResponseKey = (String, String, u64);

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Chat-completion client for a llama.cpp server.
///
/// One instance per process: the inner `reqwest::Client` owns the
/// keep-alive pool.
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    response_cache: Option<Mutex<BoundedCache<ResponseKey, String>>>,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .pool_max_idle_per_host(config.pool_size)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;

        let response_cache = (config.response_cache_size > 0)
            .then(|| Mutex::new(BoundedCache::new(config.response_cache_size)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout,
            response_cache,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn cache_key(request: &CompletionRequest) -> Option<ResponseKey> {
        // 只有 temperature 0 的回應是可重現的
        (request.temperature == 0.0).then(|| {
            (
                request.system_prompt.clone(),
                request.user_prompt.clone(),
                request.temperature.to_bits(),
            )
        })
    }

    fn cached(&self, key: &ResponseKey) -> Option<String> {
        let cache = self.response_cache.as_ref()?;
        cache.lock().ok()?.get(key)
    }

    fn remember(&self, key: ResponseKey, content: &str) {
        if let Some(cache) = self.response_cache.as_ref() {
            if let Ok(mut cache) = cache.lock() {
                cache.insert(key, content.to_string());
            }
        }
    }

    fn map_send_error(&self, e: reqwest::Error, timeout: Duration, url: &str) -> ExtractError {
        if e.is_timeout() {
            error!("⏱️ LLM 請求逾時 ({}s)", timeout.as_secs());
            ExtractError::LlmTimeoutError {
                seconds: timeout.as_secs(),
            }
        } else if e.is_connect() {
            error!("❌ 無法連線到 LLM 伺服器: {}", e);
            ExtractError::LlmServiceError {
                message: format!("Failed to connect to LLM server at {}: {}", url, e),
            }
        } else {
            ExtractError::HttpError(e)
        }
    }

    /// Sends one chat-completion request and returns the trimmed content.
    pub async fn get_completion(&self, request: &CompletionRequest) -> Result<String> {
        let key = Self::cache_key(request);
        if let Some(hit) = key.as_ref().and_then(|k| self.cached(k)) {
            debug!("💾 使用快取的 LLM 回應");
            return Ok(hit);
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let timeout = request.timeout.unwrap_or(self.timeout);
        let payload = json!({
            "model": self.model,
            "messages": request.messages(),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "stream": false,
            "response_format": {"type": "json_object"},
        });

        debug!("📤 送出 LLM 請求: {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, timeout, &url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ LLM 伺服器回應錯誤 {}: {}", status, body);
            return Err(ExtractError::LlmServiceError {
                message: format!("LLM server returned error: {}", status.as_u16()),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(e, timeout, &url))?;
        let envelope: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| ExtractError::LlmServiceError {
                message: format!("Invalid JSON response from LLM: {}", e),
            })?;

        let choice = envelope
            .choices
            .and_then(|choices| choices.into_iter().next())
            .ok_or_else(|| ExtractError::LlmServiceError {
                message: "Malformed LLM response: missing choices".to_string(),
            })?;
        let message = choice.message.ok_or_else(|| ExtractError::LlmServiceError {
            message: "Malformed LLM response: missing message".to_string(),
        })?;

        let content = message.content.unwrap_or_default().trim().to_string();
        if content.is_empty() {
            warn!("⚠️ LLM 回應內容為空");
        } else if let Some(key) = key {
            self.remember(key, &content);
        }

        debug!("📥 LLM 回應 {} 字元", content.chars().count());
        Ok(content)
    }

    /// GET `/v1/models` answers 200.
    pub async fn check_available(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                warn!("⚠️ LLM 伺服器無法使用: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.get_completion(request).await
    }

    async fn is_available(&self) -> bool {
        self.check_available().await
    }
}
