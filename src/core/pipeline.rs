use crate::adapters::prompts::{PromptBuilder, PromptMode};
use crate::config::settings::Settings;
use crate::core::fixer::type_for_kind;
use crate::core::heuristics::{preprocess_transaction, Preprocessed, HINT_CONFIDENCE_THRESHOLD};
use crate::core::postprocess::process_llm_response;
use crate::core::validator::{Field, ValidationReport};
use crate::domain::model::{
    DomainVocabulary, HealthCheckResponse, PredictRequest, Prediction, PredictionResponse,
    ValidationConstraints,
};
use crate::domain::ports::{CompletionClient, CompletionRequest};
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-call switches.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictOptions {
    /// Repair invalid records; when false they are returned as the model gave them.
    pub fix_invalid: bool,
    /// Let the model split one text into several transactions.
    pub multi_transaction: bool,
    /// Without requested categories, use the configured defaults instead of
    /// leaving the category set unconstrained.
    pub use_default_categories: bool,
    pub timeout: Option<Duration>,
    /// Overrides `output.debug`.
    pub include_raw_output: Option<bool>,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            fix_invalid: true,
            multi_transaction: false,
            use_default_categories: false,
            timeout: None,
            include_raw_output: None,
        }
    }
}

/// normalize → hints → prompts → model → clean/parse/validate/fix → hint override.
pub struct PredictionPipeline<C: CompletionClient> {
    client: C,
    prompts: PromptBuilder,
    settings: Arc<Settings>,
}

impl<C: CompletionClient> PredictionPipeline<C> {
    pub fn new(client: C, settings: Arc<Settings>) -> Self {
        Self {
            client,
            prompts: PromptBuilder::new(settings.app.prompt_cache_size),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn vocabulary_for(&self, categories: &[String], options: &PredictOptions) -> DomainVocabulary {
        self.settings
            .vocabulary(categories, options.use_default_categories)
    }

    pub async fn predict(
        &self,
        request: &PredictRequest,
        options: &PredictOptions,
    ) -> Result<PredictionResponse> {
        let vocabulary = self.vocabulary_for(&request.categories, options);
        let hints = preprocess_transaction(&request.text);
        info!("🔍 處理交易: '{}'", hints.normalized);
        debug!(
            "💡 啟發式提示: type={:?}, amount={:?}",
            hints.kind_hint, hints.amount_hint
        );

        let mode = if options.multi_transaction {
            PromptMode::Multi
        } else {
            PromptMode::Single
        };
        let prompts = self
            .prompts
            .build(&hints.normalized, vocabulary.categories(), mode);

        let completion = CompletionRequest {
            system_prompt: prompts.system,
            user_prompt: prompts.user,
            temperature: self.settings.llm.temperature,
            max_tokens: Some(self.settings.llm.max_tokens),
            timeout: options.timeout,
        };
        let raw_output = self.client.complete(&completion).await?;
        debug!("📥 模型原始輸出: {}", raw_output);

        let constraints = &self.settings.validation;
        let outcome =
            process_llm_response(&raw_output, &vocabulary, constraints, options.fix_invalid);

        let (prediction, validation_errors) = if options.fix_invalid {
            let prediction = apply_hints(
                outcome.prediction,
                &outcome.report,
                &hints,
                &vocabulary,
                constraints,
            );
            (prediction, None)
        } else {
            let mut errors = outcome.report.messages();
            if let Some(parse_error) = outcome.parse_error {
                errors.insert(0, parse_error);
            }
            (outcome.prediction, (!errors.is_empty()).then_some(errors))
        };

        info!(
            "✅ 預測結果: amount={}, category='{}', type='{}', confidence={:.2}",
            prediction.amount(),
            prediction.category(),
            prediction.kind(),
            prediction.confidence()
        );

        let include_raw = options
            .include_raw_output
            .unwrap_or(self.settings.output.debug);
        let mut response =
            PredictionResponse::from_prediction(prediction, include_raw.then_some(raw_output));
        response.validation_errors = validation_errors;
        Ok(response)
    }

    /// Convenience wrapper: validates the text and sends no categories.
    pub async fn predict_text(
        &self,
        text: &str,
        options: &PredictOptions,
    ) -> Result<PredictionResponse> {
        let request = PredictRequest::new(text, Vec::new())?;
        self.predict(&request, options).await
    }

    /// Runs every text independently. A failed text yields a zero-confidence
    /// row carrying the error in `raw_output`; the batch itself never fails.
    pub async fn predict_batch(
        &self,
        texts: &[String],
        categories: &[String],
        options: &PredictOptions,
    ) -> Vec<PredictionResponse> {
        let fallback = self
            .vocabulary_for(categories, options)
            .fallback_category()
            .to_string();
        let mut results = Vec::with_capacity(texts.len());

        for (index, text) in texts.iter().enumerate() {
            let outcome = match PredictRequest::new(text.as_str(), categories.to_vec()) {
                Ok(request) => self.predict(&request, options).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(response) => results.push(response),
                Err(e) => {
                    warn!("⚠️ 批次第 {} 筆失敗: {}", index + 1, e);
                    results.push(PredictionResponse::failed(&fallback, &e));
                }
            }
        }

        results
    }

    pub async fn health(&self) -> HealthCheckResponse {
        let llm_available = self.client.is_available().await;
        HealthCheckResponse {
            status: if llm_available { "healthy" } else { "degraded" }.to_string(),
            llm_available,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Falls back to the text heuristics when the model's answer is weak.
///
/// A single record is patched when it is a fallback, its confidence is below
/// [`HINT_CONFIDENCE_THRESHOLD`], or its amount/type was invalid: a zero
/// amount takes the heuristic amount, the type takes the heuristic kind.
/// A multi-transaction envelope only has its aggregate type patched.
pub fn apply_hints(
    prediction: Prediction,
    report: &ValidationReport,
    hints: &Preprocessed,
    vocabulary: &DomainVocabulary,
    constraints: &ValidationConstraints,
) -> Prediction {
    let hinted_kind = hints
        .kind_hint
        .and_then(|kind| type_for_kind(kind, vocabulary));

    match prediction {
        Prediction::Single(mut candidate) => {
            let low_confidence = candidate.fallback
                || candidate.confidence < HINT_CONFIDENCE_THRESHOLD;
            let amount_invalid = report.has_violation(Field::Amount);
            let type_invalid = report.has_violation(Field::Type);

            if !(low_confidence || amount_invalid || type_invalid) {
                return Prediction::Single(candidate);
            }

            if candidate.amount == 0 {
                if let Some(amount) = hints
                    .amount_hint
                    .filter(|a| *a > 0 && constraints.amount_in_range(*a as f64))
                {
                    debug!("💡 以文字金額取代: {}", amount);
                    candidate.amount = amount;
                }
            }

            if low_confidence || type_invalid {
                if let Some(kind) = hinted_kind {
                    if kind != candidate.kind {
                        debug!("💡 以文字判斷類型取代: '{}' -> '{}'", candidate.kind, kind);
                    }
                    candidate.kind = kind;
                }
            }

            Prediction::Single(candidate)
        }
        Prediction::Multi(mut multi) => {
            if multi.confidence < HINT_CONFIDENCE_THRESHOLD {
                if let Some(kind) = hinted_kind {
                    multi.kind = kind;
                }
            }
            Prediction::Multi(multi)
        }
    }
}
