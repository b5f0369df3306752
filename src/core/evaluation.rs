use crate::core::pipeline::{PredictOptions, PredictionPipeline};
use crate::domain::model::{PredictRequest, DEFAULT_EXPENSE_TYPE};
use crate::domain::ports::CompletionClient;
use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

const UTF8_BOM: char = '\u{feff}';

/// One labelled row of an evaluation dataset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelledExample {
    pub text: String,
    pub amount_vnd: i64,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRow {
    pub text: String,
    pub expected_amount: i64,
    pub predicted_amount: i64,
    pub expected_category: String,
    pub predicted_category: String,
    pub expected_type: String,
    pub predicted_type: String,
    pub confidence: f64,
    pub amount_match: bool,
    pub category_match: bool,
    pub type_match: bool,
    pub latency_ms: u64,
    pub error: String,
}

impl EvaluationRow {
    pub fn all_match(&self) -> bool {
        self.amount_match && self.category_match && self.type_match
    }

    pub fn failed(&self) -> bool {
        !self.error.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub total: usize,
    pub amount_correct: usize,
    pub category_correct: usize,
    pub type_correct: usize,
    pub all_correct: usize,
    pub failures: usize,
    pub mean_confidence: f64,
    pub mean_latency_ms: f64,
}

fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

impl EvaluationSummary {
    pub fn amount_accuracy(&self) -> f64 {
        ratio(self.amount_correct, self.total)
    }

    pub fn category_accuracy(&self) -> f64 {
        ratio(self.category_correct, self.total)
    }

    pub fn type_accuracy(&self) -> f64 {
        ratio(self.type_correct, self.total)
    }

    pub fn overall_accuracy(&self) -> f64 {
        ratio(self.all_correct, self.total)
    }
}

pub fn load_dataset<P: AsRef<Path>>(path: P, limit: Option<usize>) -> Result<Vec<LabelledExample>> {
    let content = std::fs::read_to_string(&path)?;
    load_dataset_from_str(&content, limit)
}

/// Parses a CSV with header `text,amount_vnd,category,type`. A leading BOM
/// is ignored and the label "Chi tiêu" is read as "Chi phí".
pub fn load_dataset_from_str(content: &str, limit: Option<usize>) -> Result<Vec<LabelledExample>> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut examples = Vec::new();
    for record in reader.deserialize::<LabelledExample>() {
        if limit.is_some_and(|limit| examples.len() >= limit) {
            break;
        }
        let mut example = record?;
        if example.kind == "Chi tiêu" {
            example.kind = DEFAULT_EXPENSE_TYPE.to_string();
        }
        examples.push(example);
    }

    Ok(examples)
}

/// Sorted distinct categories of a dataset.
pub fn dataset_categories(examples: &[LabelledExample]) -> Vec<String> {
    let mut categories: Vec<String> = examples.iter().map(|e| e.category.clone()).collect();
    categories.sort();
    categories.dedup();
    categories
}

pub fn labels_match(expected: &str, predicted: &str) -> bool {
    expected.trim().to_lowercase() == predicted.trim().to_lowercase()
}

pub fn summarize(rows: &[EvaluationRow]) -> EvaluationSummary {
    let total = rows.len();
    if total == 0 {
        return EvaluationSummary::default();
    }

    EvaluationSummary {
        total,
        amount_correct: rows.iter().filter(|r| r.amount_match).count(),
        category_correct: rows.iter().filter(|r| r.category_match).count(),
        type_correct: rows.iter().filter(|r| r.type_match).count(),
        all_correct: rows.iter().filter(|r| r.all_match()).count(),
        failures: rows.iter().filter(|r| r.failed()).count(),
        mean_confidence: rows.iter().map(|r| r.confidence).sum::<f64>() / total as f64,
        mean_latency_ms: rows.iter().map(|r| r.latency_ms as f64).sum::<f64>() / total as f64,
    }
}

pub fn write_results<P: AsRef<Path>>(path: P, rows: &[EvaluationRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Runs every example through the pipeline. Failures are recorded in the
/// row's `error` column and never abort the run.
pub async fn evaluate<C: CompletionClient>(
    pipeline: &PredictionPipeline<C>,
    examples: &[LabelledExample],
    categories: &[String],
    options: &PredictOptions,
) -> (Vec<EvaluationRow>, EvaluationSummary) {
    let mut rows = Vec::with_capacity(examples.len());

    for (index, example) in examples.iter().enumerate() {
        let started = Instant::now();
        let outcome = match PredictRequest::new(example.text.as_str(), categories.to_vec()) {
            Ok(request) => pipeline.predict(&request, options).await,
            Err(e) => Err(e),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let row = match outcome {
            Ok(response) => EvaluationRow {
                text: example.text.clone(),
                expected_amount: example.amount_vnd,
                predicted_amount: response.amount,
                expected_category: example.category.clone(),
                amount_match: response.amount == example.amount_vnd,
                category_match: labels_match(&example.category, &response.category),
                type_match: labels_match(&example.kind, &response.kind),
                predicted_category: response.category,
                expected_type: example.kind.clone(),
                predicted_type: response.kind,
                confidence: response.confidence,
                latency_ms,
                error: String::new(),
            },
            Err(e) => {
                warn!("⚠️ 第 {} 筆評估失敗: {}", index + 1, e);
                EvaluationRow {
                    text: example.text.clone(),
                    expected_amount: example.amount_vnd,
                    predicted_amount: 0,
                    expected_category: example.category.clone(),
                    predicted_category: String::new(),
                    expected_type: example.kind.clone(),
                    predicted_type: String::new(),
                    confidence: 0.0,
                    amount_match: false,
                    category_match: false,
                    type_match: false,
                    latency_ms,
                    error: e.to_string(),
                }
            }
        };

        let status = if row.all_match() { "✅" } else { "❌" };
        info!("[{:>3}] {} {}", index + 1, status, example.text);
        rows.push(row);
    }

    let summary = summarize(&rows);
    info!(
        "📊 評估完成: {} 筆, 整體正確率 {:.2}%",
        summary.total,
        summary.overall_accuracy() * 100.0
    );
    (rows, summary)
}
