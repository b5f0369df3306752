pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::llm_client::LlmClient;
pub use config::Settings;
pub use core::pipeline::{PredictOptions, PredictionPipeline};
pub use domain::model::{PredictRequest, PredictionResponse};
pub use utils::error::{ExtractError, Result};
