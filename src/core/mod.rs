pub mod cleaner;
pub mod evaluation;
pub mod fixer;
pub mod heuristics;
pub mod normalizer;
pub mod pipeline;
pub mod postprocess;
pub mod validator;

pub use crate::domain::model::{Prediction, PredictionResponse, TransactionCandidate};
pub use crate::domain::ports::CompletionClient;
pub use crate::utils::error::Result;
