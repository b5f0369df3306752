// Adapters layer: the HTTP model client and prompt construction.

pub mod llm_client;
pub mod prompts;
