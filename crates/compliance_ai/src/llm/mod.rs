use compliance_core::error::AppError;

pub mod ollama_llm;

pub use ollama_llm::OllamaLlm;

/// Single-shot text generation. The core calls this exactly once per query and never retries.
pub trait Llm: Send + Sync {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError>;
}
