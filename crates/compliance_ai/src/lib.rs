pub mod chunking;
pub mod embeddings;
pub mod engine;
pub mod guardrails;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod mapping;
pub mod ollama;
pub mod retrieve;
pub mod synth;

pub use engine::{ComplianceEngine, HealthReport, IndexStats};
