use compliance_core::error::AppError;

pub mod ollama_embed;

pub use ollama_embed::OllamaEmbedder;

/// Text to vector encoder. Implementations must be deterministic: same model and input,
/// same vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;

    /// Encode many inputs in order. The default loops over [`Embedder::embed`].
    fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        inputs.iter().map(|input| self.embed(model, input)).collect()
    }
}

/// Check that every vector is non-empty and shares one dimension. Returns that dimension.
pub fn uniform_dims(vectors: &[Vec<f32>]) -> Result<Option<usize>, AppError> {
    let mut dims: Option<usize> = None;
    for (i, v) in vectors.iter().enumerate() {
        if v.is_empty() {
            return Err(AppError::new(
                "MODEL_EMBEDDINGS_FAILED",
                "Embedding vector was empty",
            )
            .with_details(format!("index={i}")));
        }
        match dims {
            Some(d) if d != v.len() => {
                return Err(AppError::new(
                    "CONFIG_EMBEDDING_DIMS_MISMATCH",
                    "Embedding dimension mismatch within one batch",
                )
                .with_details(format!("expected={d}; got={}; index={i}", v.len())));
            }
            Some(_) => {}
            None => dims = Some(v.len()),
        }
    }
    Ok(dims)
}
