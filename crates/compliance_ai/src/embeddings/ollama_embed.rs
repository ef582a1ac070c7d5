use std::time::Duration;

use compliance_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::ollama::{model_call_error, OllamaClient};

const MAX_INPUT_BYTES: usize = 12_000;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct EmbedBatchRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedBatchResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Longest prefix of `input` that fits the request bound without splitting a character.
fn bounded(input: &str) -> &str {
    if input.len() <= MAX_INPUT_BYTES {
        return input;
    }
    let mut end = MAX_INPUT_BYTES;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

fn encode<T: Serialize>(req: &T) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(req).map_err(|e| {
        AppError::new("MODEL_EMBEDDINGS_FAILED", "Failed to encode embeddings request")
            .with_details(e.to_string())
    })
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let url = format!("{}/api/embeddings", self.client.base_url());
        let req = EmbeddingsRequest {
            model,
            prompt: bounded(input),
        };
        let resp = ureq::post(&url)
            .timeout(Duration::from_secs(10))
            .send_json(encode(&req)?)
            .map_err(|e| {
                model_call_error("MODEL_EMBEDDINGS_FAILED", "Failed to call embeddings endpoint", e)
            })?;

        let v: EmbeddingsResponse = resp.into_json().map_err(|e| {
            AppError::new("MODEL_EMBEDDINGS_FAILED", "Failed to decode embeddings response")
                .with_details(e.to_string())
        })?;
        if v.embedding.is_empty() {
            return Err(AppError::new(
                "MODEL_EMBEDDINGS_FAILED",
                "Embeddings response was empty",
            ));
        }
        Ok(v.embedding)
    }

    fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.client.base_url());
        let req = EmbedBatchRequest {
            model,
            input: inputs.iter().map(|s| bounded(s)).collect(),
        };
        let resp = ureq::post(&url)
            .timeout(Duration::from_secs(60))
            .send_json(encode(&req)?)
            .map_err(|e| {
                model_call_error("MODEL_EMBEDDINGS_FAILED", "Failed to call batch embed endpoint", e)
            })?;

        let v: EmbedBatchResponse = resp.into_json().map_err(|e| {
            AppError::new("MODEL_EMBEDDINGS_FAILED", "Failed to decode batch embed response")
                .with_details(e.to_string())
        })?;
        if v.embeddings.len() != inputs.len() {
            return Err(AppError::new(
                "MODEL_EMBEDDINGS_FAILED",
                "Batch embed returned a different number of vectors than inputs",
            )
            .with_details(format!(
                "inputs={}; vectors={}",
                inputs.len(),
                v.embeddings.len()
            )));
        }
        Ok(v.embeddings)
    }
}
