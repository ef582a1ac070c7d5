use std::time::Duration;

use compliance_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Llm;
use crate::ollama::{model_call_error, OllamaClient};

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    timeout: Duration,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    stop: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl Llm for OllamaLlm {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        // Low temperature keeps answers close to the retrieved context.
        let req = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.1,
                top_p: 0.9,
                num_predict: 2048,
                stop: vec!["</response>"],
            },
        };

        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new("MODEL_GENERATION_FAILED", "Failed to encode generate request")
                .with_details(e.to_string())
        })?;
        let resp = ureq::post(&url)
            .timeout(self.timeout)
            .send_json(body)
            .map_err(|e| {
                model_call_error("MODEL_GENERATION_FAILED", "Failed to call generate endpoint", e)
            })?;

        let v: GenerateResponse = resp.into_json().map_err(|e| {
            AppError::new("MODEL_GENERATION_FAILED", "Failed to decode generate response")
                .with_details(e.to_string())
        })?;
        // Empty output is left to the response parser, which falls back per section.
        Ok(v.response)
    }
}
