//! Ollama Local Provider
//!
//! Transport for locally-running Ollama models via `/api/generate`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::openai::parse_retry_after;
use super::{GenerateOptions, LlmProvider, ProviderConfig, validate_endpoint};
use crate::constants::network as net_constants;
use crate::types::{AtlasError, ErrorClassifier, Result, TransportError};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3:latest";
const PROVIDER: &str = "ollama";

pub struct OllamaProvider {
    api_base: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_base = validate_endpoint(
            config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE),
            PROVIDER,
        )?;

        if let Ok(url) = url::Url::parse(&api_base)
            && let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
        {
            warn!(
                "Ollama endpoint is not localhost: {}. Ensure this is intentional.",
                host
            );
        }

        let model = config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(net_constants::CONNECTION_TIMEOUT_SECS))
            .build()
            .map_err(|e| AtlasError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_base,
            model,
            client,
        })
    }

    fn build_request(&self, prompt: &str, options: &GenerateOptions) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
            format: options.json.then(|| "json".to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        debug!(model = %self.model, "Generating with Ollama");

        let request = self.build_request(prompt, options);
        let url = format!("{}/api/generate", self.api_base);

        let response = self
            .client
            .post(&url)
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::unavailable(format!(
                        "Failed to connect to Ollama at {}. Is Ollama running? Start with: ollama serve",
                        self.api_base
                    ))
                    .provider(PROVIDER)
                } else {
                    ErrorClassifier::classify_request_error(&e, PROVIDER)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let mut err = ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("Ollama API error ({}): {}", status, body),
                PROVIDER,
            );
            if let Some(delay) = retry_after {
                err = err.retry_after(delay);
            }
            return Err(err.into());
        }

        let body: OllamaResponse = response.json().await.map_err(|e| {
            TransportError::unavailable(format!("Failed to decode Ollama response: {}", e))
                .provider(PROVIDER)
        })?;

        debug!(
            prompt_tokens = body.prompt_eval_count.unwrap_or(0),
            completion_tokens = body.eval_count.unwrap_or(0),
            "Ollama call completed"
        );

        Ok(body.response)
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.api_base);

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(net_constants::CONNECTION_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let tags = resp.json::<OllamaTagsResponse>().await.map_err(|e| {
                    TransportError::unavailable(format!("Invalid Ollama tags response: {}", e))
                        .provider(PROVIDER)
                })?;
                let base = self.model.trim_end_matches(":latest");
                let model_available = tags
                    .models
                    .iter()
                    .any(|m| m.name == self.model || m.name.starts_with(base));

                if model_available {
                    info!("Ollama is available with model: {}", self.model);
                } else {
                    warn!(
                        "Ollama is running but model '{}' not found. Pull with: ollama pull {}",
                        self.model, self.model
                    );
                }
                Ok(model_available)
            }
            Ok(resp) => {
                warn!("Ollama check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Ollama check failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint_and_model() {
        let p = OllamaProvider::new(ProviderConfig::default()).unwrap();
        assert_eq!(p.api_base, "http://localhost:11434");
        assert_eq!(p.model(), "llama3:latest");
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let config = ProviderConfig {
            api_base: Some("file:///etc/passwd".into()),
            ..Default::default()
        };
        assert!(OllamaProvider::new(config).is_err());
    }

    #[test]
    fn test_request_format() {
        let p = OllamaProvider::new(ProviderConfig::default()).unwrap();
        let req = p.build_request("hello", &GenerateOptions::default());
        assert_eq!(req.format.as_deref(), Some("json"));
        assert!(!req.stream);
        let req = p.build_request("hello", &GenerateOptions::default().text());
        assert!(req.format.is_none());
    }
}
