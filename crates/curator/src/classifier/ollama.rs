//! Classifier backed by an Ollama `/api/generate` endpoint.
//!
//! The model is asked a yes/no question about the item. The verdict is read
//! from the first sentence of the reply; the whole reply becomes the
//! diagnostic.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Classifier, ClassifyError, Verdict};

const USER_AGENT: &str = concat!("curator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub prompt_prefix: String,
    pub request_timeout: Duration,
    /// Idle connections kept per host; match this to the concurrency cap.
    pub max_idle_connections: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            prompt_prefix: "is this word obscure or uncommon, true or false? here is the word:"
                .to_string(),
            request_timeout: Duration::from_secs(60),
            max_idle_connections: 100,
        }
    }
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prompt_prefix = prefix.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_idle_connections(mut self, n: usize) -> Self {
        self.max_idle_connections = n;
        self
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaClassifier {
    config: OllamaConfig,
    endpoint: String,
    client: reqwest::Client,
}

impl OllamaClassifier {
    pub fn new(config: OllamaConfig) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .build()
            .map_err(|e| ClassifyError::Transport(format!("failed to build HTTP client: {e}")))?;

        let endpoint = format!("{}/api/generate", config.base_url.trim_end_matches('/'));

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(&self, item: &str) -> GenerateRequest<'_> {
        GenerateRequest {
            model: &self.config.model,
            prompt: format!("{} {}", self.config.prompt_prefix, item),
            stream: false,
        }
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ClassifyError {
        if e.is_timeout() {
            ClassifyError::Timeout(self.config.request_timeout)
        } else {
            ClassifyError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(&self, item: &str) -> Result<Verdict, ClassifyError> {
        let request = self.build_request(item);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ClassifyError::Timeout(self.config.request_timeout)
            } else {
                ClassifyError::Parse(e.to_string())
            }
        })?;

        tracing::trace!(%item, response = %body.response, "Classifier replied");

        match parse_verdict(&body.response) {
            Some(positive) => Ok(Verdict::new(positive, body.response)),
            None => Err(ClassifyError::Parse(body.response)),
        }
    }
}

/// Read a boolean from the first sentence of a model reply.
///
/// Accepts `true`/`false`, `t`/`f` and `1`/`0`, case-insensitively.
pub fn parse_verdict(response: &str) -> Option<bool> {
    let head = response.split('.').next().unwrap_or_default().trim();
    match head.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}
