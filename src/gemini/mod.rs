
use std::io::{BufRead, BufReader};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::{GenaiError, Result};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Client for the generative language REST API. All calls are blocking
/// round-trips; nothing here is retried beyond the transport-level policy
/// below.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    api_key: String,
    model: String,
    embedding_model: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

/// One piece of a prompt: plain text or inline binary data (e.g. an image)
/// with its mime type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(Blob),
}

impl Part {
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Part::Text(text.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    #[inline]
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    #[inline]
    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts,
        }
    }

    fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::InlineData(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(Content::text)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    content: &'a Content,
}

#[derive(Debug, Serialize)]
struct BatchEmbedEntry {
    model: String,
    content: Content,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<BatchEmbedEntry>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Serialize)]
struct CountTokensRequest<'a> {
    contents: &'a [Content],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub input_token_limit: Option<u64>,
    pub output_token_limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
    next_page_token: Option<String>,
}

impl Client {
    #[inline]
    pub fn new(config: &Config, api_key: String) -> Result<Self> {
        let base_url = config.api.base_url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.api.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            api_key,
            model: normalize_model(&config.api.model),
            embedding_model: normalize_model(&config.api.embedding_model),
            agent,
            retry_attempts: config.api.retry_attempts,
        })
    }

    /// Override the generation model for this invocation.
    #[inline]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = normalize_model(model);
        self
    }

    /// Override the embedding model for this invocation.
    #[inline]
    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = normalize_model(model);
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Generate a whole response for the given conversation.
    #[inline]
    pub fn generate(
        &self,
        contents: &[Content],
        system: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<String> {
        let url = self.model_url(&self.model, "generateContent")?;
        let request = GenerateRequest {
            contents,
            system_instruction: system.map(|s| Content {
                role: None,
                parts: vec![Part::text(s)],
            }),
            generation_config: temperature.map(|t| GenerationConfig { temperature: t }),
        };

        let response_text = self.post_with_retry(&url, &request)?;
        let response: GenerateResponse = parse_response(&response_text)?;
        Ok(response.text())
    }

    /// Generate a response as a stream of text fragments, invoking `sink`
    /// for each fragment as it arrives.
    #[inline]
    pub fn generate_stream<F>(
        &self,
        contents: &[Content],
        system: Option<&str>,
        temperature: Option<f32>,
        mut sink: F,
    ) -> Result<()>
    where
        F: FnMut(&str),
    {
        let mut url = self.model_url(&self.model, "streamGenerateContent")?;
        url.query_pairs_mut().append_pair("alt", "sse");

        let request = GenerateRequest {
            contents,
            system_instruction: system.map(|s| Content {
                role: None,
                parts: vec![Part::text(s)],
            }),
            generation_config: temperature.map(|t| GenerationConfig { temperature: t }),
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| GenaiError::Service(format!("failed to serialize request: {e}")))?;

        debug!("Streaming generation from {}", url);

        let mut response = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .send(&body)
            .map_err(map_transport_error)?;

        // Server-sent events: each JSON chunk arrives on a `data:` line.
        let reader = BufReader::new(response.body_mut().as_reader());
        for line in reader.lines() {
            let line = line.map_err(|e| GenaiError::Service(format!("stream error: {e}")))?;
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() {
                continue;
            }

            let chunk: GenerateResponse = parse_response(payload)?;
            let text = chunk.text();
            if !text.is_empty() {
                sink(&text);
            }
        }

        Ok(())
    }

    /// Count the tokens the model would see for the given conversation.
    #[inline]
    pub fn count_tokens(&self, contents: &[Content]) -> Result<u64> {
        let url = self.model_url(&self.model, "countTokens")?;
        let response_text = self.post_with_retry(&url, &CountTokensRequest { contents })?;
        let response: CountTokensResponse = parse_response(&response_text)?;
        Ok(response.total_tokens)
    }

    /// Embed a single piece of content.
    #[inline]
    pub fn embed_content(&self, text: &str) -> Result<Vec<f32>> {
        let url = self.model_url(&self.embedding_model, "embedContent")?;
        let content = Content {
            role: None,
            parts: vec![Part::text(text)],
        };

        let response_text = self.post_with_retry(&url, &EmbedRequest { content: &content })?;
        let response: EmbedResponse = parse_response(&response_text)?;

        if response.embedding.values.is_empty() {
            return Err(GenaiError::Service(
                "got no embedding back from model".to_string(),
            ));
        }
        Ok(response.embedding.values)
    }

    /// Embed a batch of texts in one request. The service must return
    /// exactly one vector per input, in input order.
    #[inline]
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.model_url(&self.embedding_model, "batchEmbedContents")?;
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| BatchEmbedEntry {
                    model: format!("models/{}", self.embedding_model),
                    content: Content {
                        role: None,
                        parts: vec![Part::text(text)],
                    },
                })
                .collect(),
        };

        let response_text = self.post_with_retry(&url, &request)?;
        let response: BatchEmbedResponse = parse_response(&response_text)?;

        if response.embeddings.len() != texts.len() {
            return Err(GenaiError::Service(format!(
                "expected {} embeddings for batch, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    /// List the models the service exposes, following pagination.
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self
                .base_url
                .join("models")
                .map_err(|e| GenaiError::Service(format!("failed to build models URL: {e}")))?;
            url.query_pairs_mut().append_pair("pageSize", "50");
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let response_text = self.get_with_retry(&url)?;
            let page: ModelsResponse = parse_response(&response_text)?;
            models.extend(page.models);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} models", models.len());
        Ok(models)
    }

    fn model_url(&self, model: &str, operation: &str) -> Result<Url> {
        self.base_url
            .join(&format!("models/{model}:{operation}"))
            .map_err(|e| GenaiError::Service(format!("failed to build request URL: {e}")))
    }

    fn post_with_retry<T: Serialize>(&self, url: &Url, request: &T) -> Result<String> {
        let body = serde_json::to_string(request)
            .map_err(|e| GenaiError::Service(format!("failed to serialize request: {e}")))?;

        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("x-goog-api-key", &self.api_key)
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn get_with_retry(&self, url: &Url) -> Result<String> {
        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .header("x-goog-api-key", &self.api_key)
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    /// Transient failures (transport errors, HTTP 5xx) are retried with
    /// exponential backoff; client errors are surfaced immediately.
    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                return Err(GenaiError::Service(format!(
                                    "service returned HTTP {status}"
                                )));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        return Err(map_transport_error(error));
                    }

                    last_error = Some(error);

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
        }

        Err(last_error.map_or_else(
            || GenaiError::Service("request failed after retries".to_string()),
            map_transport_error,
        ))
    }
}

fn map_transport_error(error: ureq::Error) -> GenaiError {
    match error {
        ureq::Error::StatusCode(status) => {
            GenaiError::Service(format!("service returned HTTP {status}"))
        }
        other => GenaiError::Service(format!("request error: {other}")),
    }
}

fn parse_response<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| GenaiError::Service(format!("failed to parse service response: {e}")))
}

/// Model names may be given with or without the `models/` prefix the API
/// uses in resource paths.
fn normalize_model(model: &str) -> String {
    model.strip_prefix("models/").unwrap_or(model).to_string()
}

impl crate::pipeline::Embedder for Client {
    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Client::embed_batch(self, texts)
    }
}
