//! Gemini embedding and generation over the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{ModelErrorKind, RagError, Result};
use crate::llm::{LanguageModel, TextStream};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROVIDER: &str = "Gemini";

/// Default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-flash";
/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Classify an unsuccessful HTTP status.
pub fn kind_for_status(status: StatusCode) -> ModelErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ModelErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelErrorKind::Auth,
        s if s.is_server_error() => ModelErrorKind::Server,
        _ => ModelErrorKind::Invalid,
    }
}

/// Outcome of one HTTP call before it is attributed to a provider error.
type CallResult<T> = std::result::Result<T, (ModelErrorKind, String)>;

fn kind_for_transport(error: &reqwest::Error) -> ModelErrorKind {
    if error.is_decode() { ModelErrorKind::Invalid } else { ModelErrorKind::Network }
}

/// Shared HTTP plumbing for both providers.
#[derive(Clone)]
struct Endpoint {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl Endpoint {
    fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn post(&self, method: &str) -> RequestBuilder {
        let url = format!("{}/models/{}:{method}", self.base_url.trim_end_matches('/'), self.model);
        self.http.post(url).header("x-goog-api-key", &self.api_key)
    }

    /// Send a request, turning transport failures and error statuses into `(kind, message)`.
    async fn send(&self, request: RequestBuilder) -> CallResult<Response> {
        let response =
            request.send().await.map_err(|e| (kind_for_transport(&e), e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err((kind_for_status(status), format!("HTTP {}: {}", status.as_u16(), body.trim())))
    }

    async fn post_json<B, T>(&self, method: &str, body: &B) -> CallResult<T>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let response = self.send(self.post(method).json(body)).await?;
        response.json::<T>().await.map_err(|e| (kind_for_transport(&e), e.to_string()))
    }
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> Content<'a> {
    fn text(role: Option<&'a str>, text: &'a str) -> Self {
        Self { role, parts: [Part { text }] }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'a str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Embedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Embedding>,
}

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// Single texts are embedded as retrieval queries and batches as retrieval
/// documents, so chunk and question vectors come from the matching task types.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::new("your-api-key");
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct GeminiEmbeddingProvider {
    endpoint: Endpoint,
    model_path: String,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Dimensions of `text-embedding-004`.
    const DEFAULT_DIMENSIONS: usize = 768;

    /// Create a provider for the default `text-embedding-004` model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, DEFAULT_EMBEDDING_MODEL, Self::DEFAULT_DIMENSIONS)
    }

    /// Create a provider for another embedding model.
    pub fn with_model(
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        let endpoint = Endpoint::new(api_key, model);
        let model_path = format!("models/{}", endpoint.model);
        Self { endpoint, model_path, dimensions }
    }

    /// Point the provider at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint.base_url = base_url.into();
        self
    }

    fn failure(&self, (kind, message): (ModelErrorKind, String)) -> RagError {
        error!(
            provider = PROVIDER,
            model = %self.endpoint.model,
            %kind,
            error = %message,
            "embedding request failed"
        );
        RagError::EmbeddingError { provider: PROVIDER.into(), kind, message }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");
        let request = EmbedRequest {
            model: &self.model_path,
            content: Content::text(None, text),
            task_type: "RETRIEVAL_QUERY",
        };
        let response: EmbedResponse =
            self.endpoint.post_json("embedContent", &request).await.map_err(|e| self.failure(e))?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, batch_size = texts.len(), "embedding batch");

        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: &self.model_path,
                    content: Content::text(None, text),
                    task_type: "RETRIEVAL_DOCUMENT",
                })
                .collect(),
        };
        let response: BatchEmbedResponse = self
            .endpoint
            .post_json("batchEmbedContents", &request)
            .await
            .map_err(|e| self.failure(e))?;
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

/// A [`LanguageModel`] backed by Gemini `generateContent`.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::gemini::GeminiModel;
///
/// let model = GeminiModel::new("your-api-key");
/// let answer = model.complete("Say hello").await?;
/// ```
#[derive(Clone)]
pub struct GeminiModel {
    endpoint: Endpoint,
    temperature: f32,
}

impl GeminiModel {
    /// Create a client for the default `gemini-1.5-flash` model at temperature 0.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, DEFAULT_CHAT_MODEL)
    }

    /// Create a client for another model.
    pub fn with_model(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self { endpoint: Endpoint::new(api_key, model), temperature: 0.0 }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Point the client at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint.base_url = base_url.into();
        self
    }

    fn request<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: [Content::text(Some("user"), prompt)],
            generation_config: GenerationConfig { temperature: self.temperature },
        }
    }
}

fn model_error((kind, message): (ModelErrorKind, String)) -> RagError {
    error!(provider = PROVIDER, %kind, error = %message, "generation request failed");
    RagError::ModelError { provider: PROVIDER.into(), kind, message }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn name(&self) -> &str {
        &self.endpoint.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(
            provider = PROVIDER,
            model = %self.endpoint.model,
            prompt_len = prompt.len(),
            "generating"
        );
        let response: GenerateResponse = self
            .endpoint
            .post_json("generateContent", &self.request(prompt))
            .await
            .map_err(model_error)?;
        Ok(response.text())
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        debug!(
            provider = PROVIDER,
            model = %self.endpoint.model,
            prompt_len = prompt.len(),
            "streaming"
        );
        let request = self.endpoint.post("streamGenerateContent").query(&[("alt", "sse")]);
        let response =
            self.endpoint.send(request.json(&self.request(prompt))).await.map_err(model_error)?;

        let fragments = async_stream::stream! {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let parsed = event
                    .map_err(|e| model_error((ModelErrorKind::Network, e.to_string())))
                    .and_then(|event| {
                        serde_json::from_str::<GenerateResponse>(&event.data)
                            .map_err(|e| model_error((ModelErrorKind::Invalid, e.to_string())))
                    });
                match parsed {
                    Ok(chunk) => {
                        let text = chunk.text();
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(fragments))
    }
}
