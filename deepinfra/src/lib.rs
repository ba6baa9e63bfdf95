//! Minimal DeepInfra API client.
//!
//! This crate provides a focused client for DeepInfra's inference API with:
//! - Chat completions over the OpenAI-compatible endpoint
//! - Optional JSON-object response format for structured output
//! - One-shot image generation returning decoded PNG bytes
//!
//! The client holds no request-scoped state. Build it once and share it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.deepinfra.com";
const CHAT_PATH: &str = "/v1/openai/chat/completions";
const IMAGE_PATH: &str = "/v1/inference/black-forest-labs/FLUX-1-dev";
const DEFAULT_MODEL: &str = "meta-llama/Llama-4-Maverick-17B-128E-Instruct-FP8";
const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Generative latency is long; the default allows two and a half minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(150);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when using the DeepInfra client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response contained no assistant content")]
    EmptyContent,
}

impl Error {
    /// Whether the error was caused by the caller rather than the service.
    ///
    /// Caller errors will fail the same way on every attempt, so they are
    /// never worth retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::NoApiKey | Error::Config(_) | Error::InvalidRequest(_)
        )
    }
}

/// Process-wide client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address of the API, without a trailing path.
    pub base_url: String,

    /// Bearer credential.
    pub api_key: String,

    /// Text generation model identifier.
    pub model: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with the given API key and default settings.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Read configuration from the environment.
    ///
    /// `DEEPINFRA_API_KEY` is required. `DEEPINFRA_URL`, `DEEPINFRA_MODEL`
    /// and `DEEPINFRA_TIMEOUT_SECS` override the defaults when set.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("DEEPINFRA_API_KEY").map_err(|_| Error::NoApiKey)?;
        let mut config = Self::new(api_key);

        if let Ok(url) = std::env::var("DEEPINFRA_URL") {
            config = config.with_base_url(url);
        }
        if let Ok(model) = std::env::var("DEEPINFRA_MODEL") {
            config = config.with_model(model);
        }
        if let Ok(secs) = std::env::var("DEEPINFRA_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| Error::Config(format!("DEEPINFRA_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// DeepInfra API client.
#[derive(Clone)]
pub struct DeepInfra {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeepInfra {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Self::from_config(ClientConfig::new(api_key))
    }

    /// Create a client from an explicit configuration.
    pub fn from_config(config: ClientConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create a client from the DEEPINFRA_* environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_config(ClientConfig::from_env()?)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// The default text model.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a chat completion request and return the first choice.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        request.validate()?;

        let api_request = self.build_api_request(&request);
        let headers = self.build_headers()?;

        tracing::debug!(
            model = %api_request.model,
            messages = api_request.messages.len(),
            json = request.response_format == ResponseFormat::JsonObject,
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(self.url(CHAT_PATH))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Self::parse_response(api_response)
    }

    /// Generate an image and return the decoded PNG.
    ///
    /// This is a single request; there is no retry.
    pub async fn generate_image(&self, request: ImageRequest) -> Result<ImageAsset, Error> {
        request.validate()?;
        let headers = self.build_headers()?;

        tracing::debug!(
            width = request.width,
            height = request.height,
            "Sending image generation request"
        );

        let response = self
            .client
            .post(self.url(IMAGE_PATH))
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiImageResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let encoded = api_response
            .images
            .first()
            .ok_or_else(|| Error::Parse("Response contained no images".to_string()))?;

        Ok(ImageAsset {
            png: decode_png_data_uri(encoded)?,
            seed: api_response.seed,
            nsfw_content_detected: api_response
                .nsfw_content_detected
                .first()
                .copied()
                .unwrap_or(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request<'a>(&'a self, request: &'a Request) -> ApiRequest<'a> {
        ApiRequest {
            model: request.model.as_deref().unwrap_or(&self.config.model),
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            response_format: match request.response_format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(ApiResponseFormat {
                    r#type: "json_object",
                }),
            },
        }
    }

    fn parse_response(api_response: ApiResponse) -> Result<Response, Error> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or(Error::EmptyContent)?;

        let content = match choice.message.content {
            Some(content) if !content.trim().is_empty() => content,
            _ => return Err(Error::EmptyContent),
        };

        tracing::debug!(content = %content, "Received assistant content");

        Ok(Response {
            id: api_response.id,
            model: api_response.model,
            content,
            finish_reason: choice.finish_reason,
            usage: api_response.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}

/// Strip the PNG data-URI prefix and decode the payload.
fn decode_png_data_uri(encoded: &str) -> Result<Vec<u8>, Error> {
    let data = encoded
        .strip_prefix(PNG_DATA_URI_PREFIX)
        .ok_or_else(|| Error::Parse("Image content is not a base64 PNG data URI".to_string()))?;

    BASE64
        .decode(data)
        .map_err(|e| Error::Parse(format!("Invalid base64 image data: {e}")))
}

// ============================================================================
// Public types
// ============================================================================

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub top_p: f32,
    pub response_format: ResponseFormat,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            temperature: 1.0,
            top_p: 1.0,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Ask for a schema-constrained JSON object response.
    pub fn with_json_output(mut self) -> Self {
        self.response_format = ResponseFormat::JsonObject;
        self
    }

    /// Check the request before it is sent.
    pub fn validate(&self) -> Result<(), Error> {
        if self.messages.is_empty() {
            return Err(Error::InvalidRequest("No messages to send".to_string()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(Error::InvalidRequest(format!(
                "Temperature {} is outside [0, 1]",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(Error::InvalidRequest(format!(
                "top_p {} is outside [0, 1]",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// Output format requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// The first choice of a completion response.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: Option<String>,
    pub model: Option<String>,
    /// The assistant message text. Never empty.
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// An image generation request.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            prompt: prompt.into(),
            width,
            height,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidRequest("Image prompt is empty".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidRequest(format!(
                "Image size {}x{} is empty",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// A generated image.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    /// Decoded PNG bytes.
    pub png: Vec<u8>,
    pub seed: Option<i64>,
    pub nsfw_content_detected: bool,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ApiResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiImageResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    nsfw_content_detected: Vec<bool>,
    #[serde(default)]
    seed: Option<i64>,
}
