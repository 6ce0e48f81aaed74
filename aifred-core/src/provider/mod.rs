use async_trait::async_trait;
use reqwest::{Client, Request, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::secret::Secret;
use crate::tool::BuiltinTool;

// Include the provider-specific modules
pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod openrouter;
pub mod perplexity;

/// Registered provider identifiers, in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Perplexity,
    Gemini,
    OpenRouter,
}

impl ProviderId {
    /// Every provider, in the order model prefixes are matched
    pub const ALL: [ProviderId; 5] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Perplexity,
        ProviderId::Gemini,
        ProviderId::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Perplexity => "perplexity",
            ProviderId::Gemini => "gemini",
            ProviderId::OpenRouter => "openrouter",
        }
    }

    /// Human-readable vendor name used in error text
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "OpenAI",
            ProviderId::Anthropic => "Anthropic",
            ProviderId::Perplexity => "Perplexity",
            ProviderId::Gemini => "Gemini",
            ProviderId::OpenRouter => "OpenRouter",
        }
    }

    /// Lowercase model-name prefixes that identify this provider
    pub fn model_prefixes(&self) -> &'static [&'static str] {
        match self {
            ProviderId::OpenAi => &["gpt-", "o1", "o3", "o4", "chatgpt-"],
            ProviderId::Anthropic => &["claude-"],
            ProviderId::Perplexity => &["sonar", "pplx-"],
            ProviderId::Gemini => &["gemini-"],
            ProviderId::OpenRouter => &[
                "openrouter/",
                "openai/",
                "anthropic/",
                "google/",
                "meta-llama/",
                "mistralai/",
                "deepseek/",
                "qwen/",
            ],
        }
    }

    /// Primary environment variable holding this provider's API key
    pub fn credential_env(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "OPENAI_API_KEY",
            ProviderId::Anthropic => "ANTHROPIC_API_KEY",
            ProviderId::Perplexity => "PERPLEXITY_API_KEY",
            ProviderId::Gemini => "GEMINI_API_KEY",
            ProviderId::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Whether `model` starts with one of this provider's prefixes, ignoring case
    pub fn matches_model(&self, model: &str) -> bool {
        let model = model.to_lowercase();
        self.model_prefixes().iter().any(|p| model.starts_with(p))
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| Error::Other(format!("unknown provider: {}", s)))
    }
}

/// Whether a token looks like a model identifier for any registered provider
pub fn is_known_model(token: &str) -> bool {
    ProviderId::ALL.iter().any(|p| p.matches_model(token))
}

/// Opaque usage mapping as reported by the provider
pub type Usage = Map<String, Value>;

/// Everything a provider adapter needs to make one call
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: Option<u32>,
    /// Directive-level tool names already validated against the provider
    pub tool_names: Vec<String>,
    /// Free-form options for one provider's adapter (e.g. search recency)
    pub provider_options: BTreeMap<String, String>,
}

impl SendRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: String::new(),
            messages,
            model: model.into(),
            temperature: 0.4,
            max_output_tokens: None,
            tool_names: Vec::new(),
            provider_options: BTreeMap::new(),
        }
    }

    /// Content of the newest message, or the empty string
    pub fn last_content(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Normalised provider reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub error: bool,
}

impl ProviderResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Error-flagged response carrying human-readable text
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: true,
            ..Default::default()
        }
    }

    /// Deterministic reply for a provider without credentials
    pub fn missing_credential(provider: ProviderId) -> Self {
        Self::failure(format!(
            "Error: {} API key missing. Set {}.",
            provider.display_name(),
            provider.credential_env()
        ))
    }

    /// Offline placeholder echoing the last input message and the model name
    ///
    /// When tools were offered, a single call to the first one is included so the
    /// tool pass can run without network access.
    pub fn dry_run(provider: ProviderId, request: &SendRequest) -> Self {
        let tool_calls = request
            .tool_names
            .first()
            .map(|name| {
                let function = BuiltinTool::from_name(name)
                    .map(|t| t.function_name().to_string())
                    .unwrap_or_else(|| name.clone());
                vec![ToolCall::new(function, json!({ "query": "test" }))]
            })
            .unwrap_or_default();

        let mut usage = Usage::new();
        usage.insert("prompt_tokens".into(), json!(0));
        usage.insert("completion_tokens".into(), json!(0));

        Self {
            text: format!(
                "[dry-run {}:{}] {}",
                provider,
                request.model,
                request.last_content()
            ),
            usage,
            tool_calls,
            error: false,
        }
    }
}

/// The single call contract every provider client fulfils.
///
/// `send` never fails: transport, credential and parsing problems come back as a
/// response with `error: true` and a human-readable `text`.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn send(&self, request: &SendRequest) -> ProviderResponse;
}

/// An `HttpProvider` can turn a [`SendRequest`] into an HTTP request and read the reply.
pub trait HttpProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Credential used by `accept`; `None` short-circuits to a missing-credential reply
    fn api_key(&self) -> Option<&Secret<String>>;

    /// Whether requested tools are sent as function declarations
    fn declares_tools(&self) -> bool {
        true
    }

    /// Converts a send request into an HTTP request
    ///
    /// # Errors
    ///
    /// Returns an error if the URL, headers or payload cannot be built.
    fn accept(&self, request: &SendRequest) -> Result<Request>;

    /// Parses a raw HTTP response body into a normalised response
    ///
    /// # Errors
    ///
    /// Returns an error if the response is not valid JSON or carries an error payload.
    fn parse(&self, raw_response_text: String) -> Result<ProviderResponse>;
}

/// Provider client that sends requests over HTTP.
///
/// Wraps one [`HttpProvider`] with the shared policy: dry run first, then the
/// credential check, then a bounded `reqwest` call.
pub struct HttpClient<P: HttpProvider> {
    provider: P,
    client: Client,
    dry_run: bool,
}

impl<P: HttpProvider> HttpClient<P> {
    pub fn new(provider: P, config: &Config) -> Self {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });

        HttpClient {
            provider,
            client,
            dry_run: config.dry_run,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn execute(&self, request: &SendRequest) -> Result<ProviderResponse> {
        let http_request = self.provider.accept(request)?;
        debug!(
            "Request created successfully: {} {}",
            http_request.method(),
            http_request.url().path()
        );

        let response = self.client.execute(http_request).await?;
        let status = response.status();
        info!("Received response with status: {}", status);

        let body = response.text().await?;
        trace!("Response body: {}", body);

        if !status.is_success() {
            return Err(Error::ProviderUnavailable(error_message(status, &body)));
        }

        self.provider.parse(body)
    }
}

#[async_trait]
impl<P: HttpProvider> ProviderClient for HttpClient<P> {
    fn id(&self) -> ProviderId {
        self.provider.id()
    }

    async fn send(&self, request: &SendRequest) -> ProviderResponse {
        let id = self.provider.id();

        if self.dry_run {
            debug!("Dry run for {}:{}", id, request.model);
            if self.provider.declares_tools() {
                return ProviderResponse::dry_run(id, request);
            }
            let without_tools = SendRequest {
                tool_names: Vec::new(),
                ..request.clone()
            };
            return ProviderResponse::dry_run(id, &without_tools);
        }

        if self.provider.api_key().is_none() {
            warn!("No credential configured for {}", id);
            return ProviderResponse::missing_credential(id);
        }

        match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("{} request failed: {}", id, e);
                ProviderResponse::failure(format!("Error contacting {}: {}", id.display_name(), e))
            }
        }
    }
}

/// Pulls `error.message` out of a JSON error body, falling back to the raw text
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    format!("{} {}", status, detail)
}

/// Builds a JSON POST request with the given headers
pub(crate) fn json_post<T: Serialize>(
    url: &str,
    headers: &[(&'static str, String)],
    payload: &T,
) -> Result<Request> {
    let url = reqwest::Url::parse(url)?;
    let mut request = Request::new(reqwest::Method::POST, url);

    request.headers_mut().insert(
        reqwest::header::CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    for (name, value) in headers {
        let value = value
            .parse()
            .map_err(|_| Error::Authentication(format!("Invalid value for header {}", name)))?;
        request.headers_mut().insert(*name, value);
    }

    let body = serde_json::to_vec(payload)?;
    debug!("Payload serialized successfully ({} bytes)", body.len());
    *request.body_mut() = Some(body.into());
    Ok(request)
}

/// Client table selected by the router's provider identifier
#[derive(Default)]
pub struct ProviderClients {
    clients: HashMap<ProviderId, Box<dyn ProviderClient>>,
}

impl ProviderClients {
    /// Builds one HTTP client per registered provider
    pub fn from_config(config: &Config) -> Self {
        Self::default()
            .with_client(Box::new(openai::client(config)))
            .with_client(Box::new(anthropic::client(config)))
            .with_client(Box::new(perplexity::client(config)))
            .with_client(Box::new(gemini::client(config)))
            .with_client(Box::new(openrouter::client(config)))
    }

    /// Registers (or replaces) the client for `client.id()`
    #[must_use]
    pub fn with_client(mut self, client: Box<dyn ProviderClient>) -> Self {
        self.clients.insert(client.id(), client);
        self
    }

    pub fn get(&self, id: ProviderId) -> Option<&dyn ProviderClient> {
        self.clients.get(&id).map(|c| c.as_ref())
    }
}
