use reqwest::Request;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::ToolCall;
use crate::provider::openai::replay_content;
use crate::provider::{
    HttpClient, HttpProvider, ProviderId, ProviderResponse, SendRequest, json_post,
};
use crate::secret::Secret;
use crate::tool::LlmToolInfo;
use crate::tool_runtime::tool_declarations;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The Messages API requires `max_tokens`
const FALLBACK_MAX_TOKENS: u32 = 1_024;

/// Configuration for the Anthropic provider
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<Secret<String>>,
    pub base_url: String,
    pub api_version: String,
}

impl AnthropicConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.api_key(ProviderId::Anthropic).cloned(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_version: ANTHROPIC_VERSION.to_string(),
        }
    }
}

/// Implementation of the Anthropic provider
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    config: AnthropicConfig,
}

impl AnthropicProvider {
    #[instrument(skip(config), level = "debug")]
    pub fn with_config(config: AnthropicConfig) -> Self {
        info!("Creating new AnthropicProvider with custom configuration");
        debug!("API key set: {}", config.api_key.is_some());
        debug!("Base URL: {}", config.base_url);

        Self { config }
    }

    /// Converts a send request into a Messages API payload
    ///
    /// Consecutive turns with the same role are merged, since the API expects
    /// user and assistant turns to alternate.
    fn create_request_payload(&self, request: &SendRequest) -> AnthropicRequest {
        let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(request.messages.len());
        for msg in &request.messages {
            let (role, content) = replay_content(msg);
            match messages.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&content);
                }
                _ => messages.push(AnthropicMessage {
                    role: role.to_string(),
                    content,
                }),
            }
        }

        let tools: Vec<AnthropicTool> = tool_declarations(&request.tool_names)
            .iter()
            .map(AnthropicTool::from)
            .collect();

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_output_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
            system: (!request.system_prompt.is_empty()).then(|| request.system_prompt.clone()),
            messages,
            temperature: request.temperature,
            tools: (!tools.is_empty()).then_some(tools),
        }
    }
}

pub fn client(config: &Config) -> HttpClient<AnthropicProvider> {
    HttpClient::new(
        AnthropicProvider::with_config(AnthropicConfig::from_config(config)),
        config,
    )
}

impl HttpProvider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn api_key(&self) -> Option<&Secret<String>> {
        self.config.api_key.as_ref()
    }

    fn accept(&self, request: &SendRequest) -> Result<Request> {
        info!("Creating request for Anthropic model: {}", request.model);
        let key = self
            .api_key()
            .ok_or_else(|| Error::Authentication("Anthropic API key missing".into()))?;

        let payload = self.create_request_payload(request);
        trace!("Number of messages: {}", payload.messages.len());

        json_post(
            &format!("{}/messages", self.config.base_url),
            &[
                ("x-api-key", key.expose().clone()),
                ("anthropic-version", self.config.api_version.clone()),
            ],
            &payload,
        )
    }

    fn parse(&self, raw_response_text: String) -> Result<ProviderResponse> {
        info!("Parsing response from Anthropic API");
        trace!("Raw response: {}", raw_response_text);

        if let Ok(AnthropicErrorResponse { error: Some(e) }) =
            serde_json::from_str(&raw_response_text)
        {
            error!("Anthropic API returned an error: {}", e.message);
            return Err(Error::ProviderUnavailable(e.message));
        }

        let response: AnthropicResponse = serde_json::from_str(&raw_response_text)?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                AnthropicContentBlock::Text { text } => texts.push(text),
                AnthropicContentBlock::ToolUse { name, input } => {
                    tool_calls.push(ToolCall::new(name, input))
                }
                AnthropicContentBlock::Other => {}
            }
        }
        debug!("Response carried {} tool calls", tool_calls.len());

        Ok(ProviderResponse {
            text: texts.join("\n"),
            usage: response.usage.unwrap_or_default(),
            tool_calls,
            error: false,
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

impl From<&LlmToolInfo> for AnthropicTool {
    fn from(value: &LlmToolInfo) -> Self {
        AnthropicTool {
            name: value.name.clone(),
            description: value.description.clone(),
            input_schema: value.parameters.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: Option<AnthropicError>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    message: String,
}
