use reqwest::Request;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Message, Role, ToolCall};
use crate::provider::{
    HttpClient, HttpProvider, ProviderId, ProviderResponse, SendRequest, json_post,
};
use crate::secret::Secret;
use crate::tool::LlmToolInfo;
use crate::tool_runtime::tool_declarations;

/// Configuration for the OpenAI provider
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API key for authentication
    pub api_key: Option<Secret<String>>,
    /// Base URL for the API
    pub base_url: String,
}

impl OpenAIConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.api_key(ProviderId::OpenAi).cloned(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Implementation of the OpenAI provider
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    config: OpenAIConfig,
}

impl OpenAIProvider {
    /// Creates a new OpenAIProvider with custom configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::provider::openai::{OpenAIConfig, OpenAIProvider};
    /// use aifred_core::Secret;
    ///
    /// let config = OpenAIConfig {
    ///     api_key: Secret::non_empty("your-api-key"),
    ///     base_url: "https://api.openai.com/v1".to_string(),
    /// };
    ///
    /// let provider = OpenAIProvider::with_config(config);
    /// ```
    #[instrument(skip(config), level = "debug")]
    pub fn with_config(config: OpenAIConfig) -> Self {
        info!("Creating new OpenAIProvider with custom configuration");
        debug!("API key set: {}", config.api_key.is_some());
        debug!("Base URL: {}", config.base_url);

        Self { config }
    }
}

/// Client for OpenAI built from the shared configuration
pub fn client(config: &Config) -> HttpClient<OpenAIProvider> {
    HttpClient::new(
        OpenAIProvider::with_config(OpenAIConfig::from_config(config)),
        config,
    )
}

impl HttpProvider for OpenAIProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn api_key(&self) -> Option<&Secret<String>> {
        self.config.api_key.as_ref()
    }

    fn accept(&self, request: &SendRequest) -> Result<Request> {
        info!("Creating request for OpenAI model: {}", request.model);
        let key = self
            .api_key()
            .ok_or_else(|| Error::Authentication("OpenAI API key missing".into()))?;

        let payload = ChatCompletionRequest::from_send(request);
        trace!("Number of messages: {}", payload.messages.len());

        json_post(
            &format!("{}/chat/completions", self.config.base_url),
            &[("authorization", format!("Bearer {}", key.expose()))],
            &payload,
        )
    }

    fn parse(&self, raw_response_text: String) -> Result<ProviderResponse> {
        info!("Parsing response from OpenAI API");
        parse_chat_completion(&raw_response_text)
    }
}

/// Model families that take `max_completion_tokens` instead of `max_tokens` and only
/// accept the default temperature
pub(crate) fn is_reasoning_model(model: &str) -> bool {
    let model = model.to_lowercase();
    ["o1", "o3", "o4"].iter().any(|p| model.starts_with(p))
}

/// Tool results have no call ids in the persisted history, so they are replayed
/// as user turns
pub(crate) fn replay_content(msg: &Message) -> (&'static str, String) {
    match msg.role {
        Role::User => ("user", msg.content.clone()),
        Role::Assistant => ("assistant", msg.content.clone()),
        Role::Tool => ("user", format!("Tool result: {}", msg.content)),
    }
}

/// Represents a message in the Chat Completions format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

/// Represents a tool in the Chat Completions format
#[derive(Debug, Serialize)]
pub(crate) struct ChatTool {
    pub r#type: &'static str,
    pub function: ChatFunction,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&LlmToolInfo> for ChatTool {
    fn from(value: &LlmToolInfo) -> Self {
        ChatTool {
            r#type: "function",
            function: ChatFunction {
                name: value.name.clone(),
                description: value.description.clone(),
                parameters: value.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatFunctionCall {
    pub name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    pub arguments: String,
}

/// Request body shared by OpenAI-compatible endpoints
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
    /// Provider extensions (e.g. search filters) merged into the top level
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    pub(crate) fn from_send(request: &SendRequest) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(request.system_prompt.clone()),
                tool_calls: None,
            });
        }
        for msg in &request.messages {
            let (role, content) = replay_content(msg);
            messages.push(ChatMessage {
                role: role.to_string(),
                content: Some(content),
                tool_calls: None,
            });
        }

        let tools: Vec<ChatTool> = tool_declarations(&request.tool_names)
            .iter()
            .map(ChatTool::from)
            .collect();
        let has_tools = !tools.is_empty();

        let reasoning = is_reasoning_model(&request.model);
        Self {
            model: request.model.clone(),
            messages,
            temperature: Some(request.temperature).filter(|_| !reasoning),
            max_tokens: request.max_output_tokens.filter(|_| !reasoning),
            max_completion_tokens: request.max_output_tokens.filter(|_| reasoning),
            tools: has_tools.then_some(tools),
            tool_choice: has_tools.then_some("auto"),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Map<String, Value>>,
    /// Perplexity returns source URLs alongside the answer
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

/// Decodes a function call's argument string, keeping it raw if it is not JSON
fn decode_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parses a Chat Completions response body
pub(crate) fn parse_chat_completion(raw: &str) -> Result<ProviderResponse> {
    trace!("Raw response: {}", raw);

    if let Ok(ChatErrorResponse { error: Some(e) }) = serde_json::from_str(raw) {
        error!("Provider returned an error: {}", e.message);
        return Err(Error::ProviderUnavailable(e.message));
    }

    let response: ChatCompletionResponse = serde_json::from_str(raw).map_err(|e| {
        error!("Failed to deserialize response: {}", e);
        Error::Serialization(e)
    })?;

    let usage = response.usage.unwrap_or_default();
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(Error::ProviderUnavailable("response had no choices".into()));
    };

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall::new(c.function.name, decode_arguments(&c.function.arguments)))
        .collect::<Vec<_>>();
    debug!("Response carried {} tool calls", tool_calls.len());

    let mut text = choice.message.content.unwrap_or_default();
    if !response.citations.is_empty() {
        text.push_str("\n\nSources:");
        for (i, url) in response.citations.iter().enumerate() {
            text.push_str(&format!("\n[{}] {}", i + 1, url));
        }
    }

    Ok(ProviderResponse {
        text,
        usage,
        tool_calls,
        error: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> OpenAIProvider {
        OpenAIProvider::with_config(OpenAIConfig {
            api_key: Secret::non_empty("sk-test"),
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    fn body(request: &Request) -> Value {
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let mut send = SendRequest::new(
            "gpt-4o",
            vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::tool_result("web_search", &json!({"results": ["x"]})),
            ],
        );
        send.system_prompt = "Be brief.".into();
        send.max_output_tokens = Some(800);
        send.tool_names = vec!["browse".into()];

        let request = provider().accept(&send).unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer sk-test"
        );

        let payload = body(&request);
        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["messages"][0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(payload["messages"][3]["role"], "user");
        assert!(
            payload["messages"][3]["content"]
                .as_str()
                .unwrap()
                .starts_with("Tool result: ")
        );
        assert_eq!(payload["max_tokens"], 800);
        assert_eq!(payload["temperature"], 0.4);
        assert!(payload.get("max_completion_tokens").is_none());
        assert_eq!(payload["tools"][0]["function"]["name"], "web_search");
        assert_eq!(payload["tool_choice"], "auto");
    }

    #[test]
    fn test_reasoning_models_use_max_completion_tokens() {
        let mut send = SendRequest::new("o3-mini", vec![Message::user("hi")]);
        send.max_output_tokens = Some(100);
        let payload = body(&provider().accept(&send).unwrap());
        assert_eq!(payload["max_completion_tokens"], 100);
        assert!(payload.get("max_tokens").is_none());
        assert!(payload.get("temperature").is_none());
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn test_parse_text_and_tool_calls() {
        let raw = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "web_search", "arguments": "{\"query\":\"rust\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        })
        .to_string();

        let response = provider().parse(raw).unwrap();
        assert_eq!(response.text, "");
        assert_eq!(
            response.tool_calls,
            vec![ToolCall::new("web_search", json!({"query": "rust"}))]
        );
        assert_eq!(response.usage["total_tokens"], 12);
    }

    #[test]
    fn test_parse_error_payload() {
        let raw = r#"{"error": {"message": "Invalid API key", "type": "auth"}}"#;
        let err = provider().parse(raw.to_string()).unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(m) if m == "Invalid API key"));
    }

    #[test]
    fn test_non_json_arguments_are_kept_raw() {
        assert_eq!(decode_arguments("not json"), json!("not json"));
        assert_eq!(decode_arguments(""), json!({}));
    }
}
