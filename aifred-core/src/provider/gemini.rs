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

/// Configuration for the Gemini provider
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<Secret<String>>,
    pub base_url: String,
}

impl GeminiConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.api_key(ProviderId::Gemini).cloned(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

/// Implementation of the Gemini provider
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    config: GeminiConfig,
}

impl GeminiProvider {
    #[instrument(skip(config), level = "debug")]
    pub fn with_config(config: GeminiConfig) -> Self {
        info!("Creating new GeminiProvider with custom configuration");
        debug!("API key set: {}", config.api_key.is_some());
        debug!("Base URL: {}", config.base_url);

        Self { config }
    }

    fn create_request_payload(&self, request: &SendRequest) -> GeminiRequest {
        let mut contents: Vec<GeminiContent> = Vec::new();
        for msg in &request.messages {
            let (role, text) = replay_content(msg);
            let role = if role == "assistant" { "model" } else { role };
            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => {
                    last.parts.push(GeminiPart::text(text));
                }
                _ => contents.push(GeminiContent {
                    role: Some(role.to_string()),
                    parts: vec![GeminiPart::text(text)],
                }),
            }
        }

        let system_instruction = (!request.system_prompt.is_empty()).then(|| GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(request.system_prompt.clone())],
        });

        let declarations: Vec<GeminiFunctionDeclaration> = tool_declarations(&request.tool_names)
            .iter()
            .map(GeminiFunctionDeclaration::from)
            .collect();

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
            tools: (!declarations.is_empty()).then(|| {
                vec![GeminiTool {
                    function_declarations: declarations,
                }]
            }),
        }
    }
}

pub fn client(config: &Config) -> HttpClient<GeminiProvider> {
    HttpClient::new(
        GeminiProvider::with_config(GeminiConfig::from_config(config)),
        config,
    )
}

impl HttpProvider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn api_key(&self) -> Option<&Secret<String>> {
        self.config.api_key.as_ref()
    }

    fn accept(&self, request: &SendRequest) -> Result<Request> {
        info!("Creating request for Gemini model: {}", request.model);
        let key = self
            .api_key()
            .ok_or_else(|| Error::Authentication("Gemini API key missing".into()))?;

        let payload = self.create_request_payload(request);
        trace!("Number of contents: {}", payload.contents.len());

        // Keep the key out of the URL: transport errors quote it
        json_post(
            &format!(
                "{}/models/{}:generateContent",
                self.config.base_url, request.model
            ),
            &[("x-goog-api-key", key.expose().clone())],
            &payload,
        )
    }

    fn parse(&self, raw_response_text: String) -> Result<ProviderResponse> {
        info!("Parsing response from Gemini API");
        trace!("Raw response: {}", raw_response_text);

        if let Ok(GeminiErrorResponse { error: Some(e) }) = serde_json::from_str(&raw_response_text)
        {
            error!("Gemini API returned an error: {}", e.message);
            return Err(Error::ProviderUnavailable(e.message));
        }

        let response: GeminiResponse = serde_json::from_str(&raw_response_text)?;
        let usage = response.usage_metadata.unwrap_or_default();

        let Some(candidate) = response.candidates.into_iter().next() else {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(Error::ProviderUnavailable(reason));
        };

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                texts.push(text);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall::new(call.name, call.args));
            }
        }

        Ok(ProviderResponse {
            text: texts.join(""),
            usage,
            tool_calls,
            error: false,
        })
    }
}

/// Gemini accepts only an OpenAPI subset of JSON schema
fn gemini_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };
    let mut out = Map::new();
    for key in ["type", "description", "required", "enum"] {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    if let Some(Value::Object(props)) = obj.get("properties") {
        let props = props
            .iter()
            .map(|(k, v)| (k.clone(), gemini_schema(v)))
            .collect();
        out.insert("properties".to_string(), Value::Object(props));
    }
    if let Some(items) = obj.get("items") {
        out.insert("items".to_string(), gemini_schema(items));
    }
    Value::Object(out)
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            function_call: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&LlmToolInfo> for GeminiFunctionDeclaration {
    fn from(value: &LlmToolInfo) -> Self {
        GeminiFunctionDeclaration {
            name: value.name.clone(),
            description: value.description.clone(),
            parameters: gemini_schema(&value.parameters),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<Map<String, Value>>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::json;

    fn provider() -> GeminiProvider {
        let mut config = GeminiConfig::from_config(&Config::default());
        config.api_key = Secret::non_empty("g-key");
        GeminiProvider::with_config(config)
    }

    #[test]
    fn test_request_keeps_key_out_of_url() {
        let mut send = SendRequest::new(
            "gemini-2.0-flash",
            vec![Message::user("hi"), Message::assistant("hello"), Message::user("bye")],
        );
        send.system_prompt = "Be brief.".into();
        send.max_output_tokens = Some(256);
        send.tool_names = vec!["citation_extract".into()];

        let request = provider().accept(&send).unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(request.headers().get("x-goog-api-key").unwrap(), "g-key");

        let payload: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(payload["contents"][1]["role"], "model");
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 256);
        let decl = &payload["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "citation_extract");
        assert!(decl["parameters"].get("default").is_none());
        assert!(decl["parameters"]["properties"]["text"].get("default").is_none());
    }

    #[test]
    fn test_parse_text_and_function_call() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Checking."},
                        {"functionCall": {"name": "web_search", "args": {"query": "rust"}}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 3}
        })
        .to_string();

        let response = provider().parse(raw).unwrap();
        assert_eq!(response.text, "Checking.");
        assert_eq!(response.tool_calls[0].name, "web_search");
        assert_eq!(response.tool_calls[0].arguments, json!({"query": "rust"}));
        assert_eq!(response.usage["promptTokenCount"], 5);
    }

    #[test]
    fn test_parse_blocked_prompt() {
        let raw = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let err = provider().parse(raw.to_string()).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_error_response_parsing() {
        let raw = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        let err = provider().parse(raw.to_string()).unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(m) if m == "API key not valid"));
    }
}
