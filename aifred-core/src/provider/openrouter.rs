use reqwest::Request;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::openai::{ChatCompletionRequest, parse_chat_completion};
use crate::provider::{
    HttpClient, HttpProvider, ProviderId, ProviderResponse, SendRequest, json_post,
};
use crate::secret::Secret;

/// Configuration for the OpenRouter provider
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: Option<Secret<String>>,
    pub base_url: String,
    /// Sent as `X-Title` so requests are attributed to this app
    pub app_title: String,
}

impl OpenRouterConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.api_key(ProviderId::OpenRouter).cloned(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            app_title: config.openrouter_title.clone(),
        }
    }
}

/// Vendor-qualified models (`meta-llama/...`) through OpenRouter's
/// OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    config: OpenRouterConfig,
}

impl OpenRouterProvider {
    #[instrument(skip(config), level = "debug")]
    pub fn with_config(config: OpenRouterConfig) -> Self {
        info!("Creating new OpenRouterProvider with custom configuration");
        debug!("API key set: {}", config.api_key.is_some());
        debug!("App title: {}", config.app_title);

        Self { config }
    }
}

pub fn client(config: &Config) -> HttpClient<OpenRouterProvider> {
    HttpClient::new(
        OpenRouterProvider::with_config(OpenRouterConfig::from_config(config)),
        config,
    )
}

impl HttpProvider for OpenRouterProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenRouter
    }

    fn api_key(&self) -> Option<&Secret<String>> {
        self.config.api_key.as_ref()
    }

    fn accept(&self, request: &SendRequest) -> Result<Request> {
        info!("Creating request for OpenRouter model: {}", request.model);
        let key = self
            .api_key()
            .ok_or_else(|| Error::Authentication("OpenRouter API key missing".into()))?;

        let mut payload = ChatCompletionRequest::from_send(request);
        // Routed models take max_tokens and a temperature regardless of family
        payload.max_completion_tokens = None;
        payload.max_tokens = request.max_output_tokens;
        payload.temperature = Some(request.temperature);

        json_post(
            &format!("{}/chat/completions", self.config.base_url),
            &[
                ("authorization", format!("Bearer {}", key.expose())),
                ("x-title", self.config.app_title.clone()),
            ],
            &payload,
        )
    }

    fn parse(&self, raw_response_text: String) -> Result<ProviderResponse> {
        info!("Parsing response from OpenRouter API");
        parse_chat_completion(&raw_response_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::{Value, json};

    fn provider() -> OpenRouterProvider {
        let mut config = OpenRouterConfig::from_config(&Config::default());
        config.api_key = Secret::non_empty("or-key");
        OpenRouterProvider::with_config(config)
    }

    #[test]
    fn test_request_carries_title_header() {
        let mut send = SendRequest::new("openai/o3-mini", vec![Message::user("hi")]);
        send.max_output_tokens = Some(64);
        let request = provider().accept(&send).unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(request.headers().get("x-title").unwrap(), "aifred");
        assert_eq!(request.headers().get("authorization").unwrap(), "Bearer or-key");

        let payload: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(payload["model"], "openai/o3-mini");
        assert_eq!(payload["max_tokens"], 64);
    }

    #[test]
    fn test_parse_plain_completion() {
        let raw = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello there"}}],
            "usage": {"prompt_tokens": 2, "completion_tokens": 2, "total_tokens": 4}
        })
        .to_string();
        let response = provider().parse(raw).unwrap();
        assert_eq!(response.text, "Hello there");
        assert_eq!(response.usage["total_tokens"], 4);
        assert!(!response.error);
    }
}
