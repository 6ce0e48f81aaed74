use reqwest::Request;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::openai::{ChatCompletionRequest, parse_chat_completion};
use crate::provider::{
    HttpClient, HttpProvider, ProviderId, ProviderResponse, SendRequest, json_post,
};
use crate::secret::Secret;

/// Configuration for the Perplexity provider
#[derive(Debug, Clone)]
pub struct PerplexityConfig {
    pub api_key: Option<Secret<String>>,
    pub base_url: String,
}

impl PerplexityConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.api_key(ProviderId::Perplexity).cloned(),
            base_url: "https://api.perplexity.ai".to_string(),
        }
    }
}

/// Search-augmented chat over the OpenAI-compatible endpoint
///
/// Perplexity searches natively: a requested `browse` tool turns on citations
/// instead of declaring a function.
#[derive(Debug, Clone)]
pub struct PerplexityProvider {
    config: PerplexityConfig,
}

impl PerplexityProvider {
    #[instrument(skip(config), level = "debug")]
    pub fn with_config(config: PerplexityConfig) -> Self {
        info!("Creating new PerplexityProvider with custom configuration");
        debug!("API key set: {}", config.api_key.is_some());

        Self { config }
    }

    fn create_request_payload(&self, request: &SendRequest) -> ChatCompletionRequest {
        let mut payload = ChatCompletionRequest::from_send(request);
        payload.tools = None;
        payload.tool_choice = None;
        payload.max_completion_tokens = None;
        payload.max_tokens = request.max_output_tokens;
        payload.temperature = Some(request.temperature);

        if !request.tool_names.is_empty() {
            payload.extra.insert("return_citations".into(), json!(true));
        }
        for (key, value) in search_options(&request.provider_options) {
            payload.extra.insert(key.to_string(), value);
        }
        payload
    }
}

/// Maps `@pplx` directive options onto request fields
fn search_options(options: &BTreeMap<String, String>) -> Vec<(&'static str, Value)> {
    let mut out = Vec::new();
    for (key, value) in options {
        match key.as_str() {
            "recency" => out.push(("search_recency_filter", json!(value))),
            "depth" => out.push((
                "web_search_options",
                json!({ "search_context_size": value }),
            )),
            "domain" => {
                let domains: Vec<&str> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .collect();
                out.push(("search_domain_filter", json!(domains)));
            }
            "citations" => out.push(("return_citations", json!(truthy(value)))),
            "images" => out.push(("return_images", json!(truthy(value)))),
            other => warn!("Ignoring unknown Perplexity option {}", other),
        }
    }
    out
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn client(config: &Config) -> HttpClient<PerplexityProvider> {
    HttpClient::new(
        PerplexityProvider::with_config(PerplexityConfig::from_config(config)),
        config,
    )
}

impl HttpProvider for PerplexityProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Perplexity
    }

    fn api_key(&self) -> Option<&Secret<String>> {
        self.config.api_key.as_ref()
    }

    fn declares_tools(&self) -> bool {
        false
    }

    fn accept(&self, request: &SendRequest) -> Result<Request> {
        info!("Creating request for Perplexity model: {}", request.model);
        let key = self
            .api_key()
            .ok_or_else(|| Error::Authentication("Perplexity API key missing".into()))?;

        json_post(
            &format!("{}/chat/completions", self.config.base_url),
            &[("authorization", format!("Bearer {}", key.expose()))],
            &self.create_request_payload(request),
        )
    }

    fn parse(&self, raw_response_text: String) -> Result<ProviderResponse> {
        info!("Parsing response from Perplexity API");
        let mut response = parse_chat_completion(&raw_response_text)?;
        response.tool_calls.clear();
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn provider() -> PerplexityProvider {
        let mut config = PerplexityConfig::from_config(&Config::default());
        config.api_key = Secret::non_empty("pplx-key");
        PerplexityProvider::with_config(config)
    }

    fn payload(send: &SendRequest) -> Value {
        let request = provider().accept(send).unwrap();
        serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_browse_turns_on_citations_without_tools() {
        let mut send = SendRequest::new("sonar", vec![Message::user("news")]);
        send.tool_names = vec!["browse".into()];
        let payload = payload(&send);
        assert_eq!(payload["return_citations"], true);
        assert!(payload.get("tools").is_none());
        assert!(payload.get("tool_choice").is_none());
    }

    #[test]
    fn test_search_options_are_mapped() {
        let mut send = SendRequest::new("sonar-pro", vec![Message::user("law")]);
        send.max_output_tokens = Some(500);
        send.provider_options = BTreeMap::from([
            ("recency".to_string(), "month".to_string()),
            ("depth".to_string(), "high".to_string()),
            ("domain".to_string(), "law.cornell.edu, justia.com".to_string()),
            ("images".to_string(), "0".to_string()),
        ]);
        let payload = payload(&send);
        assert_eq!(payload["search_recency_filter"], "month");
        assert_eq!(payload["web_search_options"]["search_context_size"], "high");
        assert_eq!(
            payload["search_domain_filter"],
            json!(["law.cornell.edu", "justia.com"])
        );
        assert_eq!(payload["return_images"], false);
        assert_eq!(payload["max_tokens"], 500);
    }

    #[test]
    fn test_parse_appends_sources() {
        let raw = json!({
            "choices": [{"message": {"role": "assistant", "content": "Answer."}}],
            "citations": ["https://a.example", "https://b.example"],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        })
        .to_string();
        let response = provider().parse(raw).unwrap();
        assert_eq!(
            response.text,
            "Answer.\n\nSources:\n[1] https://a.example\n[2] https://b.example"
        );
        assert!(response.tool_calls.is_empty());
    }
}
