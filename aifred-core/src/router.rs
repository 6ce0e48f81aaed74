use std::collections::HashMap;
use tracing::debug;

use crate::capability::CapabilityTable;
use crate::config::Config;
use crate::directive::DirectiveSet;
use crate::provider::ProviderId;

/// Requested tool names split by whether the provider recognises them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPartition {
    pub supported: Vec<String>,
    pub dropped: Vec<String>,
}

/// Provider and model a query will be sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub provider: ProviderId,
    pub model: String,
}

/// Picks the provider for a query and filters its tool list
#[derive(Debug, Clone)]
pub struct Router {
    default_provider: ProviderId,
    default_models: HashMap<ProviderId, String>,
    capabilities: CapabilityTable,
}

impl Router {
    pub fn new(config: &Config) -> Self {
        let default_models = ProviderId::ALL
            .into_iter()
            .map(|p| (p, config.default_model(p).to_string()))
            .collect();
        Self {
            default_provider: config.default_provider,
            default_models,
            capabilities: CapabilityTable::from_config(config),
        }
    }

    pub fn default_provider(&self) -> ProviderId {
        self.default_provider
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Explicit provider hint, then model prefix, then the configured default
    ///
    /// Never fails; unmatched hints fall through to the default.
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::{Config, ProviderId, Router};
    ///
    /// let router = Router::new(&Config::default());
    /// assert_eq!(router.route(None, Some("anthropic")), ProviderId::Anthropic);
    /// assert_eq!(router.route(Some("gpt-4o"), None), ProviderId::OpenAi);
    /// assert_eq!(router.route(Some("mystery"), Some("acme")), ProviderId::OpenAi);
    /// ```
    pub fn route(&self, model_hint: Option<&str>, provider_hint: Option<&str>) -> ProviderId {
        if let Some(provider) = provider_hint.and_then(|p| p.parse::<ProviderId>().ok()) {
            return provider;
        }

        if let Some(model) = model_hint {
            if let Some(provider) = ProviderId::ALL.into_iter().find(|p| p.matches_model(model)) {
                debug!("Model {} routed to {}", model, provider);
                return provider;
            }
        }

        self.default_provider
    }

    /// The directive's model, or the provider's configured default model
    pub fn resolve_model(&self, provider: ProviderId, model_hint: Option<&str>) -> String {
        match model_hint.map(str::trim).filter(|m| !m.is_empty()) {
            Some(model) => model.to_string(),
            None => self
                .default_models
                .get(&provider)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Provider and model for a parsed directive set
    pub fn resolve(&self, directives: &DirectiveSet) -> Route {
        let provider = self.route(
            directives.model.as_deref(),
            directives.provider.map(|p| p.as_str()),
        );
        Route {
            provider,
            model: self.resolve_model(provider, directives.model.as_deref()),
        }
    }

    /// Splits `requested` into supported and dropped names, preserving order
    ///
    /// A provider without tool support drops everything.
    pub fn validate_tools(&self, provider: &str, requested: &[String]) -> ToolPartition {
        let support = self.capabilities.get_tool_support(provider);
        let (supported, dropped) = requested
            .iter()
            .cloned()
            .partition(|t| support.recognises(t));
        ToolPartition { supported, dropped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_provider_hint_wins_over_model() {
        let router = Router::new(&Config::default());
        assert_eq!(
            router.route(Some("gpt-4o"), Some("anthropic")),
            ProviderId::Anthropic
        );
    }

    #[test]
    fn test_configured_default_provider() {
        let env = HashMap::from([("AIFRED_PROVIDER_DEFAULT".to_string(), "gemini".to_string())]);
        let router = Router::new(&Config::from_sources(&env, &UserConfig::default()));
        assert_eq!(router.route(None, None), ProviderId::Gemini);
        assert_eq!(router.resolve_model(ProviderId::Gemini, None), "gemini-2.0-flash");
    }

    #[test]
    fn test_resolve_directives() {
        let router = Router::new(&Config::default());
        let directives = DirectiveSet {
            provider: Some(ProviderId::Anthropic),
            ..Default::default()
        };
        assert_eq!(
            router.resolve(&directives),
            Route {
                provider: ProviderId::Anthropic,
                model: "claude-3-7-sonnet".to_string()
            }
        );
    }

    #[test]
    fn test_validate_tools_preserves_order_and_duplicates() {
        let router = Router::new(&Config::default());
        let partition = router.validate_tools("openai", &names(&["foo", "browse", "browse", "python"]));
        assert_eq!(partition.supported, names(&["browse", "browse", "python"]));
        assert_eq!(partition.dropped, names(&["foo"]));
    }

    #[test]
    fn test_validate_tools_without_support() {
        let router = Router::new(&Config::default());
        let requested = names(&["browse", "code"]);
        for provider in ["openrouter", "acme"] {
            let partition = router.validate_tools(provider, &requested);
            assert!(partition.supported.is_empty());
            assert_eq!(partition.dropped, requested);
        }
    }
}
