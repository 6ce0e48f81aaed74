use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::config::Config;
use crate::provider::ProviderId;

/// Context window and output ceiling for one (provider, model) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    #[serde(rename = "context", alias = "context_window_tokens")]
    pub context_window_tokens: u32,
    pub max_output_tokens: u32,
}

impl CapabilityRecord {
    pub const fn new(context_window_tokens: u32, max_output_tokens: u32) -> Self {
        Self {
            context_window_tokens,
            max_output_tokens,
        }
    }

    /// Both limits positive
    pub fn is_usable(&self) -> bool {
        self.context_window_tokens > 0 && self.max_output_tokens > 0
    }
}

/// Used when the provider itself is unknown
pub const GLOBAL_DEFAULT: CapabilityRecord = CapabilityRecord::new(32_000, 2_048);

const BUILTIN: &[(&str, CapabilityRecord)] = &[
    ("openai:gpt-4o", CapabilityRecord::new(128_000, 4_096)),
    ("openai:gpt-4o-mini", CapabilityRecord::new(128_000, 4_096)),
    ("openai:gpt-4-turbo", CapabilityRecord::new(128_000, 4_096)),
    ("openai:o4-mini", CapabilityRecord::new(128_000, 4_096)),
    ("openai:o4", CapabilityRecord::new(128_000, 4_096)),
    ("openai:o3-mini", CapabilityRecord::new(128_000, 4_096)),
    ("anthropic:claude-3-7-sonnet", CapabilityRecord::new(200_000, 8_192)),
    ("anthropic:claude-3-5-sonnet-20241022", CapabilityRecord::new(200_000, 8_192)),
    ("anthropic:claude-3-5-haiku-20241022", CapabilityRecord::new(200_000, 4_096)),
    ("anthropic:claude-3-opus-20240229", CapabilityRecord::new(200_000, 8_192)),
    ("anthropic:claude-3-sonnet-20240229", CapabilityRecord::new(200_000, 8_192)),
    ("anthropic:claude-3-haiku-20240307", CapabilityRecord::new(200_000, 4_096)),
    ("gemini:gemini-2.0-flash", CapabilityRecord::new(1_048_576, 8_192)),
    ("gemini:gemini-1.5-pro", CapabilityRecord::new(2_097_152, 8_192)),
    ("perplexity:sonar", CapabilityRecord::new(127_000, 4_096)),
    ("perplexity:sonar-pro", CapabilityRecord::new(200_000, 8_000)),
];

fn provider_default(provider: ProviderId) -> CapabilityRecord {
    match provider {
        ProviderId::OpenAi => CapabilityRecord::new(128_000, 4_096),
        ProviderId::Anthropic => CapabilityRecord::new(200_000, 8_192),
        ProviderId::Perplexity => CapabilityRecord::new(127_000, 4_096),
        ProviderId::Gemini => CapabilityRecord::new(1_048_576, 8_192),
        ProviderId::OpenRouter => CapabilityRecord::new(128_000, 4_096),
    }
}

/// Whether a provider takes tool definitions, and which tool names it knows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSupport {
    pub supports_tools: bool,
    pub tool_names: BTreeSet<&'static str>,
}

impl ToolSupport {
    fn of(names: &[&'static str]) -> Self {
        Self {
            supports_tools: !names.is_empty(),
            tool_names: names.iter().copied().collect(),
        }
    }

    pub fn recognises(&self, tool: &str) -> bool {
        self.supports_tools && self.tool_names.contains(tool)
    }
}

const GENERAL_TOOLS: &[&str] = &[
    "browse",
    "code",
    "python",
    "fetch_url",
    "citation_extract",
    "case_search",
];
const ANTHROPIC_TOOLS: &[&str] = &["browse", "code", "fetch_url", "citation_extract", "case_search"];
const SEARCH_TOOLS: &[&str] = &["browse"];

fn tool_support(provider: ProviderId) -> ToolSupport {
    match provider {
        ProviderId::OpenAi | ProviderId::Gemini => ToolSupport::of(GENERAL_TOOLS),
        ProviderId::Anthropic => ToolSupport::of(ANTHROPIC_TOOLS),
        ProviderId::Perplexity => ToolSupport::of(SEARCH_TOOLS),
        ProviderId::OpenRouter => ToolSupport::default(),
    }
}

/// Static model limits layered under the user's `model_caps` overrides
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    overrides: HashMap<String, CapabilityRecord>,
}

impl CapabilityTable {
    pub fn new(overrides: HashMap<String, CapabilityRecord>) -> Self {
        Self { overrides }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.model_caps.clone())
    }

    /// Limits for `provider:model`
    ///
    /// Lookup order: user override, built-in entry, provider default, global default.
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::CapabilityTable;
    ///
    /// let table = CapabilityTable::default();
    /// assert_eq!(table.get_capabilities("openai", "gpt-4o").context_window_tokens, 128_000);
    /// assert_eq!(table.get_capabilities("acme", "rocket-1").max_output_tokens, 2_048);
    /// ```
    pub fn get_capabilities(&self, provider: &str, model: &str) -> CapabilityRecord {
        let key = format!("{}:{}", provider, model);
        if let Some(record) = self.overrides.get(&key) {
            debug!("Using capability override for {}", key);
            return *record;
        }
        if let Some((_, record)) = BUILTIN.iter().find(|(k, _)| *k == key) {
            return *record;
        }
        provider
            .parse::<ProviderId>()
            .map(provider_default)
            .unwrap_or(GLOBAL_DEFAULT)
    }

    /// [`CapabilityTable::get_capabilities`] for a registered provider
    pub fn capabilities_for(&self, provider: ProviderId, model: &str) -> CapabilityRecord {
        self.get_capabilities(provider.as_str(), model)
    }

    /// Unknown providers report no tool support
    pub fn get_tool_support(&self, provider: &str) -> ToolSupport {
        provider
            .parse::<ProviderId>()
            .map(tool_support)
            .unwrap_or_default()
    }
}
