use aifred_core::{CapabilityRecord, CapabilityTable, Config, ProviderId, Router, UserConfig};
use parameterized::*;
use serde_json::json;
use std::collections::HashMap;


use test_utils::dry_run_config;

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[parameterized(
    model = {
        None, Some("gpt-4o"), Some("claude-3-7-sonnet"), Some("GEMINI-2.0-flash"),
        Some("sonar-pro"), Some("meta-llama/llama-3.1-70b"), Some("o3-mini"),
        Some("gpt-4o"), Some("mystery-model"), None
    },
    provider = {
        Some("anthropic"), None, None, None,
        None, None, None,
        Some("perplexity"), Some("acme"), None
    },
    expected = {
        ProviderId::Anthropic, ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini,
        ProviderId::Perplexity, ProviderId::OpenRouter, ProviderId::OpenAi,
        ProviderId::Perplexity, ProviderId::OpenAi, ProviderId::OpenAi
    }
)]
fn test_route(model: Option<&str>, provider: Option<&str>, expected: ProviderId) {
    let router = Router::new(&Config::default());
    assert_eq!(router.route(model, provider), expected);
}

#[parameterized(
    default = { "openai", "anthropic", "gemini", "perplexity", "openrouter" },
    expected = {
        ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini,
        ProviderId::Perplexity, ProviderId::OpenRouter
    }
)]
fn test_route_falls_back_to_configured_default(default: &str, expected: ProviderId) {
    let config = dry_run_config(&[("AIFRED_PROVIDER_DEFAULT", default)]);
    let router = Router::new(&config);
    assert_eq!(router.route(None, None), expected);
    assert_eq!(router.route(Some("unheard-of"), Some("nobody")), expected);
}

#[parameterized(
    provider = { "openai", "anthropic", "gemini", "perplexity", "openrouter", "acme" },
    supported = {
        vec!["browse", "python"], vec!["browse"], vec!["browse", "python"],
        vec!["browse"], vec![], vec![]
    },
    dropped = {
        vec!["foo"], vec!["python", "foo"], vec!["foo"],
        vec!["python", "foo"], vec!["browse", "python", "foo"], vec!["browse", "python", "foo"]
    }
)]
fn test_validate_tools(provider: &str, supported: Vec<&str>, dropped: Vec<&str>) {
    let router = Router::new(&Config::default());
    let partition = router.validate_tools(provider, &names(&["browse", "python", "foo"]));
    assert_eq!(partition.supported, names(&supported));
    assert_eq!(partition.dropped, names(&dropped));
}

#[test]
fn test_validate_tools_is_a_partition() {
    let router = Router::new(&Config::default());
    let requested = names(&["code", "foo", "browse", "code", "case_search", "bar"]);
    for provider in ProviderId::ALL {
        let partition = router.validate_tools(provider.as_str(), &requested);
        assert_eq!(
            partition.supported.len() + partition.dropped.len(),
            requested.len()
        );
        // Each side is the request filtered by membership, in request order
        let support = CapabilityTable::default().get_tool_support(provider.as_str());
        let expected_supported: Vec<String> = requested
            .iter()
            .filter(|name| support.tool_names.contains(name.as_str()))
            .cloned()
            .collect();
        let expected_dropped: Vec<String> = requested
            .iter()
            .filter(|name| !support.tool_names.contains(name.as_str()))
            .cloned()
            .collect();
        assert_eq!(partition.supported, expected_supported, "{}", provider);
        assert_eq!(partition.dropped, expected_dropped, "{}", provider);
    }
}

#[test]
fn test_validate_tools_keeps_duplicates() {
    let router = Router::new(&Config::default());
    let partition = router.validate_tools("perplexity", &names(&["code", "browse", "code"]));
    assert_eq!(partition.supported, names(&["browse"]));
    assert_eq!(partition.dropped, names(&["code", "code"]));
}

#[parameterized(
    provider = { "openai", "anthropic", "anthropic", "gemini", "perplexity", "openrouter", "acme" },
    model = {
        "gpt-4o", "claude-3-haiku-20240307", "claude-9", "gemini-2.0-flash",
        "sonar", "anything", "rocket-1"
    },
    expected = {
        (128_000, 4_096), (200_000, 4_096), (200_000, 8_192), (1_048_576, 8_192),
        (127_000, 4_096), (128_000, 4_096), (32_000, 2_048)
    }
)]
fn test_capability_lookup(provider: &str, model: &str, expected: (u32, u32)) {
    let record = CapabilityTable::default().get_capabilities(provider, model);
    assert_eq!(record, CapabilityRecord::new(expected.0, expected.1));
    assert!(record.is_usable());
}

#[test]
fn test_user_override_beats_builtin_entry() {
    let user = UserConfig::from_values(
        json!({
            "model_caps": {
                "openai:gpt-4o": {"context": 64_000, "max_output_tokens": 1_000},
                "acme:rocket-1": {"context": 0, "max_output_tokens": 10}
            }
        })
        .as_object()
        .unwrap()
        .clone(),
    );
    let config = Config::from_sources(&HashMap::new(), &user);
    let table = CapabilityTable::from_config(&config);

    assert_eq!(
        table.get_capabilities("openai", "gpt-4o"),
        CapabilityRecord::new(64_000, 1_000)
    );
    // Unusable overrides are ignored
    assert_eq!(
        table.get_capabilities("acme", "rocket-1"),
        CapabilityRecord::new(32_000, 2_048)
    );
}

#[test]
fn test_tool_support_for_unknown_provider() {
    let support = CapabilityTable::default().get_tool_support("acme");
    assert!(!support.supports_tools);
    assert!(support.tool_names.is_empty());
}
