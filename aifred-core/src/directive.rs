//! Inline `@key[:value]` directives embedded in query text.
//!
//! ```
//! use aifred_core::{ProviderId, parse};
//!
//! let (text, directives) = parse(r#"Summarise this @claude-3-7-sonnet @temp:0.7 @sys:"Be brief." @tools:browse"#);
//! assert_eq!(text, "Summarise this");
//! assert_eq!(directives.model.as_deref(), Some("claude-3-7-sonnet"));
//! assert_eq!(directives.temperature, Some(0.7));
//! assert_eq!(directives.system_override.as_deref(), Some("Be brief."));
//! assert_eq!(directives.tool_names, vec!["browse".to_string()]);
//! assert_eq!(directives.provider, None::<ProviderId>);
//! ```

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::trace;

use crate::provider::{ProviderId, is_known_model};

/// `@key`, `@key:"quoted value"` or `@key:value`
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@([A-Za-z0-9_](?:[A-Za-z0-9_.\-/]*[A-Za-z0-9_\-])?)(?::(?:"([^"]*)"|(\S+)))?"#)
        .expect("directive pattern is valid")
});

/// Structured form of the directives found in one query
///
/// Serialized with the short keys the workflow's payloads use
/// (`model`, `provider`, `temp`, `max`, `name`, `cont`, `new`, `tools`, `sys`, `pplx`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectiveSet {
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default, deserialize_with = "lenient_provider")]
    pub provider: Option<ProviderId>,

    #[serde(
        default,
        rename = "temp",
        alias = "temperature",
        deserialize_with = "lenient_temperature"
    )]
    pub temperature: Option<f64>,

    #[serde(
        default,
        rename = "max",
        alias = "max_output_tokens",
        deserialize_with = "lenient_max"
    )]
    pub max_output_tokens: Option<u32>,

    #[serde(default, rename = "name", alias = "thread_name")]
    pub thread_name: Option<String>,

    #[serde(default, rename = "cont", deserialize_with = "lenient_flag")]
    pub continue_flag: bool,

    #[serde(default, rename = "new", deserialize_with = "lenient_flag")]
    pub new_flag: bool,

    #[serde(default, rename = "tools", deserialize_with = "lenient_tools")]
    pub tool_names: Vec<String>,

    #[serde(default, rename = "sys", alias = "system")]
    pub system_override: Option<String>,

    #[serde(default, rename = "pplx", skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_options: BTreeMap<String, String>,
}

impl DirectiveSet {
    /// True when no directive was recognised
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the query names a model or provider explicitly
    pub fn has_route_hint(&self) -> bool {
        self.model.is_some() || self.provider.is_some()
    }

    /// One-line description for user feedback, or `defaults`
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::parse;
    ///
    /// let (_, d) = parse("@gpt-4o @temp:0.4 @max:800 @tools:browse @new");
    /// assert_eq!(d.summarise(), "gpt-4o | temp 0.4 | max 800 | tools: browse | new");
    /// assert_eq!(parse("plain").1.summarise(), "defaults");
    /// ```
    pub fn summarise(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(model) = &self.model {
            parts.push(model.clone());
        }
        if let Some(temp) = self.temperature {
            parts.push(format!("temp {:?}", temp));
        }
        if let Some(max) = self.max_output_tokens {
            parts.push(format!("max {}", max));
        }
        if !self.tool_names.is_empty() {
            parts.push(format!("tools: {}", self.tool_names.join(",")));
        }
        if let Some(provider) = self.provider {
            parts.push(provider.to_string());
        }
        if self.new_flag {
            parts.push("new".to_string());
        }
        if self.continue_flag {
            parts.push("cont".to_string());
        }

        if parts.is_empty() {
            "defaults".to_string()
        } else {
            parts.join(" | ")
        }
    }

    /// Applies one `@key[:value]` token, returning whether it was recognised
    fn apply(&mut self, key: &str, value: Option<&str>) -> bool {
        let key_l = key.to_lowercase();

        let Some(value) = value else {
            return match key_l.as_str() {
                "new" => {
                    self.new_flag = true;
                    true
                }
                "cont" => {
                    self.continue_flag = true;
                    true
                }
                _ if is_known_model(key) => {
                    self.model = Some(key.to_string());
                    true
                }
                _ => false,
            };
        };

        match key_l.as_str() {
            "temp" => match value.trim().parse::<f64>() {
                Ok(t) if t.is_finite() => {
                    self.temperature = Some(t);
                    true
                }
                _ => false,
            },
            "max" => match value.trim().parse::<u32>() {
                Ok(m) => {
                    self.max_output_tokens = Some(m);
                    true
                }
                Err(_) => false,
            },
            "provider" => match value.parse::<ProviderId>() {
                Ok(p) => {
                    self.provider = Some(p);
                    true
                }
                Err(_) => false,
            },
            "name" => {
                self.thread_name = Some(value.to_string());
                true
            }
            "tools" => {
                self.tool_names = split_list(value);
                true
            }
            "sys" | "system" => {
                self.system_override = Some(value.to_string());
                true
            }
            "model" => {
                self.model = Some(value.to_string());
                true
            }
            "pplx" => {
                for pair in value.split(',') {
                    if let Some((k, v)) = pair.split_once('=') {
                        let k = k.trim();
                        if !k.is_empty() {
                            self.provider_options.insert(k.to_string(), v.trim().to_string());
                        }
                    }
                }
                true
            }
            _ => match key_l.strip_prefix("pplx_").filter(|sub| !sub.is_empty()) {
                Some(sub) => {
                    self.provider_options.insert(sub.to_string(), value.to_string());
                    true
                }
                None => false,
            },
        }
    }
}

impl fmt::Display for DirectiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summarise())
    }
}

/// Splits raw query text into cleaned text and the directives it carried
///
/// Never fails. Unrecognised or malformed tokens stay in the text verbatim; the
/// remaining text has whitespace runs collapsed and is trimmed. A token only counts
/// when its `@` starts a word and it is not immediately followed by another `@`,
/// so e-mail addresses survive and removing a token never creates a new one.
pub fn parse(raw: &str) -> (String, DirectiveSet) {
    let mut directives = DirectiveSet::default();
    let mut kept = String::with_capacity(raw.len());
    let mut last = 0;

    for caps in TOKEN.captures_iter(raw) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let starts_word = raw[..whole.start()]
            .chars()
            .next_back()
            .is_none_or(char::is_whitespace);
        let ends_cleanly = !raw[whole.end()..].starts_with('@');
        if !starts_word || !ends_cleanly {
            continue;
        }

        let key = caps.get(1).map_or("", |m| m.as_str());
        let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
        if directives.apply(key, value) {
            trace!("Consumed directive {}", whole.as_str());
            kept.push_str(&raw[last..whole.start()]);
            kept.push(' ');
            last = whole.end();
        }
    }
    kept.push_str(&raw[last..]);

    (collapse_whitespace(&kept), directives)
}

/// Alias for [`DirectiveSet::summarise`]
pub fn summarise(directives: &DirectiveSet) -> String {
    directives.summarise()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Unknown provider names in a payload are treated as absent
fn lenient_provider<'de, D>(deserializer: D) -> Result<Option<ProviderId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(p) => p.parse().ok(),
        _ => None,
    })
}

/// Numbers or numeric strings; anything else, or a non-finite value, is absent
fn lenient_temperature<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let temp = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(temp.filter(|t| t.is_finite()))
}

/// Non-negative integers or integer strings that fit a `u32`
fn lenient_max<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|m| u32::try_from(m).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    })
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    })
}

/// Accepts `["a", "b"]`, `"a,b"` or null
fn lenient_tools<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) => split_list(&s),
        _ => Vec::new(),
    })
}
