//! Process-wide settings, resolved once at start-up.
//!
//! Every setting goes through the same layered lookup:
//! persisted user config (JSON side-file) → environment variable → built-in default.
//! A layer whose value is missing or malformed is skipped.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::capability::CapabilityRecord;
use crate::error::Result;
use crate::provider::ProviderId;
use crate::secret::Secret;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Keep answers concise and clear.";

pub const DEFAULT_LEGAL_PROMPT: &str = "You are a meticulous legal research assistant. \
Identify the governing jurisdiction, cite primary authorities precisely, distinguish binding \
from persuasive sources, and flag uncertainty. Do not present your answer as legal advice.";

const CONFIG_FILE_NAME: &str = "aifred_config.json";
const DB_FILE_NAME: &str = "aifred.db";
const ALFRED_DATA_ENV: &str = "alfred_workflow_data";

/// The persisted user configuration side-file
///
/// Read-then-write with no locking; a missing or unreadable file is an empty config.
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    path: Option<PathBuf>,
    values: Map<String, Value>,
}

impl UserConfig {
    /// Loads the file at `path`, treating absence or invalid JSON as empty
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    warn!("Ignoring non-object user config at {}", path.display());
                    Map::new()
                }
                Err(e) => {
                    warn!("Ignoring unreadable user config at {}: {}", path.display(), e);
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };

        Self {
            path: Some(path),
            values,
        }
    }

    /// In-memory config, never written to disk
    pub fn from_values(values: Map<String, Value>) -> Self {
        Self { path: None, values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Sets one key and writes the whole file back
    pub fn set_option(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&Value::Object(self.values.clone()))?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Conversion used by the layered lookup for each layer's raw representation
pub trait SettingValue: Sized {
    fn from_json(value: &Value) -> Option<Self>;
    fn from_env(raw: &str) -> Option<Self>;
}

impl SettingValue for bool {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => Self::from_env(s),
            _ => None,
        }
    }

    fn from_env(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        }
    }
}

impl SettingValue for i64 {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => Self::from_env(s),
            _ => None,
        }
    }

    fn from_env(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl SettingValue for u64 {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => Self::from_env(s),
            _ => None,
        }
    }

    fn from_env(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl SettingValue for f64 {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Self::from_env(s),
            _ => None,
        }
    }

    fn from_env(raw: &str) -> Option<Self> {
        raw.trim().parse().ok().filter(|f: &f64| f.is_finite())
    }
}

impl SettingValue for String {
    fn from_json(value: &Value) -> Option<Self> {
        value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn from_env(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        (!raw.is_empty()).then(|| raw.to_string())
    }
}

impl SettingValue for ProviderId {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().and_then(Self::from_env)
    }

    fn from_env(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl SettingValue for Vec<String> {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Value::String(s) => Self::from_env(s),
            _ => None,
        }
    }

    fn from_env(raw: &str) -> Option<Self> {
        Some(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

/// The two non-default layers of every lookup
#[derive(Debug, Clone, Copy)]
pub struct Layers<'a> {
    pub user: &'a UserConfig,
    pub env: &'a HashMap<String, String>,
}

impl<'a> Layers<'a> {
    pub fn new(user: &'a UserConfig, env: &'a HashMap<String, String>) -> Self {
        Self { user, env }
    }

    /// First usable value from the user config key, then the environment variable
    pub fn lookup<T: SettingValue>(&self, key: &str, env_var: Option<&str>) -> Option<T> {
        if let Some(value) = self.user.get(key).and_then(T::from_json) {
            return Some(value);
        }
        env_var
            .and_then(|name| self.env.get(name))
            .and_then(|raw| T::from_env(raw))
    }

    /// [`Layers::lookup`] falling back to `default`
    pub fn resolve<T: SettingValue>(&self, key: &str, env_var: Option<&str>, default: T) -> T {
        self.lookup(key, env_var).unwrap_or(default)
    }

    fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Explicit configuration object passed by reference to the router, capability
/// table, provider clients and orchestrator
#[derive(Debug, Clone)]
pub struct Config {
    pub default_provider: ProviderId,
    pub default_models: HashMap<ProviderId, String>,
    pub max_input_tokens: i64,
    pub max_input_tokens_by_provider: HashMap<ProviderId, i64>,
    pub completion_reserve: i64,
    pub history_limit: usize,
    pub default_temperature: f64,
    pub tool_exec: bool,
    pub dry_run: bool,
    pub no_net: bool,
    pub debug: bool,
    pub http_timeout: Duration,
    pub system_prompt_path: Option<PathBuf>,
    pub persona_name: Option<String>,
    pub persona_prompt: Option<String>,
    pub legal_mode: bool,
    pub legal_tools: Vec<String>,
    pub model_caps: HashMap<String, CapabilityRecord>,
    pub db_path: PathBuf,
    pub user_config_path: PathBuf,
    pub openrouter_title: String,
    credentials: HashMap<ProviderId, Secret<String>>,
}

impl Default for Config {
    /// Built-in defaults only: no environment, no user config, no credentials
    fn default() -> Self {
        Self::from_sources(&HashMap::new(), &UserConfig::default())
    }
}

impl Config {
    /// Reads the process environment and the user config side-file
    pub fn load() -> Self {
        let env: HashMap<String, String> = std::env::vars().collect();
        let user_path = user_config_path(&env);
        let user = UserConfig::load(&user_path);
        debug!("Loaded user config from {}", user_path.display());
        Self::from_sources(&env, &user)
    }

    /// Resolves every setting from explicit sources
    pub fn from_sources(env: &HashMap<String, String>, user: &UserConfig) -> Self {
        let layers = Layers::new(user, env);

        let default_models = ProviderId::ALL
            .into_iter()
            .map(|p| {
                let key = format!("model_{}", p.as_str());
                let env_var = format!("AIFRED_MODEL_DEFAULT_{}", p.as_str().to_uppercase());
                let model = layers.resolve(&key, Some(&env_var), builtin_model(p).to_string());
                (p, model)
            })
            .collect();

        let max_input_tokens_by_provider = user
            .get("max_input_tokens_by_provider")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((k.parse().ok()?, i64::from_json(v)?)))
                    .collect()
            })
            .unwrap_or_default();

        let model_caps = user
            .get("model_caps")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| {
                        let record = serde_json::from_value::<CapabilityRecord>(v.clone());
                        match record {
                            Ok(record) if record.is_usable() => Some((k.clone(), record)),
                            _ => {
                                warn!("Ignoring malformed capability override for {}", k);
                                None
                            }
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let (persona_name, persona_prompt) = active_persona(user);

        let credentials = ProviderId::ALL
            .into_iter()
            .filter_map(|p| {
                credential_vars(p)
                    .iter()
                    .find_map(|var| layers.env_value(var))
                    .and_then(Secret::non_empty)
                    .map(|key| (p, key))
            })
            .collect();

        Self {
            default_provider: layers.resolve(
                "provider",
                Some("AIFRED_PROVIDER_DEFAULT"),
                ProviderId::OpenAi,
            ),
            default_models,
            max_input_tokens: layers.resolve(
                "max_input_tokens",
                Some("AIFRED_MAX_INPUT_TOKENS"),
                4_000,
            ),
            max_input_tokens_by_provider,
            completion_reserve: layers.resolve(
                "completion_reserve",
                Some("AIFRED_COMPLETION_RESERVE"),
                400,
            ),
            history_limit: layers.resolve::<u64>("history_limit", Some("AIFRED_HISTORY_LIMIT"), 50)
                as usize,
            default_temperature: layers.resolve("temperature", Some("AIFRED_TEMPERATURE"), 0.4),
            tool_exec: layers.resolve("tool_exec", Some("AIFRED_TOOL_EXEC"), false),
            dry_run: layers.resolve("dry_run", Some("AIFRED_DRY_RUN"), false),
            no_net: layers.resolve("no_net", Some("AIFRED_NO_NET"), false),
            debug: layers.resolve("debug", Some("AIFRED_DEBUG"), false),
            http_timeout: Duration::from_secs(layers.resolve(
                "http_timeout_secs",
                Some("AIFRED_HTTP_TIMEOUT"),
                60,
            )),
            system_prompt_path: layers
                .lookup::<String>("system_prompt_path", Some("AIFRED_SYSTEM_PROMPT_PATH"))
                .map(PathBuf::from),
            persona_name,
            persona_prompt,
            legal_mode: layers.resolve("legal_mode", Some("AIFRED_LEGAL_MODE"), false),
            legal_tools: layers.resolve(
                "legal_tools",
                None,
                ["browse", "fetch_url", "citation_extract", "case_search"]
                    .map(String::from)
                    .to_vec(),
            ),
            model_caps,
            db_path: db_path(env),
            user_config_path: user_config_path(env),
            openrouter_title: layers.resolve(
                "openrouter_title",
                Some("OPENROUTER_TITLE"),
                "aifred".to_string(),
            ),
            credentials,
        }
    }

    /// Default model for a provider when no model directive was given
    pub fn default_model(&self, provider: ProviderId) -> &str {
        self.default_models
            .get(&provider)
            .map(String::as_str)
            .unwrap_or_else(|| builtin_model(provider))
    }

    /// Input-token budget for a provider, falling back to the global budget
    pub fn max_input_tokens_for(&self, provider: ProviderId) -> i64 {
        self.max_input_tokens_by_provider
            .get(&provider)
            .copied()
            .unwrap_or(self.max_input_tokens)
    }

    pub fn api_key(&self, provider: ProviderId) -> Option<&Secret<String>> {
        self.credentials.get(&provider)
    }

    /// Installs a credential, mainly for tests and embedding
    pub fn set_api_key(&mut self, provider: ProviderId, key: Secret<String>) {
        self.credentials.insert(provider, key);
    }
}

fn builtin_model(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::OpenAi => "gpt-4o",
        ProviderId::Anthropic => "claude-3-7-sonnet",
        ProviderId::Perplexity => "sonar",
        ProviderId::Gemini => "gemini-2.0-flash",
        ProviderId::OpenRouter => "openai/gpt-4o-mini",
    }
}

fn credential_vars(provider: ProviderId) -> &'static [&'static str] {
    match provider {
        ProviderId::OpenAi => &["OPENAI_API_KEY"],
        ProviderId::Anthropic => &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"],
        ProviderId::Perplexity => &["PERPLEXITY_API_KEY"],
        ProviderId::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        ProviderId::OpenRouter => &["OPENROUTER_API_KEY"],
    }
}

/// Persona entries are either `{"prompt": "..."}` objects or bare strings
fn active_persona(user: &UserConfig) -> (Option<String>, Option<String>) {
    let Some(name) = user.get("active_persona").and_then(String::from_json) else {
        return (None, None);
    };
    let prompt = user
        .get("personas")
        .and_then(|p| p.get(&name))
        .and_then(|entry| match entry {
            Value::String(_) => String::from_json(entry),
            _ => entry.get("prompt").and_then(String::from_json),
        });
    match prompt {
        Some(prompt) => (Some(name), Some(prompt)),
        None => {
            warn!("Active persona {} has no prompt", name);
            (None, None)
        }
    }
}

fn alfred_data_dir(env: &HashMap<String, String>) -> Option<PathBuf> {
    env.get(ALFRED_DATA_ENV)
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// `$alfred_workflow_data/aifred_config.json`, else the working directory
pub fn user_config_path(env: &HashMap<String, String>) -> PathBuf {
    alfred_data_dir(env)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// `AIFRED_DB_PATH`, then the Alfred data dir, then the platform data dir
pub fn db_path(env: &HashMap<String, String>) -> PathBuf {
    if let Some(path) = env.get("AIFRED_DB_PATH").filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(dir) = alfred_data_dir(env) {
        return dir.join(DB_FILE_NAME);
    }
    dirs::data_dir()
        .map(|dir| dir.join("aifred").join(DB_FILE_NAME))
        .unwrap_or_else(|| Path::new(DB_FILE_NAME).to_path_buf())
}
