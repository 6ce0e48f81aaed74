use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{Result, ToolError};
use crate::tool::{BuiltinTool, LlmToolInfo, ToolDefinition};

const USER_AGENT: &str = "aifred/1.0";
const SEARCH_URL: &str = "https://duckduckgo.com/html/";
const CASE_SEARCH_URL: &str = "https://www.courtlistener.com/api/rest/v4/search/";
const MAX_SEARCH_HITS: usize = 3;
const MAX_CASE_HITS: usize = 5;
const MAX_FETCH_CHARS: usize = 4_000;

/// Shared state handed to every tool call
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub http: Client,
    /// When set, network-backed tools return deterministic stubs
    pub offline: bool,
}

impl ToolContext {
    pub fn new(offline: bool) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client for tools: {}", e);
                Client::new()
            });
        Self { http, offline }
    }

    /// Offline whenever dry-run or no-network mode is on
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.dry_run || config.no_net)
    }
}

/// Executes a provider-requested tool call
///
/// Never fails: problems come back as a JSON object with an `error` key.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    async fn execute(&self, name: &str, arguments: &Value) -> Value;
}

/// Runtime backed by the built-in tool set
#[derive(Debug, Clone)]
pub struct BuiltinTools {
    ctx: ToolContext,
}

impl BuiltinTools {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ToolContext::from_config(config))
    }

    async fn dispatch(&self, tool: BuiltinTool, arguments: Value) -> Result<Value> {
        let ctx = &self.ctx;
        match tool {
            BuiltinTool::WebSearch => WebSearchTool.call_json(ctx, arguments).await,
            BuiltinTool::CodeRun => CodeRunTool.call_json(ctx, arguments).await,
            BuiltinTool::PythonRun => PythonRunTool.call_json(ctx, arguments).await,
            BuiltinTool::FetchUrl => FetchUrlTool.call_json(ctx, arguments).await,
            BuiltinTool::CitationExtract => CitationExtractTool.call_json(ctx, arguments).await,
            BuiltinTool::CaseSearch => CaseSearchTool.call_json(ctx, arguments).await,
        }
    }
}

#[async_trait]
impl ToolRuntime for BuiltinTools {
    #[instrument(skip(self, arguments), level = "debug")]
    async fn execute(&self, name: &str, arguments: &Value) -> Value {
        let Some(tool) = BuiltinTool::from_name(name) else {
            warn!("Provider requested unknown tool {}", name);
            return error_value(ToolError::NotFound(name.to_string()));
        };

        info!("Executing tool {}", tool.function_name());
        match self.dispatch(tool, normalize_arguments(arguments)).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Tool {} failed: {}", tool.function_name(), e);
                error_value(e)
            }
        }
    }
}

/// Provider-facing declarations for the given directive-level tool names
///
/// Names that are not built-in tools are skipped.
pub fn tool_declarations(names: &[String]) -> Vec<LlmToolInfo> {
    names
        .iter()
        .filter_map(|name| BuiltinTool::from_name(name))
        .filter_map(|tool| match declaration(tool) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Skipping declaration for {}: {}", tool, e);
                None
            }
        })
        .collect()
}

fn declaration(tool: BuiltinTool) -> Result<LlmToolInfo> {
    match tool {
        BuiltinTool::WebSearch => WebSearchTool.info(),
        BuiltinTool::CodeRun => CodeRunTool.info(),
        BuiltinTool::PythonRun => PythonRunTool.info(),
        BuiltinTool::FetchUrl => FetchUrlTool.info(),
        BuiltinTool::CitationExtract => CitationExtractTool.info(),
        BuiltinTool::CaseSearch => CaseSearchTool.info(),
    }
}

/// Providers send arguments as an object, a JSON string, or nothing at all
fn normalize_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Null => json!({}),
        Value::String(raw) if raw.trim().is_empty() => json!({}),
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| json!({})),
        other => other.clone(),
    }
}

fn error_value(e: impl std::fmt::Display) -> Value {
    json!({ "error": e.to_string() })
}

fn required(field: &str, value: &str) -> std::result::Result<String, ToolError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ToolError::InvalidArguments(format!("missing {}", field)));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub results: Vec<String>,
}

pub struct WebSearchTool;

#[async_trait]
impl ToolDefinition for WebSearchTool {
    type Input = QueryInput;
    type Output = SearchResults;

    fn name(&self) -> String {
        BuiltinTool::WebSearch.function_name().to_string()
    }

    fn description(&self) -> String {
        "Search the web for up-to-date information.".to_string()
    }

    async fn call(
        &self,
        ctx: &ToolContext,
        input: QueryInput,
    ) -> std::result::Result<SearchResults, ToolError> {
        let query = required("query", &input.query)?;
        if ctx.offline {
            return Ok(SearchResults {
                results: vec![format!("Stub result for: {}", query)],
            });
        }

        let body = ctx
            .http
            .get(SEARCH_URL)
            .query(&[("q", query.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?
            .text()
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        let mut results = parse_search_hits(&body, MAX_SEARCH_HITS);
        debug!("Parsed {} search hits", results.len());
        if results.is_empty() {
            results.push("No results parsed".to_string());
        }
        Ok(SearchResults { results })
    }
}

static SEARCH_HIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="result__a"[^>]*>(.*?)</a>"#).expect("search hit pattern is valid")
});
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));
static SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("script pattern is valid")
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

fn parse_search_hits(html: &str, limit: usize) -> Vec<String> {
    SEARCH_HIT
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| readable_text(m.as_str()))
        .filter(|t| !t.is_empty())
        .take(limit)
        .collect()
}

/// Strips markup and collapses whitespace
fn readable_text(html: &str) -> String {
    let without_scripts = SCRIPT.replace_all(html, " ");
    let without_tags = TAG.replace_all(&without_scripts, " ");
    WHITESPACE
        .replace_all(&without_tags, " ")
        .trim()
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CodeRunInput {
    #[serde(default)]
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeRunOutput {
    pub message: String,
    pub instructions: String,
}

pub struct CodeRunTool;

#[async_trait]
impl ToolDefinition for CodeRunTool {
    type Input = CodeRunInput;
    type Output = CodeRunOutput;

    fn name(&self) -> String {
        BuiltinTool::CodeRun.function_name().to_string()
    }

    fn description(&self) -> String {
        "Draft or explain code; returns code text.".to_string()
    }

    async fn call(
        &self,
        _ctx: &ToolContext,
        input: CodeRunInput,
    ) -> std::result::Result<CodeRunOutput, ToolError> {
        Ok(CodeRunOutput {
            message: "Code generation tool placeholder".to_string(),
            instructions: input.instructions,
        })
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PythonRunInput {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PythonRunOutput {
    pub message: String,
    pub code: String,
}

/// Never executes anything; hands the code back for review
pub struct PythonRunTool;

#[async_trait]
impl ToolDefinition for PythonRunTool {
    type Input = PythonRunInput;
    type Output = PythonRunOutput;

    fn name(&self) -> String {
        BuiltinTool::PythonRun.function_name().to_string()
    }

    fn description(&self) -> String {
        "Propose Python to execute elsewhere (no local execution).".to_string()
    }

    async fn call(
        &self,
        _ctx: &ToolContext,
        input: PythonRunInput,
    ) -> std::result::Result<PythonRunOutput, ToolError> {
        Ok(PythonRunOutput {
            message: "Python execution not supported; returning code for review.".to_string(),
            code: input.code,
        })
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FetchUrlInput {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchUrlOutput {
    pub url: String,
    pub text: String,
}

pub struct FetchUrlTool;

#[async_trait]
impl ToolDefinition for FetchUrlTool {
    type Input = FetchUrlInput;
    type Output = FetchUrlOutput;

    fn name(&self) -> String {
        BuiltinTool::FetchUrl.function_name().to_string()
    }

    fn description(&self) -> String {
        "Fetch and extract readable text from a URL (best-effort).".to_string()
    }

    async fn call(
        &self,
        ctx: &ToolContext,
        input: FetchUrlInput,
    ) -> std::result::Result<FetchUrlOutput, ToolError> {
        let raw = required("url", &input.url)?;
        let url = url::Url::parse(&raw)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| ToolError::InvalidArguments(format!("not an http(s) url: {}", raw)))?;

        if ctx.offline {
            return Ok(FetchUrlOutput {
                text: format!("Stub content for: {}", url),
                url: url.to_string(),
            });
        }

        let body = ctx
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?
            .text()
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        Ok(FetchUrlOutput {
            url: url.to_string(),
            text: readable_text(&body).chars().take(MAX_FETCH_CHARS).collect(),
        })
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CitationExtractInput {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Citations {
    pub cases: Vec<String>,
    pub statutes: Vec<String>,
}

static CASE_CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{1,4}\s+(?:U\.S\.|S\.\s?Ct\.|L\.\s?Ed\.(?:\s?2d)?|F\.(?:\s?(?:2d|3d|4th))?|F\.\s?Supp\.(?:\s?(?:2d|3d))?|[A-Z][A-Za-z.]*\s?(?:2d|3d)?)\s+\d{1,5}(?:\s*\([^()]*\d{4}\))?",
    )
    .expect("case citation pattern is valid")
});
static STATUTE_CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,3}\s+(?:U\.S\.C\.|C\.F\.R\.)\s*(?:§{1,2}\s*)?\d+[A-Za-z0-9\-.]*")
        .expect("statute citation pattern is valid")
});

/// Pulls reporter and code citations out of free text, deduplicated in order
pub fn extract_citations(text: &str) -> Citations {
    let statutes = unique(STATUTE_CITATION.find_iter(text).map(|m| m.as_str()));
    let cases = unique(
        CASE_CITATION
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|c| !statutes.iter().any(|s| s.contains(c) || c.contains(s.as_str()))),
    );
    Citations { cases, statutes }
}

fn unique<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().trim_end_matches('.').to_string();
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

pub struct CitationExtractTool;

#[async_trait]
impl ToolDefinition for CitationExtractTool {
    type Input = CitationExtractInput;
    type Output = Citations;

    fn name(&self) -> String {
        BuiltinTool::CitationExtract.function_name().to_string()
    }

    fn description(&self) -> String {
        "Extract legal citations (cases, statutes) from text.".to_string()
    }

    async fn call(
        &self,
        _ctx: &ToolContext,
        input: CitationExtractInput,
    ) -> std::result::Result<Citations, ToolError> {
        Ok(extract_citations(&input.text))
    }
}

pub struct CaseSearchTool;

#[derive(Debug, Deserialize)]
struct CourtListenerPage {
    #[serde(default)]
    results: Vec<CourtListenerHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourtListenerHit {
    #[serde(default)]
    case_name: Option<String>,
    #[serde(default)]
    citation: Vec<String>,
    #[serde(default)]
    date_filed: Option<String>,
}

impl CourtListenerHit {
    fn summary(&self) -> Option<String> {
        let name = self.case_name.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        let mut line = name.to_string();
        if let Some(cite) = self.citation.first() {
            line.push_str(", ");
            line.push_str(cite);
        }
        if let Some(year) = self.date_filed.as_deref().and_then(|d| d.get(..4)) {
            line.push_str(&format!(" ({})", year));
        }
        Some(line)
    }
}

#[async_trait]
impl ToolDefinition for CaseSearchTool {
    type Input = QueryInput;
    type Output = SearchResults;

    fn name(&self) -> String {
        BuiltinTool::CaseSearch.function_name().to_string()
    }

    fn description(&self) -> String {
        "Search case law by keyword (CourtListener API).".to_string()
    }

    async fn call(
        &self,
        ctx: &ToolContext,
        input: QueryInput,
    ) -> std::result::Result<SearchResults, ToolError> {
        let query = required("query", &input.query)?;
        if ctx.offline {
            return Ok(SearchResults {
                results: vec![format!("Stub case result for: {}", query)],
            });
        }

        let page = ctx
            .http
            .get(CASE_SEARCH_URL)
            .query(&[("q", query.as_str()), ("type", "o")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?
            .json::<CourtListenerPage>()
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        let mut results: Vec<String> = page
            .results
            .iter()
            .filter_map(CourtListenerHit::summary)
            .take(MAX_CASE_HITS)
            .collect();
        if results.is_empty() {
            results.push("No cases found".to_string());
        }
        Ok(SearchResults { results })
    }
}
