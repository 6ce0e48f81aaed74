//! One query in, one provider round-trip (plus at most one tool pass) out.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{
    ACTION_TEMPERATURE, Attachment, SUMMARY_MAX_TOKENS, SUMMARY_SYSTEM_PROMPT,
    TRANSFORM_SYSTEM_PROMPT, TextAction, file_name, file_stem, read_attachment, summary_prompt,
};
use crate::compactor::{ChatHistoryCompactor, DropOldestCompactor, trim_history_with};
use crate::config::{Config, DEFAULT_LEGAL_PROMPT, DEFAULT_SYSTEM_PROMPT};
use crate::directive::{self, DirectiveSet};
use crate::error::{Error, Result};
use crate::message::{Message, Role};
use crate::provider::{ProviderClients, ProviderId, ProviderResponse, SendRequest, Usage};
use crate::router::{Route, Router};
use crate::store::{Store, Thread, ThreadId};
use crate::tool_runtime::{BuiltinTools, ToolRuntime};

/// Identifies an existing thread to continue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadHint {
    /// Numeric id, accepted as a JSON number or a numeric string
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<ThreadId>,
}

fn lenient_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<ThreadId>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// The structured payload handled by [`Orchestrator::handle`]
///
/// # Examples
///
/// ```
/// use aifred_core::QueryPayload;
///
/// let payload = QueryPayload::from_json(
///     r#"{"query": "hello world", "directives": {"model": "gpt-4o", "new": true}}"#,
/// ).unwrap();
/// assert_eq!(payload.query, "hello world");
/// assert!(payload.directives.new_flag);
/// assert!(payload.thread_hint.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub directives: DirectiveSet,
    #[serde(default)]
    pub thread_hint: Option<ThreadHint>,
}

impl QueryPayload {
    /// Runs free text through the directive parser
    pub fn from_text(raw: &str) -> Self {
        let (query, directives) = directive::parse(raw);
        Self {
            query,
            directives,
            thread_hint: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// What one handled query produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub provider: ProviderId,
    pub model: String,
    pub thread_id: ThreadId,
    pub text: String,
    pub error: bool,
    pub tools_dropped: Vec<String>,
    pub usage: Usage,
}

impl Outcome {
    /// Header line, blank line, then the answer
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::{Outcome, ProviderId};
    ///
    /// let outcome = Outcome {
    ///     provider: ProviderId::OpenRouter,
    ///     model: "openai/gpt-4o-mini".into(),
    ///     thread_id: 1,
    ///     text: String::new(),
    ///     error: false,
    ///     tools_dropped: vec!["browse".into(), "code".into()],
    ///     usage: Default::default(),
    /// };
    /// assert_eq!(
    ///     outcome.display(),
    ///     "openrouter openai/gpt-4o-mini | unsupported tools dropped: browse, code\n\nNo response."
    /// );
    /// ```
    pub fn display(&self) -> String {
        let mut header = format!("{} {}", self.provider, self.model);
        if !self.tools_dropped.is_empty() {
            header.push_str(" | unsupported tools dropped: ");
            header.push_str(&self.tools_dropped.join(", "));
        }
        let body = if self.text.trim().is_empty() {
            "No response."
        } else {
            self.text.as_str()
        };
        format!("{}\n\n{}", header, body)
    }
}

/// System prompt for a query, first present wins
///
/// `@sys` directive, active persona, legal-mode prompt, the configured prompt
/// file, then the built-in default.
pub fn resolve_system_prompt(config: &Config, directives: &DirectiveSet) -> String {
    if let Some(sys) = directives
        .system_override
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        return sys.to_string();
    }
    if let Some(prompt) = &config.persona_prompt {
        return prompt.clone();
    }
    if config.legal_mode {
        return DEFAULT_LEGAL_PROMPT.to_string();
    }
    if let Some(path) = &config.system_prompt_path {
        match fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => return text.trim().to_string(),
            Ok(_) => debug!("System prompt file {} is empty", path.display()),
            Err(e) => warn!("Cannot read system prompt file {}: {}", path.display(), e),
        }
    }
    DEFAULT_SYSTEM_PROMPT.to_string()
}

/// Thread a query will be appended to, with the route it ends up using
#[derive(Debug)]
struct ResolvedThread {
    id: ThreadId,
    route: Route,
    created: bool,
}

/// Composes router, store, provider clients and tool runtime for one query
pub struct Orchestrator<'a> {
    config: &'a Config,
    store: &'a dyn Store,
    router: Router,
    clients: ProviderClients,
    tools: Box<dyn ToolRuntime>,
    compactor: Box<dyn ChatHistoryCompactor>,
}

impl<'a> Orchestrator<'a> {
    /// HTTP clients for every provider and the built-in tool runtime
    pub fn new(config: &'a Config, store: &'a dyn Store) -> Self {
        Self {
            config,
            store,
            router: Router::new(config),
            clients: ProviderClients::from_config(config),
            tools: Box::new(BuiltinTools::from_config(config)),
            compactor: Box::<DropOldestCompactor>::default(),
        }
    }

    #[must_use]
    pub fn with_clients(mut self, clients: ProviderClients) -> Self {
        self.clients = clients;
        self
    }

    #[must_use]
    pub fn with_tool_runtime<T: ToolRuntime + 'static>(mut self, tools: T) -> Self {
        self.tools = Box::new(tools);
        self
    }

    #[must_use]
    pub fn with_compactor<C: ChatHistoryCompactor + 'static>(mut self, comp: C) -> Self {
        self.compactor = Box::new(comp);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Handles one payload end to end
    ///
    /// # Errors
    ///
    /// Fails only when no thread can be resolved or the user turn cannot be
    /// stored; provider and tool problems come back inside the [`Outcome`].
    #[instrument(skip_all, level = "debug")]
    pub async fn handle(&self, payload: &QueryPayload) -> Result<Outcome> {
        let directives = &payload.directives;
        let query = payload.query.trim();
        if self.config.debug {
            info!("Query: {:?} directives: {}", query, directives.summarise());
        }

        let initial = self.router.resolve(directives);
        let thread = self.resolve_thread(directives, initial, query, payload.thread_hint.as_ref())?;
        let Route { provider, model } = thread.route;
        debug!(
            "Using thread {} ({}) for {}:{}",
            thread.id,
            if thread.created { "new" } else { "existing" },
            provider,
            model
        );

        let requested = self.requested_tools(directives);
        let partition = self.router.validate_tools(provider.as_str(), &requested);
        if !partition.dropped.is_empty() {
            warn!(
                "{} does not support tools: {}",
                provider,
                partition.dropped.join(", ")
            );
        }

        let system_prompt = resolve_system_prompt(self.config, directives);

        let mut history: Vec<Message> = self
            .store
            .get_thread_messages(thread.id, self.config.history_limit)?
            .iter()
            .map(Message::from)
            .collect();

        if !query.is_empty() {
            let meta = json!({ "directives": directives });
            self.store
                .add_message(thread.id, Role::User, query, Some(&meta))?;
            history.push(Message::user(query));
        }

        let capabilities = self
            .router
            .capabilities()
            .capabilities_for(provider, &model);
        let reserve = directives
            .max_output_tokens
            .map(i64::from)
            .unwrap_or(self.config.completion_reserve);
        let trimmed = trim_history_with(
            self.compactor.as_ref(),
            &history,
            Some(&system_prompt),
            self.config.max_input_tokens_for(provider),
            reserve,
        );
        debug!(
            "Sending {} of {} messages (~{} tokens)",
            trimmed.messages.len(),
            history.len(),
            trimmed.estimated_tokens
        );

        let mut request = SendRequest {
            system_prompt,
            messages: trimmed.messages,
            model: model.clone(),
            temperature: directives
                .temperature
                .unwrap_or(self.config.default_temperature),
            max_output_tokens: Some(
                directives
                    .max_output_tokens
                    .unwrap_or(capabilities.max_output_tokens),
            ),
            tool_names: partition.supported.clone(),
            provider_options: directives.provider_options.clone(),
        };

        let mut response = self.send(provider, &request).await;

        if self.config.tool_exec && !response.tool_calls.is_empty() {
            response = self.tool_pass(provider, thread.id, &mut request, response).await;
        }

        let usage = Value::Object(response.usage.clone());
        info!(
            provider = %provider,
            model = %model,
            tools = %partition.supported.join(","),
            usage = %usage,
            error = response.error,
            "Query answered"
        );

        if !response.text.is_empty() {
            let meta = json!({
                "usage": response.usage,
                "tools_dropped": partition.dropped,
                "error": response.error,
            });
            if let Err(e) =
                self.store
                    .add_message(thread.id, Role::Assistant, &response.text, Some(&meta))
            {
                error!("Failed to persist assistant reply: {}", e);
            }
        }

        Ok(Outcome {
            provider,
            model,
            thread_id: thread.id,
            text: response.text,
            error: response.error,
            tools_dropped: partition.dropped,
            usage: response.usage,
        })
    }

    /// Summarises a file with the default provider and files it as a new thread
    ///
    /// The thread is named after the file stem and holds an `[Attached file: ...]`
    /// user turn followed by the summary.
    ///
    /// # Errors
    ///
    /// Fails when the file does not exist or the thread cannot be stored.
    #[instrument(skip(self), level = "debug")]
    pub async fn attach(&self, path: &Path) -> Result<Attachment> {
        let text = read_attachment(path)?;
        let Route { provider, model } = self.router.resolve(&DirectiveSet::default());

        let mut request = SendRequest::new(
            model.clone(),
            vec![Message::user(summary_prompt(&text))],
        );
        request.system_prompt = SUMMARY_SYSTEM_PROMPT.to_string();
        request.temperature = ACTION_TEMPERATURE;
        request.max_output_tokens = Some(SUMMARY_MAX_TOKENS);
        let response = self.send(provider, &request).await;

        let name = file_name(path);
        let thread_id = self
            .store
            .create_thread(provider, &model, Some(&file_stem(path)))
            .map_err(|e| Error::ThreadResolution(e.to_string()))?;
        self.store.add_message(
            thread_id,
            Role::User,
            &format!("[Attached file: {}]", name),
            None,
        )?;
        if !response.text.is_empty() {
            let meta = json!({ "usage": response.usage, "error": response.error });
            if let Err(e) =
                self.store
                    .add_message(thread_id, Role::Assistant, &response.text, Some(&meta))
            {
                error!("Failed to persist summary of {}: {}", name, e);
            }
        }
        info!(
            provider = %provider,
            model = %model,
            error = response.error,
            "Attachment summarised"
        );

        Ok(Attachment {
            file_name: name,
            thread_id,
            summary: response.text,
            error: response.error,
        })
    }

    /// Applies a saved text action to `text` with the default provider
    ///
    /// Nothing is persisted; the reply text is the whole result.
    #[instrument(skip_all, level = "debug")]
    pub async fn transform(&self, action: &TextAction, text: &str) -> ProviderResponse {
        let Route { provider, model } = self.router.resolve(&DirectiveSet::default());
        let mut request = SendRequest::new(
            model.clone(),
            vec![Message::user(action.instruction_for(text))],
        );
        request.system_prompt = TRANSFORM_SYSTEM_PROMPT.to_string();
        request.temperature = ACTION_TEMPERATURE;

        let response = self.send(provider, &request).await;
        info!(
            provider = %provider,
            model = %model,
            action = action.id.as_deref().unwrap_or("custom"),
            error = response.error,
            "Text transformed"
        );
        response
    }

    /// Tool names for this query; legal mode supplies its own when none were given
    fn requested_tools(&self, directives: &DirectiveSet) -> Vec<String> {
        if directives.tool_names.is_empty() && self.config.legal_mode {
            return self.config.legal_tools.clone();
        }
        directives.tool_names.clone()
    }

    /// First match wins: `@new`, thread hint, `@cont`, then the default rule
    fn resolve_thread(
        &self,
        directives: &DirectiveSet,
        route: Route,
        query: &str,
        hint: Option<&ThreadHint>,
    ) -> Result<ResolvedThread> {
        if directives.new_flag {
            return self.create_thread(directives, route);
        }

        if let Some(id) = hint.and_then(|h| h.id) {
            match self.store.get_thread(id) {
                Ok(Some(thread)) => return Ok(self.reuse(directives, route, thread)),
                Ok(None) => info!("Thread {} not found, starting a new one", id),
                Err(e) => warn!("Lookup of thread {} failed, starting a new one: {}", id, e),
            }
            return self.create_thread(directives, route);
        }

        if directives.continue_flag || query.is_empty() {
            let latest = self
                .store
                .get_latest_thread(route.provider, directives.model.as_deref())
                .map_err(|e| Error::ThreadResolution(e.to_string()))?;
            if let Some(thread) = latest {
                return Ok(self.reuse(directives, route, thread));
            }
        }

        self.create_thread(directives, route)
    }

    fn create_thread(&self, directives: &DirectiveSet, route: Route) -> Result<ResolvedThread> {
        let id = self
            .store
            .create_thread(route.provider, &route.model, directives.thread_name.as_deref())
            .map_err(|e| Error::ThreadResolution(e.to_string()))?;
        Ok(ResolvedThread {
            id,
            route,
            created: true,
        })
    }

    /// An existing thread keeps its provider and model unless the query names one
    fn reuse(&self, directives: &DirectiveSet, route: Route, thread: Thread) -> ResolvedThread {
        let route = match thread.provider_id() {
            Some(provider)
                if directives.model.is_none()
                    && directives.provider.is_none_or(|p| p == provider) =>
            {
                Route {
                    provider,
                    model: thread.model,
                }
            }
            _ => route,
        };
        ResolvedThread {
            id: thread.id,
            route,
            created: false,
        }
    }

    async fn send(&self, provider: ProviderId, request: &SendRequest) -> ProviderResponse {
        match self.clients.get(provider) {
            Some(client) => client.send(request).await,
            None => {
                error!("No client registered for {}", provider);
                ProviderResponse::failure(format!(
                    "Error: no client configured for {}.",
                    provider.display_name()
                ))
            }
        }
    }

    /// Runs every requested call once, then re-sends a single time
    async fn tool_pass(
        &self,
        provider: ProviderId,
        thread_id: ThreadId,
        request: &mut SendRequest,
        first: ProviderResponse,
    ) -> ProviderResponse {
        info!("Executing {} tool call(s)", first.tool_calls.len());
        for call in &first.tool_calls {
            let result = self.tools.execute(&call.name, &call.arguments).await;
            let message = Message::tool_result(&call.name, &result);
            if let Err(e) = self
                .store
                .add_message(thread_id, Role::Tool, &message.content, None)
            {
                error!("Failed to persist result of {}: {}", call.name, e);
            }
            request.messages.push(message);
        }

        let mut second = self.send(provider, request).await;
        if !second.tool_calls.is_empty() {
            debug!(
                "Ignoring {} follow-up tool call(s)",
                second.tool_calls.len()
            );
        }
        second.error |= first.error;
        second
    }
}
