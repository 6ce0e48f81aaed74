use aifred_core::{
    Orchestrator, ProviderClients, ProviderId, ProviderResponse, QueryPayload, Role, Store,
    ThreadHint, ToolCall,
};
use serde_json::json;
use tracing::{Level, info};


use test_utils::{ScriptedClient, dry_run_config, setup_tracing, temp_store, transcript};

#[tokio::test]
async fn test_hello_world_dry_run() {
    setup_tracing(Level::DEBUG);
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();

    let payload = QueryPayload::from_json(
        r#"{"query": "hello world", "directives": {"model": "gpt-4o", "new": true}}"#,
    )
    .unwrap();
    let outcome = Orchestrator::new(&config, &store)
        .handle(&payload)
        .await
        .unwrap();

    let thread = store.get_thread(outcome.thread_id).unwrap().unwrap();
    assert_eq!(thread.provider, "openai");
    assert_eq!(thread.model, "gpt-4o");
    assert_eq!(
        transcript(&store, outcome.thread_id),
        vec![
            (Role::User, "hello world".to_string()),
            (
                Role::Assistant,
                "[dry-run openai:gpt-4o] hello world".to_string()
            ),
        ]
    );

    let display = outcome.display();
    assert!(display.starts_with("openai gpt-4o\n\n"));
    assert!(display.contains("[dry-run openai:gpt-4o] hello world"));
}

#[tokio::test]
async fn test_cont_reuses_thread_without_new_user_turn() {
    setup_tracing(Level::DEBUG);
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();
    let thread = store
        .create_thread(ProviderId::OpenAi, "gpt-4o", None)
        .unwrap();
    store
        .add_message(thread, Role::User, "what is a tort?", None)
        .unwrap();

    let payload = QueryPayload::from_json(r#"{"directives": {"cont": true}}"#).unwrap();
    let outcome = Orchestrator::new(&config, &store)
        .handle(&payload)
        .await
        .unwrap();

    assert_eq!(outcome.thread_id, thread);
    assert_eq!(store.get_recent_threads(10).unwrap().len(), 1);
    assert_eq!(
        transcript(&store, thread),
        vec![
            (Role::User, "what is a tort?".to_string()),
            (
                Role::Assistant,
                "[dry-run openai:gpt-4o] what is a tort?".to_string()
            ),
        ]
    );
}

#[tokio::test]
async fn test_tool_pass_persists_tool_result() {
    setup_tracing(Level::DEBUG);
    let config = dry_run_config(&[("AIFRED_TOOL_EXEC", "1")]);
    let (_dir, store) = temp_store();

    let outcome = Orchestrator::new(&config, &store)
        .handle(&QueryPayload::from_text("@tools:browse latest rulings"))
        .await
        .unwrap();

    let tool_message = r#"{"name":"web_search","result":{"results":["Stub result for: test"]}}"#;
    assert_eq!(
        transcript(&store, outcome.thread_id),
        vec![
            (Role::User, "latest rulings".to_string()),
            (Role::Tool, tool_message.to_string()),
            (
                Role::Assistant,
                format!("[dry-run openai:gpt-4o] {}", tool_message)
            ),
        ]
    );
    assert!(!outcome.error);
}

#[tokio::test]
async fn test_tool_calls_ignored_when_execution_disabled() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();

    let outcome = Orchestrator::new(&config, &store)
        .handle(&QueryPayload::from_text("@tools:browse latest rulings"))
        .await
        .unwrap();

    let roles: Vec<Role> = transcript(&store, outcome.thread_id)
        .into_iter()
        .map(|(role, _)| role)
        .collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(outcome.text, "[dry-run openai:gpt-4o] latest rulings");
}

#[tokio::test]
async fn test_search_native_provider_skips_tool_pass() {
    let config = dry_run_config(&[("AIFRED_TOOL_EXEC", "1")]);
    let (_dir, store) = temp_store();

    let outcome = Orchestrator::new(&config, &store)
        .handle(&QueryPayload::from_text("@sonar @tools:browse,python news"))
        .await
        .unwrap();

    assert_eq!(outcome.provider, ProviderId::Perplexity);
    assert_eq!(outcome.tools_dropped, vec!["python".to_string()]);
    assert_eq!(transcript(&store, outcome.thread_id).len(), 2);
    assert_eq!(
        outcome.display(),
        "perplexity sonar | unsupported tools dropped: python\n\n[dry-run perplexity:sonar] news"
    );
}

#[tokio::test]
async fn test_thread_hint_resumes_hinted_thread() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();
    let hinted = store
        .create_thread(ProviderId::Anthropic, "claude-3-7-sonnet", Some("brief"))
        .unwrap();
    // A newer thread that a "latest" lookup would pick instead
    store
        .create_thread(ProviderId::OpenAi, "gpt-4o", None)
        .unwrap();

    let payload = QueryPayload {
        query: "and the dissent?".into(),
        thread_hint: Some(ThreadHint { id: Some(hinted) }),
        ..Default::default()
    };
    let outcome = Orchestrator::new(&config, &store)
        .handle(&payload)
        .await
        .unwrap();

    assert_eq!(outcome.thread_id, hinted);
    assert_eq!(outcome.provider, ProviderId::Anthropic);
    assert_eq!(outcome.model, "claude-3-7-sonnet");
    assert_eq!(store.get_recent_threads(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_thread_hint_starts_new_thread() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();
    let existing = store
        .create_thread(ProviderId::OpenAi, "gpt-4o", None)
        .unwrap();

    let payload = QueryPayload::from_json(r#"{"query": "hi", "thread_hint": {"id": 999}}"#).unwrap();
    let outcome = Orchestrator::new(&config, &store)
        .handle(&payload)
        .await
        .unwrap();

    assert_ne!(outcome.thread_id, existing);
    assert_ne!(outcome.thread_id, 999);
    assert_eq!(store.get_recent_threads(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_new_flag_beats_thread_hint() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();
    let existing = store
        .create_thread(ProviderId::OpenAi, "gpt-4o", None)
        .unwrap();

    let mut payload = QueryPayload::from_text("@new @name:research start over");
    payload.thread_hint = Some(ThreadHint { id: Some(existing) });
    let outcome = Orchestrator::new(&config, &store)
        .handle(&payload)
        .await
        .unwrap();

    assert_ne!(outcome.thread_id, existing);
    let thread = store.get_thread(outcome.thread_id).unwrap().unwrap();
    assert_eq!(thread.name.as_deref(), Some("research"));
}

#[tokio::test]
async fn test_cont_with_explicit_model_matches_model() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();
    let mini = store
        .create_thread(ProviderId::OpenAi, "gpt-4o-mini", None)
        .unwrap();
    let full = store
        .create_thread(ProviderId::OpenAi, "gpt-4o", None)
        .unwrap();
    store.add_message(mini, Role::User, "older", None).unwrap();
    store.add_message(full, Role::User, "newest", None).unwrap();

    let outcome = Orchestrator::new(&config, &store)
        .handle(&QueryPayload::from_text("@gpt-4o-mini @cont again"))
        .await
        .unwrap();
    assert_eq!(outcome.thread_id, mini);
}

#[tokio::test]
async fn test_cont_matches_model_regardless_of_case() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();
    let thread = store
        .create_thread(ProviderId::OpenAi, "gpt-4o", None)
        .unwrap();
    store.add_message(thread, Role::User, "first", None).unwrap();

    let outcome = Orchestrator::new(&config, &store)
        .handle(&QueryPayload::from_text("@GPT-4o @cont again"))
        .await
        .unwrap();
    assert_eq!(outcome.thread_id, thread);
    assert_eq!(outcome.provider, ProviderId::OpenAi);
    assert_eq!(store.get_recent_threads(10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_single_tool_round_and_error_flags_combine() {
    setup_tracing(Level::DEBUG);
    let config = dry_run_config(&[("AIFRED_TOOL_EXEC", "1")]);
    let (_dir, store) = temp_store();

    let wants_tool = ProviderResponse {
        tool_calls: vec![ToolCall::new("web_search", json!({"query": "stare decisis"}))],
        error: true,
        ..Default::default()
    };
    let wants_more = ProviderResponse {
        text: "Here is the summary.".into(),
        tool_calls: vec![ToolCall::new("web_search", json!({"query": "again"}))],
        ..Default::default()
    };
    let client = ScriptedClient::new(ProviderId::OpenAi, vec![wants_tool, wants_more]);
    let requests = client.requests();

    let outcome = Orchestrator::new(&config, &store)
        .with_clients(ProviderClients::default().with_client(Box::new(client)))
        .handle(&QueryPayload::from_text("@tools:browse explain stare decisis"))
        .await
        .unwrap();

    let requests = requests.lock().unwrap();
    info!("Provider saw {} requests", requests.len());
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[1].messages.len(), 2);
    assert_eq!(requests[1].messages[1].role, Role::Tool);
    assert!(
        requests[1].messages[1]
            .content
            .contains("Stub result for: stare decisis")
    );

    assert!(outcome.error);
    assert_eq!(outcome.text, "Here is the summary.");
    let tools_persisted = transcript(&store, outcome.thread_id)
        .iter()
        .filter(|(role, _)| *role == Role::Tool)
        .count();
    assert_eq!(tools_persisted, 1);
}

#[tokio::test]
async fn test_request_assembly_defaults() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();
    let client = ScriptedClient::new(ProviderId::Anthropic, vec![]);
    let requests = client.requests();

    Orchestrator::new(&config, &store)
        .with_clients(ProviderClients::default().with_client(Box::new(client)))
        .handle(&QueryPayload::from_text("@provider:anthropic @pplx_recency:week hello"))
        .await
        .unwrap();

    let requests = requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.model, "claude-3-7-sonnet");
    assert_eq!(request.temperature, 0.4);
    assert_eq!(request.max_output_tokens, Some(8_192));
    assert_eq!(
        request.system_prompt,
        "You are a helpful assistant. Keep answers concise and clear."
    );
    assert_eq!(request.provider_options["recency"], "week");
    assert!(request.tool_names.is_empty());
}

#[tokio::test]
async fn test_directive_overrides_reach_the_request() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();
    let client = ScriptedClient::new(ProviderId::OpenAi, vec![]);
    let requests = client.requests();

    Orchestrator::new(&config, &store)
        .with_clients(ProviderClients::default().with_client(Box::new(client)))
        .handle(&QueryPayload::from_text(
            r#"@gpt-4o @temp:0.9 @max:800 @sys:"Answer in French." @tools:foo,browse bonjour"#,
        ))
        .await
        .unwrap();

    let requests = requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.temperature, 0.9);
    assert_eq!(request.max_output_tokens, Some(800));
    assert_eq!(request.system_prompt, "Answer in French.");
    assert_eq!(request.tool_names, vec!["browse".to_string()]);
}

#[tokio::test]
async fn test_history_is_trimmed_to_budget() {
    // Reserve exceeds the budget, so only the newest turn fits
    let config = dry_run_config(&[
        ("AIFRED_MAX_INPUT_TOKENS", "100"),
        ("AIFRED_COMPLETION_RESERVE", "500"),
    ]);
    let (_dir, store) = temp_store();
    let thread = store
        .create_thread(ProviderId::OpenAi, "gpt-4o", None)
        .unwrap();
    for i in 0..3 {
        store
            .add_message(thread, Role::User, &format!("question {}", i), None)
            .unwrap();
        store
            .add_message(thread, Role::Assistant, &format!("answer {}", i), None)
            .unwrap();
    }
    let client = ScriptedClient::new(ProviderId::OpenAi, vec![]);
    let requests = client.requests();

    let outcome = Orchestrator::new(&config, &store)
        .with_clients(ProviderClients::default().with_client(Box::new(client)))
        .handle(&QueryPayload::from_text("@cont follow-up"))
        .await
        .unwrap();
    assert_eq!(outcome.thread_id, thread);

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].messages[0].content, "follow-up");
    // Everything stays persisted even when it is not sent
    assert_eq!(transcript(&store, thread).len(), 8);
}

#[tokio::test]
async fn test_history_limit_bounds_loaded_messages() {
    let config = dry_run_config(&[("AIFRED_HISTORY_LIMIT", "2")]);
    let (_dir, store) = temp_store();
    let thread = store
        .create_thread(ProviderId::OpenAi, "gpt-4o", None)
        .unwrap();
    for i in 0..5 {
        store
            .add_message(thread, Role::User, &format!("turn {}", i), None)
            .unwrap();
    }
    let client = ScriptedClient::new(ProviderId::OpenAi, vec![]);
    let requests = client.requests();

    Orchestrator::new(&config, &store)
        .with_clients(ProviderClients::default().with_client(Box::new(client)))
        .handle(&QueryPayload::from_text("@cont turn 5"))
        .await
        .unwrap();

    let requests = requests.lock().unwrap();
    let sent: Vec<&str> = requests[0]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(sent, vec!["turn 3", "turn 4", "turn 5"]);
}

#[tokio::test]
async fn test_missing_credential_is_persisted_as_error() {
    let config = aifred_core::Config::default();
    let (_dir, store) = temp_store();

    let outcome = Orchestrator::new(&config, &store)
        .handle(&QueryPayload::from_text("@gemini-2.0-flash hi"))
        .await
        .unwrap();

    assert!(outcome.error);
    assert_eq!(
        outcome.text,
        "Error: Gemini API key missing. Set GEMINI_API_KEY."
    );
    let messages = store.get_thread_messages(outcome.thread_id, 10).unwrap();
    assert_eq!(messages[1].role, Role::Assistant);
    let meta = messages[1].meta.as_ref().unwrap();
    assert_eq!(meta["error"], true);
    assert_eq!(meta["tools_dropped"], json!([]));
}

#[tokio::test]
async fn test_user_turn_records_directives() {
    let config = dry_run_config(&[]);
    let (_dir, store) = temp_store();

    let outcome = Orchestrator::new(&config, &store)
        .handle(&QueryPayload::from_text("@temp:0.1 @tools:browse check"))
        .await
        .unwrap();

    let messages = store.get_thread_messages(outcome.thread_id, 10).unwrap();
    let meta = messages[0].meta.as_ref().unwrap();
    assert_eq!(meta["directives"]["temp"], 0.1);
    assert_eq!(meta["directives"]["tools"], json!(["browse"]));
}
