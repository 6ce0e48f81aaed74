//! Process entry for the aifred workflow action.
//!
//! Turns one command-line argument into a query payload, runs it through the
//! core orchestrator against the SQLite store, and renders the display text.
//! `--attach` and `--action` take the one-shot summary and transform paths instead.

pub mod cli;
pub mod logging;

// Re-export core types for convenience
pub use aifred_core;

use aifred_core::{Config, Error, Orchestrator, SqliteStore, summarise};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{error, info};

use crate::cli::{Args, action_from_arg, payload_from_arg};

/// Handles one invocation and returns the text to print
///
/// Never fails: argument, store and thread errors become a single line of text.
pub async fn run(args: &Args, config: &Config) -> String {
    if let Some(path) = &args.attach {
        return attach(path, config).await;
    }
    if let Some(raw) = &args.action {
        return transform(raw, &args.input_text(), config).await;
    }

    let payload = match payload_from_arg(&args.input_text()) {
        Ok(payload) => payload,
        Err(e) => return e.to_string(),
    };

    if args.explain {
        return summarise(&payload.directives);
    }

    let store = match open_store(config) {
        Ok(store) => store,
        Err(message) => return message,
    };

    match Orchestrator::new(config, &store).handle(&payload).await {
        Ok(outcome) => {
            info!(
                "Answered on thread {} ({} {})",
                outcome.thread_id, outcome.provider, outcome.model
            );
            outcome.display()
        }
        Err(e) => {
            error!("Query failed: {}", e);
            format!("Error: {}", e)
        }
    }
}

async fn attach(path: &Path, config: &Config) -> String {
    let store = match open_store(config) {
        Ok(store) => store,
        Err(message) => return message,
    };
    match Orchestrator::new(config, &store).attach(path).await {
        Ok(attachment) => attachment.display(),
        Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => "File not found".to_string(),
        Err(e) => {
            error!("Attaching {} failed: {}", path.display(), e);
            format!("Error: {}", e)
        }
    }
}

async fn transform(raw_action: &str, text: &str, config: &Config) -> String {
    let action = match action_from_arg(raw_action) {
        Ok(action) => action,
        Err(e) => return e.to_string(),
    };
    let store = match open_store(config) {
        Ok(store) => store,
        Err(message) => return message,
    };
    Orchestrator::new(config, &store)
        .transform(&action, text)
        .await
        .text
}

fn open_store(config: &Config) -> Result<SqliteStore, String> {
    SqliteStore::open(&config.db_path).map_err(|e| {
        error!("Cannot open store at {}: {}", config.db_path.display(), e);
        format!("Error: {}", e)
    })
}
