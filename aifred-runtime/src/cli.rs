use aifred_core::{Config, QueryPayload, TextAction};
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Command-line arguments for the `aifred` action
#[derive(Debug, Clone, Parser)]
#[command(name = "aifred")]
#[command(about = "Send one query to the routed LLM provider and print the answer")]
#[command(version)]
pub struct Args {
    /// JSON payload `{query, directives, thread_hint}`, or free text with @directives
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub input: Vec<String>,

    /// Skip the network and echo a placeholder reply
    #[arg(long)]
    pub dry_run: bool,

    /// Run tools the provider asks for, then send once more
    #[arg(long)]
    pub tool_exec: bool,

    /// SQLite database path (overrides AIFRED_DB_PATH)
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Print what the directives will do instead of sending
    #[arg(long)]
    pub explain: bool,

    /// Summarise a file into a new thread instead of sending a query
    #[arg(long, value_name = "PATH", conflicts_with_all = ["action", "explain"])]
    pub attach: Option<PathBuf>,

    /// Saved text action (JSON) to apply to the input text
    #[arg(long, value_name = "JSON", conflicts_with = "explain")]
    pub action: Option<String>,
}

impl Args {
    /// The positional words joined back into one argument
    pub fn input_text(&self) -> String {
        self.input.join(" ")
    }

    /// Flags only ever switch settings on; the layered config stays authoritative otherwise
    pub fn apply(&self, config: &mut Config) {
        if self.dry_run {
            config.dry_run = true;
        }
        if self.tool_exec {
            config.tool_exec = true;
        }
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    /// Input that starts like JSON but is not a valid payload
    #[error("Unrecognised argument")]
    Unrecognised,
}

/// Decodes the `--action` argument
pub fn action_from_arg(raw: &str) -> Result<TextAction, ArgError> {
    TextAction::from_json(raw.trim()).map_err(|e| {
        debug!("Argument is not a text action: {}", e);
        ArgError::Unrecognised
    })
}

/// JSON payloads are taken as-is; anything else goes through the directive parser
///
/// # Examples
///
/// ```
/// use aifred_runtime::cli::{ArgError, payload_from_arg};
///
/// let payload = payload_from_arg("@claude-3-7-sonnet define estoppel").unwrap();
/// assert_eq!(payload.query, "define estoppel");
///
/// assert_eq!(payload_from_arg("{not json"), Err(ArgError::Unrecognised));
/// ```
pub fn payload_from_arg(raw: &str) -> Result<QueryPayload, ArgError> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        return QueryPayload::from_json(raw).map_err(|e| {
            debug!("Argument is not a query payload: {}", e);
            ArgError::Unrecognised
        });
    }
    Ok(QueryPayload::from_text(raw))
}
