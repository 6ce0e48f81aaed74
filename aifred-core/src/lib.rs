// Core library for the aifred workflow: directive parsing, provider routing,
// token budgeting and request orchestration, plus the store, provider client
// and tool runtime implementations they drive.

pub mod action;
pub mod capability;
pub mod compactor;
pub mod config;
pub mod directive;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod router;
pub mod secret;
pub mod store;
pub mod token;
pub mod tool;
pub mod tool_runtime;

// Re-export the main types for convenient usage
pub use action::{Attachment, TextAction};
pub use capability::{CapabilityRecord, CapabilityTable, ToolSupport};
pub use compactor::{ChatHistoryCompactor, DropOldestCompactor, TrimmedHistory, trim_history};
pub use config::{Config, UserConfig};
pub use directive::{DirectiveSet, parse, summarise};
pub use error::{Error, Result, ToolError};
pub use message::{Message, Role, ToolCall};
pub use orchestrator::{Orchestrator, Outcome, QueryPayload, ThreadHint};
pub use provider::{ProviderClient, ProviderClients, ProviderId, ProviderResponse, SendRequest};
pub use router::{Route, Router, ToolPartition};
pub use secret::Secret;
pub use store::{SqliteStore, Store, Thread, ThreadId};
pub use token::{TokenCounter, estimate_tokens, estimate_tokens_for_conversation};
pub use tool::{BuiltinTool, LlmToolInfo, ToolDefinition};
pub use tool_runtime::{BuiltinTools, ToolContext, ToolRuntime};
