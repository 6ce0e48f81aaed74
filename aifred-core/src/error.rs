use thiserror::Error;

/// Errors that can occur when running a tool on the provider's behalf
#[derive(Error, Debug)]
pub enum ToolError {
    /// Tool with the specified name was not found in the runtime
    #[error("unknown tool: {0}")]
    NotFound(String),

    /// Error generating JSON schema for tool
    #[error("Failed to generate schema for tool '{0}': {1}")]
    SchemaGenerationError(String, serde_json::Error),

    /// Error parsing arguments for tool
    #[error("Failed to parse arguments for tool '{0}': {1}")]
    ArgumentParsingError(String, serde_json::Error),

    /// Invalid arguments for tool
    #[error("Invalid arguments for tool: {0}")]
    InvalidArguments(String),

    /// Tool execution encountered an error
    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

/// Represents errors that can occur in the aifred core
#[derive(Error, Debug)]
pub enum Error {
    /// Error during serialization or deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error during HTTP request
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Couldn't parse base url")]
    BaseUrlError(#[from] url::ParseError),

    /// Error from the SQLite store
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Filesystem error (config file, system prompt file, database directory)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No thread could be resolved or created for the request
    #[error("Failed to resolve thread: {0}")]
    ThreadResolution(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Provider returned an error payload
    #[error("Provider not available: {0}")]
    ProviderUnavailable(String),

    /// Configuration value could not be used
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool-specific error
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// A Result type that uses our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_message() {
        let err = ToolError::NotFound("teleport".to_string());
        assert_eq!(err.to_string(), "unknown tool: teleport");
    }

    #[test]
    fn test_thread_resolution_display() {
        let err = Error::ThreadResolution("store unavailable".into());
        assert_eq!(
            err.to_string(),
            "Failed to resolve thread: store unavailable"
        );
    }
}
