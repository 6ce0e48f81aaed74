use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result, ToolError};
use crate::tool_runtime::ToolContext;

/// Core trait for defining tools with associated input and output types
///
/// The input type's JSON schema is what providers see as the tool's parameters;
/// `call` runs the tool locally during the orchestrator's tool pass.
///
/// # Examples
///
/// ```
/// use aifred_core::{ToolContext, ToolDefinition, ToolError};
/// use async_trait::async_trait;
/// use schemars::JsonSchema;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Deserialize, JsonSchema)]
/// struct EchoRequest {
///     text: String,
/// }
///
/// #[derive(Debug, Clone, Serialize)]
/// struct EchoResponse {
///     text: String,
/// }
///
/// struct EchoTool;
///
/// #[async_trait]
/// impl ToolDefinition for EchoTool {
///     type Input = EchoRequest;
///     type Output = EchoResponse;
///
///     fn name(&self) -> String {
///         "echo".to_string()
///     }
///
///     fn description(&self) -> String {
///         "Echo the text back".to_string()
///     }
///
///     async fn call(&self, _ctx: &ToolContext, input: EchoRequest) -> Result<EchoResponse, ToolError> {
///         Ok(EchoResponse { text: input.text })
///     }
/// }
/// ```
#[async_trait]
pub trait ToolDefinition: Send + Sync {
    /// The input type that this tool accepts
    type Input: DeserializeOwned + JsonSchema + Send + Sync + 'static;

    /// The output type that this tool produces
    type Output: Serialize + Send + Sync + 'static;

    /// Returns the function name the provider calls
    fn name(&self) -> String;

    /// Returns the description of the tool
    fn description(&self) -> String;

    /// Helper to generate the JSON schema for the input type
    fn schema(&self) -> Result<Value> {
        let schema = schemars::schema_for!(Self::Input);
        let mut value = serde_json::to_value(schema.schema)
            .map_err(|e| ToolError::SchemaGenerationError(self.name(), e))?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("title");
        }
        Ok(value)
    }

    /// Runs the tool
    async fn call(
        &self,
        ctx: &ToolContext,
        input: Self::Input,
    ) -> std::result::Result<Self::Output, ToolError>;

    /// Provider-facing declaration of this tool
    fn info(&self) -> Result<LlmToolInfo> {
        Ok(LlmToolInfo {
            name: self.name(),
            description: self.description(),
            parameters: self.schema()?,
        })
    }

    /// Deserializes raw provider arguments and runs the tool
    async fn call_json(&self, ctx: &ToolContext, arguments: Value) -> Result<Value> {
        let input = serde_json::from_value::<Self::Input>(arguments)
            .map_err(|e| ToolError::ArgumentParsingError(self.name(), e))?;
        let output = self.call(ctx, input).await?;
        serde_json::to_value(output).map_err(Error::from)
    }
}

/// LLM-facing representation of a tool
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LlmToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The tools the workflow knows how to declare and run
///
/// Each tool has two names: the short one used in `@tools:` directives and
/// provider capability lists, and the function name the provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    WebSearch,
    CodeRun,
    PythonRun,
    FetchUrl,
    CitationExtract,
    CaseSearch,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 6] = [
        BuiltinTool::WebSearch,
        BuiltinTool::CodeRun,
        BuiltinTool::PythonRun,
        BuiltinTool::FetchUrl,
        BuiltinTool::CitationExtract,
        BuiltinTool::CaseSearch,
    ];

    /// Looks a tool up by either its directive name or its function name
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::BuiltinTool;
    ///
    /// assert_eq!(BuiltinTool::from_name("browse"), Some(BuiltinTool::WebSearch));
    /// assert_eq!(BuiltinTool::from_name("web_search"), Some(BuiltinTool::WebSearch));
    /// assert_eq!(BuiltinTool::from_name("teleport"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.directive_name() == name || t.function_name() == name)
    }

    pub fn directive_name(&self) -> &'static str {
        match self {
            BuiltinTool::WebSearch => "browse",
            BuiltinTool::CodeRun => "code",
            BuiltinTool::PythonRun => "python",
            BuiltinTool::FetchUrl => "fetch_url",
            BuiltinTool::CitationExtract => "citation_extract",
            BuiltinTool::CaseSearch => "case_search",
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self {
            BuiltinTool::WebSearch => "web_search",
            BuiltinTool::CodeRun => "code_run",
            BuiltinTool::PythonRun => "python_run",
            BuiltinTool::FetchUrl => "fetch_url",
            BuiltinTool::CitationExtract => "citation_extract",
            BuiltinTool::CaseSearch => "case_search",
        }
    }
}

impl fmt::Display for BuiltinTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive_name())
    }
}
