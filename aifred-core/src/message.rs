use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Represents the role of a message in a persisted conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the user
    User,
    /// Message from the assistant
    Assistant,
    /// Result of a tool call, serialized as `{"name": ..., "result": ...}`
    Tool,
}

impl Role {
    /// Returns a string representation of the role
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::Role;
    ///
    /// assert_eq!(Role::Tool.as_str(), "tool");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(Error::Other(format!("unknown message role: {}", other))),
        }
    }
}

/// A single conversation turn as sent to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a tool message carrying `{"name": name, "result": result}`
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::{Message, Role};
    /// use serde_json::json;
    ///
    /// let msg = Message::tool_result("web_search", &json!({"results": []}));
    /// assert_eq!(msg.role, Role::Tool);
    /// assert_eq!(msg.content, r#"{"name":"web_search","result":{"results":[]}}"#);
    /// ```
    pub fn tool_result(name: &str, result: &Value) -> Self {
        let body = serde_json::json!({ "name": name, "result": result });
        Self::new(Role::Tool, body.to_string())
    }
}

/// A provider's request to invoke a tool, normalised to name + arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = Message::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
