//! One-shot requests that bypass directive parsing: summarising an attached
//! file into a new thread, and transforming a piece of selected text.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::ThreadId;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You summarize documents clearly and concisely.";
pub const TRANSFORM_SYSTEM_PROMPT: &str =
    "You transform text as instructed. Output only the transformed text.";

/// Sampling temperature for both summaries and transforms
pub const ACTION_TEMPERATURE: f64 = 0.2;
pub const SUMMARY_MAX_TOKENS: u32 = 600;

/// Characters of an attachment that reach the summary prompt
const SUMMARY_INPUT_CHARS: usize = 8_000;

/// Placeholder replaced by the selected text in an action prompt
const TEXT_PLACEHOLDER: &str = "{{text}}";

/// A saved text action, as stored in the workflow's action list
///
/// # Examples
///
/// ```
/// use aifred_core::action::TextAction;
///
/// let action = TextAction::from_json(r#"{"id": "fix", "prompt": "Fix the grammar: {{text}}"}"#).unwrap();
/// assert_eq!(action.instruction_for("me and him goes"), "Fix the grammar: me and him goes");
///
/// let bare = TextAction::from_json(r#"{"id": "Translate to French"}"#).unwrap();
/// assert_eq!(bare.instruction_for("hello"), "Translate to French:\n\nhello");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextAction {
    #[serde(default)]
    pub id: Option<String>,
    /// Full prompt; `{{text}}` marks where the selection goes
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
}

impl TextAction {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The user turn sent for `text`
    pub fn instruction_for(&self, text: &str) -> String {
        if let Some(prompt) = non_blank(&self.prompt) {
            return prompt.replace(TEXT_PLACEHOLDER, text);
        }
        let lead = non_blank(&self.instruction)
            .or_else(|| non_blank(&self.id))
            .unwrap_or_default();
        format!("{}:\n\n{}", lead, text)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Result of summarising an attachment into a fresh thread
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub file_name: String,
    pub thread_id: ThreadId,
    pub summary: String,
    pub error: bool,
}

impl Attachment {
    /// # Examples
    ///
    /// ```
    /// use aifred_core::action::Attachment;
    ///
    /// let attachment = Attachment {
    ///     file_name: "brief.txt".into(),
    ///     thread_id: 7,
    ///     summary: "Short.".into(),
    ///     error: false,
    /// };
    /// assert_eq!(attachment.display(), "Attached and summarized: brief.txt\nThread ID: 7");
    /// ```
    pub fn display(&self) -> String {
        format!(
            "Attached and summarized: {}\nThread ID: {}",
            self.file_name, self.thread_id
        )
    }
}

/// Text of an attached file
///
/// Invalid UTF-8 is replaced rather than rejected. A file that exists but cannot
/// be read becomes a `[Attachment: name]` placeholder.
///
/// # Errors
///
/// Returns [`Error::Io`] when the file does not exist.
pub fn read_attachment(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
        )));
    }
    match fs::read(path) {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        Err(e) => {
            warn!("Cannot read attachment {}: {}", path.display(), e);
            Ok(format!("[Attachment: {}]", file_name(path)))
        }
    }
}

/// Summary request body, truncated to the first few thousand characters
pub fn summary_prompt(text: &str) -> String {
    let excerpt: String = text.chars().take(SUMMARY_INPUT_CHARS).collect();
    format!(
        "Summarize the following document briefly and list key points if helpful.\n\n{}",
        excerpt
    )
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name(path))
}
