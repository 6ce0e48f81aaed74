use crate::message::Message;

/// Approximate number of characters per token for common sub-word tokenizers
const CHARS_PER_TOKEN: usize = 4;

/// A simple token counter for tracking estimated usage across a conversation
///
/// Estimates use a character heuristic (`ceil(chars / 4)`, at least 1 for
/// non-empty text). A real tokenizer for the target model family can replace
/// [`TokenCounter::count_tokens`] without changing callers.
///
/// # Examples
///
/// ```
/// use aifred_core::TokenCounter;
///
/// let mut counter = TokenCounter::default();
/// counter.observe("Hello, world!");
/// assert_eq!(counter.total(), 4);
///
/// counter.subtract("Hello");
/// assert_eq!(counter.total(), 2);
///
/// assert!(counter.under_budget(10));
/// ```
#[derive(Default, Clone, Debug)]
pub struct TokenCounter {
    total: usize,
}

impl TokenCounter {
    /// Creates a new `TokenCounter` with zero tokens
    pub fn new() -> Self {
        Self { total: 0 }
    }

    /// Creates a counter seeded with an optional system prompt
    pub fn with_system(system: Option<&str>) -> Self {
        let mut counter = Self::new();
        if let Some(text) = system {
            counter.observe(text);
        }
        counter
    }

    /// Estimates the number of tokens in a string
    ///
    /// Empty text is 0 tokens; any non-empty text is at least 1. The estimate is
    /// monotonically non-decreasing in the character length.
    ///
    /// # Examples
    ///
    /// ```
    /// use aifred_core::TokenCounter;
    ///
    /// assert_eq!(TokenCounter::count_tokens(""), 0);
    /// assert_eq!(TokenCounter::count_tokens("a"), 1);
    /// assert_eq!(TokenCounter::count_tokens("abcdefgh"), 2);
    /// assert_eq!(TokenCounter::count_tokens("abcdefghi"), 3);
    /// ```
    pub fn count_tokens(text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        chars.div_ceil(CHARS_PER_TOKEN).max(1)
    }

    /// Adds the token count of the given text to the total
    pub fn observe(&mut self, text: &str) {
        self.total += Self::count_tokens(text);
    }

    /// Subtracts the token count of the given text from the total
    ///
    /// Will not go below zero (saturates at zero).
    pub fn subtract(&mut self, text: &str) {
        self.total = self.total.saturating_sub(Self::count_tokens(text));
    }

    /// Returns the current total token count
    pub fn total(&self) -> usize {
        self.total
    }

    /// Checks if the total token count is under the specified budget
    pub fn under_budget(&self, max: usize) -> bool {
        self.total <= max
    }
}

/// Estimates tokens for a single piece of text
pub fn estimate_tokens(text: &str) -> usize {
    TokenCounter::count_tokens(text)
}

/// Sum of per-message estimates plus the system text, when present
pub fn estimate_tokens_for_conversation(messages: &[Message], system: Option<&str>) -> usize {
    let mut counter = TokenCounter::with_system(system);
    for msg in messages {
        counter.observe(&msg.content);
    }
    counter.total()
}
