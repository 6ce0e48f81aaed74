use crate::message::Message;
use crate::token::{TokenCounter, estimate_tokens_for_conversation};

/// Result of fitting a conversation into an input budget
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedHistory {
    /// Kept messages, oldest first
    pub messages: Vec<Message>,
    /// Estimated tokens of the kept messages plus the system text
    pub estimated_tokens: usize,
}

/// Trait for compacting chat history
pub trait ChatHistoryCompactor: Send + Sync {
    /// Selects the part of `history` that fits within `budget` tokens
    ///
    /// Implementations must return a chronologically ordered, contiguous suffix of
    /// `history`, and must keep the newest message even when it alone exceeds the
    /// budget.
    fn compact(&self, history: &[Message], system: Option<&str>, budget: usize) -> TrimmedHistory;
}

/// Compactor that drops oldest messages first
#[derive(Debug, Default, Clone)]
pub struct DropOldestCompactor {}

impl ChatHistoryCompactor for DropOldestCompactor {
    fn compact(&self, history: &[Message], system: Option<&str>, budget: usize) -> TrimmedHistory {
        let mut counter = TokenCounter::with_system(system);
        let mut kept = 0;

        // Walk newest to oldest, stop at the first message that no longer fits
        for msg in history.iter().rev() {
            counter.observe(&msg.content);
            if kept > 0 && !counter.under_budget(budget) {
                counter.subtract(&msg.content);
                break;
            }
            kept += 1;
        }

        let start = history.len() - kept;
        TrimmedHistory {
            messages: history[start..].to_vec(),
            estimated_tokens: counter.total(),
        }
    }
}

/// Trims the oldest turns of `messages` to fit the input budget
///
/// A `max_input_tokens` of zero or less disables trimming. Otherwise the budget is
/// `max(1, max_input_tokens - max(0, reserve_for_completion))`, seeded with the
/// system text's estimate.
///
/// # Examples
///
/// ```
/// use aifred_core::{Message, trim_history};
///
/// let history = vec![
///     Message::user("a".repeat(400)),
///     Message::assistant("b".repeat(400)),
///     Message::user("c".repeat(40)),
/// ];
/// let trimmed = trim_history(&history, None, 150, 20);
/// assert_eq!(trimmed.messages, history[1..].to_vec());
/// assert_eq!(trimmed.estimated_tokens, 110);
/// ```
pub fn trim_history(
    messages: &[Message],
    system: Option<&str>,
    max_input_tokens: i64,
    reserve_for_completion: i64,
) -> TrimmedHistory {
    trim_history_with(
        &DropOldestCompactor::default(),
        messages,
        system,
        max_input_tokens,
        reserve_for_completion,
    )
}

/// [`trim_history`] with an explicit compaction strategy
pub fn trim_history_with(
    compactor: &dyn ChatHistoryCompactor,
    messages: &[Message],
    system: Option<&str>,
    max_input_tokens: i64,
    reserve_for_completion: i64,
) -> TrimmedHistory {
    if max_input_tokens <= 0 {
        return TrimmedHistory {
            messages: messages.to_vec(),
            estimated_tokens: estimate_tokens_for_conversation(messages, system),
        };
    }

    let budget = (max_input_tokens - reserve_for_completion.max(0)).max(1);
    let budget = usize::try_from(budget).unwrap_or(usize::MAX);
    compactor.compact(messages, system, budget)
}
