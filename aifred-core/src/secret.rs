use std::fmt;

/// A wrapper type for provider API keys
///
/// `Secret<T>` hides the inner value in debug output and display implementations
/// so that logging a provider configuration never leaks a credential.
///
/// # Examples
///
/// ```
/// use aifred_core::Secret;
///
/// let api_key = Secret::new("sk-test");
/// assert_eq!(format!("{}", api_key), "••••••");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("••••••")
    }
}

impl<T> Secret<T> {
    /// Creates a new Secret wrapper around a value
    pub fn new(value: T) -> Self {
        Secret(value)
    }

    /// Gets a reference to the inner value
    ///
    /// Only provider adapters should call this, when building an HTTP request.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Wraps a non-blank string, trimming surrounding whitespace.
    ///
    /// Returns `None` for empty or whitespace-only input so a blank environment
    /// variable counts as a missing credential.
    pub fn non_empty(value: impl AsRef<str>) -> Option<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Secret(trimmed.to_string()))
        }
    }
}
