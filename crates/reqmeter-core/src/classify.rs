//! Status code error classification.
//!
//! The default rule marks any status whose string form starts with `4` or `5`
//! as an error. Callers can swap the rule per registration by handing a
//! different [`ErrorClassifier`] to the HTTP integration.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Anything that can be normalized to a status code string.
pub trait StatusCodeLike {
    fn status_str(&self) -> Cow<'_, str>;
}

impl StatusCodeLike for u16 {
    fn status_str(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }
}

impl StatusCodeLike for u32 {
    fn status_str(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }
}

impl StatusCodeLike for i32 {
    fn status_str(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }
}

impl StatusCodeLike for str {
    fn status_str(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl StatusCodeLike for &str {
    fn status_str(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl StatusCodeLike for String {
    fn status_str(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

/// Default rule: client and server errors.
pub fn is_error_status<S: StatusCodeLike + ?Sized>(code: &S) -> bool {
    let s = code.status_str();
    s.starts_with('4') || s.starts_with('5')
}

type ClassifyFn = dyn Fn(&str) -> bool + Send + Sync;

/// Injectable error classification strategy.
///
/// The wrapped function receives the normalized status string (`"404"`).
#[derive(Clone)]
pub struct ErrorClassifier {
    f: Arc<ClassifyFn>,
}

impl ErrorClassifier {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Only `5xx` counts as an error.
    pub fn server_errors_only() -> Self {
        Self::new(|s| s.starts_with('5'))
    }

    pub fn classify<S: StatusCodeLike + ?Sized>(&self, code: &S) -> bool {
        (self.f)(&code.status_str())
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(|s| is_error_status(s))
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}
