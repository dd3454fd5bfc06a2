use std::fmt;

/// Category of a source error. Lets the caller decide between retrying
/// in place and giving up on the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration or upstream contract, permanent.
    Config,
    /// I/O or network error, transient and retried with backoff.
    Io,
    /// Upstream returned data in an unexpected shape, permanent.
    Format,
    /// Anything else (emitter gone, invalid state).
    Logic,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Error raised by an event source.
///
/// Transient errors (`ErrorKind::Io`) are handled inside the adapter.
/// Anything that escapes `EventSource::produce` is fatal for the
/// topic's freshness and marks it degraded.
#[derive(Debug, Clone)]
pub struct SourceError {
    kind: ErrorKind,
    message: String,
}

impl SourceError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for SourceError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → SourceError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_is_transient() {
        assert!(SourceError::io("reset").is_transient());
        assert!(!SourceError::config("bad url").is_transient());
        assert!(!SourceError::format("not json").is_transient());
        assert!(!SourceError::logic("gone").is_transient());
    }

    #[test]
    fn context_keeps_kind() {
        let err = SourceError::format("unexpected token").with_context("source 'posts'");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.message(), "source 'posts': unexpected token");
        assert_eq!(err.to_string(), "[format] source 'posts': unexpected token");
    }
}
