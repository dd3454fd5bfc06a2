#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("invalid server url '{url}': {detail}")]
    Url { url: String, detail: String },

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

/// What a follow loop does after a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Try again with the same subscription after a backoff delay.
    Retry,
    /// Forget the subscription id and reconnect with just the cursor.
    Resubscribe,
    Fatal,
}

impl WatchError {
    pub fn recovery(&self) -> Recovery {
        match self {
            WatchError::Http(_) => Recovery::Retry,
            WatchError::Status { status, .. } if *status >= 500 => Recovery::Retry,
            // 409: another request holds the id, or it belongs to another
            // topic/mode. 404/410: evicted or closed.
            WatchError::Status { status: 404 | 409 | 410, .. } => Recovery::Resubscribe,
            _ => Recovery::Fatal,
        }
    }
}
