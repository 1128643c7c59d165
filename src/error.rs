use serde::Deserialize;

/// Error type for fetch and cache operations.
///
/// The error is `Clone` so a single settled failure can be handed verbatim
/// to every caller waiting on the same in-flight operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a non-success status code.
    #[error("[{status}] {message}")]
    Http { status: u16, message: String },
    /// The request could not be sent or the connection broke mid-flight.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response body (or a cached value) could not be decoded into the
    /// expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// A fetch was requested while no resource key is configured.
    #[error("no resource key configured")]
    NoKey,
}

/// Error payload shape servers are expected to use for failed requests.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl FetchError {
    /// Build an `Http` error from a status code and the raw response body.
    ///
    /// Uses the server-supplied `error` or `message` field when the body
    /// carries one, otherwise falls back to a generic status-coded message.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.error.or(b.message))
            .unwrap_or_else(|| format!("request failed with status {status}"));
        FetchError::Http { status, message }
    }

    /// Status code, when this is an `Http` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
