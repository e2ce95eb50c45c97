//! Worker-to-coordinator transport errors with retry classification.
//!
//! Distinguishes between transient errors (retry after the fixed backoff) and
//! permanent rejections (log and move on).

/// Error from a coordinator request.
#[derive(Debug)]
pub struct TransportError {
    /// The kind of error
    pub kind: TransportErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
}

impl TransportError {
    /// Connection refused, reset, timed out.
    pub fn network(message: String) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            status_code: None,
            message,
        }
    }

    /// Non-success HTTP response.
    pub fn status(status_code: u16, message: String) -> Self {
        Self {
            kind: classify_http_status(status_code),
            status_code: Some(status_code),
            message,
        }
    }

    /// Response body did not match the expected shape.
    pub fn decode(message: String) -> Self {
        Self {
            kind: TransportErrorKind::Decode,
            status_code: None,
            message,
        }
    }

    /// Check if the request should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::status(status.as_u16(), e.to_string()),
            None if e.is_decode() => Self::decode(e.to_string()),
            None => Self::network(e.to_string()),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Classification of transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection failed or timed out - transient
    Network,
    /// 5xx - transient
    Server,
    /// 4xx - permanent, the coordinator rejected the request
    Client,
    /// Unreadable response body - transient, the next poll may succeed
    Decode,
}

impl TransportErrorKind {
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportErrorKind::Client)
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Network => write!(f, "Network error"),
            TransportErrorKind::Server => write!(f, "Server error"),
            TransportErrorKind::Client => write!(f, "Client error"),
            TransportErrorKind::Decode => write!(f, "Decode error"),
        }
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> TransportErrorKind {
    match status {
        400..=499 => TransportErrorKind::Client,
        _ => TransportErrorKind::Server,
    }
}
