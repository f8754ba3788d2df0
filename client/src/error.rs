use crate::dto::ErrorEnvelope;
use crate::transport::TransportError;

/// Result type alias for MoSAPI client operations
pub type Result<T, E = MosApiError> = std::result::Result<T, E>;

/// Errors surfaced by the MoSAPI client stack.
///
/// `Other` is the catch-all for unexpected statuses and malformed responses;
/// the named variants map one-to-one to the statuses the protocol documents.
#[derive(thiserror::Error, Debug)]
pub enum MosApiError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Login was rejected with 401.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Login or logout was rejected with 403.
    #[error("source IP address not allowed: {0}")]
    IpNotAllowed(String),

    /// Login was rejected with 429.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A non-login request came back 401 even after the one-shot re-login.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The resource is genuinely absent (e.g. no METRICA report for the date).
    #[error("not found: {0}")]
    NotFound(String),

    /// MoSAPI returned 400 with a parseable error envelope.
    #[error("{message}")]
    BadRequest { result_code: String, message: String },

    /// The body could not be parsed as the expected schema.
    #[error("failed to parse response body: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<MosApiError>>,
    },
}

impl MosApiError {
    pub fn other(message: impl Into<String>) -> Self {
        MosApiError::Other {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: MosApiError) -> Self {
        MosApiError::Other {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Maps a MoSAPI error envelope to an error, special-casing the
    /// date-validation result codes (2012 = order, 2013/2014 = syntax).
    pub fn from_envelope(envelope: &ErrorEnvelope) -> Self {
        let message = match envelope.result_code.as_str() {
            "2012" => format!("Date order is invalid: {}", envelope.message),
            "2013" | "2014" => format!("Date syntax is invalid: {}", envelope.message),
            _ => format!(
                "Bad Request (code: {}): {}",
                envelope.result_code, envelope.message
            ),
        };
        MosApiError::BadRequest {
            result_code: envelope.result_code.clone(),
            message,
        }
    }

    /// Catch-all for statuses no endpoint rule covers.
    pub fn unexpected_status(path: &str, status: http::StatusCode, body: &str) -> Self {
        MosApiError::other(format!(
            "request to {path} failed with unexpected status code: {} - {body}",
            status.as_u16()
        ))
    }
}
