use thiserror::Error;

/// Top-level error type for Zapdesk.
#[derive(Debug, Error)]
pub enum ZapdeskError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Datastore error. Details never leave the server.
    #[error("store error: {0}")]
    Store(String),

    /// Error from the WhatsApp connection service.
    #[error("whatsapp error: {0}")]
    WhatsApp(String),

    /// Error inside the pairing client.
    #[error("pairing error: {0}")]
    Pairing(String),

    /// Resource missing, or hidden from the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller lacks the role for this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing or malformed input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Too many requests for the same resource.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Error from a third-party HTTP service (summarizer, remote server).
    #[error("upstream error: {0}")]
    Upstream(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
