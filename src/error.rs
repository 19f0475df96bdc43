//! Error types for the avatar chat coordinator.

/// Top-level error type for the widget session.
#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    /// Session handshake failed for a reason not covered below.
    #[error("startup error: {0}")]
    Startup(String),

    /// The speech SDK / avatar capability is not loaded.
    #[error("speech SDK unavailable: {0}")]
    SdkUnavailable(String),

    /// Relay-token endpoint answered with a non-2xx status.
    #[error("credential fetch failed with HTTP {status}: {message}")]
    Credentials { status: u16, message: String },

    /// Real-time transport setup or teardown error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Avatar speech synthesis error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Continuous speech recognition error.
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Chat backend answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Backend { status: u16, message: String },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Local key-value store error.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport-level error (connect, timeout, body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WidgetError>;
