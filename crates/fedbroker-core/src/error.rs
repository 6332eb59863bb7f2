use thiserror::Error;

/// Shared lightweight error type for core primitive operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Cluster or instance name unusable as a subject token.
    #[error("invalid identity: {0}")]
    InvalidIdentity(&'static str),
    /// Envelope could not be parsed.
    #[error("decode error: {0}")]
    Decode(String),
    /// Envelope could not be serialised.
    #[error("encode error: {0}")]
    Encode(String),
}
