use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport is closed")]
    Closed,
    #[error("invalid server address {server}: {reason}")]
    InvalidServer { server: String, reason: String },
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },
    #[error("subscribe to {subject} failed: {reason}")]
    Subscribe { subject: String, reason: String },
    #[error("close failed: {0}")]
    Close(String),
}
