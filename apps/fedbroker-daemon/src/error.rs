use std::path::PathBuf;

use fedbroker_core::CoreError;
use fedbroker_node::BrokerError;
use thiserror::Error;

/// Startup failures; any of these aborts the process.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to load config: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Identity(#[from] CoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("cannot read {path}: {source}")]
    TlsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS material: {0}")]
    Tls(String),
    #[error("invalid stats listen address {0:?}")]
    StatsBind(String),
    #[error("stats server: {0}")]
    Io(#[from] std::io::Error),
}
