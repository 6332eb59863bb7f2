use fedbroker_core::{CoreError, LegKind};
use fedbroker_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("inbox item needs at least one target")]
    EmptyTargets,
    #[error("work queue is closed")]
    QueueClosed,
    #[error("{leg} leg is already running")]
    AlreadyStarted { leg: LegKind },
    #[error("{leg} leg transport failure: {source}")]
    Transport {
        leg: LegKind,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    Core(#[from] CoreError),
}
