use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::options::ConnectOptions;

/// Pub/sub contract the bridge legs are built on.
///
/// Reconnects are the implementation's business: once `start` returns, the
/// transport keeps the session alive according to the supplied options.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes (or re-establishes) the session.
    async fn start(&self, options: &ConnectOptions) -> Result<(), TransportError>;

    /// Sends a payload to a subject.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Joins `queue_group` on `subject` and returns the inbound stream.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<Subscription, TransportError>;

    /// Endpoint of the server currently connected to, if any.
    fn connected_server(&self) -> Option<String>;

    /// Leaves every subscription, flushes and tears the session down.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Inbound payloads of one subscription, in arrival order.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    queue_group: String,
    receiver: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub fn new(
        subject: impl Into<String>,
        queue_group: impl Into<String>,
        receiver: mpsc::Receiver<Bytes>,
    ) -> Self {
        Self {
            subject: subject.into(),
            queue_group: queue_group.into(),
            receiver,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn queue_group(&self) -> &str {
        &self.queue_group
    }

    /// Waits for the next payload; `None` once the transport side is gone.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

/// Creates a bounded feeder/subscription pair for transport implementations.
pub fn subscription_channel(
    subject: &str,
    queue_group: &str,
    capacity: usize,
) -> (mpsc::Sender<Bytes>, Subscription) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, Subscription::new(subject, queue_group, rx))
}
