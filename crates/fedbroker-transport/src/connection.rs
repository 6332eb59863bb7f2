use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::options::ConnectOptions;
use crate::transport::{Subscription, Transport};

/// The single long-lived session owned by one bridge leg.
///
/// Publishing and subscribing before `start` fail with
/// `TransportError::NotConnected`; after that, reconnects are left to the
/// transport.
pub struct Connection {
    transport: Arc<dyn Transport>,
    started: AtomicBool,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            started: AtomicBool::new(false),
        }
    }

    pub async fn start(&self, options: &ConnectOptions) -> Result<(), TransportError> {
        info!(
            name = %options.name,
            servers = ?options.servers,
            tls = options.tls.is_some(),
            "starting connection"
        );
        self.transport.start(options).await?;
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotConnected);
        }
        self.transport.publish(subject, payload).await
    }

    pub async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<Subscription, TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotConnected);
        }
        debug!(subject, queue_group, "subscribing");
        self.transport.subscribe(subject, queue_group).await
    }

    pub fn connected_server(&self) -> Option<String> {
        self.transport.connected_server()
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.transport.close().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected_server", &self.connected_server())
            .field("started", &self.is_started())
            .finish()
    }
}
