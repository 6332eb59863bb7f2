//! NATS transport for the federation broker.
//!
//! This crate provides a `Transport` implementation backed by one
//! `async-nats` client whose reconnect policy comes from `ConnectOptions`.

use std::sync::Mutex;
use std::time::Duration;

use async_nats::connection::State;
use async_nats::{Client, Event, ServerAddr};
use async_trait::async_trait;
use bytes::Bytes;
use fedbroker_transport::{
    subscription_channel, ConnectOptions, ReconnectLimit, Subscription, Transport, TransportError,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 4096;
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct NatsTransport {
    client: Mutex<Option<Client>>,
    subscription_capacity: usize,
    /// Flipped by `close`; every forwarder unsubscribes when it sees it.
    stop: watch::Sender<bool>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl NatsTransport {
    pub fn new() -> Self {
        Self::with_subscription_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Bounds how many inbound messages may wait per subscription before the
    /// forwarding task applies backpressure to the client.
    pub fn with_subscription_capacity(capacity: usize) -> Self {
        Self {
            client: Mutex::new(None),
            subscription_capacity: capacity.max(1),
            stop: watch::channel(false).0,
            forwarders: Mutex::new(Vec::new()),
        }
    }

    fn client(&self) -> Result<Client, TransportError> {
        self.client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

impl Default for NatsTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses configured server URLs; a bad URL is a configuration error.
pub fn parse_servers(servers: &[String]) -> Result<Vec<ServerAddr>, TransportError> {
    if servers.is_empty() {
        return Err(TransportError::InvalidServer {
            server: String::new(),
            reason: "no servers configured".to_string(),
        });
    }
    servers
        .iter()
        .map(|server| {
            server
                .parse::<ServerAddr>()
                .map_err(|err| TransportError::InvalidServer {
                    server: server.clone(),
                    reason: err.to_string(),
                })
        })
        .collect()
}

/// Why a forwarder stopped pumping messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardEnd {
    /// The transport is closing.
    Stopped,
    /// The consumer dropped its `Subscription`.
    ReceiverGone,
    /// The server side of the subscription went away.
    Ended,
}

/// Moves payloads from `messages` into `tx` until one side goes away or
/// `stop` turns true. A message already pulled off the stream is not
/// held back by a stop request while it waits for channel capacity.
async fn forward_payloads<S>(
    messages: &mut S,
    tx: &mpsc::Sender<Bytes>,
    stop: &mut watch::Receiver<bool>,
) -> ForwardEnd
where
    S: Stream<Item = Bytes> + Unpin,
{
    loop {
        let payload = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => return ForwardEnd::Stopped,
            _ = tx.closed() => return ForwardEnd::ReceiverGone,
            next = messages.next() => match next {
                Some(payload) => payload,
                None => return ForwardEnd::Ended,
            },
        };
        if tx.send(payload).await.is_err() {
            return ForwardEnd::ReceiverGone;
        }
    }
}

fn max_reconnects(limit: ReconnectLimit) -> Option<usize> {
    match limit {
        ReconnectLimit::Unlimited => None,
        ReconnectLimit::Attempts(n) => Some(n as usize),
    }
}

fn build_connect_options(options: &ConnectOptions) -> async_nats::ConnectOptions {
    let wait: Duration = options.reconnect_time_wait;
    let name = options.name.clone();
    let mut connect = async_nats::ConnectOptions::new()
        .name(options.name.clone())
        .retry_on_initial_connect()
        .max_reconnects(max_reconnects(options.max_reconnect_attempts))
        .reconnect_delay_callback(move |_attempts| wait)
        .event_callback(move |event| {
            let name = name.clone();
            async move {
                match event {
                    Event::Connected => info!(connection = %name, "nats connected"),
                    Event::Disconnected => warn!(connection = %name, "nats disconnected"),
                    other => debug!(connection = %name, event = %other, "nats event"),
                }
            }
        });
    if let Some(tls) = &options.tls {
        connect = connect
            .require_tls(true)
            .tls_client_config(tls.context.client_config().as_ref().clone());
    }
    connect
}

#[async_trait]
impl Transport for NatsTransport {
    async fn start(&self, options: &ConnectOptions) -> Result<(), TransportError> {
        let servers = parse_servers(&options.servers)?;
        let client = build_connect_options(options)
            .connect(servers.as_slice())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        self.stop.send_replace(false);
        let previous = self
            .client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(client);
        if let Some(previous) = previous {
            if let Err(err) = previous.flush().await {
                debug!("flushing replaced nats client failed: {err}");
            }
        }
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        let client = self.client()?;
        client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|err| TransportError::Publish {
                subject: subject.to_string(),
                reason: err.to_string(),
            })
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<Subscription, TransportError> {
        let client = self.client()?;
        let subscribed = if queue_group.is_empty() {
            client.subscribe(subject.to_string()).await
        } else {
            client
                .queue_subscribe(subject.to_string(), queue_group.to_string())
                .await
        };
        let mut subscriber = subscribed.map_err(|err| TransportError::Subscribe {
            subject: subject.to_string(),
            reason: err.to_string(),
        })?;

        let (tx, subscription) =
            subscription_channel(subject, queue_group, self.subscription_capacity);
        let subject = subject.to_string();
        let mut stop = self.stop.subscribe();
        let forwarder = tokio::spawn(async move {
            let end = {
                let mut payloads = subscriber.by_ref().map(|message| message.payload);
                forward_payloads(&mut payloads, &tx, &mut stop).await
            };
            if end != ForwardEnd::Ended {
                // leave the queue group so the server routes to siblings
                if let Err(err) = subscriber.unsubscribe().await {
                    debug!(subject = %subject, "unsubscribe failed: {err}");
                }
            }
            debug!(subject = %subject, reason = ?end, "nats subscription ended");
        });
        let mut forwarders = self.forwarders.lock().unwrap_or_else(|e| e.into_inner());
        forwarders.retain(|handle| !handle.is_finished());
        forwarders.push(forwarder);
        Ok(subscription)
    }

    fn connected_server(&self) -> Option<String> {
        let client = self.client().ok()?;
        if client.connection_state() != State::Connected {
            return None;
        }
        let info = client.server_info();
        Some(format!("nats://{}:{}", info.host, info.port))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.stop.send_replace(true);
        let forwarders =
            std::mem::take(&mut *self.forwarders.lock().unwrap_or_else(|e| e.into_inner()));
        for forwarder in forwarders {
            match tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, forwarder).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("nats forwarder failed: {err}"),
                Err(_) => warn!("nats forwarder did not unsubscribe in time"),
            }
        }

        let client = self.client.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(client) = client else {
            return Ok(());
        };
        client
            .flush()
            .await
            .map_err(|err| TransportError::Close(err.to_string()))
    }
}
