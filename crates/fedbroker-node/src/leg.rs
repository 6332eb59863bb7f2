use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fedbroker_core::{
    collective_source_name, federation_source_name, ClusterIdentity, Envelope, Headers, Hop,
    LegKind,
};
use fedbroker_transport::{
    ConnectOptions, Connection, ReconnectLimit, Subscription, TlsContext, TlsOptions,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::BrokerError;
use crate::queue::{InboxItem, WorkQueue};
use crate::registry::ConnectionRegistry;

/// Fixed wait between reconnect attempts.
pub const RECONNECT_TIME_WAIT: Duration = Duration::from_secs(1);

/// Subject a leg consumes and the competing-consumer group it joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    pub name: String,
    pub queue_group: String,
}

/// Direction-specific behaviour plugged into a `BridgeLeg`.
pub trait LegProcessor: Send + Sync {
    fn kind(&self) -> LegKind;

    fn queue(&self) -> QueueDescriptor;

    /// Admission control; `false` drops the message silently.
    fn should_process(&self, message: &Envelope) -> bool;

    /// Handles an admitted message, usually by forwarding it through the
    /// context's outbox.
    fn process(&self, message: Envelope, context: &LegContext);
}

/// Everything a processor may touch while handling a message.
#[derive(Debug)]
pub struct LegContext {
    kind: LegKind,
    identity: ClusterIdentity,
    federation_prefix: String,
    registry: ConnectionRegistry,
    outbox: Arc<WorkQueue>,
}

impl LegContext {
    pub fn new(
        kind: LegKind,
        identity: ClusterIdentity,
        federation_prefix: impl Into<String>,
        registry: ConnectionRegistry,
        outbox: Arc<WorkQueue>,
    ) -> Self {
        Self {
            kind,
            identity,
            federation_prefix: federation_prefix.into(),
            registry,
            outbox,
        }
    }

    pub fn kind(&self) -> LegKind {
        self.kind
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn outbox(&self) -> &Arc<WorkQueue> {
        &self.outbox
    }

    pub fn federation_source_name(&self) -> String {
        federation_source_name(&self.federation_prefix, self.identity.cluster_name())
    }

    pub fn collective_source_name(&self) -> String {
        collective_source_name(&self.federation_prefix, self.identity.cluster_name())
    }

    /// Appends the hop across this broker to `headers`' `seen-by`.
    ///
    /// Both sides' connected servers are read from the registry, so the
    /// entry describes the whole crossing and not just this leg's half.
    pub fn record_seen(&self, headers: &mut Headers) -> usize {
        let hop = Hop::across(
            self.kind,
            &self.identity,
            self.registry.connected_server(LegKind::Collective),
            self.registry.connected_server(LegKind::Federation),
        );
        headers.record_hop(hop)
    }

    /// Re-encodes `message` and queues it for delivery to `targets`.
    pub fn forward(&self, targets: Vec<String>, message: &Envelope) -> Result<(), BrokerError> {
        let data = message.encode()?;
        let count = targets.len();
        self.outbox.push(InboxItem::new(targets, data)?)?;
        debug!(
            leg = %self.kind,
            req = message.request_id().unwrap_or_default(),
            targets = count,
            hops = message.headers.hop_count(),
            "queued message for delivery"
        );
        Ok(())
    }
}

/// Point-in-time view of one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegStats {
    pub connected_server: Option<String>,
    /// Unix seconds of the last decoded message, 0 before the first.
    pub last_message: u64,
    pub work_queue: usize,
    pub sent: u64,
    pub received: u64,
    pub source: String,
}

/// Outcome of multicasting one inbox item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<String>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What happened to one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Processed,
    Rejected,
    Malformed,
}

#[derive(Debug, Default)]
struct LegCounters {
    sent: AtomicU64,
    received: AtomicU64,
    last_message: AtomicU64,
}

/// Background tasks of a started leg.
#[derive(Debug)]
pub struct LegTasks {
    pub kind: LegKind,
    pub inbox_handler: JoinHandle<()>,
    pub consumer: JoinHandle<()>,
}

/// One directional half of the broker, bound to one bus.
///
/// Owns its connection and inbox; consumes its queue and hands admitted
/// messages to the processor, and drains its inbox onto its own bus.
pub struct BridgeLeg {
    processor: Arc<dyn LegProcessor>,
    context: LegContext,
    connection: Arc<Connection>,
    inbox: Arc<WorkQueue>,
    servers: Vec<String>,
    tls: Option<TlsContext>,
    counters: LegCounters,
    running: AtomicBool,
}

impl BridgeLeg {
    pub fn new(
        processor: Arc<dyn LegProcessor>,
        context: LegContext,
        connection: Arc<Connection>,
        inbox: Arc<WorkQueue>,
        servers: Vec<String>,
        tls: Option<TlsContext>,
    ) -> Self {
        Self {
            processor,
            context,
            connection,
            inbox,
            servers,
            tls,
            counters: LegCounters::default(),
            running: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> LegKind {
        self.processor.kind()
    }

    pub fn queue(&self) -> QueueDescriptor {
        self.processor.queue()
    }

    pub fn context(&self) -> &LegContext {
        &self.context
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn inbox(&self) -> &Arc<WorkQueue> {
        &self.inbox
    }

    pub fn federation_source_name(&self) -> String {
        self.context.federation_source_name()
    }

    pub fn collective_source_name(&self) -> String {
        self.context.collective_source_name()
    }

    pub fn record_seen(&self, headers: &mut Headers) -> usize {
        self.context.record_seen(headers)
    }

    /// Session policy: never give up, fixed wait, deterministic name.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            max_reconnect_attempts: ReconnectLimit::Unlimited,
            reconnect_time_wait: RECONNECT_TIME_WAIT,
            name: self.context.identity().connection_name(),
            servers: self.servers.clone(),
            tls: self.tls.clone().map(|context| TlsOptions { context }),
        }
    }

    /// Starts the connection, then the inbox handler, then consumption.
    ///
    /// The inbox handler has to be running before the first message is
    /// consumed because processing may enqueue work straight away.
    pub async fn start_connection_and_handlers(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<LegTasks, BrokerError> {
        let kind = self.kind();
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::AlreadyStarted { leg: kind });
        }

        let options = self.connect_options();
        if let Err(source) = self.connection.start(&options).await {
            self.running.store(false, Ordering::Release);
            return Err(BrokerError::Transport { leg: kind, source });
        }

        let inbox_handler = {
            let leg = Arc::clone(self);
            tokio::spawn(async move { leg.inbox_handler().await })
        };

        let subscription = match self.subscribe().await {
            Ok(subscription) => subscription,
            Err(err) => {
                inbox_handler.abort();
                self.running.store(false, Ordering::Release);
                return Err(err);
            }
        };
        let consumer = {
            let leg = Arc::clone(self);
            tokio::spawn(async move { leg.consume_from(subscription, shutdown).await })
        };

        info!(leg = %kind, connection = %options.name, "leg started");
        Ok(LegTasks {
            kind,
            inbox_handler,
            consumer,
        })
    }

    /// Subscribes to this leg's queue.
    pub async fn subscribe(&self) -> Result<Subscription, BrokerError> {
        let queue = self.queue();
        self.connection
            .subscribe(&queue.name, &queue.queue_group)
            .await
            .map_err(|source| BrokerError::Transport {
                leg: self.kind(),
                source,
            })
    }

    /// Subscribes and consumes until shutdown or the subscription ends.
    pub async fn consume(&self, shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
        let subscription = self.subscribe().await?;
        self.consume_from(subscription, shutdown).await;
        Ok(())
    }

    pub async fn consume_from(
        &self,
        mut subscription: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let kind = self.kind();
        info!(
            leg = %kind,
            subject = subscription.subject(),
            queue_group = subscription.queue_group(),
            "consuming"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let payload = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = subscription.next() => match next {
                    Some(payload) => payload,
                    None => {
                        warn!(leg = %kind, "subscription closed by transport");
                        break;
                    }
                },
            };
            self.handle_message(&payload);
        }
        info!(leg = %kind, "consumer stopped");
    }

    /// Decodes, admits and processes one inbound payload.
    pub fn handle_message(&self, payload: &[u8]) -> Admission {
        let kind = self.kind();
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let message = match Envelope::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(leg = %kind, bytes = payload.len(), "dropping undecodable message: {err}");
                return Admission::Malformed;
            }
        };
        self.counters
            .last_message
            .store(current_unix(), Ordering::Relaxed);

        if !self.processor.should_process(&message) {
            trace!(leg = %kind, req = message.request_id().unwrap_or_default(), "message not admitted");
            return Admission::Rejected;
        }
        self.processor.process(message, &self.context);
        Admission::Processed
    }

    /// Drains the inbox until it is closed and empty.
    pub async fn inbox_handler(&self) {
        let kind = self.kind();
        debug!(leg = %kind, "inbox handler started");
        while let Some(item) = self.inbox.pop().await {
            self.handle_inbox_item(&item).await;
        }
        debug!(leg = %kind, "inbox handler stopped");
    }

    /// Publishes the item's data to every target, in order.
    ///
    /// A failed target does not stop delivery to the remaining ones, and
    /// nothing is retried here.
    pub async fn handle_inbox_item(&self, item: &InboxItem) -> DeliveryReport {
        let kind = self.kind();
        let mut report = DeliveryReport::default();
        for target in item.targets() {
            match self.connection.publish(target, item.data().clone()).await {
                Ok(()) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Err(err) => {
                    warn!(leg = %kind, target = %target, "delivery failed: {err}");
                    report.failed.push(target.clone());
                }
            }
        }
        report
    }

    pub fn stats(&self) -> LegStats {
        LegStats {
            connected_server: self.connection.connected_server(),
            last_message: self.counters.last_message.load(Ordering::Relaxed),
            work_queue: self.inbox.len(),
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            source: self.queue().name,
        }
    }
}

fn current_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
