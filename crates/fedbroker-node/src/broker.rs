use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fedbroker_core::{ClusterIdentity, LegKind};
use fedbroker_transport::{Connection, Transport};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::collective::CollectiveProcessor;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::federation::FederationProcessor;
use crate::leg::{BridgeLeg, LegContext, LegProcessor, LegStats, LegTasks};
use crate::queue::WorkQueue;
use crate::registry::ConnectionRegistry;

/// Per-leg stats keyed by leg type.
pub type BrokerStats = BTreeMap<LegKind, LegStats>;

/// Both legs of one broker instance, run as a unit.
///
/// The federation leg's outbox is the collective leg's inbox and the other
/// way round; those two queues are the only state the legs share.
pub struct FederationBroker {
    config: BrokerConfig,
    registry: ConnectionRegistry,
    legs: BTreeMap<LegKind, Arc<BridgeLeg>>,
    queues: BTreeMap<LegKind, Arc<WorkQueue>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<LegTasks>>,
}

impl FederationBroker {
    pub fn new(
        config: BrokerConfig,
        collective_transport: Arc<dyn Transport>,
        federation_transport: Arc<dyn Transport>,
    ) -> Result<Self, BrokerError> {
        config.validate()?;

        let connections: BTreeMap<LegKind, Arc<Connection>> = [
            (LegKind::Collective, collective_transport),
            (LegKind::Federation, federation_transport),
        ]
        .into_iter()
        .map(|(kind, transport)| (kind, Arc::new(Connection::new(transport))))
        .collect();
        let registry = ConnectionRegistry::new(connections.iter().map(|(kind, connection)| {
            (
                *kind,
                Arc::clone(connection),
                config.servers(*kind).to_vec(),
            )
        }));

        // keyed by the leg that drains the queue onto its own bus
        let queues: BTreeMap<LegKind, Arc<WorkQueue>> = LegKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(WorkQueue::new())))
            .collect();

        let mut legs = BTreeMap::new();
        for kind in LegKind::ALL {
            let processor: Arc<dyn LegProcessor> = match kind {
                LegKind::Collective => Arc::new(CollectiveProcessor::new(
                    &config.identity,
                    &config.federation_prefix,
                )),
                LegKind::Federation => Arc::new(FederationProcessor::new(
                    &config.identity,
                    &config.federation_prefix,
                )),
            };
            let context = LegContext::new(
                kind,
                config.identity.clone(),
                config.federation_prefix.clone(),
                registry.clone(),
                Arc::clone(&queues[&kind.partner()]),
            );
            let leg = BridgeLeg::new(
                processor,
                context,
                Arc::clone(&connections[&kind]),
                Arc::clone(&queues[&kind]),
                config.servers(kind).to_vec(),
                config.tls.clone(),
            );
            legs.insert(kind, Arc::new(leg));
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            registry,
            legs,
            queues,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.config.identity
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn leg(&self, kind: LegKind) -> Option<&Arc<BridgeLeg>> {
        self.legs.get(&kind)
    }

    /// Starts every leg. A leg that fails to start leaves the ones already
    /// running in place; call `shutdown` to tear them down.
    pub async fn start(&self) -> Result<(), BrokerError> {
        info!(
            broker = %self.config.identity,
            federation = %self.config.federation_source_name(),
            collective = %self.config.collective_source_name(),
            "starting federation broker"
        );
        for leg in self.legs.values() {
            let tasks = leg
                .start_connection_and_handlers(self.shutdown_tx.subscribe())
                .await?;
            self.tasks.lock().await.push(tasks);
        }
        Ok(())
    }

    pub fn stats(&self) -> BrokerStats {
        self.legs
            .iter()
            .map(|(kind, leg)| (*kind, leg.stats()))
            .collect()
    }

    /// Stops consuming, drains both queues for at most `grace`, then closes
    /// the connections.
    pub async fn shutdown(&self, grace: Duration) {
        info!(broker = %self.config.identity, "stopping federation broker");
        self.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let mut drains: Vec<(LegKind, JoinHandle<()>)> = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Err(err) = task.consumer.await {
                warn!(leg = %task.kind, "consumer task failed: {err}");
            }
            drains.push((task.kind, task.inbox_handler));
        }

        // only now: consumers may still have been pushing into the queues
        for queue in self.queues.values() {
            queue.close();
        }

        let deadline = tokio::time::Instant::now() + grace;
        for (kind, mut drain) in drains {
            match tokio::time::timeout_at(deadline, &mut drain).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(leg = %kind, "inbox handler failed: {err}"),
                Err(_) => {
                    let left = self.queues.get(&kind).map_or(0, |queue| queue.len());
                    warn!(leg = %kind, undelivered = left, "inbox drain timed out");
                    drain.abort();
                }
            }
        }

        for kind in LegKind::ALL {
            if let Some(connection) = self.registry.connection(kind) {
                if let Err(err) = connection.close().await {
                    warn!(leg = %kind, "closing connection failed: {err}");
                }
            }
        }
        info!(broker = %self.config.identity, "federation broker stopped");
    }
}
