use fedbroker_core::{federation_source_name, ClusterIdentity, Envelope, LegKind};
use tracing::{trace, warn};

use crate::leg::{LegContext, LegProcessor, QueueDescriptor};

/// Requests arriving from the federation bus, bound for local targets.
#[derive(Debug, Clone)]
pub struct FederationProcessor {
    queue: QueueDescriptor,
}

impl FederationProcessor {
    pub fn new(identity: &ClusterIdentity, federation_prefix: &str) -> Self {
        Self {
            queue: QueueDescriptor {
                name: federation_source_name(federation_prefix, identity.cluster_name()),
                queue_group: format!("{}_federation", identity.cluster_name()),
            },
        }
    }
}

impl LegProcessor for FederationProcessor {
    fn kind(&self) -> LegKind {
        LegKind::Federation
    }

    fn queue(&self) -> QueueDescriptor {
        self.queue.clone()
    }

    fn should_process(&self, message: &Envelope) -> bool {
        let Some(federation) = message.headers.federation.as_ref() else {
            trace!("federation request without a federation header");
            return false;
        };
        if federation.req.is_empty() {
            trace!("federation request without a request id");
            return false;
        }
        if federation.target.is_empty() {
            trace!(req = %federation.req, "federation request without targets");
            return false;
        }
        true
    }

    fn process(&self, mut message: Envelope, context: &LegContext) {
        let reply_to = message.headers.reply_to.take();
        let Some(federation) = message.headers.federation.as_mut() else {
            return;
        };
        let targets = std::mem::take(&mut federation.target);
        federation.reply_to = reply_to;
        message.headers.reply_to = Some(context.collective_source_name());
        context.record_seen(&mut message.headers);

        if let Err(err) = context.forward(targets, &message) {
            warn!(
                req = message.request_id().unwrap_or_default(),
                "could not queue request for the collective: {err}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fedbroker_core::{ClusterIdentity, Envelope, LegKind};
    use fedbroker_transport::{ConnectOptions, Connection, InMemoryTransport};
    use serde_json::json;

    use super::FederationProcessor;
    use crate::leg::{LegContext, LegProcessor};
    use crate::queue::WorkQueue;
    use crate::registry::ConnectionRegistry;

    fn identity() -> ClusterIdentity {
        ClusterIdentity::new("rspec", "a").expect("identity")
    }

    fn envelope(value: serde_json::Value) -> Envelope {
        serde_json::from_value(value).expect("envelope")
    }

    async fn context() -> (LegContext, Arc<WorkQueue>) {
        let collective = Arc::new(Connection::new(Arc::new(InMemoryTransport::new("c_nats1"))));
        let federation = Arc::new(Connection::new(Arc::new(InMemoryTransport::new("fed_nats1"))));
        let options = ConnectOptions::new("n", Vec::new());
        collective.start(&options).await.expect("start");
        federation.start(&options).await.expect("start");
        let registry = ConnectionRegistry::new([
            (LegKind::Collective, collective, Vec::new()),
            (LegKind::Federation, federation, Vec::new()),
        ]);
        let outbox = Arc::new(WorkQueue::new());
        let ctx = LegContext::new(
            LegKind::Federation,
            identity(),
            "choria.federation",
            registry,
            Arc::clone(&outbox),
        );
        (ctx, outbox)
    }

    #[test]
    fn subscribes_to_federation_subject_in_cluster_group() {
        let processor = FederationProcessor::new(&identity(), "choria.federation");
        let queue = processor.queue();
        assert_eq!(processor.kind(), LegKind::Federation);
        assert_eq!(queue.name, "choria.federation.rspec.federation");
        assert_eq!(queue.queue_group, "rspec_federation");
    }

    #[test]
    fn admits_only_requests_with_id_and_targets() {
        let processor = FederationProcessor::new(&identity(), "choria.federation");

        assert!(processor.should_process(&envelope(json!({
            "headers": {"federation": {"req": "r1", "target": ["mcollective.discovery"]}}
        }))));
        assert!(!processor.should_process(&envelope(json!({"headers": {}}))));
        assert!(!processor.should_process(&envelope(json!({
            "headers": {"federation": {"target": ["mcollective.discovery"]}}
        }))));
        assert!(!processor.should_process(&envelope(json!({
            "headers": {"federation": {"req": "r1", "target": []}}
        }))));
    }

    #[tokio::test]
    async fn process_rewrites_reply_path_and_queues_for_targets() {
        let processor = FederationProcessor::new(&identity(), "choria.federation");
        let (ctx, outbox) = context().await;
        let message = envelope(json!({
            "data": "payload",
            "headers": {
                "reply-to": "choria.reply.client.1",
                "seen-by": [["client", "fed_nats1"]],
                "federation": {
                    "req": "r1",
                    "target": ["mcollective.discovery", "mcollective.rpcutil"]
                }
            }
        }));

        processor.process(message, &ctx);

        let item = outbox.try_pop().expect("queued item");
        assert_eq!(
            item.targets(),
            &["mcollective.discovery".to_string(), "mcollective.rpcutil".to_string()]
        );
        let forwarded = Envelope::decode(item.data()).expect("decode");
        let federation = forwarded.headers.federation.clone().expect("federation header");
        assert_eq!(federation.req, "r1");
        assert!(federation.target.is_empty());
        assert_eq!(federation.reply_to.as_deref(), Some("choria.reply.client.1"));
        assert_eq!(
            forwarded.headers.reply_to.as_deref(),
            Some("choria.federation.rspec.collective")
        );
        assert_eq!(
            forwarded.headers.seen_by(),
            &[
                json!(["client", "fed_nats1"]),
                json!(["fed_nats1", "rspec:a", "c_nats1"]),
            ]
        );
        assert_eq!(forwarded.body.get("data"), Some(&json!("payload")));
        assert!(outbox.is_empty());
    }
}
