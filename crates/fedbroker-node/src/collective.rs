use fedbroker_core::{collective_source_name, ClusterIdentity, Envelope, LegKind};
use tracing::{trace, warn};

use crate::leg::{LegContext, LegProcessor, QueueDescriptor};

/// Replies produced inside the collective, heading back to the federation.
#[derive(Debug, Clone)]
pub struct CollectiveProcessor {
    queue: QueueDescriptor,
}

impl CollectiveProcessor {
    pub fn new(identity: &ClusterIdentity, federation_prefix: &str) -> Self {
        Self {
            queue: QueueDescriptor {
                name: collective_source_name(federation_prefix, identity.cluster_name()),
                queue_group: format!("{}_collective", identity.cluster_name()),
            },
        }
    }
}

impl LegProcessor for CollectiveProcessor {
    fn kind(&self) -> LegKind {
        LegKind::Collective
    }

    fn queue(&self) -> QueueDescriptor {
        self.queue.clone()
    }

    fn should_process(&self, message: &Envelope) -> bool {
        let Some(federation) = message.headers.federation.as_ref() else {
            trace!("collective reply without a federation header");
            return false;
        };
        if federation.req.is_empty() {
            trace!("collective reply without a request id");
            return false;
        }
        if federation.reply_to.as_deref().map_or(true, str::is_empty) {
            trace!(req = %federation.req, "collective reply without a reply-to");
            return false;
        }
        true
    }

    fn process(&self, mut message: Envelope, context: &LegContext) {
        let Some(target) = message
            .headers
            .federation
            .as_mut()
            .and_then(|federation| federation.reply_to.take())
        else {
            return;
        };
        context.record_seen(&mut message.headers);

        if let Err(err) = context.forward(vec![target], &message) {
            warn!(
                req = message.request_id().unwrap_or_default(),
                "could not queue reply for the federation: {err}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fedbroker_core::{ClusterIdentity, Envelope, LegKind};
    use fedbroker_transport::{Connection, InMemoryTransport};
    use serde_json::json;

    use super::CollectiveProcessor;
    use crate::leg::{LegContext, LegProcessor};
    use crate::queue::WorkQueue;
    use crate::registry::ConnectionRegistry;

    fn identity() -> ClusterIdentity {
        ClusterIdentity::new("rspec", "a").expect("identity")
    }

    fn envelope(value: serde_json::Value) -> Envelope {
        serde_json::from_value(value).expect("envelope")
    }

    #[test]
    fn subscribes_to_collective_subject_in_cluster_group() {
        let processor = CollectiveProcessor::new(&identity(), "acme.fed");
        let queue = processor.queue();
        assert_eq!(processor.kind(), LegKind::Collective);
        assert_eq!(queue.name, "acme.fed.rspec.collective");
        assert_eq!(queue.queue_group, "rspec_collective");
    }

    #[test]
    fn admits_only_replies_with_id_and_reply_path() {
        let processor = CollectiveProcessor::new(&identity(), "choria.federation");

        assert!(processor.should_process(&envelope(json!({
            "headers": {"federation": {"req": "r1", "reply-to": "choria.reply.client.1"}}
        }))));
        assert!(!processor.should_process(&envelope(json!({
            "headers": {"federation": {"req": "r1"}}
        }))));
        assert!(!processor.should_process(&envelope(json!({
            "headers": {"federation": {"req": "r1", "reply-to": ""}}
        }))));
        assert!(!processor.should_process(&envelope(json!({
            "headers": {"federation": {"reply-to": "choria.reply.client.1"}}
        }))));
    }

    #[test]
    fn process_sends_reply_to_original_client() {
        let processor = CollectiveProcessor::new(&identity(), "choria.federation");
        let outbox = Arc::new(WorkQueue::new());
        let registry = ConnectionRegistry::new([
            (
                LegKind::Collective,
                Arc::new(Connection::new(Arc::new(InMemoryTransport::new("c_nats1")))),
                Vec::new(),
            ),
            (
                LegKind::Federation,
                Arc::new(Connection::new(Arc::new(InMemoryTransport::new("fed_nats1")))),
                Vec::new(),
            ),
        ]);
        let ctx = LegContext::new(
            LegKind::Collective,
            identity(),
            "choria.federation",
            registry,
            Arc::clone(&outbox),
        );

        processor.process(
            envelope(json!({
                "data": "reply",
                "headers": {
                    "seen-by": [["fed_nats1", "rspec:a", "c_nats1"]],
                    "federation": {"req": "r1", "reply-to": "choria.reply.client.1"}
                }
            })),
            &ctx,
        );

        let item = outbox.try_pop().expect("queued item");
        assert_eq!(item.targets(), &["choria.reply.client.1".to_string()]);
        let forwarded = Envelope::decode(item.data()).expect("decode");
        let federation = forwarded.headers.federation.clone().expect("federation header");
        assert_eq!(federation.req, "r1");
        assert_eq!(federation.reply_to, None);
        // connections were never started, so both servers are unknown
        assert_eq!(
            forwarded.headers.seen_by(),
            &[
                json!(["fed_nats1", "rspec:a", "c_nats1"]),
                json!([null, "rspec:a", null]),
            ]
        );
        assert_eq!(forwarded.body.get("data"), Some(&json!("reply")));
    }
}
