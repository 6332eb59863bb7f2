use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fedbroker_core::{ClusterIdentity, Envelope, LegKind};
use fedbroker_node::{BrokerConfig, FederationBroker};
use fedbroker_transport::{InMemoryTransport, Subscription, Transport};
use serde_json::json;

const FEDERATION_SUBJECT: &str = "choria.federation.rspec.federation";
const CLIENT_REPLY: &str = "choria.reply.client.1";
const AGENT_SUBJECT: &str = "mcollective.discovery";

fn broker(
    instance: &str,
    collective: &Arc<InMemoryTransport>,
    federation: &Arc<InMemoryTransport>,
) -> FederationBroker {
    let config = BrokerConfig::new(
        ClusterIdentity::new("rspec", instance).expect("identity"),
        vec!["nats://c1:4222".to_string()],
        vec!["nats://f1:4222".to_string()],
    );
    FederationBroker::new(config, collective.clone(), federation.clone()).expect("broker")
}

async fn next_envelope(subscription: &mut Subscription) -> Envelope {
    let payload = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("message in time")
        .expect("subscription open");
    Envelope::decode(&payload).expect("decode")
}

fn request() -> Bytes {
    let body = json!({
        "data": "discover",
        "headers": {
            "reply-to": CLIENT_REPLY,
            "federation": {"req": "r1", "target": [AGENT_SUBJECT]}
        }
    });
    Bytes::from(serde_json::to_vec(&body).expect("encode"))
}

#[tokio::test]
async fn request_and_reply_cross_the_broker_with_hops_recorded() {
    let collective = Arc::new(InMemoryTransport::new("c_nats1"));
    let federation = Arc::new(InMemoryTransport::new("fed_nats1"));
    let broker = broker("a", &collective, &federation);
    broker.start().await.expect("start");

    let mut client = federation.subscribe(CLIENT_REPLY, "").await.expect("client");
    let mut agent = collective.subscribe(AGENT_SUBJECT, "").await.expect("agent");

    assert_eq!(federation.inject(FEDERATION_SUBJECT, request()), 1);

    let delivered = next_envelope(&mut agent).await;
    assert_eq!(
        delivered.headers.reply_to.as_deref(),
        Some("choria.federation.rspec.collective")
    );
    assert_eq!(
        delivered.headers.seen_by(),
        &[json!(["fed_nats1", "rspec:a", "c_nats1"])]
    );
    let header = delivered.headers.federation.clone().expect("federation header");
    assert_eq!(header.reply_to.as_deref(), Some(CLIENT_REPLY));

    let mut reply = delivered.clone();
    reply.body.insert("data".to_string(), json!("found"));
    let reply_to = reply.headers.reply_to.take().expect("reply-to");
    collective
        .publish(&reply_to, Bytes::from(reply.encode().expect("encode")))
        .await
        .expect("reply");

    let answered = next_envelope(&mut client).await;
    assert_eq!(answered.body.get("data"), Some(&json!("found")));
    assert_eq!(answered.request_id(), Some("r1"));
    assert_eq!(
        answered.headers.seen_by(),
        &[
            json!(["fed_nats1", "rspec:a", "c_nats1"]),
            json!(["c_nats1", "rspec:a", "fed_nats1"]),
        ]
    );

    broker.shutdown(Duration::from_secs(1)).await;
    let stats = broker.stats();
    assert_eq!(stats[&LegKind::Federation].received, 1);
    assert_eq!(stats[&LegKind::Federation].sent, 1);
    assert_eq!(stats[&LegKind::Collective].received, 1);
    assert_eq!(stats[&LegKind::Collective].sent, 1);
    assert_eq!(stats[&LegKind::Collective].work_queue, 0);
}

#[tokio::test]
async fn instances_of_one_cluster_share_the_work() {
    let collective = Arc::new(InMemoryTransport::new("c_nats1"));
    let federation = Arc::new(InMemoryTransport::new("fed_nats1"));
    let first = broker("a", &collective, &federation);
    let second = broker("b", &collective, &federation);
    first.start().await.expect("start a");
    second.start().await.expect("start b");

    let mut agent = collective.subscribe(AGENT_SUBJECT, "").await.expect("agent");
    assert_eq!(federation.inject(FEDERATION_SUBJECT, request()), 1);

    let delivered = next_envelope(&mut agent).await;
    assert_eq!(delivered.headers.hop_count(), 1);
    let nothing_else = tokio::time::timeout(Duration::from_millis(100), agent.next()).await;
    assert!(nothing_else.is_err(), "request must be bridged once");

    let received: u64 = [&first, &second]
        .iter()
        .map(|b| b.stats()[&LegKind::Federation].received)
        .sum();
    assert_eq!(received, 1);

    first.shutdown(Duration::from_millis(200)).await;
    second.shutdown(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn requests_without_targets_never_reach_the_collective() {
    let collective = Arc::new(InMemoryTransport::new("c_nats1"));
    let federation = Arc::new(InMemoryTransport::new("fed_nats1"));
    let broker = broker("a", &collective, &federation);
    broker.start().await.expect("start");

    let untargeted = json!({"headers": {"federation": {"req": "r2"}}});
    federation.inject(
        FEDERATION_SUBJECT,
        Bytes::from(serde_json::to_vec(&untargeted).expect("encode")),
    );
    federation.inject(FEDERATION_SUBJECT, Bytes::from_static(b"not json"));

    for _ in 0..200 {
        if broker.stats()[&LegKind::Federation].received == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    broker.shutdown(Duration::from_millis(200)).await;
    assert!(collective.published().is_empty());
    assert_eq!(broker.stats()[&LegKind::Federation].received, 2);
}
