#![no_main]

use std::sync::Arc;

use fedbroker_core::{ClusterIdentity, LegKind};
use fedbroker_node::{BrokerConfig, FederationBroker};
use fedbroker_transport::InMemoryTransport;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = BrokerConfig::new(
        ClusterIdentity::new("fuzz", "a").expect("identity"),
        vec!["nats://c1:4222".to_string()],
        vec!["nats://f1:4222".to_string()],
    );
    let broker = FederationBroker::new(
        config,
        Arc::new(InMemoryTransport::new("c")),
        Arc::new(InMemoryTransport::new("f")),
    )
    .expect("broker");

    for kind in LegKind::ALL {
        if let Some(leg) = broker.leg(kind) {
            let _ = leg.handle_message(data);
        }
    }
});
