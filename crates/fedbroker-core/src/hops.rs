use serde_json::Value;

use crate::identity::{ClusterIdentity, LegKind};

/// One traversal of the bridge, as recorded in `seen-by`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    /// Server of the bus the message arrived on.
    pub source: Option<String>,
    /// `cluster:instance` of the broker that carried it.
    pub via: String,
    /// Server of the bus the message leaves on.
    pub destination: Option<String>,
}

impl Hop {
    /// Builds the hop for a message crossing the bridge through a `kind` leg.
    ///
    /// A collective leg moves traffic from the collective bus onto the
    /// federation bus, a federation leg the other way round. Servers not yet
    /// connected are recorded as `null`.
    pub fn across(
        kind: LegKind,
        identity: &ClusterIdentity,
        collective_server: Option<String>,
        federation_server: Option<String>,
    ) -> Self {
        let (source, destination) = match kind {
            LegKind::Collective => (collective_server, federation_server),
            LegKind::Federation => (federation_server, collective_server),
        };
        Self {
            source,
            via: identity.to_string(),
            destination,
        }
    }

    /// `[source, via, destination]`, unknown servers as `null`.
    pub fn into_entry(self) -> Value {
        Value::Array(vec![
            self.source.map_or(Value::Null, Value::String),
            Value::String(self.via),
            self.destination.map_or(Value::Null, Value::String),
        ])
    }
}
