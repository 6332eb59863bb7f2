use std::collections::BTreeMap;
use std::sync::Arc;

use fedbroker_core::LegKind;
use fedbroker_transport::Connection;

#[derive(Debug)]
struct RegisteredConnection {
    connection: Arc<Connection>,
    servers: Vec<String>,
}

/// Read-only view of every leg's connection, keyed by leg type.
///
/// Legs use it to look at the sibling's connected server when recording a
/// hop; only the owning leg ever starts, publishes on or closes a connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<BTreeMap<LegKind, RegisteredConnection>>,
}

impl ConnectionRegistry {
    pub fn new(entries: impl IntoIterator<Item = (LegKind, Arc<Connection>, Vec<String>)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(kind, connection, servers)| {
                (
                    kind,
                    RegisteredConnection {
                        connection,
                        servers,
                    },
                )
            })
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn connected_server(&self, kind: LegKind) -> Option<String> {
        self.entries
            .get(&kind)
            .and_then(|entry| entry.connection.connected_server())
    }

    /// Configured servers for a leg.
    pub fn servers(&self, kind: LegKind) -> &[String] {
        self.entries
            .get(&kind)
            .map(|entry| entry.servers.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_started(&self, kind: LegKind) -> bool {
        self.entries
            .get(&kind)
            .is_some_and(|entry| entry.connection.is_started())
    }

    pub fn kinds(&self) -> impl Iterator<Item = LegKind> + '_ {
        self.entries.keys().copied()
    }

    pub(crate) fn connection(&self, kind: LegKind) -> Option<&Arc<Connection>> {
        self.entries.get(&kind).map(|entry| &entry.connection)
    }
}
