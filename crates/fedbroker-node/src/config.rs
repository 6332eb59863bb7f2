use fedbroker_core::{
    collective_source_name, federation_source_name, ClusterIdentity, LegKind,
    DEFAULT_FEDERATION_PREFIX,
};
use fedbroker_transport::TlsContext;

use crate::error::BrokerError;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub identity: ClusterIdentity,
    /// Subject prefix of the federation naming convention.
    pub federation_prefix: String,
    /// Servers of the local collective bus.
    pub collective_servers: Vec<String>,
    /// Servers of the federation overlay bus.
    pub federation_servers: Vec<String>,
    /// Client TLS context applied to both connections when present.
    pub tls: Option<TlsContext>,
}

impl BrokerConfig {
    pub fn new(
        identity: ClusterIdentity,
        collective_servers: Vec<String>,
        federation_servers: Vec<String>,
    ) -> Self {
        Self {
            identity,
            federation_prefix: DEFAULT_FEDERATION_PREFIX.to_string(),
            collective_servers,
            federation_servers,
            tls: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.federation_prefix = prefix.into();
        self
    }

    pub fn with_tls(mut self, tls: Option<TlsContext>) -> Self {
        self.tls = tls;
        self
    }

    pub fn servers(&self, kind: LegKind) -> &[String] {
        match kind {
            LegKind::Collective => &self.collective_servers,
            LegKind::Federation => &self.federation_servers,
        }
    }

    pub fn federation_source_name(&self) -> String {
        federation_source_name(&self.federation_prefix, self.identity.cluster_name())
    }

    pub fn collective_source_name(&self) -> String {
        collective_source_name(&self.federation_prefix, self.identity.cluster_name())
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        let prefix = self.federation_prefix.as_str();
        if prefix.is_empty() || prefix.starts_with('.') || prefix.ends_with('.') {
            return Err(BrokerError::Config(format!(
                "federation prefix {prefix:?} is not a valid subject prefix"
            )));
        }
        if prefix.contains(['*', '>']) || prefix.chars().any(char::is_whitespace) {
            return Err(BrokerError::Config(format!(
                "federation prefix {prefix:?} must not contain wildcards or whitespace"
            )));
        }
        for kind in LegKind::ALL {
            if self.servers(kind).is_empty() {
                return Err(BrokerError::Config(format!("no {kind} servers configured")));
            }
        }
        Ok(())
    }
}
