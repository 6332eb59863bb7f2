use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How many times a transport may try to re-establish a lost session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectLimit {
    /// Never give up.
    Unlimited,
    Attempts(u32),
}

/// Opaque TLS client context supplied by the platform.
///
/// Passed through to transports unmodified. Two contexts are equal only when
/// they share the same underlying client config.
#[derive(Clone)]
pub struct TlsContext(Arc<rustls::ClientConfig>);

impl TlsContext {
    pub fn new(config: Arc<rustls::ClientConfig>) -> Self {
        Self(config)
    }

    pub fn client_config(&self) -> &Arc<rustls::ClientConfig> {
        &self.0
    }
}

impl PartialEq for TlsContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TlsContext {}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("alpn_protocols", &self.0.alpn_protocols.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    pub context: TlsContext,
}

/// Session policy handed to `Transport::start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub max_reconnect_attempts: ReconnectLimit,
    pub reconnect_time_wait: Duration,
    /// Client name announced to the servers.
    pub name: String,
    pub servers: Vec<String>,
    pub tls: Option<TlsOptions>,
}

impl ConnectOptions {
    pub fn new(name: impl Into<String>, servers: Vec<String>) -> Self {
        Self {
            max_reconnect_attempts: ReconnectLimit::Unlimited,
            reconnect_time_wait: Duration::from_secs(1),
            name: name.into(),
            servers,
            tls: None,
        }
    }

    pub fn with_tls(mut self, context: Option<TlsContext>) -> Self {
        self.tls = context.map(|context| TlsOptions { context });
        self
    }
}
