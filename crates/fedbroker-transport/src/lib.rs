//! Transport abstractions for the federation broker.
//!
//! Bridge legs only depend on the `Transport` contract and the `Connection`
//! wrapper defined in this crate; concrete pub/sub clients live in their own
//! crates.

pub mod connection;
pub mod error;
pub mod memory;
pub mod options;
pub mod transport;

pub use connection::Connection;
pub use error::TransportError;
pub use memory::InMemoryTransport;
pub use options::{ConnectOptions, ReconnectLimit, TlsContext, TlsOptions};
pub use transport::{subscription_channel, Subscription, Transport};
