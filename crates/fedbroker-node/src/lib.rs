//! Federation broker runtime.
//!
//! This crate wires the bridge legs (consume, filter, process, then drain
//! and multicast) on top of pluggable transports, and composes them into a
//! broker that runs both directions as one unit.

pub mod broker;
pub mod collective;
pub mod config;
pub mod error;
pub mod federation;
pub mod leg;
pub mod queue;
pub mod registry;

pub use broker::{BrokerStats, FederationBroker};
pub use collective::CollectiveProcessor;
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use federation::FederationProcessor;
pub use leg::{Admission, BridgeLeg, DeliveryReport, LegContext, LegProcessor, LegStats, QueueDescriptor};
pub use queue::{InboxItem, WorkQueue};
pub use registry::ConnectionRegistry;
