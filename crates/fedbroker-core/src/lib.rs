//! Core federation broker primitives shared across crates.
//!
//! Includes the cluster identity, canonical subject naming, the message
//! envelope with its routing headers, and the `seen-by` hop tracker.

pub mod envelope;
pub mod error;
pub mod hops;
pub mod identity;
pub mod subjects;

pub use envelope::{Envelope, FederationHeader, Headers};
pub use error::CoreError;
pub use hops::Hop;
pub use identity::{ClusterIdentity, LegKind};
pub use subjects::{collective_source_name, federation_source_name, DEFAULT_FEDERATION_PREFIX};
