use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Which bus a bridge leg is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegKind {
    /// The local orchestration bus.
    Collective,
    /// The overlay bus connecting brokers of several collectives.
    Federation,
}

impl LegKind {
    pub const ALL: [LegKind; 2] = [LegKind::Collective, LegKind::Federation];

    pub fn as_str(self) -> &'static str {
        match self {
            LegKind::Collective => "collective",
            LegKind::Federation => "federation",
        }
    }

    /// The leg on the other side of the bridge.
    pub fn partner(self) -> Self {
        match self {
            LegKind::Collective => LegKind::Federation,
            LegKind::Federation => LegKind::Collective,
        }
    }
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster and instance name of one broker process.
///
/// Fixed for the process lifetime. Names end up inside subjects and
/// connection names, so they must be non-empty single subject tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterIdentity {
    cluster_name: String,
    instance_name: String,
}

impl ClusterIdentity {
    pub fn new(
        cluster_name: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let cluster_name = cluster_name.into();
        let instance_name = instance_name.into();
        if cluster_name.is_empty() {
            return Err(CoreError::InvalidIdentity("empty cluster name"));
        }
        if instance_name.is_empty() {
            return Err(CoreError::InvalidIdentity("empty instance name"));
        }
        if !is_subject_token(&cluster_name) {
            return Err(CoreError::InvalidIdentity(
                "cluster name must not contain '.', '*', '>' or whitespace",
            ));
        }
        if !is_subject_token(&instance_name) {
            return Err(CoreError::InvalidIdentity(
                "instance name must not contain '.', '*', '>' or whitespace",
            ));
        }
        Ok(Self {
            cluster_name,
            instance_name,
        })
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Transport connection name, `fedbroker_<cluster>_<instance>`.
    pub fn connection_name(&self) -> String {
        format!("fedbroker_{}_{}", self.cluster_name, self.instance_name)
    }
}

/// Renders the `cluster:instance` form recorded in `seen-by` entries.
impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cluster_name, self.instance_name)
    }
}

fn is_subject_token(value: &str) -> bool {
    !value
        .chars()
        .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
}
