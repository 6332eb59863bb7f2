/// Subject prefix shared by every federated cluster.
pub const DEFAULT_FEDERATION_PREFIX: &str = "choria.federation";

/// Subject a cluster's federation leg consumes, `<prefix>.<cluster>.federation`.
pub fn federation_source_name(prefix: &str, cluster_name: &str) -> String {
    format!("{prefix}.{cluster_name}.federation")
}

/// Subject a cluster's collective leg consumes, `<prefix>.<cluster>.collective`.
pub fn collective_source_name(prefix: &str, cluster_name: &str) -> String {
    format!("{prefix}.{cluster_name}.collective")
}
