use config::{Config, ConfigError, Environment, File};
use fedbroker_core::{ClusterIdentity, DEFAULT_FEDERATION_PREFIX};
use fedbroker_node::BrokerConfig;
use fedbroker_transport::TlsContext;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DaemonError;

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    pub cluster_name: String,
    pub instance_name: String,
    pub federation_prefix: String,
    #[serde(deserialize_with = "deserialize_list")]
    pub federation_servers: Vec<String>,
    #[serde(deserialize_with = "deserialize_list")]
    pub collective_servers: Vec<String>,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,
    pub stats_bind: String,
    pub stats_port: u16,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(split_list(value))
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element()? {
                vec.push(element);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl DaemonConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("cluster_name", "")?
            .set_default("instance_name", "1")?
            .set_default("federation_prefix", DEFAULT_FEDERATION_PREFIX)?
            .set_default("federation_servers", Vec::<String>::new())?
            .set_default("collective_servers", Vec::<String>::new())?
            .set_default("shutdown_grace", "5s")?
            .set_default("stats_interval", "60s")?
            .set_default("stats_bind", "127.0.0.1")?
            .set_default("stats_port", 8222)?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // .env files feed the FEDBROKER_* environment source below
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix("FEDBROKER").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Broker settings with identity and prefix checked.
    pub fn broker_config(&self, tls: Option<TlsContext>) -> Result<BrokerConfig, DaemonError> {
        let identity = ClusterIdentity::new(&self.cluster_name, &self.instance_name)?;
        let config = BrokerConfig::new(
            identity,
            self.collective_servers.clone(),
            self.federation_servers.clone(),
        )
        .with_prefix(self.federation_prefix.clone())
        .with_tls(tls);
        config.validate()?;
        Ok(config)
    }

    pub fn stats_enabled(&self) -> bool {
        self.stats_port != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<F>(vars: &[(&str, &str)], test: F)
    where
        F: FnOnce(),
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut old = Vec::new();
        for (k, v) in vars {
            old.push((k.to_string(), env::var(k).ok()));
            env::set_var(k, v);
        }

        test();

        for (k, maybe_old) in old {
            match maybe_old {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
    }

    #[test]
    fn defaults_are_applied() {
        with_env(&[], || {
            let cfg = DaemonConfig::new(None).expect("failed to build config");

            assert_eq!(cfg.cluster_name, "");
            assert_eq!(cfg.instance_name, "1");
            assert_eq!(cfg.federation_prefix, "choria.federation");
            assert!(cfg.federation_servers.is_empty());
            assert!(cfg.collective_servers.is_empty());
            assert_eq!(cfg.tls_ca_path, None);
            assert_eq!(cfg.shutdown_grace, Duration::from_secs(5));
            assert_eq!(cfg.stats_interval, Duration::from_secs(60));
            assert_eq!(cfg.stats_bind, "127.0.0.1");
            assert_eq!(cfg.stats_port, 8222);
            assert!(cfg.stats_enabled());
        });
    }

    #[test]
    fn env_vars_override_defaults() {
        with_env(
            &[
                ("FEDBROKER_CLUSTER_NAME", "production"),
                ("FEDBROKER_INSTANCE_NAME", "b"),
                ("FEDBROKER_STATS_PORT", "0"),
                ("FEDBROKER_SHUTDOWN_GRACE", "1m30s"),
                (
                    "FEDBROKER_FEDERATION_SERVERS",
                    "nats://fed1:4222, nats://fed2:4222",
                ),
                ("FEDBROKER_COLLECTIVE_SERVERS", "nats://c1:4222;nats://c2:4222"),
            ],
            || {
                let cfg = DaemonConfig::new(None).expect("failed to build config");
                assert_eq!(cfg.cluster_name, "production");
                assert_eq!(cfg.instance_name, "b");
                assert!(!cfg.stats_enabled());
                assert_eq!(cfg.shutdown_grace, Duration::from_secs(90));
                assert_eq!(
                    cfg.federation_servers,
                    vec!["nats://fed1:4222".to_string(), "nats://fed2:4222".to_string()]
                );
                assert_eq!(
                    cfg.collective_servers,
                    vec!["nats://c1:4222".to_string(), "nats://c2:4222".to_string()]
                );
            },
        );
    }

    #[test]
    fn file_overrides_take_precedence_over_defaults_and_env() {
        use std::io::Write;

        let mut tmp = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            tmp,
            r#"
cluster_name = "file-cluster"
stats_port = 4242
stats_interval = "15s"
collective_servers = ["nats://c1:4222","nats://c2:4222"]
tls_ca_path = "/etc/fedbroker/ca.pem"
"#
        )
        .expect("write to temp file");

        with_env(&[("FEDBROKER_STATS_PORT", "9999")], || {
            let cfg = DaemonConfig::new(Some(PathBuf::from(tmp.path()))).expect("load config");
            assert_eq!(cfg.cluster_name, "file-cluster");
            assert_eq!(cfg.stats_port, 9999);
            assert_eq!(cfg.stats_interval, Duration::from_secs(15));
            assert_eq!(
                cfg.collective_servers,
                vec!["nats://c1:4222".to_string(), "nats://c2:4222".to_string()]
            );
            assert_eq!(cfg.tls_ca_path, Some(PathBuf::from("/etc/fedbroker/ca.pem")));
        });
    }

    #[test]
    fn broker_config_rejects_missing_cluster_and_servers() {
        with_env(&[], || {
            let cfg = DaemonConfig::new(None).expect("config");
            assert!(matches!(cfg.broker_config(None), Err(DaemonError::Identity(_))));

            let named = DaemonConfig {
                cluster_name: "rspec".to_string(),
                ..cfg.clone()
            };
            assert!(matches!(named.broker_config(None), Err(DaemonError::Broker(_))));

            let complete = DaemonConfig {
                federation_servers: vec!["nats://f1:4222".to_string()],
                collective_servers: vec!["nats://c1:4222".to_string()],
                ..named
            };
            let broker = complete.broker_config(None).expect("valid");
            assert_eq!(broker.identity.connection_name(), "fedbroker_rspec_1");
            assert_eq!(
                broker.federation_source_name(),
                "choria.federation.rspec.federation"
            );
        });
    }

    #[test]
    fn split_list_is_robust() {
        let cases = vec![
            ("a,b,c", vec!["a", "b", "c"]),
            ("a;b;c", vec!["a", "b", "c"]),
            ("a, b ; c ", vec!["a", "b", "c"]),
            (",a,,b;", vec!["a", "b"]),
            ("  ", Vec::<&str>::new()),
            ("", Vec::<&str>::new()),
        ];

        for (input, expected) in cases {
            let expected_vec: Vec<String> = expected.into_iter().map(|s| s.to_string()).collect();
            assert_eq!(split_list(input), expected_vec, "failed on input: {}", input);
        }
    }
}
