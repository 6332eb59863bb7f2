use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use fedbroker_core::LegKind;
use fedbroker_node::{BrokerConfig, FederationBroker};
use fedbroker_transport_nats::{parse_servers, NatsTransport};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info, warn};

mod config;
mod error;
mod http_server;
mod tls;

use crate::config::DaemonConfig;
use crate::error::DaemonError;

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the federation broker (default)
    Run,
    /// Validate configuration and TLS material, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let filter = std::env::var("FEDBROKER_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = match DaemonConfig::new(cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(1);
        }
    };
    let broker_config = match prepare(&config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::CheckConfig) => {
            println!(
                "ok: {} federation={} collective={} tls={}",
                broker_config.identity.connection_name(),
                broker_config.federation_source_name(),
                broker_config.collective_source_name(),
                broker_config.tls.is_some(),
            );
        }
        Some(Commands::Run) | None => {
            if let Err(err) = run(&config, broker_config).await {
                error!("{err}");
                std::process::exit(1);
            }
        }
    }
}

/// Everything that can be checked without touching the network.
fn prepare(config: &DaemonConfig) -> Result<BrokerConfig, DaemonError> {
    let tls = tls::load_tls_context(
        config.tls_ca_path.as_deref(),
        config.tls_cert_path.as_deref(),
        config.tls_key_path.as_deref(),
    )?;
    let broker_config = config.broker_config(tls)?;
    for kind in LegKind::ALL {
        parse_servers(broker_config.servers(kind)).map_err(|source| {
            DaemonError::Broker(fedbroker_node::BrokerError::Transport { leg: kind, source })
        })?;
    }
    Ok(broker_config)
}

fn stats_addr(config: &DaemonConfig) -> Result<SocketAddr, DaemonError> {
    let raw = format!("{}:{}", config.stats_bind, config.stats_port);
    raw.parse().map_err(|_| DaemonError::StatsBind(raw))
}

async fn run(config: &DaemonConfig, broker_config: BrokerConfig) -> Result<(), DaemonError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = flag::register(SIGTERM, Arc::clone(&shutdown));
    let _ = flag::register(SIGINT, Arc::clone(&shutdown));

    let broker = Arc::new(FederationBroker::new(
        broker_config,
        Arc::new(NatsTransport::new()),
        Arc::new(NatsTransport::new()),
    )?);
    if let Err(err) = broker.start().await {
        broker.shutdown(config.shutdown_grace).await;
        return Err(err.into());
    }

    if config.stats_enabled() {
        let bind_addr = stats_addr(config)?;
        let router = http_server::build_router(http_server::StatsAppState {
            broker: Arc::clone(&broker),
        });
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        info!("stats server listening on {bind_addr}");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                error!("stats server error: {err}");
            }
        });
    }

    let mut last_stats_log = Instant::now();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested");
            break;
        }
        if last_stats_log.elapsed() >= config.stats_interval {
            log_stats(&broker);
            last_stats_log = Instant::now();
        }
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }

    broker.shutdown(config.shutdown_grace).await;
    Ok(())
}

fn log_stats(broker: &FederationBroker) {
    for (kind, stats) in broker.stats() {
        if stats.connected_server.is_none() {
            warn!(leg = %kind, "not connected");
        }
        info!(
            leg = %kind,
            server = stats.connected_server.as_deref().unwrap_or("-"),
            received = stats.received,
            sent = stats.sent,
            work_queue = stats.work_queue,
            last_message = stats.last_message,
            "leg stats"
        );
    }
}
