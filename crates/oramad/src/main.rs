//! oramad — the Orama node daemon.
//!
//! One binary per node, assembling:
//! - embedded state store (or the replicated cluster in production)
//! - content object store
//! - local supervisor (systemd or direct-spawn)
//! - replica RPC server + peer client
//! - deployment orchestrator
//! - fleet heartbeat + operator status API
//!
//! # Usage
//!
//! ```text
//! oramad run --config /etc/orama/orama.toml
//! oramad run --node-id node-a --ip-address 10.0.0.1 --data-dir /var/lib/orama
//! ```

mod api;
mod node;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use orama_core::config::{
    ClusterSection, NodeConfig, NodeSection, ServerSection, StorageSection,
};
use orama_core::{ContentStore, FsContentStore};
use orama_orchestrator::{DeploymentOrchestrator, NoopDns, OrchestratorContext};
use orama_replica::{PeerClient, ReplicaHost, ReplicaState, replica_router};
use orama_state::{EmbeddedStore, StateStore};
use orama_supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "oramad", about = "Orama node daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node daemon.
    Run {
        /// Path to orama.toml. Flags below override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stable node identity, unique across the fleet.
        #[arg(long)]
        node_id: Option<String>,

        /// Address peers use to reach this node.
        #[arg(long)]
        ip_address: Option<IpAddr>,

        /// Domain under which deployment URLs are minted.
        #[arg(long)]
        base_domain: Option<String>,

        /// HTTP port for the replica RPC and status API.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for state, objects, and deployment workdirs.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,oramad=debug,orama=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            node_id,
            ip_address,
            base_domain,
            port,
            data_dir,
        } => {
            let config = resolve_config(config, node_id, ip_address, base_domain, port, data_dir)?;
            run(config).await
        }
    }
}

fn resolve_config(
    path: Option<PathBuf>,
    node_id: Option<String>,
    ip_address: Option<IpAddr>,
    base_domain: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_file(&path)?,
        None => NodeConfig {
            node: NodeSection {
                id: "node-1".to_string(),
                ip_address: "127.0.0.1".parse()?,
                base_domain: "orama.local".to_string(),
            },
            server: ServerSection::default(),
            storage: StorageSection::default(),
            cluster: ClusterSection::default(),
        },
    };
    if let Some(id) = node_id {
        config.node.id = id;
    }
    if let Some(ip) = ip_address {
        config.node.ip_address = ip;
    }
    if let Some(domain) = base_domain {
        config.node.base_domain = domain;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(dir) = data_dir {
        config.storage.data_root = dir;
    }
    Ok(config)
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    info!(node = %config.node.id, "oramad starting");

    std::fs::create_dir_all(&config.storage.data_root)?;

    // ── Subsystems ─────────────────────────────────────────────────

    let store: Arc<dyn StateStore> = Arc::new(EmbeddedStore::open(&config.state_path())?);
    info!(path = ?config.state_path(), "state store opened");

    let content: Arc<dyn ContentStore> = Arc::new(FsContentStore::new(config.objects_path()));

    let supervisor = Arc::new(Supervisor::new(&config.storage.data_root));

    let host = Arc::new(ReplicaHost::new(
        config.node.id.clone(),
        &config.storage.data_root,
        store.clone(),
        content.clone(),
        supervisor.clone(),
    ));

    let peers = PeerClient::new(config.cluster.internal_auth_token.clone(), config.server.port)?;

    let orchestrator = DeploymentOrchestrator::new(OrchestratorContext {
        node_id: config.node.id.clone(),
        base_domain: config.node.base_domain.clone(),
        replica_count: config.cluster.replica_count,
        data_root: config.storage.data_root.clone(),
        store: store.clone(),
        content,
        host: host.clone(),
        peers,
        dns: Arc::new(NoopDns),
    });
    info!("orchestrator initialized");

    // ── Shutdown + heartbeat ───────────────────────────────────────

    let shutdown = CancellationToken::new();

    // Register immediately so this node is schedulable before the first
    // interval elapses.
    node::beat(store.as_ref(), &config.node.id, &config.node.ip_address.to_string()).await?;
    let heartbeat = tokio::spawn(node::run_heartbeat(
        store.clone(),
        config.node.id.clone(),
        config.node.ip_address.to_string(),
        Duration::from_secs(config.cluster.heartbeat_interval_s),
        shutdown.clone(),
    ));
    info!(interval_s = config.cluster.heartbeat_interval_s, "heartbeat started");

    // ── HTTP server ────────────────────────────────────────────────

    let router = axum::Router::new()
        .nest(
            "/internal/v1",
            replica_router(ReplicaState {
                host,
                auth_token: config.cluster.internal_auth_token.clone(),
                shutdown: shutdown.clone(),
            }),
        )
        .nest(
            "/api/v1",
            api::api_router(api::ApiState {
                orchestrator,
                supervisor,
                shutdown: shutdown.clone(),
            }),
        );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    info!(%addr, "server starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let shutdown_trigger = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            shutdown_trigger.cancel();
        })
        .await?;

    let _ = heartbeat.await;
    info!("oramad stopped");
    Ok(())
}
