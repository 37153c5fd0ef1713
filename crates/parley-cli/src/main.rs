//! Parley CLI: run a protocol agent node or probe another one.
//!
//! Nodes started here use the in-memory reasoner. The offered services come
//! from the `services` entries of the config file. `run` keeps a persistent
//! key; `discover` and `ping` use a throwaway one.

mod cli;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use parley_types::{MemoryReasoner, NodeConfig};
use parley_wire::config::{default_config_path, load_config, load_services};
use parley_wire::{Node, NodeIdentity};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
        Some(Commands::Run {
            listen,
            bootstrap,
            json_logs,
        }) => {
            init_tracing(json_logs);
            let mut config = load_config(Some(&config_path));
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            config.bootstrap_peers.extend(bootstrap);
            cmd_run(config, &config_path).await
        }
        Some(Commands::Discover { addr }) => {
            init_tracing(false);
            cmd_discover(load_config(Some(&config_path)), &config_path, addr).await
        }
        Some(Commands::Ping { addr }) => {
            init_tracing(false);
            cmd_ping(load_config(Some(&config_path)), addr).await
        }
        Some(Commands::Config) => {
            init_tracing(false);
            cmd_config(load_config(Some(&config_path)))
        }
    }
}

/// Start a node with the configured services announced.
async fn start_node(
    config: NodeConfig,
    config_path: &Path,
    identity: Option<NodeIdentity>,
) -> Result<(Arc<Node>, tokio::task::JoinHandle<()>)> {
    let base_dir = config_dir(config_path);
    let services = load_services(&config, &base_dir).context("Failed to load services")?;
    let reasoner = Arc::new(MemoryReasoner::new());
    let started = match identity {
        Some(identity) => Node::start_with_identity(config, reasoner, identity).await,
        None => Node::start(config, reasoner).await,
    };
    let (node, handle) = started.context("Failed to start node")?;
    for service in services {
        node.add_protocol(service.protocol, service.roles)?;
    }
    Ok((node, handle))
}

async fn cmd_run(config: NodeConfig, config_path: &Path) -> Result<()> {
    let (node, handle) = start_node(config, config_path, None).await?;
    println!("node {} listening on {}", node.node_id(), node.local_addr());

    for (addr, result) in node.bootstrap().await {
        match result {
            Ok(peer) => println!("  bootstrap {addr}: {peer}"),
            Err(e) => println!("  bootstrap {addr}: failed ({e})"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    node.shutdown();
    handle.await.context("Accept loop panicked")?;
    info!(open_instances = node.open_instances().len(), "Node stopped");
    Ok(())
}

async fn cmd_discover(config: NodeConfig, config_path: &Path, addr: SocketAddr) -> Result<()> {
    let (node, handle) =
        start_node(ephemeral(config), config_path, Some(NodeIdentity::generate())).await?;
    let peer = node
        .discover(addr)
        .await
        .with_context(|| format!("Discovery with {addr} failed"))?;

    println!("{peer} at {addr}");
    let services = node.contacts().services(&peer);
    if services.is_empty() {
        println!("  (no protocols offered)");
    }
    for service in services {
        let roles: Vec<&str> = service.roles.iter().map(|r| r.as_str()).collect();
        println!("  {}: {}", service.key(), roles.join(", "));
    }

    node.shutdown();
    handle.await.context("Accept loop panicked")?;
    Ok(())
}

async fn cmd_ping(config: NodeConfig, addr: SocketAddr) -> Result<()> {
    let (node, handle) = Node::start_with_identity(
        ephemeral(config),
        Arc::new(MemoryReasoner::new()),
        NodeIdentity::generate(),
    )
    .await
    .context("Failed to start node")?;
    let peer = node
        .discover(addr)
        .await
        .with_context(|| format!("Could not reach {addr}"))?;

    let started = Instant::now();
    let reply = node.echo(&peer, b"ping").await?;
    anyhow::ensure!(reply == b"ping", "{peer} echoed a different payload");
    println!("{peer} at {addr}: {} ms", started.elapsed().as_millis());

    node.shutdown();
    handle.await.context("Accept loop panicked")?;
    Ok(())
}

fn cmd_config(mut config: NodeConfig) -> Result<()> {
    if !config.shared_secret.is_empty() {
        config.shared_secret = "<redacted>".to_string();
    }
    println!("{config:#?}");
    Ok(())
}

/// Listen on an OS-assigned port of the configured interface.
fn ephemeral(mut config: NodeConfig) -> NodeConfig {
    config.listen_addr.set_port(0);
    config.bootstrap_peers.clear();
    config
}

fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
