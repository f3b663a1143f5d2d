//! Vehicle Node
//!
//! Runs one participant of a vehicle session.
//! Host mode owns the seat authority and serves the relay and status HTTP;
//! client mode joins a host over the relay. Both drive a local player from
//! stdin commands.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vehicle_core::{FixedSession, InMemoryWorld, Services};
use vehicle_net::{AuthorityNode, HostSession, LocalLink, PlayerNode, RelayClient, RelayServer, HOST_PLAYER};

mod config;
mod console;
mod status;

use config::NodeConfig;
use status::{StatusContext, StatusServer};

/// Node mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Host mode - seat authority, relay and status server
    Host,
    /// Client mode - joins a host
    Client,
}

/// Networked vehicle seat node
#[derive(Parser, Debug)]
#[command(name = "vehicle-node")]
#[command(about = "Host or join a networked vehicle session", long_about = None)]
struct Args {
    /// Node mode (host or client)
    #[arg(long, value_enum, default_value = "host")]
    mode: Mode,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay bind address (host mode), overrides the config
    #[arg(long)]
    relay_addr: Option<String>,

    /// Status HTTP bind address (host mode), overrides the config
    #[arg(long)]
    status_addr: Option<String>,

    /// Host relay address to connect to (client mode)
    #[arg(long, default_value = "127.0.0.1:7777")]
    host_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(addr) = &args.relay_addr {
        config.relay_addr = addr.clone();
    }
    if let Some(addr) = &args.status_addr {
        config.status_addr = addr.clone();
    }

    match args.mode {
        Mode::Host => run_host(config).await,
        Mode::Client => run_client(args, config).await,
    }
}

/// Run in host mode - own the seat authority
async fn run_host(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting vehicle node - HOST MODE");
    tracing::info!("  Relay: {}", config.relay_addr);
    tracing::info!("  Status HTTP: {}", config.status_addr);
    tracing::info!("  Max players: {}", config.max_players);

    let world = InMemoryWorld::new();
    let session = Arc::new(HostSession::new(config.max_players));
    let services = Services::new(session.clone(), Arc::new(world.clone()), Arc::new(world));

    let authority = Arc::new(AuthorityNode::new(services.clone(), config.authority())?);
    for vehicle in &config.vehicles {
        authority.spawn_vehicle(vehicle.vehicle_id(), vehicle.seats)?;
    }

    let authority_handle = tokio::spawn({
        let authority = authority.clone();
        async move {
            if let Err(e) = authority.run().await {
                tracing::error!("Authority stopped: {}", e);
            }
        }
    });

    // Start relay
    let relay = Arc::new(RelayServer::new(authority.clone(), session.clone(), config.relay()));
    relay.start(&config.relay_addr).await?;

    // Start status server
    let status_context = Arc::new(StatusContext {
        authority: authority.clone(),
        session: session.clone(),
        relay: relay.clone(),
        started_at: chrono::Utc::now(),
    });
    let status_addr = config.status_addr.clone();
    let status_server = tokio::spawn(async move {
        if let Err(e) = StatusServer::new(status_context).run(&status_addr).await {
            tracing::error!("Status server error: {}", e);
        }
    });

    // The host plays too
    let link = Arc::new(LocalLink::new(HOST_PLAYER, authority.queue()));
    let node = Arc::new(PlayerNode::new(services, link, config.interaction()));
    let _feed = node.attach_local(&authority);

    tracing::info!("Host running. Players can join at {}.", config.relay_addr);
    tracing::info!("Type 'help' for commands, Ctrl+C to stop.");

    tokio::select! {
        result = console::run(&node) => {
            if let Err(e) = result {
                tracing::error!("Console error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    tracing::info!("Shutting down...");
    relay.stop();
    status_server.abort();
    authority.shutdown();
    let _ = authority_handle.await;

    let stats = authority.stats();
    tracing::info!(
        "Host stopped: {} requests processed, {} disconnects handled",
        stats.requests_processed,
        stats.disconnects_handled
    );

    Ok(())
}

/// Run in client mode - join a host
async fn run_client(args: Args, config: NodeConfig) -> Result<()> {
    tracing::info!("Starting vehicle node - CLIENT MODE");
    tracing::info!("  Connecting to host: {}", args.host_addr);

    let (client, events) = RelayClient::connect(&args.host_addr, &config.relay()).await?;
    let client = Arc::new(client);
    tracing::info!("Joined as {} ({} players present)", client.player(), client.peers().len());

    let world = InMemoryWorld::new();
    let services = Services::new(
        Arc::new(FixedSession::new(client.player(), client.host())),
        Arc::new(world.clone()),
        Arc::new(world),
    );
    let node = Arc::new(PlayerNode::new(services, client.clone(), config.interaction()));
    let mut feed = node.attach_remote(events);

    tracing::info!("Type 'help' for commands, Ctrl+C to stop.");

    tokio::select! {
        result = console::run(&node) => {
            if let Err(e) = result {
                tracing::error!("Console error: {}", e);
            }
        }
        _ = feed.finished() => {
            tracing::warn!("Host went away");
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    client.close();
    tracing::info!("Client stopped");

    Ok(())
}
