//! # homed-bridge
//!
//! Main binary for the gateway-to-Google-Smart-Home bridge. Orchestrates:
//! - the gateway-facing TCP protocol engine (`homed-gateway`)
//! - the in-memory device repository and capability mapper (`homed-devices`)
//! - the Google Smart Home fulfillment HTTP endpoint (`homed-fulfillment`)
//!
//! Grounded on `nexus-server/src/main.rs`: `homed_common::config::init()`,
//! `tracing_subscriber::fmt()`, and `tokio::try_join!` over the concurrently
//! run services — here one of the two joined futures is a hand-rolled
//! `TcpListener` accept loop (`homed_gateway::listener::run`) instead of a
//! second Axum server, since the gateway protocol isn't HTTP.

mod adapters;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use homed_common::ports::{AuthorizationService, UserRepository};
use homed_devices::DeviceRepository;
use homed_fulfillment::homegraph::GoogleHomeGraphClient;
use homed_fulfillment::{AppState, FulfillmentRouter};
use homed_gateway::connection::ConnectionConfig;

use crate::adapters::{InMemoryUserRepository, StaticAccessTokenSource};

/// CLI flags layered on top of the config-file/environment precedence
/// `homed_common::config::init` already implements.
#[derive(Debug, Parser)]
#[command(name = "homed-bridge", version, about = "Gateway-to-Google-Smart-Home bridge server")]
struct Cli {
    /// Override the structured log filter (defaults to RUST_LOG, then a
    /// built-in default).
    #[arg(long, env = "HOMED_LOG")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = homed_common::config::init()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            cli.log
                .map(tracing_subscriber::EnvFilter::new)
                .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
                .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("homed=debug,tower_http=debug")),
        )
        .with_target(true)
        .init();

    tracing::info!("starting homed-bridge v{}", env!("CARGO_PKG_VERSION"));

    // === Shared device repository — the sole shared
    // mutable resource between the gateway listener and the fulfillment
    // router's reactive push paths.
    let devices = Arc::new(DeviceRepository::new());

    // === External collaborator ports — reference adapters;
    // see crate::adapters for what a real deployment replaces these with.
    let users = Arc::new(InMemoryUserRepository::seed_from_config(&config.bootstrap.tokens));
    let authorization: Arc<dyn AuthorizationService> = users.clone();
    let user_repository: Arc<dyn UserRepository> = users.clone();
    let home_graph = Arc::new(GoogleHomeGraphClient::new(Arc::new(StaticAccessTokenSource::new(
        config.homegraph.project_id.clone(),
    ))));

    // === Fulfillment router — spawns its own reactive
    // REQUEST_SYNC/state-reporting loops against the device repository.
    let router = FulfillmentRouter::new(
        devices.clone(),
        home_graph,
        user_repository.clone(),
        Duration::from_millis(config.gateway.sync_debounce_ms),
    );
    let fulfillment_router = homed_fulfillment::build_router(AppState { router, users: user_repository });
    let fulfillment_addr = SocketAddr::new(config.fulfillment.bind_host.parse()?, config.fulfillment.bind_port);

    // === Gateway TCP listener ===
    let gateway_config = ConnectionConfig {
        handshake_timeout: Duration::from_millis(config.gateway.handshake_timeout_ms),
        max_receive_buffer_bytes: config.gateway.max_receive_buffer_bytes,
    };
    let gateway_addr = SocketAddr::new(config.gateway.bind_host.parse()?, config.gateway.bind_port);

    tracing::info!(%fulfillment_addr, "fulfillment HTTP endpoint listening");
    tracing::info!(%gateway_addr, "gateway TCP listener listening");

    tokio::try_join!(
        async {
            let listener = tokio::net::TcpListener::bind(fulfillment_addr).await?;
            axum::serve(listener, fulfillment_router).await?;
            Ok::<_, anyhow::Error>(())
        },
        async {
            homed_gateway::listener::run(gateway_addr, gateway_config, devices, authorization).await?;
            Ok::<_, anyhow::Error>(())
        },
    )?;

    Ok(())
}
