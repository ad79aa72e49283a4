//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for
//! production. Config precedence: env vars > .env file > config.toml >
//! defaults.

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG.get().expect("Config not initialized. Call homed_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code
/// accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults for every knob the bridge exposes
        .set_default("gateway.bind_host", "0.0.0.0")?
        .set_default("gateway.bind_port", 7890)?
        .set_default("gateway.handshake_timeout_ms", 10_000)?
        .set_default("gateway.max_receive_buffer_bytes", 102_400)?
        .set_default("gateway.sync_debounce_ms", 300)?
        .set_default("fulfillment.bind_host", "0.0.0.0")?
        .set_default("fulfillment.bind_port", 8880)?
        .set_default("homegraph.credentials_path", "./homegraph-service-account.json")?
        .set_default("homegraph.project_id", "")?
        .set_default("bootstrap.tokens", Vec::<String>::new())?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (HOMED__GATEWAY__BIND_PORT, HOMED__HOMEGRAPH__PROJECT_ID, etc.)
        .add_source(
            config::Environment::with_prefix("HOMED")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub fulfillment: FulfillmentConfig,
    pub homegraph: HomeGraphConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub bind_host: String,
    pub bind_port: u16,
    /// Handshake+auth deadline. Crossing it closes the socket.
    pub handshake_timeout_ms: u64,
    /// Bound on the per-connection receive buffer.
    pub max_receive_buffer_bytes: usize,
    /// Trailing debounce window for proactive REQUEST_SYNC.
    pub sync_debounce_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FulfillmentConfig {
    pub bind_host: String,
    pub bind_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HomeGraphConfig {
    /// Opaque credential handle — the core never parses or transmits these
    /// bytes itself; it hands them to a `HomeGraphClient` port implementation.
    pub credentials_path: String,
    pub project_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    /// `"token:userId"` pairs pre-registered with the in-memory reference
    /// `UserRepository`/`AuthorizationService` adapter at startup. A real
    /// deployment backs those ports with actual account/token storage
    /// instead and can leave this list empty.
    pub tokens: Vec<String>,
}
