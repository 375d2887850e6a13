//! relay-gateway server entry point.
//!
//! Loads configuration from the environment and serves the relay until
//! Ctrl-C or SIGTERM.

use tracing_subscriber::EnvFilter;

use relay_gateway::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = RelayConfig::from_env()?;
    tracing::info!(
        addr = %config.listen_addr,
        tls = config.tls.enabled,
        static_dir = %config.static_dir.display(),
        "starting relay-gateway"
    );

    relay_gateway::server::run(config).await?;

    Ok(())
}
