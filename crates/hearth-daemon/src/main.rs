//! Hearth Daemon - Self-healing service for the hotel platform
//!
//! The hearth daemon provides:
//! - Periodic health checks with automated recovery
//! - Circuit breakers for outbound integrations
//! - Periodic health reports in the log

use clap::Parser;
use hearth_daemon::{Daemon, DaemonConfig, DaemonResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hearth Daemon CLI
#[derive(Parser)]
#[command(name = "hearthd")]
#[command(about = "Hearth Daemon - Self-healing service for the hotel platform", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HEARTH_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "HEARTH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "HEARTH_LOG_JSON")]
    json: bool,

    /// Skip the built-in demo checks
    #[arg(long)]
    no_demo: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if cli.no_demo {
        config.demo.enabled = false;
    }

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Print startup banner
    println!(
        r#"
  _   _                 _   _
 | | | | ___  __ _ _ __| |_| |__
 | |_| |/ _ \/ _` | '__| __| '_ \
 |  _  |  __/ (_| | |  | |_| | | |
 |_| |_|\___|\__,_|_|   \__|_| |_|

  Self-healing for the hotel platform
  Version: {}
  Check interval: {}s
  Demo checks: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.resilience.check_interval_secs,
        if config.demo.enabled { "on" } else { "off" }
    );

    let daemon = Daemon::new(config)?;
    daemon.run().await
}
