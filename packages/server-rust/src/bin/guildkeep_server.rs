//! `guildkeep-server`: hosts the state cache, its flush loop and the
//! operator HTTP endpoints until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use guildkeep_server::network::{NetworkConfig, OpsServer};
use guildkeep_server::service::FlushScheduler;
use guildkeep_server::{StateCache, StateConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "guildkeep-server", version, about = "Persistent state core for a chat bot")]
struct Args {
    /// SQLite database URL.
    #[arg(long, env = "GUILDKEEP_DATABASE_URL", default_value = "sqlite://guildkeep.db")]
    database_url: String,

    /// Seconds between background flushes.
    #[arg(long, env = "GUILDKEEP_FLUSH_INTERVAL_SECS", default_value_t = 60)]
    flush_interval_secs: u64,

    /// Seconds between engagement awards for one member.
    #[arg(long, env = "GUILDKEEP_ENGAGEMENT_COOLDOWN_SECS", default_value_t = 180)]
    engagement_cooldown_secs: u64,

    /// Seconds between message-triggered currency awards for one user.
    #[arg(long, env = "GUILDKEEP_CURRENCY_COOLDOWN_SECS", default_value_t = 60)]
    currency_cooldown_secs: u64,

    /// Operator HTTP bind address.
    #[arg(long, env = "GUILDKEEP_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Operator HTTP port.
    #[arg(long, env = "GUILDKEEP_PORT", default_value_t = 8080)]
    port: u16,

    /// Bearer token for `/admin/*`. Admin routes are disabled without it.
    #[arg(long, env = "GUILDKEEP_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Expose Prometheus metrics on this address.
    #[arg(long, env = "GUILDKEEP_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    #[arg(long, env = "GUILDKEEP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn state_config(&self) -> StateConfig {
        StateConfig {
            database_url: self.database_url.clone(),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            engagement_cooldown: Duration::from_secs(self.engagement_cooldown_secs),
            currency_cooldown: Duration::from_secs(self.currency_cooldown_secs),
            ..StateConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            admin_token: self.admin_token.clone(),
            ..NetworkConfig::default()
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Serving metrics");
    }

    let config = args.state_config();
    let flush_interval = config.flush_interval;
    // A failed migration ends the process here, before anything is served.
    let cache = Arc::new(
        StateCache::open(config)
            .await
            .context("failed to open state store")?,
    );

    let mut scheduler = FlushScheduler::start(Arc::clone(&cache), flush_interval);

    let mut server = OpsServer::new(args.network_config(), Arc::clone(&cache));
    let controller = server.shutdown_controller();
    server.start().await?;

    let on_ctrl_c = Arc::clone(&controller);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl-C");
        }
        info!("Shutdown requested");
        on_ctrl_c.trigger_shutdown();
    });

    let served = server.serve(controller.wait_for_shutdown()).await;

    scheduler.stop().await;
    controller.set_stopped();
    info!("Stopped");
    served
}
