//! `loupedeck-events`: connects to a Loupedeck-family device and prints
//! every event it emits as one JSON object per line.
//!
//! ```text
//! loupedeck-events                          # first device found
//! loupedeck-events --path /dev/ttyACM0      # explicit serial port
//! loupedeck-events --host 100.127.80.1      # network-attached device
//! loupedeck-events --config ./loupedeck.toml --ignore-websocket
//! ```
//!
//! Command-line flags override the config file; the file itself is optional.
//! Log output goes to stderr and honours `RUST_LOG`, falling back to the
//! configured `log_level`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use loupedeck_client::{ConnectTarget, DeviceEngine, EngineConfig};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "loupedeck-events",
    about = "Print input events from a Loupedeck-family control surface as JSON lines",
    version
)]
struct Cli {
    /// TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "loupedeck.toml", env = "LOUPEDECK_CONFIG")]
    config: PathBuf,

    /// Serial port to open instead of running discovery.
    #[arg(long, env = "LOUPEDECK_PATH", conflicts_with = "host")]
    path: Option<String>,

    /// Network device host to connect to instead of running discovery.
    #[arg(long, env = "LOUPEDECK_HOST")]
    host: Option<String>,

    /// Skip serial devices during discovery.
    #[arg(long)]
    ignore_serial: bool,

    /// Skip network devices during discovery.
    #[arg(long)]
    ignore_websocket: bool,
}

impl Cli {
    fn apply(self, mut config: EngineConfig) -> EngineConfig {
        if self.path.is_some() {
            config.path = self.path;
            config.host = None;
        }
        if self.host.is_some() {
            config.host = self.host;
            config.path = None;
        }
        config.ignore_serial |= self.ignore_serial;
        config.ignore_websocket |= self.ignore_websocket;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let config = cli.apply(config);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("loupedeck-events starting");

    let target = ConnectTarget::from_config(&config);
    let (engine, mut events) = DeviceEngine::new(config);

    // A failed first attempt still schedules reconnects; keep listening.
    match engine.connect(target).await {
        Ok(connection) => info!("using {} at {}", connection.profile, connection.address),
        Err(e) => warn!("initial connect failed: {e}"),
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    error!("event channel closed");
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("failed to render {event:?}: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    engine.close().await;
    info!("loupedeck-events stopped");
    Ok(())
}
