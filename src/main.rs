//! Relaymux - multiplexed tunneling relay
//!
//! This is the main entry point for the Relaymux application. One binary
//! runs any of the three roles.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaymux::config::{
    load_config, ClientAgentConfig, Config, RelayConfig, ServerAgentConfig, SocksConfig,
};
use relaymux::{ClientAgent, Relay, ServerAgent};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Relaymux - reach TCP services behind NAT through a QUIC relay
#[derive(Parser, Debug)]
#[command(name = "relaymux")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long, global = true)]
    json_log: bool,

    /// Stop on an input line instead of waiting for a signal
    #[arg(long, global = true)]
    interactive: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay
    Relay {
        /// UDP address to listen on
        #[arg(short, long)]
        listen: Option<String>,

        /// Token proxy clients must present
        #[arg(long)]
        proxy_token: Option<String>,
    },

    /// Expose local TCP services under a device id
    Server {
        /// Device id to register under
        #[arg(short = 'u', long = "device")]
        device_id: Option<String>,

        /// Relay address
        #[arg(long = "addr")]
        relay_addr: Option<String>,
    },

    /// Reach an endpoint server from a local port
    Client {
        /// Device id of the endpoint server
        #[arg(short = 'u', long = "device")]
        device_id: Option<String>,

        /// Relay address
        #[arg(long = "addr")]
        relay_addr: Option<String>,

        /// Local port to listen on
        #[arg(short = 'l', long)]
        local_port: Option<u16>,

        /// Port to reach on the endpoint server
        #[arg(short = 'r', long = "remote-port")]
        target_port: Option<u16>,

        /// Local SOCKS5 port
        #[arg(long)]
        socks_port: Option<u16>,

        /// Token for the relay's proxy service
        #[arg(long)]
        proxy_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_log)?;

    let config = match &cli.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };

    info!("Relaymux v{}", relaymux::VERSION);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    spawn_shutdown_listener(shutdown_tx, cli.interactive);

    let transport = config.transport.clone();
    match cli.command {
        Command::Relay {
            listen,
            proxy_token,
        } => {
            let relay_config = relay_config(config.relay, listen, proxy_token);
            let relay = Relay::bind(relay_config, &transport).await?;
            relay.run(shutdown_rx).await
        }
        Command::Server {
            device_id,
            relay_addr,
        } => {
            let server_config = server_config(config.server, device_id, relay_addr)?;
            let agent = ServerAgent::new(server_config, &transport)?;
            agent.run(shutdown_rx).await
        }
        Command::Client {
            device_id,
            relay_addr,
            local_port,
            target_port,
            socks_port,
            proxy_token,
        } => {
            let mut client_config = client_config(config.client, device_id, relay_addr)?;
            if let Some(port) = local_port {
                client_config.local_port = port;
            }
            if let Some(port) = target_port {
                client_config.target_port = port;
            }
            apply_socks(&mut client_config, socks_port, proxy_token)?;

            let agent = ClientAgent::bind(client_config, &transport).await?;
            agent.run(shutdown_rx).await
        }
    }
}

fn relay_config(
    file: Option<RelayConfig>,
    listen: Option<String>,
    proxy_token: Option<String>,
) -> RelayConfig {
    let mut config = file.unwrap_or_default();
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    if proxy_token.is_some() {
        config.proxy_token = proxy_token;
    }
    config
}

fn server_config(
    file: Option<ServerAgentConfig>,
    device_id: Option<String>,
    relay_addr: Option<String>,
) -> Result<ServerAgentConfig> {
    let mut config = match file {
        Some(config) => config,
        None => ServerAgentConfig::new(
            relay_addr.clone().context("Missing --addr")?,
            device_id.clone().context("Missing -u/--device")?,
        ),
    };
    if let Some(device_id) = device_id {
        config.device_id = device_id;
    }
    if let Some(relay_addr) = relay_addr {
        config.relay_addr = relay_addr;
    }
    Ok(config)
}

fn client_config(
    file: Option<ClientAgentConfig>,
    device_id: Option<String>,
    relay_addr: Option<String>,
) -> Result<ClientAgentConfig> {
    let mut config = match file {
        Some(config) => config,
        None => ClientAgentConfig::new(
            relay_addr.clone().context("Missing --addr")?,
            device_id.clone().context("Missing -u/--device")?,
        ),
    };
    if let Some(device_id) = device_id {
        config.device_id = device_id;
    }
    if let Some(relay_addr) = relay_addr {
        config.relay_addr = relay_addr;
    }
    Ok(config)
}

fn apply_socks(
    config: &mut ClientAgentConfig,
    socks_port: Option<u16>,
    proxy_token: Option<String>,
) -> Result<()> {
    match (socks_port, config.socks.as_mut()) {
        (Some(port), Some(socks)) => {
            socks.port = port;
            if let Some(token) = proxy_token {
                socks.proxy_token = token;
            }
        }
        (Some(port), None) => {
            let token = proxy_token.context("--socks-port requires --proxy-token")?;
            config.socks = Some(SocksConfig::new(port, token));
        }
        (None, Some(socks)) => {
            if let Some(token) = proxy_token {
                socks.proxy_token = token;
            }
        }
        (None, None) => {
            if proxy_token.is_some() {
                warn!("--proxy-token has no effect without --socks-port");
            }
        }
    }
    Ok(())
}

/// Send on `shutdown_tx` on Ctrl+C, SIGTERM or, when interactive, an input line
fn spawn_shutdown_listener(shutdown_tx: broadcast::Sender<bool>, interactive: bool) {
    if interactive {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            info!("Press Enter to stop");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let _ = lines.next_line().await;
            info!("Operator input received, shutting down...");
            let _ = shutdown_tx.send(true);
        });
    }

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Received Ctrl+C, shutting down...");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, shutting down...");
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to setup SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        let _ = shutdown_tx.send(true);
    });
}

/// Setup logging based on configuration
///
/// Directives in `RUST_LOG` are added on top of `--log-level`.
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
