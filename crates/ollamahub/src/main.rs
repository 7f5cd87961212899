//! OllamaHub daemon - authenticated gateway in front of an Ollama backend

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ollamahub::config::Config;
use ollamahub::error::Result;
use ollamahub::gateway::GatewayServer;

/// OllamaHub - authenticated HTTP gateway for an Ollama inference backend
#[derive(Parser)]
#[command(name = "ollamahub")]
#[command(about = "An authenticated HTTP gateway for an Ollama inference backend")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway (default command)
    #[command(name = "serve")]
    Serve {
        /// Override the host part of server.listen_addr
        #[arg(long)]
        host: Option<String>,

        /// Override the port part of server.listen_addr
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None => serve(cli.config, None, None).await,
        Some(Command::Serve { host, port }) => serve(cli.config, host, port).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ollamahub=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Replace the host and/or port of a `host:port` listen address
fn override_listen_addr(listen_addr: &str, host: Option<String>, port: Option<u16>) -> String {
    let (current_host, current_port) = listen_addr
        .rsplit_once(':')
        .unwrap_or((listen_addr, "8000"));

    let host = host.unwrap_or_else(|| current_host.to_string());
    let port = port.map_or_else(|| current_port.to_string(), |p| p.to_string());
    format!("{host}:{port}")
}

async fn serve(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    tracing::info!("Starting OllamaHub");

    let mut config = Config::load(config_path.as_deref())?;
    if host.is_some() || port.is_some() {
        config.server.listen_addr = override_listen_addr(&config.server.listen_addr, host, port);
    }
    config.validate()?;
    tracing::debug!("Config loaded: {:?}", config.server);

    GatewayServer::new(config).serve().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_port_only() {
        assert_eq!(
            override_listen_addr("127.0.0.1:8000", None, Some(9000)),
            "127.0.0.1:9000"
        );
    }

    #[test]
    fn test_override_host_and_port() {
        assert_eq!(
            override_listen_addr("127.0.0.1:8000", Some("0.0.0.0".to_string()), Some(80)),
            "0.0.0.0:80"
        );
    }

    #[test]
    fn test_cli_parses_serve_overrides() {
        let cli = Cli::try_parse_from(["ollamahub", "-c", "hub.toml", "serve", "--port", "9001"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("hub.toml")));
        match cli.command {
            Some(Command::Serve { host, port }) => {
                assert!(host.is_none());
                assert_eq!(port, Some(9001));
            }
            None => panic!("expected serve subcommand"),
        }
    }
}
