use clap::Parser;
use std::path::{Path, PathBuf};

use skiff_proxy::{Proxy, ProxyConfig};

#[derive(Debug, Parser)]
#[command(name = "skiff-proxy-cli")]
struct Cli {
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[arg(long = "listen-host")]
    listen_host: Option<String>,
    #[arg(long = "listen-port")]
    listen_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(host) = cli.listen_host {
        config.listen.host = host;
    }
    if let Some(port) = cli.listen_port {
        config.listen.port = port;
    }

    let proxy = Proxy::new(config).map_err(|err| err.to_string())?;
    proxy.run().await.map_err(|err| err.to_string())
}

fn load_config(path: &Path) -> Result<ProxyConfig, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("could not read {}: {err}", path.display()))?;
    toml::from_str(&raw).map_err(|err| format!("could not parse {}: {err}", path.display()))
}
