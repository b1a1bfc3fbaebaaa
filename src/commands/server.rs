//! Rendezvous server command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;
use tracing::{info, warn};

use safechat::chat::{Server, ServerConfig};
use safechat::crypto::KeyStore;

use super::{runtime, CommandExecutor};

/// Run the rendezvous server until Ctrl-C.
#[derive(Args, Debug)]
pub struct ServerCommand {
    /// Host to bind (overrides config and CHAT_SERVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (overrides config and CHAT_SERVER_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding key files (default: ~/.safechat/keys)
    #[arg(long)]
    pub key_dir: Option<PathBuf>,
}

impl ServerCommand {
    fn resolve_config(&self) -> Result<ServerConfig> {
        let config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ServerConfig::default(),
        };
        let mut config = config
            .with_env_overrides()
            .context("Invalid server environment")?;

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.key_dir {
            config.key_dir = dir.clone();
        }
        Ok(config)
    }
}

impl CommandExecutor for ServerCommand {
    fn execute(&self) -> Result<()> {
        let config = self.resolve_config()?;
        let identity = KeyStore::new(&config.key_dir)
            .get_or_create(&config.identity)
            .context("Failed to get server keys")?;
        info!(fingerprint = %identity.fingerprint(), "Server identity ready");

        runtime()?.block_on(async {
            let server = Server::bind(&config, identity)
                .await
                .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received shutdown signal");
                        let _ = shutdown_tx.send(true);
                    }
                    Err(e) => {
                        // Keep the sender alive so the server runs on
                        warn!(error = %e, "Cannot listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                }
            });

            server.run(shutdown_rx).await.context("Server failed")?;
            info!("Server stopped");
            Ok(())
        })
    }
}
