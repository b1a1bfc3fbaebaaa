//! Key generation command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use safechat::chat::config::default_key_dir;
use safechat::crypto::KeyStore;

use super::CommandExecutor;

/// Create (or load) the identity keypair for a name and show its fingerprint.
#[derive(Args, Debug)]
pub struct KeygenCommand {
    /// Identity name (a nickname, or "server")
    #[arg(short, long)]
    pub name: String,

    /// Directory holding key files (default: ~/.safechat/keys)
    #[arg(long)]
    pub key_dir: Option<PathBuf>,
}

impl CommandExecutor for KeygenCommand {
    fn execute(&self) -> Result<()> {
        let store = KeyStore::new(self.key_dir.clone().unwrap_or_else(default_key_dir));
        let existed = store.contains(&self.name);

        let keypair = store
            .get_or_create(&self.name)
            .with_context(|| format!("Failed to get keys for '{}'", self.name))?;

        if existed {
            println!("Loaded existing identity '{}':", self.name);
        } else {
            println!("Generated identity '{}':", self.name);
        }
        println!();
        println!("  Public key:  {}", store.public_key_path(&self.name).display());
        println!("  Private key: {}", store.private_key_path(&self.name).display());
        println!();
        println!("Fingerprint: {}", keypair.fingerprint());

        Ok(())
    }
}
