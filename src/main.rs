//! Safechat - encrypted chat through a rendezvous server
//!
//! Runs the relay server, manages identity keys, or joins a chat from the
//! terminal.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{ClientCommand, CommandExecutor, KeygenCommand, ServerCommand};
use safechat::logging::{init_tracing, DEFAULT_LOG_FILTER};

/// Safechat - encrypted chat through a rendezvous server
#[derive(Parser)]
#[command(name = "safechat")]
#[command(version)]
#[command(about = "Encrypted group chat relayed through a rendezvous server")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rendezvous server
    Server(ServerCommand),

    /// Create or show an identity keypair
    Keygen(KeygenCommand),

    /// Join a chat from the terminal
    Client(ClientCommand),
}

fn main() -> Result<()> {
    init_tracing(DEFAULT_LOG_FILTER);
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(cmd) => cmd.execute(),
        Commands::Keygen(cmd) => cmd.execute(),
        Commands::Client(cmd) => cmd.execute(),
    }
}
