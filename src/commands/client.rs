//! Interactive line-based chat client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};

use safechat::chat::config::DEFAULT_PORT;
use safechat::chat::{ChatSession, ClientConfig, MessageRecord, PeerInfo};

use super::{runtime, CommandExecutor};

/// How often new directory entries are printed.
const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Connect to a rendezvous server and chat from the terminal.
///
/// Type a line to send it. Commands: /peers, /messages [n], /quit.
#[derive(Args, Debug)]
pub struct ClientCommand {
    /// Nickname (also the identity key name)
    #[arg(short, long)]
    pub nickname: String,

    /// Server IP or host name
    #[arg(short, long, default_value = "127.0.0.1")]
    pub server: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Secret value (accepted for compatibility; does not affect keys)
    #[arg(long, default_value = "")]
    pub secret: String,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding key files (default: ~/.safechat/keys)
    #[arg(long)]
    pub key_dir: Option<PathBuf>,
}

impl ClientCommand {
    fn resolve_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(dir) = &self.key_dir {
            config.key_dir = dir.clone();
        }
        Ok(config)
    }
}

impl CommandExecutor for ClientCommand {
    fn execute(&self) -> Result<()> {
        let config = self.resolve_config()?;

        runtime()?.block_on(async {
            let mut session = ChatSession::new(config);
            let address = session
                .establish_connection(&self.nickname, &self.secret, &self.server, self.port)
                .await
                .with_context(|| format!("Failed to connect to {}:{}", self.server, self.port))?;

            println!("Connected as {} ({})", self.nickname, address);
            println!("Type a message and press Enter. Commands: /peers, /messages [n], /quit");
            println!();

            let result = chat_loop(&mut session).await;
            session.disconnect().await;
            result
        })
    }
}

async fn chat_loop(session: &mut ChatSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
    let mut shown_messages = 0;
    let mut known_peers: HashMap<String, PeerInfo> = HashMap::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    return Ok(());
                };
                if !handle_line(session, line.trim()).await? {
                    return Ok(());
                }
            }
            _ = ticker.tick() => {
                let messages = session.list_messages(None, None);
                for message in messages.iter().skip(shown_messages) {
                    print_message(message);
                }
                shown_messages = messages.len();

                let peers = session.list_peers();
                for (name, info) in &peers {
                    if known_peers.get(name) != Some(info) {
                        println!("* {} is {}", name, info.status);
                    }
                }
                known_peers = peers;

                if !session.is_connected() {
                    println!("Disconnected from server.");
                    return Ok(());
                }
            }
        }
    }
}

/// Returns false when the user asked to quit.
async fn handle_line(session: &mut ChatSession, line: &str) -> Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }

    if line == "/quit" {
        return Ok(false);
    }

    if line == "/peers" {
        let mut peers: Vec<_> = session.list_peers().into_iter().collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        if peers.is_empty() {
            println!("No peers yet.");
        }
        for (name, info) in peers {
            println!("  {} ({}:{}) - {}", name, info.ip, info.port, info.status);
        }
        return Ok(true);
    }

    if let Some(arg) = line.strip_prefix("/messages") {
        let limit = match arg.trim() {
            "" => None,
            n => match n.parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    println!("Usage: /messages [n]");
                    return Ok(true);
                }
            },
        };
        for message in session.list_messages(limit, None) {
            print_message(&message);
        }
        return Ok(true);
    }

    session
        .send_message(line)
        .await
        .context("Failed to send message")?;
    Ok(true)
}

fn print_message(message: &MessageRecord) {
    println!("{}: {}", message.username, message.content);
}
