use clap::Parser;
use log::{error, info};
use server::config::{ServerConfig, StoreBackend};
use server::identity::StaticIdentities;
use server::network::Server;
use shared::GameConfig;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8088")]
    port: u16,

    /// Keep sessions in Redis instead of memory, e.g. redis://127.0.0.1/
    #[arg(long)]
    redis_url: Option<String>,

    /// Seconds without inbound frames before a connection is dropped
    #[arg(long, default_value = "300")]
    idle_timeout_secs: u64,

    /// Snapshots queued per subscriber before the oldest are dropped
    #[arg(long, default_value = "64")]
    broadcast_capacity: usize,

    /// Seconds an idle session worker lingers before stopping
    #[arg(long, default_value = "60")]
    worker_idle_secs: u64,

    /// Accepted player token, as TOKEN:NAME (repeatable)
    #[arg(long = "player", value_name = "TOKEN:NAME")]
    players: Vec<String>,

    /// Session to create at startup (repeatable)
    #[arg(long = "session", value_name = "NAME")]
    sessions: Vec<String>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            store: match &self.redis_url {
                Some(url) => StoreBackend::Redis { url: url.clone() },
                None => StoreBackend::Memory,
            },
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            broadcast_capacity: self.broadcast_capacity,
            worker_idle: Duration::from_secs(self.worker_idle_secs),
        }
    }

    fn identities(&self) -> Result<StaticIdentities, String> {
        let mut identities = StaticIdentities::new();
        for entry in &self.players {
            let (token, name) = entry
                .split_once(':')
                .filter(|(token, name)| !token.is_empty() && !name.is_empty())
                .ok_or_else(|| format!("invalid --player {:?}, expected TOKEN:NAME", entry))?;
            let player = identities.register(token, name);
            info!("Registered player {} ({})", player.username, player.id);
        }
        Ok(identities)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let identities = args.identities()?;
    if identities.is_empty() {
        eprintln!("No --player TOKEN:NAME given, every connection will be refused");
    }

    let server = Server::bind(args.server_config(), Arc::new(identities)).await?;
    let addr = server.local_addr()?;

    let coordinator = server.coordinator();
    for name in &args.sessions {
        let session = coordinator
            .create_session(name, GameConfig::default())
            .await?;
        info!("Session {:?} ready at ws://{}/game/{}", name, addr, session.id);
    }

    let server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
