use clap::Parser;
use client::input::{self, Command};
use client::network::{self, QuizConnection};
use client::rendering;
use log::{info, warn};
use shared::SessionId;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8088")]
    server: String,

    /// Session to join; without it the active sessions are listed
    #[arg(long)]
    session: Option<SessionId>,

    /// Player token registered on the server
    #[arg(short, long)]
    token: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let Some(session_id) = args.session else {
        let sessions = network::fetch_active_sessions(&args.server, &args.token).await?;
        if sessions.is_empty() {
            println!("No active sessions.");
        }
        for session in sessions {
            println!(
                "{}  {}  ({} players)",
                session.id,
                session.name,
                session.players.len()
            );
        }
        return Ok(());
    };

    info!("Connecting to: {}", args.server);
    let connection = QuizConnection::connect(&args.server, &session_id, &args.token).await?;
    let (mut events, mut snapshots) = connection.into_split();
    println!("{}", input::HELP);

    let mut printer = tokio::spawn(async move {
        loop {
            match snapshots.next_snapshot().await {
                Ok(Some(session)) => println!("\n{}", rendering::render(&session)),
                Ok(None) => {
                    match snapshots.close_info() {
                        Some(close) => println!("Server closed the session: {}", close.reason),
                        None => println!("Connection closed."),
                    }
                    break;
                }
                Err(e) => {
                    warn!("Connection lost: {}", e);
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut printer => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match input::parse_line(&line) {
                    Ok(Command::Event(event)) => events.send(&event).await?,
                    Ok(Command::Help) => println!("{}", input::HELP),
                    Ok(Command::Quit) => break,
                    Err(input::InputError::Empty) => {}
                    Err(e) => println!("{}", e),
                }
            }
        }
    }

    if let Err(e) = events.close().await {
        info!("Close after disconnect: {}", e);
    }
    printer.abort();
    Ok(())
}
