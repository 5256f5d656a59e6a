use anyhow::{Context, Result, anyhow};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::f64::consts::PI;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use wata_rust::codec::{PcmAudio, VOICE_SAMPLE_RATE};
use wata_rust::store::FileCredentialStore;
use wata_rust::types::Conversation;
use wata_rust::{Client, ClientBuilder, ClientConfig};

// Small demo client.
//
// Usage:
//   cargo run -- login -u alice -p secret
//   cargo run -- listen -u @alice:localhost
//   cargo run -- send-tone -u @alice:localhost --to @bob:localhost
//   cargo run -- send-tone -u @alice:localhost --to family --seconds 2

#[derive(Parser)]
#[command(name = "wata", about = "Push-to-talk voice messenger demo client")]
struct Cli {
    #[arg(long, default_value = "http://localhost:8008")]
    homeserver: String,
    /// Where sessions are kept between runs.
    #[arg(long, default_value = ".wata")]
    data_dir: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session.
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Print incoming voice messages and receipts until Ctrl-C.
    Listen {
        #[arg(short, long)]
        user: String,
        /// Send a played receipt for every incoming message.
        #[arg(long)]
        auto_play: bool,
    },
    /// Send a generated tone as a voice message.
    SendTone {
        #[arg(short, long)]
        user: String,
        /// A user id, or `family` for the family room.
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = 3.0)]
        seconds: f64,
        #[arg(long, default_value_t = 440.0)]
        frequency: f64,
    },
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(cli)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = FileCredentialStore::new(&cli.data_dir)
        .await
        .with_context(|| format!("opening {}", cli.data_dir))?;
    let client = ClientBuilder::new()
        .with_config(ClientConfig::new(cli.homeserver))
        .with_credential_store(store)
        .build();

    match cli.command {
        Command::Login { username, password } => {
            let session = client.login(&username, &password).await?;
            client.wait_for_connection_state(wata_rust::ConnectionState::Syncing).await?;
            info!("Logged in as {} on device {}", session.user_id, session.device_id);
            client.shutdown().await;
        }
        Command::Listen { user, auto_play } => {
            resume(&client, &user).await?;
            listen(&client, auto_play).await;
            client.shutdown().await;
        }
        Command::SendTone {
            user,
            to,
            seconds,
            frequency,
        } => {
            resume(&client, &user).await?;
            client.wait_for_connection_state(wata_rust::ConnectionState::Syncing).await?;
            let conversation = if to == "family" {
                Conversation::Family(client.ensure_family().await?)
            } else {
                Conversation::Direct(client.get_or_create_direct(&to).await?)
            };
            let event_id = client
                .send_voice_message(&conversation, tone(seconds, frequency))
                .await?;
            info!("Sent {event_id}");
            client.shutdown().await;
        }
    }
    Ok(())
}

async fn resume(client: &Arc<Client>, user: &str) -> Result<()> {
    client
        .restore_session(user)
        .await?
        .ok_or_else(|| anyhow!("no stored session for {user}, run `login` first"))?;
    Ok(())
}

async fn listen(client: &Arc<Client>, auto_play: bool) {
    let mut received = client.event_bus.message_received.subscribe();
    let mut played = client.event_bus.message_played.subscribe();
    let mut states = client.event_bus.connection_state.subscribe();
    loop {
        tokio::select! {
            event = received.recv() => match event {
                Ok(event) => {
                    let message = &event.message;
                    let url = client.media_url(&message.media_ref).await;
                    info!(
                        "Voice message {} from {} ({:.1}s) at {url}",
                        message.id, message.sender_id, message.duration_seconds
                    );
                    if auto_play {
                        if let Err(e) = client.mark_played(&message.room_id, &message.id).await {
                            warn!("Could not mark {} played: {e}", message.id);
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Missed {n} messages"),
                Err(RecvError::Closed) => return,
            },
            event = played.recv() => if let Ok(event) = event {
                info!("{} played by {:?}", event.message.id, event.message.played_by);
            },
            state = states.recv() => if let Ok(state) = state {
                info!("Connection: {state}");
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return;
            }
        }
    }
}

fn tone(seconds: f64, frequency: f64) -> PcmAudio {
    let rate = VOICE_SAMPLE_RATE as f64;
    let count = (seconds.max(0.0) * rate) as usize;
    let samples = (0..count)
        .map(|i| ((2.0 * PI * frequency * i as f64 / rate).sin() * 8000.0) as i16)
        .collect();
    PcmAudio::new(samples, VOICE_SAMPLE_RATE)
}
