//! Headless players for smoke and load testing.
//!
//! Each bot joins a session, submits statements as soon as it sees the
//! setup screen, and guesses randomly on every round it is shown.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{ClientMessage, ErrorCode, IdentityToken, Phase, RoundView, ServerMessage, StatementSet};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TRUTHS: &[&str] = &[
    "I have run a marathon",
    "I speak three languages",
    "I once met a famous chef",
    "I grew up on a farm",
    "I have broken my arm twice",
    "I can juggle",
];

const LIES: &[&str] = &[
    "I have been to the moon",
    "I own eleven cats",
    "I have never seen snow",
    "I was born on a ship",
];

#[derive(Parser, Debug)]
#[command(author, version, about = "Bots that play two truths and a lie", long_about = None)]
struct Args {
    /// Server WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Session code to join
    #[arg(short, long)]
    code: String,

    /// Number of bots to spawn
    #[arg(short, long, default_value_t = 1)]
    bots: usize,

    /// Longest delay before a bot answers, in milliseconds
    #[arg(long, default_value_t = 1500)]
    think_ms: u64,

    /// Seed for reproducible bots
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut handles = Vec::with_capacity(args.bots);
    for i in 0..args.bots {
        let rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64)),
            None => StdRng::from_entropy(),
        };
        let url = args.url.clone();
        let code = args.code.clone();
        let name = format!("bot-{}", i + 1);
        let think = Duration::from_millis(args.think_ms);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_bot(&url, &code, &name, think, rng).await {
                error!("{}: {}", name, e);
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Bot task panicked: {}", e);
        }
    }
    Ok(())
}

fn random_statements(rng: &mut StdRng, rounds_count: u8) -> Vec<StatementSet> {
    (0..rounds_count)
        .map(|round| {
            let truths: Vec<&str> = TRUTHS.choose_multiple(rng, 2).copied().collect();
            let lie = LIES.choose(rng).copied().unwrap_or("I have been to the moon");
            StatementSet::new(round, [truths[0], truths[1]], lie)
        })
        .collect()
}

async fn run_bot(
    url: &str,
    code: &str,
    name: &str,
    think: Duration,
    mut rng: StdRng,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut write, mut read) = ws.split();
    info!("{} connected to {}", name, url);

    let join = ClientMessage::JoinSession {
        code: code.to_string(),
        name: name.to_string(),
        identity: None,
    };
    write.send(Message::Text(serde_json::to_string(&join)?)).await?;

    let mut identity: Option<IdentityToken> = None;

    while let Some(frame) = read.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = match serde_json::from_str::<ServerMessage>(&text)? {
            ServerMessage::JoinedGame { identity: id, .. } => {
                info!("{} joined as {}", name, id);
                identity = Some(id);
                None
            }
            ServerMessage::GameState(view) => {
                let needs_statements = view
                    .you
                    .as_ref()
                    .map_or(false, |you| !you.submitted)
                    && matches!(view.phase, Phase::Setup | Phase::Countdown);

                match view.round {
                    _ if needs_statements => Some(ClientMessage::SubmitStatements {
                        statements: random_statements(&mut rng, view.settings.rounds_count),
                    }),
                    Some(RoundView::Guessing {
                        subject_id,
                        round_set_id,
                        statements,
                        your_guess: None,
                        ..
                    }) => {
                        let wait = rng.gen_range(0..=think.as_millis() as u64);
                        tokio::time::sleep(Duration::from_millis(wait)).await;
                        Some(ClientMessage::SubmitGuess {
                            target_id: subject_id,
                            index: rng.gen_range(0..statements.len().max(1)),
                            round_set_id: Some(round_set_id),
                        })
                    }
                    _ => None,
                }
            }
            ServerMessage::Error { code, message } => {
                warn!("{} got {:?}: {}", name, code, message);
                if matches!(
                    code,
                    ErrorCode::ServerRestart | ErrorCode::PlayerRemoved | ErrorCode::SessionNotFound
                ) {
                    break;
                }
                None
            }
            _ => None,
        };

        if let Some(message) = reply {
            write.send(Message::Text(serde_json::to_string(&message)?)).await?;
        }
    }

    info!(
        "{} ({}) disconnected",
        name,
        identity.as_ref().map_or("no identity", |id| id.as_str())
    );
    Ok(())
}
