//! # Local Match Example
//!
//! Plays a short match against the in-process [`RandomOpponent`], driving the
//! local side as an agent: whenever it is our turn, the first available
//! movement is played.
//!
//! ## Running
//!
//! ```sh
//! RUST_LOG=hive_client=debug cargo run --example local_match
//! ```

use hive_client::session::PlayMode;
use hive_client::{
    GameSession, LocalClient, LocalConfig, Movement, Notice, Player, Position, RandomOpponent,
    SessionConfig, SessionHandle, SessionState, StateSnapshot, Unit, UnitClass,
};

/// Three ants per side, each with one cell to be placed on.
fn opening() -> StateSnapshot {
    let hand = |owner: Player, row: i32| -> Vec<Movement> {
        (1..=3u8)
            .map(|index| Movement::Place {
                unit: Unit::new(owner, UnitClass::Ant, index),
                to: Position::new(i32::from(index), row, -i32::from(index) - row),
            })
            .chain(std::iter::once(Movement::Pass))
            .collect()
    };
    StateSnapshot::new()
        .with_moves(Player::White, hand(Player::White, 0))
        .with_moves(Player::Black, hand(Player::Black, 1))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = LocalConfig::new(opening(), RandomOpponent::new());
    let session = GameSession::new(
        SessionConfig::new(config.local_user, Player::White).with_play_mode(PlayMode::Agent),
    );
    let mut client = LocalClient::new();
    client.prepare(config);

    let (mut handle, mut notices) = SessionHandle::start(client, session);
    let mut view = handle.subscribe();

    loop {
        tokio::select! {
            Some(notice) = notices.recv() => {
                tracing::info!("{notice}");
                if matches!(notice, Notice::GameOver { .. }) {
                    break;
                }
            }
            changed = view.changed() => {
                changed?;
                let current = view.borrow_and_update().clone();
                if current.state.is_settled() {
                    break;
                }
                if current.state != SessionState::PlayerTurn {
                    continue;
                }
                let next = current.snapshot.state.and_then(|game| {
                    let moves = hive_client::GameState::available_moves(&game);
                    moves
                        .iter()
                        .find(|m| **m != Movement::Pass)
                        .or_else(|| moves.first())
                        .copied()
                });
                if let Some(movement) = next {
                    tracing::info!("playing {movement}");
                    handle.play(movement)?;
                }
            }
        }
    }

    handle.shutdown().await;
    tracing::info!("Done. Final state: {}", handle.view().state);
    Ok(())
}
