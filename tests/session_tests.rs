//! End-to-end session tests: a `SessionHandle` driving a `RemoteClient` over
//! scripted transports.

mod common;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use hive_client::session::{Outcome, PlayMode, SessionView};
use hive_client::{
    DriverConfig, GameSession, Movement, Notice, OptionKey, Player, Position, SessionConfig,
    SessionHandle, SessionState, StateSnapshot,
};
use tokio::sync::{mpsc, watch};

use common::{
    ant, line, opening, place, remote_client, state_line, within, MockConnector, MockTransport, ME,
    THEM,
};

fn start(
    connector: MockConnector,
    mode: PlayMode,
) -> (SessionHandle<StateSnapshot>, mpsc::Receiver<Notice>) {
    start_with_delay(connector, mode, Duration::ZERO)
}

fn start_with_delay(
    connector: MockConnector,
    mode: PlayMode,
    reconnect_delay: Duration,
) -> (SessionHandle<StateSnapshot>, mpsc::Receiver<Notice>) {
    let session = GameSession::new(SessionConfig::new(ME, Player::White).with_play_mode(mode));
    let config = DriverConfig::default().with_reconnect_delay(reconnect_delay);
    SessionHandle::start_with_config(remote_client(connector), session, config)
}

async fn wait_for(
    view: &mut watch::Receiver<SessionView<StateSnapshot>>,
    wanted: impl Fn(&SessionView<StateSnapshot>) -> bool,
) -> SessionView<StateSnapshot> {
    within(view.wait_for(|v| wanted(v)))
        .await
        .expect("session task gone")
        .clone()
}

async fn wait_for_sent(sent: &Arc<StdMutex<Vec<String>>>, count: usize) -> Vec<String> {
    within(async {
        loop {
            {
                let lines = sent.lock().unwrap();
                if lines.len() >= count {
                    return lines.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

async fn next_notice(notices: &mut mpsc::Receiver<Notice>) -> Notice {
    within(notices.recv()).await.expect("notice channel closed")
}

#[tokio::test]
async fn abnormal_close_reconnects_and_resumes_the_turn() {
    let (first, _sent_first, _closed) =
        MockTransport::new(vec![line(state_line(&opening())), None]);
    let (second, sent, _closed) = MockTransport::new(vec![line(state_line(&opening()))]);
    let connector = MockConnector::new(vec![Ok(first), Ok(second)]);
    let (mut handle, mut notices) = start(connector.clone(), PlayMode::Human);
    let mut view = handle.subscribe();

    assert_eq!(
        next_notice(&mut notices).await,
        Notice::Reconnecting {
            attempt: 1,
            ceiling: 5
        }
    );
    within(async {
        while connector.attempts() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    let resumed = wait_for(&mut view, |v| {
        v.reconnect_attempts == 0 && v.state == SessionState::PlayerTurn
    })
    .await;
    assert_eq!(resumed.snapshot.state, Some(opening()));

    handle.select(ant(Player::White, 1)).unwrap();
    handle.drop_on(Position::new(0, 0, 0)).unwrap();
    assert!(matches!(
        next_notice(&mut notices).await,
        Notice::ConfirmMovement(_)
    ));
    handle.confirm_movement().unwrap();

    assert_eq!(wait_for_sent(&sent, 1).await, vec!["MOV place wA1 0,0,0"]);
    wait_for(&mut view, |v| {
        matches!(v.state, SessionState::SendingMovement(_))
    })
    .await;

    handle.shutdown().await;
}

#[tokio::test]
async fn movement_played_while_reconnecting_reaches_the_next_connection() {
    let (first, sent_first, _closed) =
        MockTransport::new(vec![line(state_line(&opening())), None]);
    let (second, sent, _closed) = MockTransport::new(vec![line(state_line(&opening()))]);
    let connector = MockConnector::new(vec![Ok(first), Ok(second)]);
    let (mut handle, mut notices) = start_with_delay(
        connector.clone(),
        PlayMode::Human,
        Duration::from_millis(300),
    );
    let mut view = handle.subscribe();

    assert!(matches!(
        next_notice(&mut notices).await,
        Notice::Reconnecting { attempt: 1, .. }
    ));
    let movement = place(Player::White, 1, Position::ORIGIN);
    handle.play(movement).unwrap();

    let held = wait_for(&mut view, |v| v.held_messages == 1).await;
    assert!(!held.connected);
    assert_eq!(held.state, SessionState::SendingMovement(movement));
    assert_eq!(connector.attempts(), 1);

    assert_eq!(wait_for_sent(&sent, 1).await, vec!["MOV place wA1 0,0,0"]);
    let resumed = wait_for(&mut view, |v| v.connected && v.held_messages == 0).await;
    assert_eq!(resumed.reconnect_attempts, 0);
    assert!(sent_first.lock().unwrap().is_empty());

    // The repeated state is not mistaken for a lost movement.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sent.lock().unwrap().len(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn opponent_forfeit_over_the_wire() {
    let (transport, _sent, _closed) = MockTransport::new(vec![
        line(format!("JOIN {THEM}")),
        line(state_line(&opening())),
        line(format!("FF {THEM}")),
        line(format!("WINNER {ME}")),
    ]);
    let (mut handle, mut notices) = start(MockConnector::new(vec![Ok(transport)]), PlayMode::Human);
    let mut view = handle.subscribe();

    let settled = wait_for(&mut view, |v| v.state == SessionState::Forfeit).await;
    assert!(settled.participants.contains(&THEM));

    let mut received = Vec::new();
    while received.len() < 3 {
        received.push(next_notice(&mut notices).await);
    }
    assert_eq!(
        received,
        vec![
            Notice::PlayerJoined(THEM),
            Notice::Forfeited {
                user: THEM,
                local: false
            },
            Notice::GameOver {
                winner: Some(ME),
                outcome: Outcome::Won
            },
        ]
    );

    handle.shutdown().await;
    assert_eq!(handle.view().state, SessionState::ShutDown);
}

#[tokio::test]
async fn agent_passes_without_an_advisory() {
    let only_pass = StateSnapshot::new().with_moves(Player::White, vec![Movement::Pass]);
    let (transport, sent, _closed) = MockTransport::new(vec![line(state_line(&only_pass))]);
    let (mut handle, mut notices) = start(MockConnector::new(vec![Ok(transport)]), PlayMode::Agent);

    assert_eq!(wait_for_sent(&sent, 1).await, vec!["MOV pass"]);
    assert_eq!(
        handle.view().state,
        SessionState::SendingMovement(Movement::Pass)
    );
    assert!(notices.try_recv().is_err(), "no must-pass advisory in agent mode");

    handle.shutdown().await;
}

#[tokio::test]
async fn lobby_intents_reach_the_wire() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let (mut handle, _notices) = start(MockConnector::new(vec![Ok(transport)]), PlayMode::Human);
    let mut view = handle.subscribe();
    wait_for(&mut view, |v| v.state == SessionState::GameStart).await;

    handle.set_option(OptionKey::Ladybug, true).unwrap();
    handle.ready().unwrap();
    handle.chat("see you on the board").unwrap();

    assert_eq!(
        wait_for_sent(&sent, 3).await,
        vec!["SET Ladybug true", "GLHF", "MSG see you on the board"]
    );
    handle.shutdown().await;
}
