//! Integration-style tests for the connection managers.
//!
//! Uses the scripted `MockTransport`/`MockConnector` from `tests/common` to
//! drive a `RemoteClient`, and a real `LocalClient` behind `GameClient`.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use hive_client::engine::RelativeMovement;
use hive_client::event::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use hive_client::{
    Account, ClientConfig, ClientMessage, ConnectionError, ConnectionEvent, ConnectionManager,
    GameClient, LocalConfig, RandomOpponent, RemoteClient, RemoteConfig, ServerMessage,
    StateSnapshot,
};
use tokio_test::{assert_err, assert_ok};

use common::{
    close_frame, line, opening, remote_client, state_line, within, HangingConnector,
    MockConnector, MockTransport, ME, THEM,
};

async fn next(client: &mut impl ConnectionManager<StateSnapshot>) -> ConnectionEvent<StateSnapshot> {
    within(client.next_event())
        .await
        .expect("stream ended")
        .expect("expected an event, got an error")
}

// ════════════════════════════════════════════════════════════════════
// Remote lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn connected_then_messages_in_transport_order() {
    let (transport, _sent, _closed) = MockTransport::new(vec![
        line(format!("JOIN {THEM}")),
        line("BOGUS ignored"),
        line(state_line(&opening())),
        line(format!("READY {THEM} true")),
    ]);
    let connector = MockConnector::new(vec![Ok(transport)]);
    let mut client = remote_client(connector.clone());
    assert_ok!(client.open_connection());

    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);
    assert_eq!(
        next(&mut client).await,
        ConnectionEvent::Message(ServerMessage::PlayerJoined(THEM))
    );
    assert_eq!(
        next(&mut client).await,
        ConnectionEvent::Message(ServerMessage::GameState(opening()))
    );
    assert_eq!(
        next(&mut client).await,
        ConnectionEvent::Message(ServerMessage::PlayerReady(THEM, true))
    );
    assert_eq!(connector.attempts(), 1);
    assert_eq!(
        connector.last_token.lock().unwrap().as_deref(),
        Some("secret-token")
    );
}

#[tokio::test]
async fn sent_messages_are_encoded_lines() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let mut client = remote_client(MockConnector::new(vec![Ok(transport)]));
    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);

    client.send(ClientMessage::ReadyToPlay).unwrap();
    client
        .send(ClientMessage::Movement(RelativeMovement::new("place wA1 0,0,0")))
        .unwrap();
    client.send(ClientMessage::Forfeit).unwrap();

    // Sends are fire-and-forget; wait for the task to flush them.
    within(async {
        while sent.lock().unwrap().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(
        *sent.lock().unwrap(),
        vec!["GLHF", "MOV place wA1 0,0,0", "FF"]
    );
}

#[tokio::test]
async fn open_while_connected_reuses_the_stream() {
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let connector = MockConnector::new(vec![Ok(transport)]);
    let mut client = remote_client(connector.clone());
    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);

    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::AlreadyConnected);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn server_close_frame_is_reported_and_ends_the_stream() {
    let (transport, _sent, _closed) =
        MockTransport::new(vec![close_frame(4000, "match abandoned")]);
    let mut client = remote_client(MockConnector::new(vec![Ok(transport)]));
    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);

    assert_eq!(
        next(&mut client).await,
        ConnectionEvent::Closed {
            reason: "match abandoned".into(),
            code: 4000
        }
    );
    assert!(within(client.next_event()).await.is_none());
    assert!(matches!(
        client.send(ClientMessage::ReadyToPlay),
        Err(ConnectionError::NotConnected)
    ));
}

#[tokio::test]
async fn vanished_transport_is_an_abnormal_close() {
    let (transport, _sent, _closed) = MockTransport::new(vec![None]);
    let mut client = remote_client(MockConnector::new(vec![Ok(transport)]));
    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);

    let ConnectionEvent::Closed { code, .. } = next(&mut client).await else {
        panic!("expected Closed");
    };
    assert_eq!(code, CLOSE_ABNORMAL);
}

#[tokio::test]
async fn receive_errors_travel_on_the_stream() {
    let (transport, _sent, _closed) = MockTransport::new(vec![Some(Err(
        ConnectionError::TransportReceive("reset by peer".into()),
    ))]);
    let mut client = remote_client(MockConnector::new(vec![Ok(transport)]));
    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);

    let item = within(client.next_event()).await.unwrap();
    assert!(matches!(item, Err(ConnectionError::TransportReceive(_))));
}

#[tokio::test]
async fn failed_connect_is_retryable_error() {
    let mut client = remote_client(MockConnector::new(vec![]));
    client.open_connection().unwrap();
    let err = assert_err!(within(client.next_event()).await.unwrap());
    assert!(matches!(err, ConnectionError::FailedToConnect(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn connect_attempts_time_out() {
    let mut client = RemoteClient::<StateSnapshot>::with_connector(HangingConnector);
    client.prepare(
        RemoteConfig::new(Account::online(ME, "t"))
            .with_url("ws://hive.test/slow")
            .with_connect_timeout(Duration::from_millis(50)),
    );
    client.open_connection().unwrap();
    let item = within(client.next_event()).await.unwrap();
    assert!(matches!(item, Err(ConnectionError::Timeout)));
}

#[tokio::test]
async fn close_sends_normal_closure_and_is_idempotent() {
    let (transport, _sent, closed) = MockTransport::new(vec![]);
    let mut client = remote_client(MockConnector::new(vec![Ok(transport)]));
    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);

    client.close().await;
    client.close().await;
    assert!(closed.load(Ordering::Relaxed));

    let event = next(&mut client).await;
    assert!(event.is_normal_close());
    assert_eq!(
        event,
        ConnectionEvent::Closed {
            reason: "client closed".into(),
            code: CLOSE_NORMAL
        }
    );
    assert!(within(client.next_event()).await.is_none());
}

#[tokio::test]
async fn close_cancels_an_attempt_in_flight() {
    let mut client = RemoteClient::<StateSnapshot>::with_connector(HangingConnector);
    client.prepare(RemoteConfig::new(Account::online(ME, "t")).with_url("ws://hive.test/slow"));
    client.open_connection().unwrap();

    within(client.close()).await;
    assert!(within(client.next_event()).await.is_none());
}

#[tokio::test]
async fn reconnect_retires_the_old_stream() {
    let (first, _sent, _closed) = MockTransport::new(vec![line(format!("JOIN {ME}"))]);
    let (second, _sent, _closed) = MockTransport::new(vec![line(format!("LEAVE {THEM}"))]);
    let connector = MockConnector::new(vec![Ok(first), Ok(second)]);
    let mut client = remote_client(connector.clone());

    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);

    client.reconnect().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);
    // The first connection's JOIN never shows up on the new stream.
    assert_eq!(
        next(&mut client).await,
        ConnectionEvent::Message(ServerMessage::PlayerLeft(THEM))
    );
    assert_eq!(connector.attempts(), 2);
}

#[test]
fn configuration_errors_are_reported_immediately() {
    let mut unprepared = RemoteClient::<StateSnapshot>::with_connector(MockConnector::default());
    let err = assert_err!(unprepared.open_connection());
    assert!(err.is_configuration());

    let mut offline = RemoteClient::<StateSnapshot>::with_connector(MockConnector::default());
    offline.prepare(RemoteConfig::new(Account::offline(ME)).with_url("ws://hive.test"));
    assert!(matches!(
        offline.reconnect(),
        Err(ConnectionError::UsingOfflineAccount)
    ));

    let mut no_url = RemoteClient::<StateSnapshot>::with_connector(MockConnector::default());
    no_url.prepare(RemoteConfig::new(Account::online(ME, "t")));
    assert!(matches!(
        no_url.open_connection(),
        Err(ConnectionError::MissingUrl)
    ));
}

// ════════════════════════════════════════════════════════════════════
// Backend selection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn local_config_selects_the_in_process_backend() {
    let config = LocalConfig::new(opening(), RandomOpponent::seeded(11))
        .with_local_user(ME)
        .with_opponent_user(THEM);
    let mut client =
        GameClient::from_config_with_connector(ClientConfig::Local(config), MockConnector::default());
    assert!(matches!(client, GameClient::Local(_)));

    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);
    assert_eq!(
        next(&mut client).await,
        ConnectionEvent::Message(ServerMessage::GameState(opening()))
    );

    client.send(ClientMessage::Chat("hello".into())).unwrap();
    assert_eq!(
        next(&mut client).await,
        ConnectionEvent::Message(ServerMessage::Chat(ME, "hello".into()))
    );
    client.close().await;
}

#[tokio::test]
async fn remote_config_selects_the_remote_backend() {
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let config = RemoteConfig::new(Account::online(ME, "t")).with_url("ws://hive.test");
    let mut client: GameClient<StateSnapshot> = GameClient::from_config_with_connector(
        ClientConfig::Remote(config),
        MockConnector::new(vec![Ok(transport)]),
    );
    assert!(matches!(client, GameClient::Remote(_)));
    client.open_connection().unwrap();
    assert_eq!(next(&mut client).await, ConnectionEvent::Connected);
    client.close().await;
}
