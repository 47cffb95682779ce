//! Wire-level tests for the Hive line protocol.
//!
//! Every inbound example of the protocol table is decoded to its exact
//! structured variant, and every outbound message is checked against the
//! line the server expects.

mod common;

use hive_client::codec::{decode, encode};
use hive_client::engine::RelativeMovement;
use hive_client::{
    ClientMessage, ErrorCode, OptionKey, Player, Position, ServerError, ServerMessage,
    StateSnapshot,
};

use common::{opening, place, state_line, ME, THEM};

fn dec(line: &str) -> Option<ServerMessage<StateSnapshot>> {
    decode::<StateSnapshot>(line)
}

// ════════════════════════════════════════════════════════════════════
// Outbound
// ════════════════════════════════════════════════════════════════════

#[test]
fn every_client_message_encodes_to_its_keyword_line() {
    let cases = [
        (
            ClientMessage::Movement(RelativeMovement::new("place wA1 0,0,0")),
            "MOV place wA1 0,0,0",
        ),
        (
            ClientMessage::SetOption(OptionKey::NoFirstMoveQueen, true),
            "SET NoFirstMoveQueen true",
        ),
        (
            ClientMessage::SetOption(OptionKey::Mosquito, false),
            "SET Mosquito false",
        ),
        (ClientMessage::Chat("good luck, have fun".into()), "MSG good luck, have fun"),
        (ClientMessage::ReadyToPlay, "GLHF"),
        (ClientMessage::Forfeit, "FF"),
    ];
    for (message, expected) in cases {
        assert_eq!(encode(&message), expected, "{message:?}");
    }
}

// ════════════════════════════════════════════════════════════════════
// Inbound
// ════════════════════════════════════════════════════════════════════

#[test]
fn state_line_decodes_through_the_engine() {
    let state = opening().with_update(Player::Black, place(Player::Black, 1, Position::ORIGIN));
    assert_eq!(
        dec(&state_line(&state)),
        Some(ServerMessage::GameState(state))
    );
}

#[test]
fn every_inbound_example_decodes_exactly() {
    let cases = [
        (
            "SET Pillbug true".to_string(),
            ServerMessage::SetOption(OptionKey::Pillbug, true),
        ),
        (format!("READY {ME} false"), ServerMessage::PlayerReady(ME, false)),
        (format!("JOIN {THEM}"), ServerMessage::PlayerJoined(THEM)),
        (format!("LEAVE {THEM}"), ServerMessage::PlayerLeft(THEM)),
        (
            format!("MSG {THEM} well played, friend"),
            ServerMessage::Chat(THEM, "well played, friend".into()),
        ),
        (format!("FF {THEM}"), ServerMessage::Forfeit(THEM)),
        (format!("WINNER {ME}"), ServerMessage::GameOver(Some(ME))),
        ("WINNER".to_string(), ServerMessage::GameOver(None)),
        (
            format!("ERR {ME} 102 wait for your turn"),
            ServerMessage::Error(ServerError::new(
                Some(ME),
                ErrorCode::NotPlayerTurn,
                "wait for your turn",
            )),
        ),
        (
            "ERR 103 game already started".to_string(),
            ServerMessage::Error(ServerError::new(
                None,
                ErrorCode::OptionNonModifiable,
                "game already started",
            )),
        ),
    ];
    for (line, expected) in cases {
        assert_eq!(dec(&line), Some(expected), "{line}");
    }
}

#[test]
fn unknown_keyword_is_dropped() {
    assert_eq!(dec("BOGUS foo bar"), None);
    assert_eq!(dec("FFA"), None);
    assert_eq!(dec(""), None);
}

#[test]
fn bare_err_falls_back_to_unknown_error() {
    let Some(ServerMessage::Error(error)) = dec("ERR") else {
        panic!("ERR must always decode");
    };
    assert_eq!(error.code, ErrorCode::UnknownError);
    assert_eq!(error.user, None);
}

#[test]
fn unknown_error_codes_decode() {
    let Some(ServerMessage::Error(error)) = dec("ERR 4242 brand new failure") else {
        panic!("ERR must always decode");
    };
    assert_eq!(error.code, ErrorCode::UnknownError);
    assert_eq!(error.description, "brand new failure");
}

#[test]
fn booleans_are_strict() {
    assert_eq!(dec("SET Ladybug TRUE"), None);
    assert_eq!(dec("SET Ladybug 1"), None);
    assert_eq!(dec(&format!("READY {ME} yes")), None);
}

#[test]
fn malformed_known_keywords_are_dropped() {
    assert_eq!(dec("STATE {not json"), None);
    assert_eq!(dec("JOIN not-a-uuid"), None);
    assert_eq!(dec("SET Scorpion true"), None);
    assert_eq!(dec("READY"), None);
    assert_eq!(dec("WINNER someone"), None);
}

#[test]
fn line_endings_are_ignored() {
    assert_eq!(
        dec(&format!("JOIN {THEM}\r\n")),
        Some(ServerMessage::PlayerJoined(THEM))
    );
}
