//! Line codec for the Hive wire protocol.
//!
//! Every message is a single line made of a keyword followed by
//! space-separated fields:
//!
//! | Keyword                       | Direction | Payload                             |
//! |-------------------------------|-----------|-------------------------------------|
//! | `MOV <notation>`              | out       | engine move notation                |
//! | `SET <option> <bool>`         | both      | option name, `true`/`false`         |
//! | `MSG <text>`                  | out       | free text                           |
//! | `MSG <uuid> <text>`           | in        | sender, free text                   |
//! | `GLHF`                        | out       | ready to play                       |
//! | `FF` / `FF <uuid>`            | out / in  | forfeit                             |
//! | `STATE <payload>`             | in        | engine-serialized game state        |
//! | `READY <uuid> <bool>`         | in        | readiness toggle                    |
//! | `JOIN <uuid>` / `LEAVE <uuid>`| in        | presence                            |
//! | `WINNER [<uuid>]`             | in        | no uuid means a draw                |
//! | `ERR [<uuid>] <code> <text>`  | in        | structured server error             |
//!
//! Decoding is lossy by design: malformed lines for a known keyword and lines
//! with an unknown keyword decode to `None` and are logged, never propagated.
//! `ERR` lines always decode, falling back to [`ErrorCode::UnknownError`].

use std::str::FromStr;

use tracing::{debug, warn};

use crate::engine::GameState;
use crate::error_codes::ErrorCode;
use crate::protocol::{ClientMessage, OptionKey, ServerError, ServerMessage, UserId};

/// Encode an outgoing message as a single wire line (without the newline).
pub fn encode(message: &ClientMessage) -> String {
    match message {
        ClientMessage::Movement(movement) => format!("MOV {movement}"),
        ClientMessage::SetOption(option, value) => format!("SET {option} {value}"),
        ClientMessage::Chat(text) => format!("MSG {text}"),
        ClientMessage::ReadyToPlay => "GLHF".to_string(),
        ClientMessage::Forfeit => "FF".to_string(),
    }
}

/// Decode an incoming wire line.
///
/// Returns `None` for unknown keywords and for malformed payloads.
pub fn decode<S: GameState>(line: &str) -> Option<ServerMessage<S>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (keyword, body) = line.split_once(' ').unwrap_or((line, ""));

    let message = match keyword {
        "STATE" => S::decode_state(body).map(ServerMessage::GameState),
        "SET" => decode_set_option(body),
        "READY" => decode_ready(body),
        "JOIN" => parse_user(body).map(ServerMessage::PlayerJoined),
        "LEAVE" => parse_user(body).map(ServerMessage::PlayerLeft),
        "MSG" => decode_chat(body),
        "FF" => parse_user(body).map(ServerMessage::Forfeit),
        "WINNER" => decode_winner(body),
        "ERR" => Some(ServerMessage::Error(decode_error(body))),
        _ => {
            debug!(keyword, "dropping line with unknown keyword");
            return None;
        }
    };

    if message.is_none() {
        warn!(keyword, raw = line, "failed to decode server line");
    }
    message
}

fn decode_set_option<S>(body: &str) -> Option<ServerMessage<S>> {
    let (option, value) = body.split_once(' ')?;
    let option = OptionKey::from_str(option).ok()?;
    Some(ServerMessage::SetOption(option, parse_bool(value)?))
}

fn decode_ready<S>(body: &str) -> Option<ServerMessage<S>> {
    let (user, value) = body.split_once(' ')?;
    Some(ServerMessage::PlayerReady(parse_user(user)?, parse_bool(value)?))
}

fn decode_chat<S>(body: &str) -> Option<ServerMessage<S>> {
    // Only the first space separates the sender; the text keeps the rest.
    let (user, text) = body.split_once(' ').unwrap_or((body, ""));
    Some(ServerMessage::Chat(parse_user(user)?, text.to_string()))
}

fn decode_winner<S>(body: &str) -> Option<ServerMessage<S>> {
    let body = body.trim();
    if body.is_empty() {
        return Some(ServerMessage::GameOver(None));
    }
    parse_user(body).map(|winner| ServerMessage::GameOver(Some(winner)))
}

/// Decode the body of an `ERR` line. Never fails.
fn decode_error(body: &str) -> ServerError {
    let body = body.trim();
    let (first, rest) = body.split_once(' ').unwrap_or((body, ""));

    let (user, code_and_text) = match parse_user(first) {
        Some(user) => (Some(user), rest),
        None => (None, body),
    };

    let (code, description) = code_and_text
        .split_once(' ')
        .unwrap_or((code_and_text, ""));
    match code.parse::<i32>() {
        Ok(code) => ServerError::new(user, ErrorCode::from(code), description),
        Err(_) => {
            warn!(raw = body, "unparseable error line, reporting unknown error");
            ServerError {
                user,
                code: ErrorCode::UnknownError,
                description: code_and_text.to_string(),
            }
        }
    }
}

fn parse_user(field: &str) -> Option<UserId> {
    UserId::parse_str(field.trim()).ok()
}

/// Strict boolean parsing: only `true` and `false` are accepted.
fn parse_bool(field: &str) -> Option<bool> {
    match field {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::engine::{RelativeMovement, StateSnapshot};

    type Message = ServerMessage<StateSnapshot>;

    const USER: &str = "6b1f3bd2-3c4d-4a51-9a7e-0c2f1d9e8a11";

    fn user() -> UserId {
        UserId::parse_str(USER).unwrap()
    }

    #[test]
    fn encode_all_client_messages() {
        assert_eq!(
            encode(&ClientMessage::Movement(RelativeMovement::new("wA1 -bQ1"))),
            "MOV wA1 -bQ1"
        );
        assert_eq!(
            encode(&ClientMessage::SetOption(OptionKey::Pillbug, true)),
            "SET Pillbug true"
        );
        assert_eq!(
            encode(&ClientMessage::Chat("good game".into())),
            "MSG good game"
        );
        assert_eq!(encode(&ClientMessage::ReadyToPlay), "GLHF");
        assert_eq!(encode(&ClientMessage::Forfeit), "FF");
    }

    #[test]
    fn forfeit_keyword_must_match_whole_token() {
        assert!(decode::<StateSnapshot>(&format!("FFA {USER}")).is_none());
        assert_eq!(
            decode::<StateSnapshot>(&format!("FF {USER}")),
            Some(Message::Forfeit(user()))
        );
    }

    #[test]
    fn chat_keeps_multi_word_text() {
        let decoded = decode::<StateSnapshot>(&format!("MSG {USER} nice  move, really"));
        assert_eq!(
            decoded,
            Some(Message::Chat(user(), "nice  move, really".into()))
        );
    }

    #[test]
    fn strict_booleans() {
        assert!(decode::<StateSnapshot>("SET Mosquito TRUE").is_none());
        assert!(decode::<StateSnapshot>(&format!("READY {USER} 1")).is_none());
        assert!(decode::<StateSnapshot>("SET Mosquito").is_none());
    }

    #[test]
    fn error_with_and_without_user() {
        let with_user = decode::<StateSnapshot>(&format!("ERR {USER} 102 wait your turn"));
        assert_eq!(
            with_user,
            Some(Message::Error(ServerError::new(
                Some(user()),
                ErrorCode::NotPlayerTurn,
                "wait your turn"
            )))
        );

        let without_user = decode::<StateSnapshot>("ERR 199 what");
        assert_eq!(
            without_user,
            Some(Message::Error(ServerError::new(
                None,
                ErrorCode::InvalidCommand,
                "what"
            )))
        );
    }

    #[test]
    fn error_with_unknown_code_falls_back() {
        let Some(Message::Error(err)) = decode::<StateSnapshot>("ERR 4242 brand new failure") else {
            panic!("ERR must always decode");
        };
        assert_eq!(err.code, ErrorCode::UnknownError);
        assert_eq!(err.description, "brand new failure");
    }

    #[test]
    fn error_without_code_is_synthetic_unknown() {
        let Some(Message::Error(err)) = decode::<StateSnapshot>("ERR oops") else {
            panic!("ERR must always decode");
        };
        assert_eq!(err.code, ErrorCode::UnknownError);
        assert_eq!(err.user, None);
        assert_eq!(err.description, "oops");
    }

    #[test]
    fn trailing_newline_is_ignored() {
        assert_eq!(
            decode::<StateSnapshot>("WINNER\r\n"),
            Some(Message::GameOver(None))
        );
    }

    #[test]
    fn malformed_state_payload_is_dropped() {
        assert!(decode::<StateSnapshot>("STATE {\"current_player\":").is_none());
    }

    #[test]
    fn empty_line_is_dropped() {
        assert!(decode::<StateSnapshot>("").is_none());
    }

    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Decode `line` and return what was logged at `info` and above.
    fn logged_while_decoding(line: &str) -> String {
        let buffer = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&buffer);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || Capture(std::sync::Arc::clone(&sink)))
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let _ = decode::<StateSnapshot>(line);
        });
        let bytes = buffer.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn unknown_keywords_stay_quiet_but_malformed_lines_warn() {
        assert_eq!(logged_while_decoding("BOGUS foo bar"), "");
        let malformed = logged_while_decoding("JOIN not-a-uuid");
        assert!(malformed.contains("WARN"), "{malformed}");
        assert!(malformed.contains("failed to decode server line"), "{malformed}");
    }
}
