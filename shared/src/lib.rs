use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8891;
pub const DEFAULT_ROOM_CAPACITY: usize = 50;
pub const GENERAL_ROOM: &str = "general";
pub const COMMAND_PREFIX: char = '/';
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
pub const ROOM_HISTORY_LIMIT: usize = 500;
pub const PREVIEW_LEN: usize = 30;

pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {0} bytes exceeds maximum of {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),
    #[error("malformed message payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Connect,
    Disconnect,
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    ListRooms,
    Message,
    PrivateMessage,
    ListUsers,
    KickUser,
    BanUser,
    AdminCommand,
    Success,
    Error,
    Notification,
    FlagSubmit,
    FlagList,
    FlagRequest,
    FlagResponse,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Moderator,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Moderator => "moderator",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_moderator(&self) -> bool {
        matches!(self, UserRole::Moderator | UserRole::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomVisibility {
    Public,
    Private,
}

impl RoomVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomVisibility::Public => "public",
            RoomVisibility::Private => "private",
        }
    }
}

/// Protocol envelope: kind tag, creation timestamp, kind-specific payload map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub timestamp: f64,
    pub payload: Map<String, Value>,
}

impl Message {
    pub fn new(kind: MessageKind, payload: Map<String, Value>) -> Self {
        Message {
            kind,
            timestamp: unix_timestamp(),
            payload,
        }
    }

    /// Builds a message from a JSON object literal; non-object values become
    /// an empty payload.
    pub fn with_payload(kind: MessageKind, payload: Value) -> Self {
        let map = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Message::new(kind, map)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Frames a message as a 4-byte big-endian length prefix followed by the
/// UTF-8 JSON serialization of the envelope.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Attempts to decode one framed message from the front of `buffer`.
///
/// Returns `Ok(None)` when fewer than 4 bytes are available or the declared
/// frame is not yet complete; the caller keeps accumulating and retries.
/// On success returns the message and the number of bytes consumed.
pub fn decode_message(buffer: &[u8]) -> Result<Option<(Message, usize)>, ProtocolError> {
    if buffer.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&buffer[..LENGTH_PREFIX_SIZE]);
    let length = u32::from_be_bytes(prefix) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    if buffer.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    let body = &buffer[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + length];
    let message: Message = serde_json::from_slice(body)?;
    Ok(Some((message, LENGTH_PREFIX_SIZE + length)))
}

/// SHA-256 hex digest used for private-room passwords. The raw password is
/// never stored.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_message() -> Message {
        Message::with_payload(
            MessageKind::JoinRoom,
            json!({"room_name": "vault", "password": "pw1"}),
        )
    }

    #[test]
    fn encode_decode_roundtrip() {
        let message = sample_message();
        let frame = encode_message(&message).unwrap();

        let (decoded, consumed) = decode_message(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded.kind, MessageKind::JoinRoom);
        assert_eq!(decoded.payload_str("room_name"), Some("vault"));
        assert_eq!(decoded.payload_str("password"), Some("pw1"));
        assert_eq!(decoded.timestamp, message.timestamp);
    }

    #[test]
    fn decode_empty_buffer_yields_nothing() {
        assert!(decode_message(&[]).unwrap().is_none());
        assert!(decode_message(&[0, 0]).unwrap().is_none());
    }

    #[test]
    fn decode_is_partial_read_safe_at_every_split() {
        let message = sample_message();
        let frame = encode_message(&message).unwrap();

        for split in 0..frame.len() {
            let first = &frame[..split];
            assert!(
                decode_message(first).unwrap().is_none(),
                "split at {} produced a message early",
                split
            );
        }

        let (decoded, consumed) = decode_message(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded.kind, MessageKind::JoinRoom);
    }

    #[test]
    fn decode_leaves_trailing_bytes_unconsumed() {
        let first = encode_message(&sample_message()).unwrap();
        let second = encode_message(&Message::with_payload(
            MessageKind::Message,
            json!({"content": "hello"}),
        ))
        .unwrap();

        let mut combined = first.clone();
        combined.extend_from_slice(&second);

        let (one, consumed) = decode_message(&combined).unwrap().unwrap();
        assert_eq!(one.kind, MessageKind::JoinRoom);
        assert_eq!(consumed, first.len());

        let (two, consumed) = decode_message(&combined[consumed..]).unwrap().unwrap();
        assert_eq!(two.kind, MessageKind::Message);
        assert_eq!(consumed, second.len());
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        frame.extend_from_slice(b"{}");

        match decode_message(&frame) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn malformed_body_is_an_error_not_a_stall() {
        let body = b"not json at all";
        let mut frame = Vec::new();
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);

        match decode_message(&frame) {
            Err(ProtocolError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn kind_tags_match_wire_names() {
        let cases = [
            (MessageKind::Connect, "connect"),
            (MessageKind::JoinRoom, "join_room"),
            (MessageKind::PrivateMessage, "private_message"),
            (MessageKind::FlagResponse, "flag_response"),
        ];

        for (kind, tag) in cases {
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, json!(tag));
            let parsed: MessageKind = serde_json::from_value(json!(tag)).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unknown_kind_tag_parses_as_unknown() {
        let parsed: MessageKind = serde_json::from_value(json!("teleport")).unwrap();
        assert_eq!(parsed, MessageKind::Unknown);
    }

    #[test]
    fn password_hash_is_stable() {
        let digest = hash_password("pw1");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_password("pw1"));
        assert_ne!(digest, hash_password("pw2"));
        assert_ne!(digest, "pw1");
    }

    #[test]
    fn role_moderator_check() {
        assert!(!UserRole::User.is_moderator());
        assert!(UserRole::Moderator.is_moderator());
        assert!(UserRole::Admin.is_moderator());
    }
}
