//! Per-connection session handling
//!
//! Each accepted socket gets one reader task (this module) and one writer
//! task draining the session's outgoing queue. The reader accumulates bytes
//! into a buffer, drains complete frames, and dispatches them through the
//! `UNAUTHENTICATED -> ACTIVE -> TERMINATED` state machine. All shared
//! state goes through the stores on [`ServerState`].

use crate::broadcast::{broadcast_to_room, send_to_client};
use crate::network::ServerState;
use crate::rooms::JoinError;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use shared::{
    encode_message, Message, MessageKind, ProtocolError, RoomVisibility, UserRole,
    COMMAND_PREFIX, LENGTH_PREFIX_SIZE, PREVIEW_LEN,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Whether the session keeps reading after a message is handled.
enum Flow {
    Continue,
    Terminate,
}

struct Session {
    state: Arc<ServerState>,
    addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Message>,
    username: Option<String>,
}

/// Entry point for one accepted connection; returns when the session ends.
pub async fn handle_connection(state: Arc<ServerState>, stream: TcpStream, addr: SocketAddr) {
    let (mut reader, mut writer) = stream.into_split();
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

    // Writer task: the only place this socket is written. Fan-out queues
    // onto the channel and never blocks on this peer's socket.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            match encode_message(&message) {
                Ok(frame) => {
                    if writer.write_all(&frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to encode outgoing message: {}", e),
            }
        }
    });

    let mut session = Session {
        state,
        addr,
        outgoing,
        username: None,
    };

    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    'connection: loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) => {
                debug!("Read error from {}: {}", addr, e);
                break;
            }
        }

        loop {
            match shared::decode_message(&buffer) {
                Ok(Some((message, consumed))) => {
                    buffer.drain(..consumed);
                    if let Flow::Terminate = session.dispatch(message).await {
                        break 'connection;
                    }
                }
                Ok(None) => break,
                Err(ProtocolError::Malformed(e)) => {
                    // Frame boundary is intact, only the body failed to
                    // parse: skip this frame and keep the connection alive.
                    warn!("Malformed frame from {}: {}", addr, e);
                    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                    prefix.copy_from_slice(&buffer[..LENGTH_PREFIX_SIZE]);
                    let skip = LENGTH_PREFIX_SIZE + u32::from_be_bytes(prefix) as usize;
                    buffer.drain(..skip);
                    session.error("Malformed message");
                }
                Err(e @ ProtocolError::FrameTooLarge(_)) => {
                    warn!("Dropping {}: {}", addr, e);
                    break 'connection;
                }
            }
        }
    }

    session.cleanup().await;
    drop(session);
    let _ = writer_task.await;
}

impl Session {
    fn respond(&self, kind: MessageKind, payload: Value) {
        let _ = self.outgoing.send(Message::with_payload(kind, payload));
    }

    fn success(&self, message: &str) {
        self.respond(MessageKind::Success, json!({ "message": message }));
    }

    fn error(&self, message: &str) {
        self.respond(MessageKind::Error, json!({ "message": message }));
    }

    async fn dispatch(&mut self, message: Message) -> Flow {
        // Only CONNECT leaves the unauthenticated state; everything else is
        // answered with an error and the state does not advance.
        let username = match &self.username {
            Some(name) => name.clone(),
            None => {
                if message.kind == MessageKind::Connect {
                    self.handle_connect(&message).await;
                } else {
                    self.error("Not authenticated");
                }
                return Flow::Continue;
            }
        };

        match message.kind {
            MessageKind::Connect => self.error("Already connected"),
            MessageKind::Disconnect => return Flow::Terminate,
            MessageKind::CreateRoom => self.handle_create_room(&username, &message).await,
            MessageKind::JoinRoom => self.handle_join_room(&username, &message).await,
            MessageKind::LeaveRoom => self.handle_leave_room(&username).await,
            MessageKind::ListRooms => self.handle_list_rooms().await,
            MessageKind::ListUsers => self.handle_list_users(&username).await,
            MessageKind::Message => self.handle_room_message(&username, &message).await,
            MessageKind::PrivateMessage => self.handle_private_message(&username, &message).await,
            MessageKind::KickUser => self.handle_moderation(&username, &message, false).await,
            MessageKind::BanUser => self.handle_moderation(&username, &message, true).await,
            MessageKind::FlagSubmit => self.handle_flag_submit(&username, &message).await,
            MessageKind::FlagRequest => self.handle_flag_request().await,
            _ => self.error("Unknown message type"),
        }
        Flow::Continue
    }

    async fn handle_connect(&mut self, message: &Message) {
        let username = message
            .payload_str("username")
            .unwrap_or("")
            .trim()
            .to_string();

        if username.is_empty() {
            self.error("Username invalid or taken");
            return;
        }
        if self.state.global_bans.read().await.contains(&username) {
            self.error("You are banned from this server");
            return;
        }

        let registered = self.state.registry.write().await.register(
            &username,
            UserRole::User,
            self.addr,
            self.outgoing.clone(),
        );
        if !registered {
            self.error("Username invalid or taken");
            return;
        }

        self.username = Some(username.clone());
        let rooms = self.state.room_list().await;
        let stats = self.state.stats().await;
        self.respond(
            MessageKind::Success,
            json!({
                "message": format!("Welcome, {}!", username),
                "rooms": rooms,
                "stats": stats,
            }),
        );
        info!("User connected: {} from {}", username, self.addr);
    }

    async fn handle_create_room(&self, username: &str, message: &Message) {
        let room_name = message
            .payload_str("room_name")
            .unwrap_or("")
            .trim()
            .to_string();
        let visibility = match message.payload_str("room_type") {
            Some("private") => RoomVisibility::Private,
            _ => RoomVisibility::Public,
        };
        let password = message.payload_str("password").unwrap_or("");
        let capacity = message
            .payload
            .get("max_users")
            .and_then(Value::as_u64)
            .map(|n| n as usize);

        let created = !room_name.is_empty()
            && self
                .state
                .rooms
                .write()
                .await
                .create_room(&room_name, visibility, password, capacity);

        if created {
            self.success(&format!("Room {} created", room_name));
            info!("Room created: {} by {}", room_name, username);
        } else {
            self.error("Room invalid or exists");
        }
    }

    async fn handle_join_room(&self, username: &str, message: &Message) {
        let room_name = message
            .payload_str("room_name")
            .unwrap_or("")
            .trim()
            .to_string();
        let password = message.payload_str("password").unwrap_or("");

        // Validation and the room switch happen under one store lock so the
        // mover is never observable in two rooms or in neither.
        let result = {
            let mut rooms = self.state.rooms.write().await;
            match rooms.check_join(username, &room_name, password) {
                Err(e) => Err(e),
                Ok(()) => {
                    let previous = rooms.add_member(username, &room_name);
                    if let Some(prev) = &previous {
                        rooms.log_event(prev, &format!("{} left", username));
                    }
                    rooms.log_event(&room_name, &format!("{} joined", username));
                    Ok(previous)
                }
            }
        };

        match result {
            Err(JoinError::UnknownRoom) => self.error("Room not found"),
            Err(JoinError::Banned) => self.error("You are banned"),
            Err(JoinError::WrongPassword) => self.error("Invalid password"),
            Err(JoinError::RoomFull) => self.error("Room full"),
            Ok(previous) => {
                if let Some(prev) = previous {
                    let notice = Message::with_payload(
                        MessageKind::Notification,
                        json!({ "message": format!("{} left", username) }),
                    );
                    broadcast_to_room(&self.state, &prev, &notice, Some(username)).await;
                }

                self.success(&format!("Joined {}", room_name));
                let notice = Message::with_payload(
                    MessageKind::Notification,
                    json!({ "message": format!("{} joined", username) }),
                );
                broadcast_to_room(&self.state, &room_name, &notice, Some(username)).await;
                info!("{} joined room {}", username, room_name);
            }
        }
    }

    async fn handle_leave_room(&self, username: &str) {
        let left = {
            let mut rooms = self.state.rooms.write().await;
            let left = rooms.remove_member(username);
            if let Some(room) = &left {
                rooms.log_event(room, &format!("{} left", username));
            }
            left
        };

        match left {
            None => self.error("Not in a room"),
            Some(room) => {
                self.success(&format!("Left {}", room));
                let notice = Message::with_payload(
                    MessageKind::Notification,
                    json!({ "message": format!("{} left", username) }),
                );
                broadcast_to_room(&self.state, &room, &notice, None).await;
                info!("{} left room {}", username, room);
            }
        }
    }

    async fn handle_list_rooms(&self) {
        let rooms = self.state.room_list().await;
        let stats = self.state.stats().await;
        self.respond(
            MessageKind::Success,
            json!({
                "message": "Room list",
                "rooms": rooms,
                "stats": stats,
            }),
        );
    }

    async fn handle_list_users(&self, username: &str) {
        let room = self.state.rooms.read().await.user_room(username);
        let room = match room {
            Some(room) => room,
            None => {
                self.error("Not in a room");
                return;
            }
        };

        let mut members = self.state.rooms.read().await.room_users(&room);
        members.sort();

        let user_list: Vec<Value> = {
            let registry = self.state.registry.read().await;
            members
                .iter()
                .map(|member| {
                    let role = registry.role(member).unwrap_or(UserRole::User);
                    json!({
                        "username": member,
                        "role": role.as_str(),
                        "is_moderator": role.is_moderator(),
                    })
                })
                .collect()
        };

        self.respond(
            MessageKind::Success,
            json!({
                "message": format!("Users in {}", room),
                "users": user_list,
            }),
        );
    }

    async fn handle_room_message(&self, username: &str, message: &Message) {
        let room = self.state.rooms.read().await.user_room(username);
        let room = match room {
            Some(room) => room,
            None => {
                self.error("Not in a room");
                return;
            }
        };

        let content = message.payload_str("content").unwrap_or("").to_string();
        if content.starts_with(COMMAND_PREFIX) {
            self.handle_chat_command(username, &room, &content).await;
            return;
        }

        let outgoing = Message::with_payload(
            MessageKind::Message,
            json!({
                "username": username,
                "content": content,
                "room": room,
            }),
        );
        broadcast_to_room(&self.state, &room, &outgoing, Some(username)).await;

        self.state
            .rooms
            .write()
            .await
            .log_event(&room, &format!("{}: {}", username, preview(&content)));

        // Opportunistic flag capture on everything that flows through a room.
        let tokens = self.state.detector.detect(&content);
        if !tokens.is_empty() {
            let mut flags = self.state.flags.write().await;
            for token in tokens {
                flags.store(&token, username, &room, &preview(&content));
            }
        }
    }

    /// Room-scoped slash commands intercepted before broadcast.
    async fn handle_chat_command(&self, username: &str, room: &str, content: &str) {
        let parts: Vec<&str> = content.split_whitespace().collect();
        let command = parts.first().map(|c| c.to_lowercase()).unwrap_or_default();

        self.state
            .rooms
            .write()
            .await
            .log_event(room, &format!("{} ran command {}", username, command));

        match command.as_str() {
            "/help" => {
                self.success(
                    "Commands: /help, /history, /rename <new_name>, /mute <user>, /unmute <user>",
                );
            }
            "/history" => {
                let history = self.state.rooms.read().await.history(room);
                self.respond(
                    MessageKind::Success,
                    json!({ "message": "Room history", "history": history }),
                );
            }
            "/rename" if parts.len() == 2 => {
                if !self.is_moderator(username).await {
                    self.error("Permission denied");
                    return;
                }
                let new_name = parts[1];
                let renamed = self.state.rooms.write().await.rename_room(room, new_name);
                if renamed {
                    let notice = Message::with_payload(
                        MessageKind::Notification,
                        json!({ "message": format!("Room renamed to {}", new_name) }),
                    );
                    broadcast_to_room(&self.state, new_name, &notice, None).await;
                    info!("Room {} renamed to {} by {}", room, new_name, username);
                } else {
                    self.error("Name taken");
                }
            }
            "/mute" | "/unmute" if parts.len() == 2 => {
                if !self.is_moderator(username).await {
                    self.error("Permission denied");
                    return;
                }
                let target = parts[1];
                let muting = command == "/mute";
                let applied = {
                    let mut rooms = self.state.rooms.write().await;
                    if rooms.room_users(room).iter().any(|u| u == target) {
                        if muting {
                            rooms.mute(target, room);
                        } else {
                            rooms.unmute(target, room);
                        }
                        true
                    } else {
                        false
                    }
                };
                if applied {
                    let verb = if muting { "muted" } else { "unmuted" };
                    let notice = Message::with_payload(
                        MessageKind::Notification,
                        json!({ "message": format!("{} has been {}", target, verb) }),
                    );
                    broadcast_to_room(&self.state, room, &notice, None).await;
                    warn!("{} {} in {} by {}", target, verb, room, username);
                } else {
                    self.error("User not in room");
                }
            }
            _ => self.error("Unknown command"),
        }
    }

    async fn handle_private_message(&self, username: &str, message: &Message) {
        let target = message.payload_str("target").unwrap_or("").to_string();
        let content = message.payload_str("content").unwrap_or("").to_string();

        let delivered = send_to_client(
            &self.state,
            &target,
            Message::with_payload(
                MessageKind::PrivateMessage,
                json!({ "from": username, "content": content }),
            ),
        )
        .await;

        if delivered {
            self.success(&format!("Message sent to {}", target));
        } else {
            self.error("User not found");
        }
    }

    async fn handle_moderation(&self, username: &str, message: &Message, ban: bool) {
        if !self.is_moderator(username).await {
            self.error("Permission denied");
            return;
        }

        let target = message.payload_str("username").unwrap_or("").to_string();
        let room = self.state.rooms.read().await.user_room(username);
        let room = match room {
            Some(room) => room,
            None => {
                self.error("User not in room");
                return;
            }
        };

        let verb = if ban { "banned" } else { "kicked" };
        let removed = {
            let mut rooms = self.state.rooms.write().await;
            if rooms.room_users(&room).iter().any(|u| u == &target) {
                rooms.remove_member(&target);
                if ban {
                    rooms.ban(&target, &room);
                }
                rooms.log_event(&room, &format!("{} was {} by {}", target, verb, username));
                true
            } else {
                false
            }
        };

        if !removed {
            self.error("User not in room");
            return;
        }

        send_to_client(
            &self.state,
            &target,
            Message::with_payload(
                MessageKind::Notification,
                json!({ "message": format!("You were {} from {}", verb, room) }),
            ),
        )
        .await;

        let notice = Message::with_payload(
            MessageKind::Notification,
            json!({ "message": format!("{} was {} by {}", target, verb, username) }),
        );
        broadcast_to_room(&self.state, &room, &notice, None).await;
        warn!("{} {} from {} by {}", target, verb, room, username);
    }

    async fn handle_flag_submit(&self, username: &str, message: &Message) {
        let content = message.payload_str("content").unwrap_or("").trim().to_string();
        let room = message.payload_str("room").unwrap_or("").to_string();
        let preview_text = message.payload_str("message_preview").unwrap_or("").to_string();

        let stored = !content.is_empty()
            && self
                .state
                .flags
                .write()
                .await
                .store(&content, username, &room, &preview_text);

        if stored {
            self.success("Flag recorded");
        } else {
            self.error("Flag already recorded");
        }
    }

    async fn handle_flag_request(&self) {
        let flags = self.state.flags.read().await.all();
        let total = flags.len();
        let flags = serde_json::to_value(&flags).unwrap_or_else(|_| Value::Array(Vec::new()));
        self.respond(
            MessageKind::FlagResponse,
            json!({ "flags": flags, "total": total }),
        );
    }

    async fn is_moderator(&self, username: &str) -> bool {
        self.state
            .registry
            .read()
            .await
            .role(username)
            .map(|role| role.is_moderator())
            .unwrap_or(false)
    }

    /// Disconnect cleanup. Room membership is dropped before the registry
    /// entry so no instant exists where a room member is missing from the
    /// registry.
    async fn cleanup(&mut self) {
        let username = match self.username.take() {
            Some(name) => name,
            None => return,
        };

        let room = {
            let mut rooms = self.state.rooms.write().await;
            let room = rooms.remove_member(&username);
            if let Some(room) = &room {
                rooms.log_event(room, &format!("{} disconnected", username));
            }
            room
        };

        if let Some(room) = room {
            let notice = Message::with_payload(
                MessageKind::Notification,
                json!({ "message": format!("{} disconnected", username) }),
            );
            broadcast_to_room(&self.state, &room, &notice, None).await;
        }

        self.state.registry.write().await.unregister(&username);
        info!("User disconnected: {}", username);
    }
}

/// Truncated text used for event logs and flag previews.
fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_content() {
        let long = "x".repeat(100);
        assert_eq!(preview(&long).chars().count(), PREVIEW_LEN);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "ü".repeat(40);
        let cut = preview(&text);
        assert_eq!(cut.chars().count(), PREVIEW_LEN);
    }
}
