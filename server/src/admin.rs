//! Operator console
//!
//! A thin out-of-band surface over the same stores the sessions use. Runs as
//! one background task reading lines from stdin; `dispatch` is a pure
//! line-to-output function so every command is unit-testable without a
//! terminal.

use crate::broadcast::{broadcast_to_all, broadcast_to_room, send_to_client};
use crate::network::ServerState;
use log::{info, warn};
use serde_json::json;
use shared::{Message, MessageKind, RoomVisibility, UserRole};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub struct AdminConsole {
    state: Arc<ServerState>,
}

impl AdminConsole {
    pub fn new(state: Arc<ServerState>) -> Self {
        AdminConsole { state }
    }

    /// Reads operator commands from stdin until EOF or `quit`.
    pub async fn run(self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Admin console ready. Type 'help' for commands.");

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" {
                println!("Console closed. Server keeps running.");
                break;
            }
            println!("{}", self.dispatch(line).await);
        }
    }

    /// Executes one console command and returns the printable result.
    pub async fn dispatch(&self, line: &str) -> String {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let command = match parts.first() {
            Some(command) => *command,
            None => return String::new(),
        };

        match command {
            "help" => [
                "Commands:",
                "  stats                     server statistics",
                "  rooms                     list all rooms",
                "  users                     list connected users",
                "  flags                     list captured flags",
                "  clear_flags               wipe the flag store",
                "  ban <user>                ban user from their current room",
                "  unban <user> <room>       lift a room ban",
                "  kick <user>               kick user from their current room",
                "  global_ban <user>         refuse future connects",
                "  unban_global <user>       lift a global ban",
                "  promote <user> <role>     set role (user|moderator|admin)",
                "  room_create <name> [pw]   create a room (private if pw given)",
                "  room_delete <name>        delete a room",
                "  rename <old> <new>        rename a room",
                "  broadcast <text>          notify every connected user",
                "  quit                      close the console",
            ]
            .join("\n"),

            "stats" => {
                let stats = self.state.stats().await;
                let flags = self.state.flags.read().await.count();
                format!(
                    "Connected users: {} | Active rooms: {} | Uptime: {}s | Flags: {}",
                    stats["connected_users"], stats["active_rooms"], stats["uptime"], flags
                )
            }

            "rooms" => {
                let summaries = self.state.rooms.read().await.list_rooms();
                summaries
                    .iter()
                    .map(|s| {
                        format!(
                            "{} [{}] {}/{}{}",
                            s.name,
                            s.visibility.as_str(),
                            s.users,
                            s.max_users,
                            if s.password_protected { " (locked)" } else { "" }
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }

            "users" => {
                let usernames = {
                    let mut names = self.state.registry.read().await.usernames();
                    names.sort();
                    names
                };
                if usernames.is_empty() {
                    return "No connected users".to_string();
                }
                let mut lines = Vec::new();
                for name in usernames {
                    let role = self
                        .state
                        .registry
                        .read()
                        .await
                        .role(&name)
                        .unwrap_or(UserRole::User);
                    let room = self
                        .state
                        .rooms
                        .read()
                        .await
                        .user_room(&name)
                        .unwrap_or_else(|| "-".to_string());
                    lines.push(format!("{} ({}) in {}", name, role.as_str(), room));
                }
                lines.join("\n")
            }

            "flags" => {
                let flags = self.state.flags.read().await.all();
                if flags.is_empty() {
                    return "No flags captured".to_string();
                }
                flags
                    .iter()
                    .map(|f| format!("{} by {} in {}", f.content, f.finder, f.room))
                    .collect::<Vec<_>>()
                    .join("\n")
            }

            "clear_flags" => {
                self.state.flags.write().await.clear();
                "Flag store cleared".to_string()
            }

            "ban" if parts.len() == 2 => self.moderate(parts[1], true).await,
            "kick" if parts.len() == 2 => self.moderate(parts[1], false).await,

            "unban" if parts.len() == 3 => {
                if self.state.rooms.write().await.unban(parts[1], parts[2]) {
                    format!("{} unbanned from {}", parts[1], parts[2])
                } else {
                    format!("{} was not banned from {}", parts[1], parts[2])
                }
            }

            "global_ban" if parts.len() == 2 => {
                self.state
                    .global_bans
                    .write()
                    .await
                    .insert(parts[1].to_string());
                warn!("{} globally banned by admin", parts[1]);
                format!("{} added to global ban list", parts[1])
            }

            "unban_global" if parts.len() == 2 => {
                if self.state.global_bans.write().await.remove(parts[1]) {
                    format!("{} removed from global ban list", parts[1])
                } else {
                    format!("{} is not globally banned", parts[1])
                }
            }

            "promote" if parts.len() == 3 => {
                let role = match parts[2] {
                    "user" => UserRole::User,
                    "moderator" => UserRole::Moderator,
                    "admin" => UserRole::Admin,
                    other => return format!("Unknown role: {}", other),
                };
                if self.state.registry.write().await.set_role(parts[1], role) {
                    format!("{} is now {}", parts[1], role.as_str())
                } else {
                    format!("User {} not found", parts[1])
                }
            }

            "room_create" if parts.len() >= 2 => {
                let password = parts.get(2).copied().unwrap_or("");
                let visibility = if password.is_empty() {
                    RoomVisibility::Public
                } else {
                    RoomVisibility::Private
                };
                if self
                    .state
                    .rooms
                    .write()
                    .await
                    .create_room(parts[1], visibility, password, None)
                {
                    format!("Room {} created", parts[1])
                } else {
                    format!("Room {} already exists", parts[1])
                }
            }

            "room_delete" if parts.len() == 2 => {
                if self.state.rooms.write().await.delete_room(parts[1]) {
                    format!("Room {} deleted", parts[1])
                } else {
                    format!("Cannot delete room {}", parts[1])
                }
            }

            "rename" if parts.len() == 3 => {
                if self.state.rooms.write().await.rename_room(parts[1], parts[2]) {
                    let notice = Message::with_payload(
                        MessageKind::Notification,
                        json!({ "message": format!("Room renamed to {}", parts[2]) }),
                    );
                    broadcast_to_room(&self.state, parts[2], &notice, None).await;
                    format!("Room {} renamed to {}", parts[1], parts[2])
                } else {
                    format!("Cannot rename room {}", parts[1])
                }
            }

            "broadcast" if parts.len() >= 2 => {
                let text = line["broadcast".len()..].trim();
                let notice = Message::with_payload(
                    MessageKind::Notification,
                    json!({ "message": format!("[SERVER] {}", text) }),
                );
                let delivered = broadcast_to_all(&self.state, &notice).await;
                format!("Broadcast sent to {} users", delivered)
            }

            _ => format!("Unknown command: {} (try 'help')", command),
        }
    }

    /// Shared path for console kick/ban: acts on the target's current room.
    async fn moderate(&self, target: &str, ban: bool) -> String {
        let room = self.state.rooms.read().await.user_room(target);
        let room = match room {
            Some(room) => room,
            None => return format!("User {} is not in any room", target),
        };

        let verb = if ban { "banned" } else { "kicked" };
        {
            let mut rooms = self.state.rooms.write().await;
            rooms.remove_member(target);
            if ban {
                rooms.ban(target, &room);
            }
            rooms.log_event(&room, &format!("{} was {} by admin", target, verb));
        }

        send_to_client(
            &self.state,
            target,
            Message::with_payload(
                MessageKind::Notification,
                json!({ "message": format!("You were {} from {}", verb, room) }),
            ),
        )
        .await;

        let notice = Message::with_payload(
            MessageKind::Notification,
            json!({ "message": format!("{} was {} by admin", target, verb) }),
        );
        broadcast_to_room(&self.state, &room, &notice, None).await;

        info!("{} {} from {} by admin", target, verb, room);
        format!("{} {} from {}", target, verb, room)
    }
}
