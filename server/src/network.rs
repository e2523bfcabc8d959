//! Server network layer: TCP listener, accept loop, and shared state
//!
//! One tokio task is spawned per accepted connection; all cross-connection
//! state lives in [`ServerState`] behind per-store locks. Closing the
//! listener (dropping the server) stops acceptance; running sessions end on
//! their own EOF or DISCONNECT.

use crate::flags::{FlagDetector, FlagStore};
use crate::registry::ClientRegistry;
use crate::rooms::{RoomManager, RoomSummary};
use crate::session;
use log::{error, info};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Shared mutable state handed to every session task and the admin console.
///
/// Each store sits behind its own lock; snapshots are taken under the lock
/// and handed out as copies wherever iteration could race with mutation.
pub struct ServerState {
    pub rooms: RwLock<RoomManager>,
    pub registry: RwLock<ClientRegistry>,
    pub flags: RwLock<FlagStore>,
    /// Console-scoped ban list, enforced only at CONNECT. Separate from the
    /// per-room bans the protocol exposes.
    pub global_bans: RwLock<HashSet<String>>,
    pub detector: FlagDetector,
    start_time: Instant,
}

impl ServerState {
    pub fn new(default_capacity: usize) -> Self {
        ServerState {
            rooms: RwLock::new(RoomManager::new(default_capacity)),
            registry: RwLock::new(ClientRegistry::new()),
            flags: RwLock::new(FlagStore::new()),
            global_bans: RwLock::new(HashSet::new()),
            detector: FlagDetector::new(),
            start_time: Instant::now(),
        }
    }

    /// Stats block attached to CONNECT and LIST_ROOMS responses.
    pub async fn stats(&self) -> Value {
        let connected_users = self.registry.read().await.len();
        let active_rooms = self.rooms.read().await.active_room_count();
        json!({
            "connected_users": connected_users,
            "active_rooms": active_rooms,
            "uptime": self.start_time.elapsed().as_secs(),
        })
    }

    pub async fn room_list(&self) -> Value {
        let summaries = self.rooms.read().await.list_rooms();
        summaries_to_json(&summaries)
    }
}

/// Serializes room summaries into the wire listing shape.
pub fn summaries_to_json(summaries: &[RoomSummary]) -> Value {
    Value::Array(
        summaries
            .iter()
            .map(|summary| {
                json!({
                    "name": summary.name,
                    "type": summary.visibility.as_str(),
                    "password_protected": summary.password_protected,
                    "users": summary.users,
                    "max_users": summary.max_users,
                })
            })
            .collect(),
    )
}

/// The chat server: a bound listener plus the shared stores.
pub struct ChatServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl ChatServer {
    /// Binds the listener. Port 0 is honored so tests can bind ephemerally
    /// and read the assigned address back.
    pub async fn bind(addr: &str, default_capacity: usize) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(ChatServer {
            listener,
            state: Arc::new(ServerState::new(default_capacity)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accept loop: one session task per connection. A failed accept is
    /// logged and does not stop the loop.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Connection accepted from {}", addr);
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        session::handle_connection(state, stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stats_reflect_store_contents() {
        let state = ServerState::new(10);
        {
            let mut rooms = state.rooms.write().await;
            rooms.add_member("alice", shared::GENERAL_ROOM);
        }

        let stats = state.stats().await;
        assert_eq!(stats["connected_users"], 0);
        assert_eq!(stats["active_rooms"], 1);
        assert!(stats["uptime"].is_number());
    }

    #[tokio::test]
    async fn room_list_has_wire_shape() {
        let state = ServerState::new(10);
        let listing = state.room_list().await;

        let rooms = listing.as_array().unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0]["name"], "general");
        assert_eq!(rooms[0]["type"], "public");
        assert_eq!(rooms[0]["password_protected"], false);
        assert_eq!(rooms[0]["users"], 0);
        assert_eq!(rooms[0]["max_users"], 10);
    }

    #[tokio::test]
    async fn bind_on_ephemeral_port_reports_addr() {
        let server = ChatServer::bind("127.0.0.1:0", 10).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }
}
