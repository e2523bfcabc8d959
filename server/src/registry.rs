//! Connected-session registry: identity to connection handle and role
//!
//! Each live connection registers exactly one identity here at CONNECT.
//! The registry is the only owner of session records; handlers look up
//! send handles through it and never hold them across await points longer
//! than a single delivery.

use log::info;
use shared::{Message, UserRole};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// One registered session. The unbounded sender is the opaque connection
/// handle; the session's writer task drains the other end onto the socket,
/// so queuing a message here never blocks on a slow peer.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub username: String,
    pub role: UserRole,
    pub addr: SocketAddr,
    pub sender: mpsc::UnboundedSender<Message>,
}

/// Registry of all connected sessions keyed by identity.
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientSession>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry {
            clients: HashMap::new(),
        }
    }

    /// Registers a session. First writer wins: returns false without
    /// replacing anything if the identity is already taken.
    pub fn register(
        &mut self,
        username: &str,
        role: UserRole,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) -> bool {
        if self.clients.contains_key(username) {
            return false;
        }
        self.clients.insert(
            username.to_string(),
            ClientSession {
                username: username.to_string(),
                role,
                addr,
                sender,
            },
        );
        info!("Client registered: {} from {}", username, addr);
        true
    }

    /// Removes a session. Idempotent: unregistering an absent identity is a
    /// no-op so racing cleanup paths cannot fail each other.
    pub fn unregister(&mut self, username: &str) -> Option<ClientSession> {
        let removed = self.clients.remove(username);
        if removed.is_some() {
            info!("Client unregistered: {}", username);
        }
        removed
    }

    pub fn contains(&self, username: &str) -> bool {
        self.clients.contains_key(username)
    }

    pub fn role(&self, username: &str) -> Option<UserRole> {
        self.clients.get(username).map(|session| session.role)
    }

    /// Changes a connected identity's role (admin surface only).
    pub fn set_role(&mut self, username: &str, role: UserRole) -> bool {
        match self.clients.get_mut(username) {
            Some(session) => {
                session.role = role;
                info!("Role of {} set to {}", username, role.as_str());
                true
            }
            None => false,
        }
    }

    pub fn sender(&self, username: &str) -> Option<mpsc::UnboundedSender<Message>> {
        self.clients.get(username).map(|session| session.sender.clone())
    }

    /// Send handles for a set of identities, for room fan-out. Identities
    /// with no live session are silently skipped.
    pub fn senders_for(
        &self,
        usernames: &[String],
    ) -> Vec<(String, mpsc::UnboundedSender<Message>)> {
        usernames
            .iter()
            .filter_map(|name| {
                self.clients
                    .get(name)
                    .map(|session| (name.clone(), session.sender.clone()))
            })
            .collect()
    }

    /// Snapshot of every send handle, for server-wide admin broadcasts.
    pub fn all_senders(&self) -> Vec<(String, mpsc::UnboundedSender<Message>)> {
        self.clients
            .iter()
            .map(|(name, session)| (name.clone(), session.sender.clone()))
            .collect()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
