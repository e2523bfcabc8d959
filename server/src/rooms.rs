//! Room state management: membership, bans, mutes, and per-room history
//!
//! The `RoomManager` is the sole owner of room data. Session handlers and the
//! admin console only touch rooms through its methods while holding the
//! store lock, so every mutation is serialized and every read hands back a
//! snapshot instead of a live view.

use log::info;
use shared::{hash_password, RoomVisibility, ROOM_HISTORY_LIMIT};
use std::collections::{HashMap, HashSet, VecDeque};

/// A named chat room and its moderation state.
#[derive(Debug)]
pub struct Room {
    pub visibility: RoomVisibility,
    /// SHA-256 hex digest; empty unless the room is private with a password.
    pub password_digest: String,
    pub password_protected: bool,
    pub capacity: usize,
    members: HashSet<String>,
    banned: HashSet<String>,
    muted: HashSet<String>,
    history: VecDeque<String>,
}

impl Room {
    fn new(visibility: RoomVisibility, password: &str, capacity: usize) -> Self {
        let password_digest = match visibility {
            RoomVisibility::Private => hash_password(password),
            RoomVisibility::Public => String::new(),
        };
        Room {
            visibility,
            password_digest,
            password_protected: !password.is_empty(),
            capacity,
            members: HashSet::new(),
            banned: HashSet::new(),
            muted: HashSet::new(),
            history: VecDeque::new(),
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }
}

/// Point-in-time view of one room for LIST_ROOMS responses.
#[derive(Debug, Clone)]
pub struct RoomSummary {
    pub name: String,
    pub visibility: RoomVisibility,
    pub password_protected: bool,
    pub users: usize,
    pub max_users: usize,
}

/// Outcome of a join attempt, mapped to ERROR responses by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    UnknownRoom,
    Banned,
    WrongPassword,
    RoomFull,
}

/// Registry of all rooms plus the reverse identity-to-room index.
///
/// Invariant: an identity appears in at most one room's member set, and the
/// `user_rooms` index always agrees with the member sets.
pub struct RoomManager {
    rooms: HashMap<String, Room>,
    user_rooms: HashMap<String, String>,
    default_capacity: usize,
}

impl RoomManager {
    /// Creates the manager with the boot room "general" already present.
    pub fn new(default_capacity: usize) -> Self {
        let mut manager = RoomManager {
            rooms: HashMap::new(),
            user_rooms: HashMap::new(),
            default_capacity,
        };
        manager.create_room(shared::GENERAL_ROOM, RoomVisibility::Public, "", None);
        manager
    }

    /// Creates a room; returns false if the name is already taken. A room
    /// without its own capacity gets the server-wide default.
    pub fn create_room(
        &mut self,
        name: &str,
        visibility: RoomVisibility,
        password: &str,
        capacity: Option<usize>,
    ) -> bool {
        if self.rooms.contains_key(name) {
            return false;
        }
        self.rooms.insert(
            name.to_string(),
            Room::new(visibility, password, capacity.unwrap_or(self.default_capacity)),
        );
        info!("Room created: {}", name);
        true
    }

    /// Deletes a room. The boot room can never be deleted; any members are
    /// dropped from the reverse index.
    pub fn delete_room(&mut self, name: &str) -> bool {
        if name == shared::GENERAL_ROOM {
            return false;
        }
        match self.rooms.remove(name) {
            Some(room) => {
                for member in &room.members {
                    self.user_rooms.remove(member);
                }
                info!("Room deleted: {}", name);
                true
            }
            None => false,
        }
    }

    pub fn room_exists(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    /// Validates a join against bans, password, and capacity without
    /// mutating anything.
    pub fn check_join(&self, username: &str, name: &str, password: &str) -> Result<(), JoinError> {
        let room = self.rooms.get(name).ok_or(JoinError::UnknownRoom)?;
        if room.banned.contains(username) {
            return Err(JoinError::Banned);
        }
        if room.visibility == RoomVisibility::Private
            && hash_password(password) != room.password_digest
        {
            return Err(JoinError::WrongPassword);
        }
        if room.is_full() {
            return Err(JoinError::RoomFull);
        }
        Ok(())
    }

    /// Adds a member, removing them from any previous room first. Both halves
    /// happen inside one `&mut self` call so no concurrent reader can observe
    /// the identity in two rooms or in limbo. Returns the room left, if any.
    pub fn add_member(&mut self, username: &str, name: &str) -> Option<String> {
        if !self.rooms.contains_key(name) {
            return None;
        }
        let previous = self.remove_member(username);
        if let Some(room) = self.rooms.get_mut(name) {
            room.members.insert(username.to_string());
        }
        self.user_rooms
            .insert(username.to_string(), name.to_string());
        previous
    }

    /// Removes a member from whichever room holds them; clears the reverse
    /// lookup. Idempotent. Returns the room they were in.
    pub fn remove_member(&mut self, username: &str) -> Option<String> {
        let name = self.user_rooms.remove(username)?;
        if let Some(room) = self.rooms.get_mut(&name) {
            room.members.remove(username);
        }
        Some(name)
    }

    pub fn user_room(&self, username: &str) -> Option<String> {
        self.user_rooms.get(username).cloned()
    }

    /// Snapshot of current members of a room.
    pub fn room_users(&self, name: &str) -> Vec<String> {
        self.rooms
            .get(name)
            .map(|room| room.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_banned(&self, username: &str, name: &str) -> bool {
        self.rooms
            .get(name)
            .map(|room| room.banned.contains(username))
            .unwrap_or(false)
    }

    pub fn is_muted(&self, username: &str, name: &str) -> bool {
        self.rooms
            .get(name)
            .map(|room| room.muted.contains(username))
            .unwrap_or(false)
    }

    /// Records a ban. Independent of current membership: the ban is checked
    /// at join time and outlives leaving the room.
    pub fn ban(&mut self, username: &str, name: &str) -> bool {
        match self.rooms.get_mut(name) {
            Some(room) => {
                room.banned.insert(username.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unban(&mut self, username: &str, name: &str) -> bool {
        match self.rooms.get_mut(name) {
            Some(room) => room.banned.remove(username),
            None => false,
        }
    }

    pub fn mute(&mut self, username: &str, name: &str) -> bool {
        match self.rooms.get_mut(name) {
            Some(room) => {
                room.muted.insert(username.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unmute(&mut self, username: &str, name: &str) -> bool {
        match self.rooms.get_mut(name) {
            Some(room) => room.muted.remove(username),
            None => false,
        }
    }

    /// Atomically moves a room to a new key: membership, history, ban and
    /// mute sets all travel together and the reverse index is rewritten.
    /// Fails if the old room is missing, the new name is taken, or the old
    /// room is the boot room.
    pub fn rename_room(&mut self, old: &str, new: &str) -> bool {
        if old == shared::GENERAL_ROOM || self.rooms.contains_key(new) {
            return false;
        }
        match self.rooms.remove(old) {
            Some(room) => {
                for member in &room.members {
                    self.user_rooms.insert(member.clone(), new.to_string());
                }
                self.rooms.insert(new.to_string(), room);
                info!("Room {} renamed to {}", old, new);
                true
            }
            None => false,
        }
    }

    /// Appends a line to the room's event history, evicting the oldest entry
    /// once the bound is reached.
    pub fn log_event(&mut self, name: &str, event: &str) {
        if let Some(room) = self.rooms.get_mut(name) {
            if room.history.len() >= ROOM_HISTORY_LIMIT {
                room.history.pop_front();
            }
            room.history.push_back(event.to_string());
        }
    }

    pub fn history(&self, name: &str) -> Vec<String> {
        self.rooms
            .get(name)
            .map(|room| room.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Point-in-time copy of every room, safe to serialize after the lock is
    /// released.
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(name, room)| RoomSummary {
                name: name.clone(),
                visibility: room.visibility,
                password_protected: room.password_protected,
                users: room.member_count(),
                max_users: room.capacity,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Number of rooms with at least one member, for the stats block.
    pub fn active_room_count(&self) -> usize {
        self.rooms
            .values()
            .filter(|room| room.member_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RoomManager {
        RoomManager::new(3)
    }

    #[test]
    fn general_room_exists_at_boot() {
        let manager = manager();
        assert!(manager.room_exists("general"));
    }

    #[test]
    fn create_duplicate_room_fails() {
        let mut manager = manager();
        assert!(manager.create_room("dev", RoomVisibility::Public, "", None));
        assert!(!manager.create_room("dev", RoomVisibility::Public, "", None));
    }

    #[test]
    fn general_room_cannot_be_deleted() {
        let mut manager = manager();
        assert!(!manager.delete_room("general"));
        assert!(manager.room_exists("general"));
    }

    #[test]
    fn member_appears_in_at_most_one_room() {
        let mut manager = manager();
        manager.create_room("dev", RoomVisibility::Public, "", None);
        manager.add_member("alice", "general");
        let left = manager.add_member("alice", "dev");

        assert_eq!(left, Some("general".to_string()));
        assert!(manager.room_users("general").is_empty());
        assert_eq!(manager.room_users("dev"), vec!["alice".to_string()]);
        assert_eq!(manager.user_room("alice"), Some("dev".to_string()));
    }

    #[test]
    fn remove_member_clears_reverse_lookup() {
        let mut manager = manager();
        manager.add_member("alice", "general");

        assert_eq!(manager.remove_member("alice"), Some("general".to_string()));
        assert_eq!(manager.user_room("alice"), None);
        assert_eq!(manager.remove_member("alice"), None);
    }

    #[test]
    fn ban_outlives_membership() {
        let mut manager = manager();
        manager.add_member("bob", "general");
        manager.ban("bob", "general");
        manager.remove_member("bob");

        assert_eq!(
            manager.check_join("bob", "general", ""),
            Err(JoinError::Banned)
        );
    }

    #[test]
    fn private_room_requires_matching_password() {
        let mut manager = manager();
        manager.create_room("vault", RoomVisibility::Private, "pw1", None);

        assert_eq!(
            manager.check_join("bob", "vault", "wrong"),
            Err(JoinError::WrongPassword)
        );
        assert_eq!(manager.check_join("bob", "vault", "pw1"), Ok(()));
    }

    #[test]
    fn full_room_rejects_joins() {
        let mut manager = manager();
        manager.add_member("a", "general");
        manager.add_member("b", "general");
        manager.add_member("c", "general");

        assert_eq!(
            manager.check_join("d", "general", ""),
            Err(JoinError::RoomFull)
        );
    }

    #[test]
    fn per_room_capacity_overrides_default() {
        let mut manager = manager();
        manager.create_room("duo", RoomVisibility::Public, "", Some(1));
        manager.add_member("alice", "duo");

        assert_eq!(
            manager.check_join("bob", "duo", ""),
            Err(JoinError::RoomFull)
        );

        let duo = manager
            .list_rooms()
            .into_iter()
            .find(|s| s.name == "duo")
            .unwrap();
        assert_eq!(duo.max_users, 1);
    }

    #[test]
    fn unknown_room_join_fails() {
        let manager = manager();
        assert_eq!(
            manager.check_join("a", "nowhere", ""),
            Err(JoinError::UnknownRoom)
        );
    }

    #[test]
    fn rename_moves_members_history_and_bans() {
        let mut manager = manager();
        manager.create_room("dev", RoomVisibility::Public, "", None);
        manager.add_member("alice", "dev");
        manager.ban("eve", "dev");
        manager.mute("mallory", "dev");
        manager.log_event("dev", "alice joined");

        assert!(manager.rename_room("dev", "devel"));
        assert!(!manager.room_exists("dev"));
        assert_eq!(manager.user_room("alice"), Some("devel".to_string()));
        assert!(manager.is_banned("eve", "devel"));
        assert!(manager.is_muted("mallory", "devel"));
        assert_eq!(manager.history("devel"), vec!["alice joined".to_string()]);
    }

    #[test]
    fn rename_refuses_taken_name_and_general() {
        let mut manager = manager();
        manager.create_room("dev", RoomVisibility::Public, "", None);

        assert!(!manager.rename_room("general", "lobby"));
        assert!(!manager.rename_room("dev", "general"));
    }

    #[test]
    fn history_is_bounded() {
        let mut manager = manager();
        for i in 0..(ROOM_HISTORY_LIMIT + 10) {
            manager.log_event("general", &format!("event {}", i));
        }

        let history = manager.history("general");
        assert_eq!(history.len(), ROOM_HISTORY_LIMIT);
        assert_eq!(history[0], "event 10");
    }

    #[test]
    fn list_rooms_reports_snapshot() {
        let mut manager = manager();
        manager.create_room("vault", RoomVisibility::Private, "pw1", None);
        manager.add_member("alice", "vault");

        let summaries = manager.list_rooms();
        assert_eq!(summaries.len(), 2);
        let vault = summaries.iter().find(|s| s.name == "vault").unwrap();
        assert_eq!(vault.visibility, RoomVisibility::Private);
        assert!(vault.password_protected);
        assert_eq!(vault.users, 1);
        assert_eq!(vault.max_users, 3);
    }

    #[test]
    fn active_room_count_ignores_empty_rooms() {
        let mut manager = manager();
        manager.create_room("dev", RoomVisibility::Public, "", None);
        manager.add_member("alice", "dev");

        assert_eq!(manager.active_room_count(), 1);
    }

    #[test]
    fn mute_and_unmute_roundtrip() {
        let mut manager = manager();
        manager.add_member("bob", "general");

        assert!(manager.mute("bob", "general"));
        assert!(manager.is_muted("bob", "general"));
        assert!(manager.unmute("bob", "general"));
        assert!(!manager.is_muted("bob", "general"));
    }
}
