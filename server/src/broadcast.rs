//! Best-effort room fan-out
//!
//! Delivery iterates a snapshot of the room's members taken under the rooms
//! lock, skips the excluded sender and anyone muted in that room, and queues
//! the message on each recipient's connection handle. A dead handle is
//! skipped without aborting the rest of the fan-out; there is no retry and
//! no acknowledgment.

use crate::network::ServerState;
use log::debug;
use shared::Message;

/// Delivers `message` to every non-muted member of `room`, excluding
/// `exclude` if given. Returns the number of recipients actually queued.
pub async fn broadcast_to_room(
    state: &ServerState,
    room: &str,
    message: &Message,
    exclude: Option<&str>,
) -> usize {
    // Snapshot membership and mute state, then release the rooms lock
    // before touching any connection handle.
    let recipients: Vec<String> = {
        let rooms = state.rooms.read().await;
        rooms
            .room_users(room)
            .into_iter()
            .filter(|member| Some(member.as_str()) != exclude)
            .filter(|member| !rooms.is_muted(member, room))
            .collect()
    };

    let senders = {
        let registry = state.registry.read().await;
        registry.senders_for(&recipients)
    };

    let mut delivered = 0;
    for (username, sender) in senders {
        match sender.send(message.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => debug!("Dropping message for {}: connection gone", username),
        }
    }
    delivered
}

/// Queues a message for one registered identity. Returns false if the
/// identity is unknown or its connection is gone.
pub async fn send_to_client(state: &ServerState, username: &str, message: Message) -> bool {
    let sender = {
        let registry = state.registry.read().await;
        registry.sender(username)
    };
    match sender {
        Some(sender) => sender.send(message).is_ok(),
        None => false,
    }
}

/// Server-wide notification used by the admin console.
pub async fn broadcast_to_all(state: &ServerState, message: &Message) -> usize {
    let senders = {
        let registry = state.registry.read().await;
        registry.all_senders()
    };

    let mut delivered = 0;
    for (username, sender) in senders {
        match sender.send(message.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => debug!("Dropping message for {}: connection gone", username),
        }
    }
    delivered
}
