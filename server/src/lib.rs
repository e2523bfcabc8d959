//! # Chat Server Library
//!
//! Server side of the LAN multi-room chat service. It owns the canonical
//! room, session, and flag-capture state, relays messages between connected
//! clients, and enforces per-room moderation.
//!
//! ## Architecture
//!
//! One tokio task per accepted TCP connection plus one writer task per
//! socket; no cross-session rendezvous. All shared mutable state lives in
//! three lock-guarded stores (rooms, client registry, flag store) that hand
//! out snapshots wherever iteration could race with mutation. Fan-out is
//! best-effort and at-most-once: a dead recipient is skipped, never retried.
//!
//! ## Module Organization
//!
//! - [`rooms`]: membership with the one-room-per-identity invariant,
//!   per-room ban/mute sets, bounded event history, rename.
//! - [`registry`]: identity to connection handle and role, with
//!   first-writer-wins registration.
//! - [`flags`]: flag pattern detector and the deduplicating capture store.
//! - [`session`]: per-connection state machine and message dispatch.
//! - [`broadcast`]: room fan-out with sender/muted exclusion.
//! - [`network`]: TCP listener, accept loop, shared server state.
//! - [`admin`]: operator console acting out-of-band on the same stores.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::ChatServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ChatServer::bind("0.0.0.0:8891", 50).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod broadcast;
pub mod flags;
pub mod network;
pub mod registry;
pub mod rooms;
pub mod session;
