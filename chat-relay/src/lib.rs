//! Line-oriented chat relay over TCP.
//!
//! Clients connect, send a display name, and then every line they type is
//! relayed to all other connected clients. `/quit` (any case) ends a session.
//!
//! - [`cli`] parses the single optional port argument.
//! - [`server`] accepts connections and spawns one task per client.
//! - [`session`] runs a client's handshake and receive loop and guarantees
//!   cleanup on every exit path.
//! - [`registry`] holds the active sessions and fans broadcasts out to them.
//! - [`protocol`] frames lines and renders the fixed server messages.
//! - [`error`] describes delivery failures at the registry boundary.

pub mod cli;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
