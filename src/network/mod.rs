//! Network module.
//!
//! Contains the Gateway (TCP/TLS listener), the per-client Connection task,
//! and the UserSocket handle through which everything talks to a client.

mod connection;
mod gateway;
pub mod socket;

pub use connection::Connection;
pub use gateway::Gateway;
pub use socket::{DebugFlag, SocketId, UserSocket};
