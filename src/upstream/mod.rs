//! Upstream sessions: the server-type registry, the connection handler
//! contract, and the built-in IRC driver.

mod handler;
pub mod irc;
mod server_type;
pub mod stream;

pub use handler::ConnectionHandler;
pub use server_type::{ServerType, ServerTypeManager};

use crate::config::UpstreamConfig;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Register the server types shipped with the bouncer.
pub fn register_builtin_server_types(
    manager: &ServerTypeManager,
    config: UpstreamConfig,
    tasks: TaskTracker,
) {
    manager.register(Arc::new(irc::IrcServerType::new(config, tasks)));
}
