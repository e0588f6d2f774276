//! slbnc - Straylight Bouncer
//!
//! A multi-user IRC bouncer: each account keeps one upstream session alive
//! and shares it with any number of attached clients.

pub mod account;
pub mod auth;
pub mod bouncer;
pub mod commands;
pub mod config;
pub mod error;
pub mod irc;
pub mod network;
pub mod upstream;

pub use bouncer::{Bouncer, BouncerBuilder};
pub use config::Config;
