//! Integration test common infrastructure.
//!
//! Provides an in-process bouncer, a scripted upstream IRC server, and a
//! line-oriented test client.

pub mod client;
pub mod server;
pub mod upstream;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::TestBouncer;
#[allow(unused_imports)]
pub use upstream::{FakeUpstream, UpstreamConn};
