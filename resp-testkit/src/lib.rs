//! # RESP Test Server
//!
//! Purpose: Run a small in-memory, Redis-compatible server inside a test
//! process so client behavior can be checked end to end without an external
//! daemon.
//!
//! ## Design Principles
//! 1. **Disposable**: Every `TestServer` binds an ephemeral port and owns its
//!    data; dropping it closes every connection.
//! 2. **Wire Faithful**: Replies, error prefixes and pub/sub pushes follow the
//!    shapes a real server sends.
//! 3. **Small Surface**: Only the commands the client exercises are served.

mod db;
mod server;

pub use server::TestServer;

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly `tracing` subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
