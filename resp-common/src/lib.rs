// resp-common - Shared RESP2 wire types and codec
//
// This crate is used by both the sync client and the in-process test server.

pub mod error;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use types::*;
