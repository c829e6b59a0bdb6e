//! Bolt transport core: framing, message catalog, state machine, and the
//! per-connection driver loop.

pub mod chunk;
pub mod connection;
pub mod handshake;
pub mod message;
pub mod state;
pub mod stream;

pub use connection::{BoltConnection, ServerInfo};
pub use handshake::Version;
pub use message::{Request, Response};
pub use state::BoltState;
