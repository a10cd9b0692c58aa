//! Network subsystem: viewer connection, control listener, discovery

pub mod connection;
pub mod control;
pub mod discovery;

pub use connection::{ConnectionId, ConnectionStats, Link, SendStatus, SessionConnection};
pub use control::{read_options, ControlListener};
pub use discovery::{announce_name, Announcer};
