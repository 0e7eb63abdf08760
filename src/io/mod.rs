// src/io/mod.rs
//
// Device I/O: the serial protocol stack and the connection lifecycle.

pub mod connection;
pub mod serial;

pub use connection::{ConnectionManager, ConnectionStatus, LinkState, DEFAULT_LINE_QUEUE_CAPACITY};
