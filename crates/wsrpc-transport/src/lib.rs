//! wsrpc transport layer
//!
//! WebSocket transport for the wsrpc runtime: accepts upgrades on any
//! path, runs one socket task per connection with a per-connection
//! worker pool, and drives the idle-shutdown timer from the connection
//! count.

pub mod server;

pub use server::{Options, ServeError, Server};
