//! wsrpc server runtime
//!
//! The pieces between the socket and the application: the method
//! registry ([`App`]), the request pipeline ([`process`]), the
//! per-connection worker pool ([`WorkerPool`]), and the idle-shutdown
//! timer ([`ScheduledTask`]).

pub mod app;
pub mod pipeline;
pub mod pool;
pub mod schedule;

pub use app::{App, AppFactory, Handler, HandlerResult};
pub use pipeline::process;
pub use pool::WorkerPool;
pub use schedule::ScheduledTask;
pub use wsrpc_protocol::Packet;
