//! Control-channel plumbing: session state, the line parser, the reply
//! renderer, the command-handler registry, and the `Connection` that wires
//! them into the per-connection command loop.

pub mod connection;
pub mod handlers;
pub mod middleware;
pub mod parser;
pub mod reply;
pub mod session;

pub use connection::Connection;
