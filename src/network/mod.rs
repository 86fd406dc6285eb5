//! Connections between agents.
//!
//! [`Connection`] drives the codec over any byte stream and deals in whole
//! messages. [`AgentClient`] is the active side with its single in-flight
//! exchange; [`AgentConnector`] is how the parallel and transfer engines open
//! new clients.

pub use client::AgentClient;
pub use connection::Connection;
pub use connector::{connect_first, AgentConnector, TcpConnector};

mod client;
mod connection;
mod connector;
