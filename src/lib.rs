//! A peer-to-peer file transfer agent.
//!
//! Every agent serves PUT, GET, LIST, DELETE, INFO, ACTION and TRANSFER
//! requests over a text-framed TCP protocol and talks to other agents with
//! the same stack through [`AgentClient`].

pub mod content;
pub mod network;
pub mod parallel;
pub mod protocol;
pub mod request;
pub mod service;
pub mod session;
pub mod transfer;
mod utils;

pub use network::{AgentClient, AgentConnector, TcpConnector};
pub use protocol::{AgentAddr, Message, ResourceUri, ResponseCode};
pub use service::{
    setup_local_tracing, setup_tracing, Agent, AgentConfig, AgentHandle, AppError, AppResult,
    Shutdown,
};
