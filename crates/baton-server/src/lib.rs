//! Coordination server: exposes an [`baton_token::InMemorySubstrate`] to remote nodes over a
//! WebSocket speaking the `baton-v1` protocol, plus health, readiness, metrics and token
//! inspection endpoints.

#![forbid(unsafe_code)]

mod config;
mod metrics;
mod server;
mod session;

pub use baton_protocol::SUBPROTOCOL;
pub use config::{ConfigError, LogFormat, ServerArgs, ServerConfig, DEFAULT_LISTEN_ADDR};
pub use metrics::Metrics;
pub use server::{start_server, ServerHandle};
