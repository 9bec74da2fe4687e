//! Client node: activates observed objects, competes for their batons and runs each object's
//! trigger only while this node owns it.
//!
//! The token substrate is either in-process ([`baton_token::InMemorySubstrate`]) or a remote
//! `baton-server` reached through [`RemoteSubstrate`].

#![forbid(unsafe_code)]

mod actor;
mod backoff;
mod config;
mod coordinator;
mod directory;
mod remote;
mod sink;

pub use backoff::{Backoff, DEFAULT_RETRY_INITIAL, DEFAULT_RETRY_MAX};
pub use config::{ConfigError, LogFormat, NodeArgs, NodeConfig};
pub use coordinator::{ActivationError, Coordinator, CoordinatorConfig, DEFAULT_TOKEN_PREFIX};
pub use directory::{load_directory, DirectoryError};
pub use remote::{RemoteConfig, RemoteSubstrate, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
pub use sink::TracingSink;
