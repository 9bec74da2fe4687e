use std::{net::SocketAddr, time::Duration};

use baton_token::DEFAULT_HANDOFF_TIMEOUT;
use clap::{Parser, ValueEnum};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7400";
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "baton-server", version, about)]
pub struct ServerArgs {
    /// Address the HTTP/WebSocket server listens on.
    ///
    /// Environment variable: `BATON_SERVER_LISTEN_ADDR`.
    #[arg(long, env = "BATON_SERVER_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: SocketAddr,

    /// How long a hand-off waits for the outgoing owner's revoke acknowledgement.
    ///
    /// Environment variable: `BATON_HANDOFF_TIMEOUT_MS`.
    #[arg(long, env = "BATON_HANDOFF_TIMEOUT_MS", default_value_t = 5000)]
    pub handoff_timeout_ms: u64,

    /// How long a new connection may take to send its `hello`.
    ///
    /// Environment variable: `BATON_HELLO_TIMEOUT_MS`.
    #[arg(long, env = "BATON_HELLO_TIMEOUT_MS", default_value_t = 10_000)]
    pub hello_timeout_ms: u64,

    /// Log filter (tracing-subscriber EnvFilter syntax). `RUST_LOG` wins when set.
    ///
    /// Environment variable: `BATON_LOG`.
    #[arg(long, env = "BATON_LOG", default_value = "info")]
    pub log_filter: String,

    /// Environment variable: `BATON_LOG_FORMAT`.
    #[arg(long, env = "BATON_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub handoff_timeout: Duration,
    pub hello_timeout: Duration,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7400)),
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            log_filter: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Parse command-line flags (with `BATON_*` environment fallbacks).
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        if args.handoff_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                name: "handoff timeout",
            });
        }
        if args.hello_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                name: "hello timeout",
            });
        }

        let log_filter = args.log_filter.trim().to_string();
        Ok(Self {
            bind_addr: args.listen_addr,
            handoff_timeout: Duration::from_millis(args.handoff_timeout_ms),
            hello_timeout: Duration::from_millis(args.hello_timeout_ms),
            log_filter: if log_filter.is_empty() {
                "info".to_string()
            } else {
                log_filter
            },
            log_format: args.log_format,
        })
    }
}
