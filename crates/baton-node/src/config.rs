use std::{path::PathBuf, time::Duration};

use baton_token::{ClientId, TokenError};
use baton_trigger::{FirePredicate, ObjectId, TriggerConfig};
use clap::{Parser, ValueEnum};

use crate::{
    remote::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT},
    CoordinatorConfig, RemoteConfig, DEFAULT_RETRY_INITIAL, DEFAULT_RETRY_MAX,
    DEFAULT_TOKEN_PREFIX,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "baton-node", version, about)]
pub struct NodeArgs {
    /// Stable identity of this node. Defaults to `node-<random uuid>`.
    ///
    /// Environment variable: `BATON_CLIENT_ID`.
    #[arg(long, env = "BATON_CLIENT_ID")]
    pub client_id: Option<String>,

    /// WebSocket URL of a `baton-server`, e.g. `ws://127.0.0.1:7400/baton`. Without it the node
    /// coordinates only with itself through an in-process substrate.
    ///
    /// Environment variable: `BATON_SERVER_URL`.
    #[arg(long, env = "BATON_SERVER_URL")]
    pub server_url: Option<String>,

    /// JSON file describing the observed objects.
    ///
    /// Environment variable: `BATON_DIRECTORY`.
    #[arg(long, env = "BATON_DIRECTORY")]
    pub directory: PathBuf,

    /// Objects to activate. Defaults to every directory entry that has a linked body.
    ///
    /// Environment variable: `BATON_OBJECTS` (comma-separated).
    #[arg(long, env = "BATON_OBJECTS", value_delimiter = ',')]
    pub objects: Vec<String>,

    /// Environment variable: `BATON_TOKEN_PREFIX`.
    #[arg(long, env = "BATON_TOKEN_PREFIX", default_value = DEFAULT_TOKEN_PREFIX)]
    pub token_prefix: String,

    /// Environment variable: `BATON_TICK_MS`.
    #[arg(long, env = "BATON_TICK_MS", default_value_t = 250)]
    pub tick_ms: u64,

    /// Minimum spacing between two fires of the same object.
    ///
    /// Environment variable: `BATON_REFRACTORY_MS`.
    #[arg(long, env = "BATON_REFRACTORY_MS", default_value_t = 5000)]
    pub refractory_ms: u64,

    /// `second-of-minute:<n>` or `top-of-hour`.
    ///
    /// Environment variable: `BATON_PREDICATE`.
    #[arg(long, env = "BATON_PREDICATE", default_value = "second-of-minute:45")]
    pub predicate: FirePredicate,

    /// Environment variable: `BATON_RETRY_INITIAL_MS`.
    #[arg(long, env = "BATON_RETRY_INITIAL_MS", default_value_t = DEFAULT_RETRY_INITIAL.as_millis() as u64)]
    pub retry_initial_ms: u64,

    /// Environment variable: `BATON_RETRY_MAX_MS`.
    #[arg(long, env = "BATON_RETRY_MAX_MS", default_value_t = DEFAULT_RETRY_MAX.as_millis() as u64)]
    pub retry_max_ms: u64,

    /// Environment variable: `BATON_CONNECT_TIMEOUT_MS`.
    #[arg(long, env = "BATON_CONNECT_TIMEOUT_MS", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    pub connect_timeout_ms: u64,

    /// Must exceed the server's hand-off timeout.
    ///
    /// Environment variable: `BATON_REQUEST_TIMEOUT_MS`.
    #[arg(long, env = "BATON_REQUEST_TIMEOUT_MS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_millis() as u64)]
    pub request_timeout_ms: u64,

    /// Log filter (tracing-subscriber EnvFilter syntax). `RUST_LOG` wins when set.
    ///
    /// Environment variable: `BATON_LOG`.
    #[arg(long, env = "BATON_LOG", default_value = "info")]
    pub log_filter: String,

    /// Environment variable: `BATON_LOG_FORMAT`.
    #[arg(long, env = "BATON_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    ClientId(#[from] TokenError),
    #[error(transparent)]
    Trigger(#[from] baton_trigger::ConfigError),
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },
    #[error("server url must use ws:// or wss://, got {0:?}")]
    ServerUrl(String),
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub client_id: ClientId,
    /// `None` runs against an in-process substrate.
    pub remote: Option<RemoteConfig>,
    pub directory: PathBuf,
    /// Empty means every directory entry with a linked body.
    pub objects: Vec<ObjectId>,
    pub coordinator: CoordinatorConfig,
    pub log_filter: String,
    pub log_format: LogFormat,
}

fn millis(value: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroDuration { name });
    }
    Ok(Duration::from_millis(value))
}

impl NodeConfig {
    /// Parse command-line flags (with `BATON_*` environment fallbacks).
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(NodeArgs::parse())
    }

    pub fn from_args(args: NodeArgs) -> Result<Self, ConfigError> {
        let client_id = match args.client_id {
            Some(id) => ClientId::new(id.trim())?,
            None => ClientId::new(format!("node-{}", uuid::Uuid::new_v4()))?,
        };

        let trigger = TriggerConfig {
            tick_interval: millis(args.tick_ms, "tick interval")?,
            refractory: millis(args.refractory_ms, "refractory period")?,
            predicate: args.predicate,
        };
        trigger.validate()?;

        let remote = match args.server_url {
            Some(url) => {
                let url = url.trim().to_string();
                if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                    return Err(ConfigError::ServerUrl(url));
                }
                Some(RemoteConfig {
                    url,
                    connect_timeout: millis(args.connect_timeout_ms, "connect timeout")?,
                    request_timeout: millis(args.request_timeout_ms, "request timeout")?,
                })
            }
            None => None,
        };

        let objects = args
            .objects
            .iter()
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .map(ObjectId::from)
            .collect();

        let log_filter = args.log_filter.trim().to_string();
        Ok(Self {
            client_id,
            remote,
            directory: args.directory,
            objects,
            coordinator: CoordinatorConfig {
                token_prefix: args.token_prefix,
                trigger,
                retry_initial: millis(args.retry_initial_ms, "retry initial delay")?,
                retry_max: millis(args.retry_max_ms, "retry max delay")?,
            },
            log_filter: if log_filter.is_empty() {
                "info".to_string()
            } else {
                log_filter
            },
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<NodeConfig, ConfigError> {
        let mut argv = vec!["baton-node", "--directory", "objects.json"];
        argv.extend_from_slice(args);
        NodeConfig::from_args(NodeArgs::try_parse_from(argv).unwrap())
    }

    #[test]
    fn defaults_run_locally_with_a_generated_id() {
        let cfg = parse(&[]).unwrap();
        assert!(cfg.remote.is_none());
        assert!(cfg.client_id.as_str().starts_with("node-"));
        assert!(cfg.objects.is_empty());
        assert_eq!(cfg.coordinator.token_prefix, DEFAULT_TOKEN_PREFIX);
        assert_eq!(cfg.coordinator.trigger, TriggerConfig::default());
        assert_eq!(cfg.coordinator.retry_initial, DEFAULT_RETRY_INITIAL);
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = parse(&[
            "--client-id",
            "kitchen",
            "--server-url",
            "ws://127.0.0.1:7400/baton",
            "--objects",
            "hand-1, hand-2,",
            "--predicate",
            "top-of-hour",
            "--refractory-ms",
            "2000",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cfg.client_id.as_str(), "kitchen");
        let remote = cfg.remote.unwrap();
        assert_eq!(remote.url, "ws://127.0.0.1:7400/baton");
        assert_eq!(remote.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(
            cfg.objects,
            vec![ObjectId::from("hand-1"), ObjectId::from("hand-2")]
        );
        assert_eq!(cfg.coordinator.trigger.predicate, FirePredicate::TopOfHour);
        assert_eq!(cfg.coordinator.trigger.refractory, Duration::from_secs(2));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse(&["--tick-ms", "0"]),
            Err(ConfigError::ZeroDuration { .. })
        ));
        assert!(matches!(
            parse(&["--refractory-ms", "500"]),
            Err(ConfigError::Trigger(_))
        ));
        assert!(matches!(
            parse(&["--server-url", "http://example.com"]),
            Err(ConfigError::ServerUrl(_))
        ));
        assert!(matches!(
            parse(&["--client-id", " "]),
            Err(ConfigError::ClientId(_))
        ));
        assert!(NodeArgs::try_parse_from(["baton-node", "--directory", "x", "--predicate", "hourly"])
            .is_err());
    }
}
