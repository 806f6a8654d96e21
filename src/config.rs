//! Gateway configuration: command line and environment over an optional
//! YAML file over built-in defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::schema_registry::RetryPolicy;

pub const DEFAULT_REGISTRY_URL: &str = "http://registry:81";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8011";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
const DEFAULT_MAX_STARTUP_FAILURES: u32 = 30;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "relayql", version, about = "Registry-driven GraphQL gateway")]
pub struct Cli {
    /// Schema registry endpoint.
    #[arg(long, env = "REGISTRY_URL")]
    pub registry_url: Option<String>,
    /// Address the HTTP server binds to.
    #[arg(long, env = "LISTEN_ADDR")]
    pub listen_addr: Option<String>,
    /// YAML configuration file.
    #[arg(long, env = "RELAYQL_CONFIG")]
    pub config: Option<PathBuf>,
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
    /// `tracing_subscriber::EnvFilter` directives, e.g. `info,relayql=debug`.
    #[arg(long, env = "LOG_FILTER")]
    pub log_filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub registry_url: Option<String>,
    pub listen_addr: Option<String>,
    pub log_format: Option<LogFormat>,
    pub log_filter: Option<String>,
    pub registry: RegistryFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryFileConfig {
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    /// Wait before subscribing again after a subscription ended.
    pub reconnect_delay_ms: Option<u64>,
    /// Registry errors tolerated before the first schema goes live.
    pub max_startup_failures: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub registry_url: String,
    pub listen_addr: SocketAddr,
    pub log_format: LogFormat,
    pub log_filter: String,
    pub retry: RetryPolicy,
    pub reconnect_delay: Duration,
    pub max_startup_failures: u32,
}

impl GatewayConfig {
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_file(path)?,
            None => FileConfig::default(),
        };
        Self::from_sources(cli, file)
    }

    pub fn from_sources(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = RetryPolicy::default();

        let listen_addr = cli
            .listen_addr
            .or(file.listen_addr)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_addr
            .parse()
            .map_err(|_| ConfigError::ListenAddr(listen_addr.clone()))?;

        let registry_url = cli
            .registry_url
            .or(file.registry_url)
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());

        Ok(GatewayConfig {
            registry_url: with_scheme(registry_url),
            listen_addr,
            log_format: cli.log_format.or(file.log_format).unwrap_or_default(),
            log_filter: cli
                .log_filter
                .or(file.log_filter)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            retry: RetryPolicy {
                attempts: file.registry.retry_attempts.unwrap_or(defaults.attempts).max(1),
                delay: file
                    .registry
                    .retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.delay),
            },
            reconnect_delay: Duration::from_millis(
                file.registry
                    .reconnect_delay_ms
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
            max_startup_failures: file
                .registry
                .max_startup_failures
                .unwrap_or(DEFAULT_MAX_STARTUP_FAILURES),
        })
    }
}

pub fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Registry addresses are often given as bare `host:port`.
fn with_scheme(url: String) -> String {
    if url.contains("://") {
        url
    } else {
        format!("http://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["relayql"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let config = GatewayConfig::from_sources(Cli::default(), FileConfig::default()).unwrap();

        assert_eq!(
            config,
            GatewayConfig {
                registry_url: "http://registry:81".to_string(),
                listen_addr: "0.0.0.0:8011".parse().unwrap(),
                log_format: LogFormat::Compact,
                log_filter: "info".to_string(),
                retry: RetryPolicy {
                    attempts: 3,
                    delay: Duration::from_secs(3),
                },
                reconnect_delay: Duration::from_secs(3),
                max_startup_failures: 30,
            }
        );
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let file: FileConfig = serde_yaml::from_str(
            r#"
registry_url: agogos.registry:81
listen_addr: 127.0.0.1:9000
log_format: json
registry:
  retry_attempts: 5
  retry_delay_ms: 250
  max_startup_failures: 2
"#,
        )
        .unwrap();

        let config = GatewayConfig::from_sources(cli(&["--listen-addr", "127.0.0.1:9100"]), file).unwrap();

        assert_eq!(config.registry_url, "http://agogos.registry:81");
        assert_eq!(config.listen_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.retry,
            RetryPolicy {
                attempts: 5,
                delay: Duration::from_millis(250),
            }
        );
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.max_startup_failures, 2);
    }

    #[test]
    fn parses_command_line() {
        let cli = cli(&["--registry-url", "http://localhost:81", "--log-format", "pretty"]);

        assert_eq!(cli.registry_url.as_deref(), Some("http://localhost:81"));
        assert_eq!(cli.log_format, Some(LogFormat::Pretty));
    }

    #[test]
    fn rejects_bad_listen_address() {
        let cli = Cli {
            listen_addr: Some("not an address".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            GatewayConfig::from_sources(cli, FileConfig::default()),
            Err(ConfigError::ListenAddr(addr)) if addr == "not an address"
        ));
    }

    #[test]
    fn unknown_file_keys_are_errors() {
        assert!(serde_yaml::from_str::<FileConfig>("registry:\n  retries: 3\n").is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = read_file(Path::new("/nonexistent/relayql.yaml")).unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
