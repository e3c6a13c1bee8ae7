//! Configuration handling for the realtime client node.
//!
//! Settings come from the shared YAML config file first, then from
//! `REALTIME_*` environment variables, then from the command line.

use anyhow::{Context, Result};
use realtime_connection::ConnectionOptions;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Realtime client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    /// Primary broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Fallback hosts
    pub fallback_hosts: Vec<String>,
    /// Access token presented on connect
    pub token: Option<String>,
    /// Client id to request
    pub client_id: Option<String>,
    /// Recovery key of a previous run
    pub recover: Option<String>,
    /// Open, close and ping timeout
    pub request_timeout: Duration,
    /// Retry delay while disconnected
    pub disconnected_retry_timeout: Duration,
    /// Retry delay while suspended
    pub suspended_retry_timeout: Duration,
    /// Queue messages while not connected
    pub queue_messages: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        let options = ConnectionOptions::default();
        Self {
            host: options.host,
            port: options.port,
            fallback_hosts: options.fallback_hosts,
            token: None,
            client_id: None,
            recover: None,
            request_timeout: options.realtime_request_timeout,
            disconnected_retry_timeout: options.disconnected_retry_timeout,
            suspended_retry_timeout: options.suspended_retry_timeout,
            queue_messages: options.queue_messages,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    realtime: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl RealtimeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();
        let path = config_path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(content) => {
                let root: RootConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file {:?}", path))?;
                if let Some(service) = root.services.and_then(|s| s.realtime) {
                    config.apply_service_config(service);
                }
                info!("Loaded configuration from {:?}", path);
            }
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        config.apply_overrides(|name| std::env::var(name).ok());

        info!(
            "Final realtime configuration: host={}:{}, fallbacks={}, token={}",
            config.host,
            config.port,
            config.fallback_hosts.len(),
            if config.token.is_some() { "set" } else { "unset" }
        );
        Ok(config)
    }

    fn apply_service_config(&mut self, service: ServiceConfig) {
        for arg in service.args.unwrap_or_default() {
            if let Some(host) = arg.strip_prefix("--host=") {
                self.host = host.to_string();
            } else if let Some(port) = arg.strip_prefix("--port=") {
                match port.parse() {
                    Ok(port) => self.port = port,
                    Err(_) => warn!("Ignoring invalid port argument '{}'", arg),
                }
            }
        }

        for (key, value) in service.config.unwrap_or_default() {
            if let Some(name) = key.strip_prefix("services.realtime.") {
                self.set(name, value);
            }
        }
    }

    /// Apply `REALTIME_*` overrides from `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        const NAMES: [&str; 10] = [
            "host",
            "port",
            "fallback_hosts",
            "token",
            "client_id",
            "recover",
            "request_timeout",
            "disconnected_retry_timeout",
            "suspended_retry_timeout",
            "queue_messages",
        ];

        for name in NAMES {
            let variable = format!("REALTIME_{}", name.to_uppercase());
            if let Some(value) = lookup(&variable) {
                info!("{} overridden by environment", variable);
                self.set(name, value);
            }
        }
    }

    fn set(&mut self, name: &str, value: String) {
        match name {
            "host" => self.host = value,
            "port" => match value.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid port '{}'", value),
            },
            "fallback_hosts" => {
                self.fallback_hosts = value
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "token" => self.token = Some(value),
            "client_id" => self.client_id = Some(value),
            "recover" => self.recover = Some(value),
            "request_timeout" => set_duration(&mut self.request_timeout, name, &value),
            "disconnected_retry_timeout" => {
                set_duration(&mut self.disconnected_retry_timeout, name, &value)
            }
            "suspended_retry_timeout" => {
                set_duration(&mut self.suspended_retry_timeout, name, &value)
            }
            "queue_messages" => self.queue_messages = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    /// Connection options for this configuration
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            host: self.host.clone(),
            port: self.port,
            fallback_hosts: self.fallback_hosts.clone(),
            realtime_request_timeout: self.request_timeout,
            disconnected_retry_timeout: self.disconnected_retry_timeout,
            suspended_retry_timeout: self.suspended_retry_timeout,
            queue_messages: self.queue_messages,
            recover: self.recover.clone(),
            client_id: self.client_id.clone(),
            ..ConnectionOptions::default()
        }
    }
}

fn set_duration(target: &mut Duration, name: &str, value: &str) {
    match humantime::parse_duration(value) {
        Ok(duration) => *target = duration,
        Err(e) => warn!("Ignoring invalid {} '{}': {}", name, value, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 7700);
        assert!(config.fallback_hosts.is_empty());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  realtime:
    enabled: true
    args:
      - --host=broker.internal
      - --port=7800
    config:
      services.realtime.fallback_hosts: "a.internal, b.internal"
      services.realtime.client_id: "node-7"
      services.realtime.request_timeout: "3s"
      services.realtime.queue_messages: "false"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut config = RealtimeConfig::default();
        let root: RootConfig =
            serde_yaml::from_str(&std::fs::read_to_string(temp_file.path()).unwrap()).unwrap();
        config.apply_service_config(root.services.unwrap().realtime.unwrap());

        assert_eq!(config.host, "broker.internal");
        assert_eq!(config.port, 7800);
        assert_eq!(config.fallback_hosts, vec!["a.internal", "b.internal"]);
        assert_eq!(config.client_id.as_deref(), Some("node-7"));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert!(!config.queue_messages);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RealtimeConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.port, 7700);
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = RealtimeConfig::default();
        config.apply_overrides(|name| match name {
            "REALTIME_HOST" => Some("env.internal".to_string()),
            "REALTIME_PORT" => Some("not-a-port".to_string()),
            "REALTIME_TOKEN" => Some("secret".to_string()),
            "REALTIME_SUSPENDED_RETRY_TIMEOUT" => Some("1m".to_string()),
            _ => None,
        });

        assert_eq!(config.host, "env.internal");
        assert_eq!(config.port, 7700);
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.suspended_retry_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_connection_options() {
        let config = RealtimeConfig {
            host: "broker".to_string(),
            recover: Some("key:1:2".to_string()),
            ..RealtimeConfig::default()
        };
        let options = config.connection_options();
        assert_eq!(options.host, "broker");
        assert_eq!(options.recover.as_deref(), Some("key:1:2"));
        assert!(options.auto_connect);
    }
}
