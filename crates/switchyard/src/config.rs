//! Host configuration: which servers to launch and how to route them.
//!
//! Loaded from TOML, YAML or JSON (picked by file extension) and then
//! overridden by `SWITCHYARD__`-prefixed environment variables, with `__`
//! separating nested keys (`SWITCHYARD__ROUTER__SEPARATOR=/`).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchyard_client::RouterConfig;
use switchyard_session::SessionConfig;
use switchyard_transport::ChildProcessConfig;
use thiserror::Error;

use crate::logging::LoggingConfig;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Configuration loading errors
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Config file not found
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Extension is not one of toml, yaml, yml, json
    #[error("unsupported configuration format; use .toml, .yaml, .yml or .json")]
    UnsupportedFormat,

    /// The file or an override did not parse
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] config::ConfigError),

    /// Parsed but inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One child-process server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Session id; prefixes namespaced names
    pub id: String,
    /// Program to run
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Grace period before the process is killed on shutdown
    #[serde(default = "default_shutdown_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_shutdown_ms() -> u64 {
    5_000
}

impl ServerSpec {
    /// Server launched as `command` with no arguments
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            shutdown_timeout_ms: default_shutdown_ms(),
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Child-process transport settings for this server
    pub fn process_config(&self) -> ChildProcessConfig {
        ChildProcessConfig {
            command: self.command.clone(),
            args: self.args.clone(),
            working_directory: self.cwd.clone(),
            environment: self.env.clone(),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            ..ChildProcessConfig::default()
        }
    }
}

/// Everything a [`Host`](crate::Host) needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Servers, in priority order
    pub servers: Vec<ServerSpec>,
    /// Collision policy and namespace separator
    pub router: RouterConfig,
    /// Timeouts applied to every session
    pub session: SessionConfig,
    /// Logging
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load from `path`, then apply `SWITCHYARD__…` overrides.
    ///
    /// # Errors
    ///
    /// Missing file, unknown extension, parse failure, or a configuration
    /// that fails [`HostConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// [`HostConfig::from_file`] with a custom environment prefix
    pub fn from_file_with_prefix(path: impl AsRef<Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };
        let file = path.to_str().ok_or(ConfigError::UnsupportedFormat)?;

        let config: Self = Config::builder()
            .add_source(File::new(file, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check ids and commands
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.separator.is_empty() {
            return Err(ConfigError::Invalid("router separator cannot be empty".to_string()));
        }
        let mut ids = HashSet::new();
        for server in &self.servers {
            if server.id.is_empty() {
                return Err(ConfigError::Invalid("server id cannot be empty".to_string()));
            }
            if server.id.contains(&self.router.separator) {
                return Err(ConfigError::Invalid(format!(
                    "server id '{}' contains the separator '{}'",
                    server.id, self.router.separator
                )));
            }
            if server.command.is_empty() {
                return Err(ConfigError::Invalid(format!("server '{}' has no command", server.id)));
            }
            if !ids.insert(server.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate server id '{}'", server.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use switchyard_client::CollisionPolicy;

    fn write(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_loads_toml() {
        let file = write(
            ".toml",
            r#"
            [router]
            collision_policy = "priority"

            [session]
            request_timeout = 1500

            [[servers]]
            id = "files"
            command = "files-server"
            args = ["--root", "/tmp"]

            [servers.env]
            log_level = "debug"
            "#,
        );
        let config = HostConfig::from_file(file.path()).unwrap();
        assert_eq!(config.router.collision_policy, CollisionPolicy::Priority);
        assert_eq!(config.router.separator, ".");
        assert_eq!(config.session.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.servers[0].args, vec!["--root", "/tmp"]);
        let process = config.servers[0].process_config();
        assert_eq!(process.environment["log_level"], "debug");
        assert_eq!(process.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_loads_json() {
        let file = write(
            ".json",
            r#"{"servers": [{"id": "a", "command": "a-server"}], "logging": {"structured": true}}"#,
        );
        let config = HostConfig::from_file(file.path()).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert!(config.logging.structured);
    }

    #[test]
    fn test_rejects_unknown_extension_and_missing_file() {
        let file = write(".ini", "servers = []");
        assert!(matches!(
            HostConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat)
        ));
        assert!(matches!(
            HostConfig::from_file("/nonexistent/switchyard.toml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = HostConfig {
            servers: vec![ServerSpec::new("a", "x"), ServerSpec::new("a", "y")],
            ..HostConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("duplicate")));

        config.servers = vec![ServerSpec::new("a.b", "x")];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("separator")));

        config.servers = vec![ServerSpec::new("a", "")];
        assert!(config.validate().is_err());

        config.servers = vec![ServerSpec::new("a", "x").args(["--stdio"])];
        assert!(config.validate().is_ok());
    }
}
