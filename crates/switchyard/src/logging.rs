//! Process-wide `tracing` setup.
//!
//! Logs go to stderr only. Stdout belongs to the protocol whenever a process
//! serves over stdio.

use std::io;

use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Where log records go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// Standard error
    #[default]
    Stderr,
    /// Nowhere
    None,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub structured: bool,
    /// Destination
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            output: LogOutput::Stderr,
        }
    }
}

impl LoggingConfig {
    /// Plain text at `level`
    pub fn stderr(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// JSON lines at `level`
    pub fn json(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            structured: true,
            ..Self::default()
        }
    }

    /// Filter honouring `RUST_LOG` first, then the configured level
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Install the global subscriber.
    ///
    /// # Errors
    ///
    /// Fails if a global subscriber is already installed.
    pub fn init(&self) -> io::Result<()> {
        if self.output == LogOutput::None {
            return Ok(());
        }
        let subscriber = tracing_subscriber::registry().with(self.filter());
        let result = if self.structured {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr))
                .try_init()
        } else {
            subscriber
                .with(fmt::layer().with_writer(io::stderr))
                .try_init()
        };
        result.map_err(|e| io::Error::other(e.to_string()))
    }
}
