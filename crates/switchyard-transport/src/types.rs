//! Transport descriptors, state and configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default frame size limit
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Kind of binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// Newline-delimited frames over a read/write pair
    Stdio,
    /// Spawned child process speaking stdio
    ChildProcess,
    /// TCP request/response channel plus a push channel
    Tcp,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::ChildProcess => write!(f, "child_process"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// Not connected
    Disconnected,
    /// Connecting
    Connecting,
    /// Ready for traffic
    Connected,
    /// Tearing down
    Disconnecting,
    /// Broke with an unrecoverable error
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// What a binding can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Largest frame accepted in either direction
    pub max_message_size: usize,
    /// Whether server-originated traffic has its own channel
    pub supports_push_channel: bool,
}

/// Tunables shared by every binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest frame accepted in either direction
    pub max_message_size: usize,
    /// Inbound queue depth between the reader task and `receive`
    pub channel_capacity: usize,
    /// Deadline for establishing the connection
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            channel_capacity: 1000,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
