//! Transport message types.

use bytes::Bytes;

/// Which logical channel a frame should travel on.
///
/// Only bindings with a separate push channel (TCP) act on this; the others
/// carry every frame on their single stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Response to a peer request
    #[default]
    Reply,
    /// Unsolicited traffic: requests and notifications originated locally
    Push,
}

/// Per-frame metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMessageMetadata {
    /// Target channel
    pub channel: Channel,
    /// MIME type of the payload
    pub content_type: Option<String>,
}

/// One frame of protocol bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Encoded message, without a frame delimiter
    pub payload: Bytes,
    /// Metadata
    pub metadata: TransportMessageMetadata,
}

impl TransportMessage {
    /// Frame on the reply channel
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: TransportMessageMetadata::default(),
        }
    }

    /// Frame on the given channel
    pub fn on_channel(payload: impl Into<Bytes>, channel: Channel) -> Self {
        Self {
            payload: payload.into(),
            metadata: TransportMessageMetadata {
                channel,
                content_type: Some("application/json".to_string()),
            },
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
