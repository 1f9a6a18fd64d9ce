//! The transport seam consumed by sessions.

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::message::TransportMessage;
use crate::metrics::TransportMetrics;
use crate::types::{TransportCapabilities, TransportState, TransportType};

/// A duplex, frame-oriented channel to one peer.
///
/// Exactly one task should call [`Transport::receive`]; sends may come from
/// any number of tasks.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Kind of binding
    fn transport_type(&self) -> TransportType;

    /// What the binding can do
    fn capabilities(&self) -> &TransportCapabilities;

    /// Current connection state
    async fn state(&self) -> TransportState;

    /// Open the channel. Idempotent once connected.
    async fn connect(&self) -> TransportResult<()>;

    /// Close the channel and release its resources. Idempotent.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Write one frame
    async fn send(&self, message: TransportMessage) -> TransportResult<()>;

    /// Wait for the next inbound frame.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly.
    async fn receive(&self) -> TransportResult<Option<TransportMessage>>;

    /// Counter snapshot
    async fn metrics(&self) -> TransportMetrics;

    /// Whether the channel is open
    async fn is_connected(&self) -> bool {
        matches!(self.state().await, TransportState::Connected)
    }

    /// Human-readable endpoint, if any
    fn endpoint(&self) -> Option<String> {
        None
    }
}
