//! Session lifecycle phases and the transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Nothing exchanged yet; only the handshake request is legal
    Uninitialized,
    /// Handshake under way; only `ping` besides the handshake itself
    Initializing,
    /// Handshake complete, capabilities fixed
    Operational,
    /// No new work accepted; outstanding calls are being failed
    ShuttingDown,
    /// Terminal
    Closed,
}

impl LifecyclePhase {
    /// Whether the phase is `ShuttingDown` or `Closed`
    pub const fn is_closing(self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Closed)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Operational => "operational",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Current phase plus a way to wait for changes.
///
/// Every transition is a compare-and-set so concurrent callers racing to the
/// same phase see exactly one winner.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    phase: watch::Sender<LifecyclePhase>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Uninitialized);
        Self { phase }
    }

    pub(crate) fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Move to `to` if the current phase is one of `from`
    pub(crate) fn advance(&self, from: &[LifecyclePhase], to: LifecyclePhase) -> bool {
        let mut previous = None;
        let moved = self.phase.send_if_modified(|current| {
            if from.contains(current) {
                previous = Some(*current);
                *current = to;
                true
            } else {
                false
            }
        });
        if let Some(previous) = previous {
            debug!("session phase: {} -> {}", previous, to);
        }
        moved
    }

    /// Enter `ShuttingDown` from any live phase
    pub(crate) fn begin_shutdown(&self) -> bool {
        self.advance(
            &[
                LifecyclePhase::Uninitialized,
                LifecyclePhase::Initializing,
                LifecyclePhase::Operational,
            ],
            LifecyclePhase::ShuttingDown,
        )
    }

    pub(crate) async fn wait_for(&self, target: LifecyclePhase) {
        let mut rx = self.phase.subscribe();
        // The sender lives as long as `self`, so this cannot fail while borrowed.
        let _ = rx.wait_for(|phase| *phase == target).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecyclePhase::*;

    #[test]
    fn test_happy_path() {
        let lc = Lifecycle::new();
        assert!(lc.advance(&[Uninitialized], Initializing));
        assert!(lc.advance(&[Initializing], Operational));
        assert!(lc.begin_shutdown());
        assert!(lc.advance(&[ShuttingDown], Closed));
        assert_eq!(lc.phase(), Closed);
    }

    #[test]
    fn test_illegal_transition_is_refused() {
        let lc = Lifecycle::new();
        assert!(!lc.advance(&[Initializing], Operational));
        assert_eq!(lc.phase(), Uninitialized);
    }

    #[test]
    fn test_shutdown_has_one_winner() {
        let lc = Lifecycle::new();
        assert!(lc.begin_shutdown());
        assert!(!lc.begin_shutdown());
        assert!(lc.phase().is_closing());
    }

    #[tokio::test]
    async fn test_wait_for_closed() {
        let lc = std::sync::Arc::new(Lifecycle::new());
        let waiter = {
            let lc = lc.clone();
            tokio::spawn(async move { lc.wait_for(Closed).await })
        };
        lc.begin_shutdown();
        lc.advance(&[ShuttingDown], Closed);
        waiter.await.unwrap();
    }
}
