//! Domain-specific error types for the beamlink engine.
//!
//! All fallible operations return `Result<T, BeamError>`.
//! No panics on invalid input — every error is typed, and every per-frame
//! error is local to a single update cycle.

use std::time::Duration;
use thiserror::Error;

use crate::transport::Endpoint;

// ── TransportError ───────────────────────────────────────────────

/// Error reported by a [`BulkTransport`](crate::transport::BulkTransport)
/// implementation for a single `send`/`receive` call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transfer did not complete within its deadline.
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),

    /// The device was unplugged or the host controller dropped it.
    #[error("device disconnected")]
    Disconnected,

    /// The endpoint is shutting down (engine or host teardown in progress).
    #[error("endpoint shutting down")]
    Shutdown,

    /// The endpoint refused the transfer (protocol violation on the wire).
    #[error("endpoint stalled")]
    Stall,

    /// The underlying I/O layer reported an error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error is an expected consequence of unplug or
    /// teardown rather than a fault worth logging.
    pub fn is_benign(&self) -> bool {
        matches!(self, TransportError::Disconnected | TransportError::Shutdown)
    }
}

// ── BeamError ────────────────────────────────────────────────────

/// The canonical error type for the beamlink engine.
#[derive(Debug, Error)]
pub enum BeamError {
    // ── Transport Errors ─────────────────────────────────────────
    /// A bulk transfer failed. Aborts the current frame cycle.
    #[error("bulk transfer failed on {endpoint}: {source}")]
    Transport {
        endpoint: Endpoint,
        #[source]
        source: TransportError,
    },

    /// A transfer moved a different number of bytes than the protocol
    /// requires. Treated exactly like a transport failure.
    #[error("short transfer on {endpoint}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        endpoint: Endpoint,
        expected: usize,
        actual: usize,
    },

    // ── Buffer Errors ────────────────────────────────────────────
    /// A backing page or the mapping over the pages could not be
    /// obtained. The requesting cycle is skipped and retried later.
    #[error("page allocation failed: {0}")]
    Allocation(&'static str),

    /// An imported mapping is too small for the described pixel layout.
    #[error("buffer too small: layout needs {needed} bytes, mapping has {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// The buffer handed to the engine does not match the panel size the
    /// wire protocol transmits.
    #[error("buffer is {width}x{height}, panel wants {panel_width}x{panel_height}")]
    PanelMismatch {
        width: u32,
        height: u32,
        panel_width: u32,
        panel_height: u32,
    },

    // ── Region Errors ────────────────────────────────────────────
    /// A dirty rectangle with inverted or out-of-range edges.
    #[error("invalid region: ({x1},{y1})..({x2},{y2})")]
    InvalidRegion { x1: u32, x2: u32, y1: u32, y2: u32 },

    // ── Lifecycle Errors ─────────────────────────────────────────
    /// The engine cannot start with its current configuration.
    #[error("configuration error: {0}")]
    Configuration(&'static str),
}

impl BeamError {
    /// Whether this error stems from unplug/teardown and should be
    /// suppressed instead of logged.
    pub fn is_benign(&self) -> bool {
        matches!(self, BeamError::Transport { source, .. } if source.is_benign())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_classification() {
        let gone = BeamError::Transport {
            endpoint: Endpoint::DataOut,
            source: TransportError::Disconnected,
        };
        assert!(gone.is_benign());

        let timeout = BeamError::Transport {
            endpoint: Endpoint::DataIn,
            source: TransportError::Timeout(Duration::from_millis(200)),
        };
        assert!(!timeout.is_benign());

        assert!(!BeamError::Allocation("page").is_benign());
    }

    #[test]
    fn error_display_messages() {
        let e = BeamError::ShortTransfer {
            endpoint: Endpoint::DataIn,
            expected: 13,
            actual: 7,
        };
        assert!(e.to_string().contains("13"));
        assert!(e.to_string().contains("7"));

        let e = BeamError::BufferTooSmall {
            needed: 4096,
            actual: 1024,
        };
        assert!(e.to_string().contains("4096"));
    }
}
