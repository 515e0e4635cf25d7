//! Bulk-transport abstraction and the per-exchange device link.
//!
//! The engine never talks to USB directly; it drives a [`BulkTransport`],
//! which models bulk pipes on four logical endpoints with bounded
//! per-transfer timeouts. Implementations are provided by the embedding
//! layer (libusb, a kernel character device, or the in-process
//! [`EmulatedProjector`](crate::emulated::EmulatedProjector)).
//!
//! [`DeviceLink`] layers the fixed-size exchange rules on top: commands
//! and status replies have exact lengths, and any short transfer is an
//! error equivalent to a transport failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BeamError, TransportError};
use crate::protocol::command::MiscCommand;
use crate::protocol::{MISC_VALUE_SIZE, READ_STATUS_SIZE};

// ── Endpoint ─────────────────────────────────────────────────────

/// The four logical bulk endpoints the device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Data commands and payload blocks, host → device.
    DataOut,
    /// Status replies for the data path, device → host.
    DataIn,
    /// Misc (vendor control) commands, host → device.
    MiscOut,
    /// Misc value and status replies, device → host.
    MiscIn,
}

impl Endpoint {
    /// The device's endpoint number.
    pub const fn number(self) -> u8 {
        match self {
            Endpoint::MiscIn => 1,
            Endpoint::DataIn => 2,
            Endpoint::DataOut => 3,
            Endpoint::MiscOut => 4,
        }
    }

    /// Whether this endpoint carries device → host traffic.
    pub const fn is_input(self) -> bool {
        matches!(self, Endpoint::DataIn | Endpoint::MiscIn)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::DataOut => write!(f, "data-out"),
            Endpoint::DataIn => write!(f, "data-in"),
            Endpoint::MiscOut => write!(f, "misc-out"),
            Endpoint::MiscIn => write!(f, "misc-in"),
        }
    }
}

// ── BulkTransport ────────────────────────────────────────────────

/// A best-effort, ordered bulk pipe per endpoint.
///
/// Both calls must respect `timeout` and return
/// [`TransportError::Timeout`] when it elapses. Implementations do not
/// retry; recovery is the caller's concern.
#[async_trait]
pub trait BulkTransport: Send + Sync {
    /// Transfer `bytes` to an output endpoint. Returns the number of
    /// bytes the device accepted.
    async fn send(
        &self,
        endpoint: Endpoint,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes from an input endpoint.
    async fn receive(
        &self,
        endpoint: Endpoint,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;
}

// ── DeviceLink ───────────────────────────────────────────────────

/// Exact-length exchange helpers over a shared transport.
#[derive(Clone)]
pub struct DeviceLink {
    transport: Arc<dyn BulkTransport>,
}

impl DeviceLink {
    pub fn new(transport: Arc<dyn BulkTransport>) -> Self {
        Self { transport }
    }

    /// Send `bytes` and require that all of them were accepted.
    pub async fn send_exact(
        &self,
        endpoint: Endpoint,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(), BeamError> {
        let sent = self
            .transport
            .send(endpoint, bytes, timeout)
            .await
            .map_err(|source| BeamError::Transport { endpoint, source })?;
        if sent != bytes.len() {
            return Err(BeamError::ShortTransfer {
                endpoint,
                expected: bytes.len(),
                actual: sent,
            });
        }
        Ok(())
    }

    /// Receive exactly `len` bytes.
    pub async fn receive_exact(
        &self,
        endpoint: Endpoint,
        len: usize,
        timeout: Duration,
    ) -> Result<Bytes, BeamError> {
        let bytes = self
            .transport
            .receive(endpoint, len, timeout)
            .await
            .map_err(|source| BeamError::Transport { endpoint, source })?;
        if bytes.len() != len {
            return Err(BeamError::ShortTransfer {
                endpoint,
                expected: len,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Read and discard one fixed-size status reply.
    pub async fn read_status(
        &self,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Result<(), BeamError> {
        self.receive_exact(endpoint, READ_STATUS_SIZE, timeout)
            .await?;
        Ok(())
    }

    /// Issue one misc (vendor control) request and return the device's
    /// value byte.
    ///
    /// The exchange is: command on misc-out, 4-byte value on misc-in,
    /// then a status reply on misc-in.
    pub async fn misc_request(
        &self,
        command: MiscCommand,
        command_timeout: Duration,
        value_timeout: Duration,
    ) -> Result<u8, BeamError> {
        self.send_exact(Endpoint::MiscOut, &command.encode(), command_timeout)
            .await?;

        let value = self
            .receive_exact(Endpoint::MiscIn, MISC_VALUE_SIZE, value_timeout)
            .await?;

        self.read_status(Endpoint::MiscIn, command_timeout).await?;
        Ok(value[0])
    }
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink").finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport that accepts a scripted number of bytes per send and
    /// returns scripted receive payloads.
    struct ScriptedTransport {
        send_results: Mutex<Vec<Result<usize, TransportError>>>,
        receive_results: Mutex<Vec<Result<Bytes, TransportError>>>,
    }

    #[async_trait]
    impl BulkTransport for ScriptedTransport {
        async fn send(
            &self,
            _endpoint: Endpoint,
            bytes: &[u8],
            _timeout: Duration,
        ) -> Result<usize, TransportError> {
            self.send_results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(bytes.len()))
        }

        async fn receive(
            &self,
            _endpoint: Endpoint,
            max_len: usize,
            _timeout: Duration,
        ) -> Result<Bytes, TransportError> {
            self.receive_results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(Bytes::from(vec![0u8; max_len])))
        }
    }

    fn link(
        send_results: Vec<Result<usize, TransportError>>,
        receive_results: Vec<Result<Bytes, TransportError>>,
    ) -> DeviceLink {
        DeviceLink::new(Arc::new(ScriptedTransport {
            send_results: Mutex::new(send_results),
            receive_results: Mutex::new(receive_results),
        }))
    }

    #[tokio::test]
    async fn short_send_is_an_error() {
        let link = link(vec![Ok(10)], vec![]);
        let err = link
            .send_exact(Endpoint::DataOut, &[0u8; 31], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BeamError::ShortTransfer {
                expected: 31,
                actual: 10,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn short_status_reply_is_an_error() {
        let link = link(vec![], vec![Ok(Bytes::from_static(&[0u8; 5]))]);
        let err = link
            .read_status(Endpoint::DataIn, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BeamError::ShortTransfer { expected, .. } if expected == READ_STATUS_SIZE));
    }

    #[tokio::test]
    async fn misc_request_returns_value_byte() {
        // Replies pop from the back: value first, then status.
        let link = link(
            vec![],
            vec![
                Ok(Bytes::from(vec![0u8; READ_STATUS_SIZE])),
                Ok(Bytes::from_static(&[0x2a, 0, 0, 0])),
            ],
        );
        let value = link
            .misc_request(
                MiscCommand::new((0xa5, 0x00), [0, 0, 0xa0, 4]),
                Duration::from_millis(200),
                Duration::from_millis(1000),
            )
            .await
            .unwrap();
        assert_eq!(value, 0x2a);
    }

    #[test]
    fn endpoint_numbers_are_stable() {
        assert_eq!(Endpoint::MiscIn.number(), 1);
        assert_eq!(Endpoint::DataIn.number(), 2);
        assert_eq!(Endpoint::DataOut.number(), 3);
        assert_eq!(Endpoint::MiscOut.number(), 4);
        assert!(Endpoint::DataIn.is_input());
        assert!(!Endpoint::DataOut.is_input());
    }
}
