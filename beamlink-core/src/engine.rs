//! The engine: owns the pending-update slot, the buffer manager, and the
//! worker task's lifecycle.
//!
//! `start` spawns the frame worker; `stop` is two-phase — signal the
//! cancellation token, then await the worker's join handle. By the time
//! `stop` returns the worker has observably exited: no further transfer
//! touches a shared buffer or the transport, and teardown of either is
//! safe.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::buffer::{BufferManager, PixelBuffer};
use crate::dirty::{DirtyRect, UpdateSlot};
use crate::error::BeamError;
use crate::protocol::command::MiscCommand;
use crate::protocol::geometry;
use crate::transport::{BulkTransport, DeviceLink};
use crate::worker::{EngineConfig, FrameWorker};

// ── Engine ───────────────────────────────────────────────────────

struct WorkerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The frame-streaming engine for one device.
pub struct Engine {
    transport: Arc<dyn BulkTransport>,
    buffers: Arc<BufferManager>,
    slot: Arc<UpdateSlot>,
    config: EngineConfig,
    misc_gate: tokio::sync::Mutex<()>,
    worker: Option<WorkerHandle>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine over `transport` with a system-backed buffer manager.
    pub fn new(
        transport: Arc<dyn BulkTransport>,
        config: EngineConfig,
    ) -> Result<Self, BeamError> {
        Self::with_buffer_manager(transport, config, Arc::new(BufferManager::new()))
    }

    /// Engine with an explicit buffer manager (tests, custom page
    /// backends).
    pub fn with_buffer_manager(
        transport: Arc<dyn BulkTransport>,
        config: EngineConfig,
        buffers: Arc<BufferManager>,
    ) -> Result<Self, BeamError> {
        config.validate()?;
        Ok(Self {
            transport,
            buffers,
            slot: Arc::new(UpdateSlot::new()),
            config,
            misc_gate: tokio::sync::Mutex::new(()),
            worker: None,
        })
    }

    /// The buffer manager producers allocate from.
    pub fn buffers(&self) -> Arc<BufferManager> {
        Arc::clone(&self.buffers)
    }

    /// Whether the worker task is armed.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Arm the frame worker. Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<(), BeamError> {
        if self.worker.is_some() {
            return Err(BeamError::Configuration("engine already running"));
        }

        let cancel = CancellationToken::new();
        let worker = FrameWorker::new(
            DeviceLink::new(Arc::clone(&self.transport)),
            Arc::clone(&self.slot),
            Arc::clone(&self.buffers),
            self.config.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(worker.run());

        self.worker = Some(WorkerHandle { cancel, handle });
        Ok(())
    }

    /// Disarm the worker: signal it, then block until it has exited.
    ///
    /// Once this returns, no further transport traffic occurs until the
    /// next `start`, and every shared buffer is safe to tear down.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            self.slot.wake();
            if let Err(e) = worker.handle.await {
                warn!("frame worker join failed: {e}");
            }
        }
    }

    /// Record a changed region of `buffer` for the next frame.
    ///
    /// `x2`/`y2` are exclusive. The region is clamped to the panel;
    /// inverted edges and buffers that are not panel-sized are rejected.
    /// Marks merge per the tracker's lossy policy: same buffer grows the
    /// pending box, a different buffer replaces it.
    pub fn mark_dirty(
        &self,
        buffer: &Arc<PixelBuffer>,
        x1: u32,
        x2: u32,
        y1: u32,
        y2: u32,
    ) -> Result<(), BeamError> {
        if buffer.width() != geometry::WIDTH || buffer.height() != geometry::HEIGHT {
            return Err(BeamError::PanelMismatch {
                width: buffer.width(),
                height: buffer.height(),
                panel_width: geometry::WIDTH,
                panel_height: geometry::HEIGHT,
            });
        }

        let rect = DirtyRect::new(x1, x2, y1, y2)?.clamp(buffer.width(), buffer.height());
        if rect.is_empty() {
            return Ok(());
        }

        self.slot.mark(buffer, rect);
        Ok(())
    }

    /// Issue a vendor control request on the misc endpoint pair and
    /// return the device's value byte. Independent of the frame path;
    /// concurrent calls are serialized.
    pub async fn misc_request(
        &self,
        request: (u8, u8),
        args: [u8; 4],
    ) -> Result<u8, BeamError> {
        let _gate = self.misc_gate.lock().await;
        DeviceLink::new(Arc::clone(&self.transport))
            .misc_request(
                MiscCommand::new(request, args),
                self.config.command_timeout,
                self.config.data_timeout,
            )
            .await
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Dropping without `stop` cannot be awaited; at least tell the
        // worker to wind down. It owns `Arc`s to everything it touches.
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
            self.slot.wake();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::EmulatedProjector;
    use crate::format::PixelFormat;
    use std::time::Duration;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            command_timeout: Duration::from_millis(50),
            data_timeout: Duration::from_millis(100),
            idle_timeout: Duration::from_millis(60),
            first_draw_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn zero_timeout_is_a_configuration_error() {
        let config = EngineConfig {
            idle_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        let err = Engine::new(Arc::new(EmulatedProjector::new()), config).unwrap_err();
        assert!(matches!(err, BeamError::Configuration(_)));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut engine =
            Engine::new(Arc::new(EmulatedProjector::new()), quick_config()).unwrap();
        engine.start().unwrap();
        assert!(engine.start().is_err());
        engine.stop().await;
        assert!(!engine.is_running());
        // A stopped engine can be re-armed.
        engine.start().unwrap();
        engine.stop().await;
    }

    #[tokio::test]
    async fn mark_dirty_rejects_non_panel_buffers() {
        let engine = Engine::new(Arc::new(EmulatedProjector::new()), quick_config()).unwrap();
        let small = engine
            .buffers()
            .allocate(64, 64, PixelFormat::Xrgb8888)
            .unwrap();
        let err = engine.mark_dirty(&small, 0, 64, 0, 64).unwrap_err();
        assert!(matches!(err, BeamError::PanelMismatch { .. }));
    }

    #[tokio::test]
    async fn mark_dirty_rejects_inverted_regions() {
        let engine = Engine::new(Arc::new(EmulatedProjector::new()), quick_config()).unwrap();
        let buffer = engine
            .buffers()
            .allocate(geometry::WIDTH, geometry::HEIGHT, PixelFormat::Xrgb8888)
            .unwrap();
        let err = engine.mark_dirty(&buffer, 10, 5, 0, 10).unwrap_err();
        assert!(matches!(err, BeamError::InvalidRegion { .. }));
    }

    #[tokio::test]
    async fn misc_request_goes_over_the_misc_endpoints() {
        let emu = Arc::new(EmulatedProjector::new());
        emu.set_misc_value(0x01);
        let engine = Engine::new(Arc::clone(&emu) as Arc<dyn crate::BulkTransport>, quick_config())
            .unwrap();

        let value = engine
            .misc_request((0xff, 0x35), [0x01, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        assert_eq!(value, 0x01);
        assert_eq!(emu.misc_requests().len(), 1);
    }
}
