//! The frame worker: one serialized loop that turns pending updates into
//! protocol traffic and keeps the device alive.
//!
//! Exactly one worker task runs per engine, and it is the only code path
//! issuing transfers on the data endpoints, so the endpoint needs no
//! locking of its own. Per cycle the worker drains the pending update,
//! packs the dirty rows into the block payload, uploads every block with
//! its data command, reads the per-block status, and finishes with the
//! draw command. On full success the frame parity flips; any transport
//! error aborts the cycle with the parity (and the device's displayed
//! frame) unchanged.
//!
//! The idle wait between cycles is bounded: if no producer marks a
//! region dirty in time, the last payload is resent as a keep-alive so
//! the device never reverts to its built-in image.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferManager, PixelBuffer};
use crate::dirty::{DirtyRect, UpdateSlot};
use crate::error::BeamError;
use crate::format::{pack_pixels, PixelFormat};
use crate::protocol::block::FramePayload;
use crate::protocol::command::{DataCommand, DrawCommand, FrameParity};
use crate::protocol::geometry;
use crate::transport::{DeviceLink, Endpoint};

// ── EngineConfig ─────────────────────────────────────────────────

/// Timeout configuration for the engine.
///
/// The defaults are the values the device wants; deviate only for
/// testing. `idle_timeout` must stay below the device's own fallback
/// deadline or the panel reverts to its internal image between frames.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for command and status exchanges.
    pub command_timeout: Duration,
    /// Deadline for one payload block transfer.
    pub data_timeout: Duration,
    /// Bounded wait between cycles; also the keep-alive period.
    pub idle_timeout: Duration,
    /// Deadline for the first draw status after (re)start — the device
    /// answers the first draw noticeably slower.
    pub first_draw_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(200),
            data_timeout: Duration::from_millis(1000),
            idle_timeout: Duration::from_millis(2000),
            first_draw_timeout: Duration::from_millis(2000),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> Result<(), BeamError> {
        if self.command_timeout.is_zero()
            || self.data_timeout.is_zero()
            || self.idle_timeout.is_zero()
            || self.first_draw_timeout.is_zero()
        {
            return Err(BeamError::Configuration("timeouts must be non-zero"));
        }
        Ok(())
    }
}

// ── FrameWorker ──────────────────────────────────────────────────

pub(crate) struct FrameWorker {
    link: DeviceLink,
    slot: Arc<UpdateSlot>,
    buffers: Arc<BufferManager>,
    config: EngineConfig,
    cancel: CancellationToken,
    payload: FramePayload,
    parity: FrameParity,
    /// The last buffer packed into the payload; resent as keep-alive.
    current: Option<Arc<PixelBuffer>>,
    src_row: Vec<u8>,
    wire_row: Vec<u8>,
}

impl FrameWorker {
    pub(crate) fn new(
        link: DeviceLink,
        slot: Arc<UpdateSlot>,
        buffers: Arc<BufferManager>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            link,
            slot,
            buffers,
            config,
            cancel,
            payload: FramePayload::new(),
            parity: FrameParity::default(),
            current: None,
            src_row: Vec::new(),
            wire_row: Vec::new(),
        }
    }

    /// Run until cancelled. Per-cycle errors never end the loop; they
    /// abort the cycle, get logged (unless benign), and the worker moves
    /// on to the next cycle.
    pub(crate) async fn run(mut self) {
        info!("frame worker started");
        let cancel = self.cancel.clone();
        let mut draw_timeout = self.config.first_draw_timeout;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.cycle(draw_timeout) => match result {
                    Ok(()) => {
                        draw_timeout = self.config.command_timeout;
                    }
                    Err(e) if e.is_benign() => {
                        debug!("frame cycle ended by teardown: {e}");
                    }
                    Err(e @ BeamError::Allocation(_)) => {
                        warn!("skipping cycle: {e}");
                    }
                    Err(e) => {
                        error!("frame update error: {e}");
                    }
                },
            }

            // Bounded idle wait; a new mark wakes us early, the timeout
            // turns the next cycle into a keep-alive.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.slot.notified() => {}
                _ = tokio::time::sleep(self.config.idle_timeout) => {}
            }
        }
        info!("frame worker stopped");
    }

    /// One full update cycle: drain, pack, upload, draw, flip parity.
    async fn cycle(&mut self, draw_timeout: Duration) -> Result<(), BeamError> {
        match self.slot.take() {
            Some(update) => {
                self.pack(&update.buffer, update.rect);
                self.current = Some(update.buffer);
            }
            None => {
                if self.current.is_none() {
                    // Nothing has ever been packed: put a test pattern on
                    // the panel instead of leaving it to fall back.
                    let pattern = self.render_test_pattern()?;
                    self.pack(&pattern, DirtyRect::full(pattern.width(), pattern.height()));
                    self.current = Some(pattern);
                }
                // Otherwise resend the packed payload as-is (keep-alive).
            }
        }

        self.send_frame(draw_timeout).await?;
        self.parity = self.parity.flip();
        Ok(())
    }

    /// Pack the dirty rows of `buffer` into the wire payload.
    fn pack(&mut self, buffer: &PixelBuffer, rect: DirtyRect) {
        let rect = rect.clamp(
            buffer.width().min(geometry::WIDTH),
            buffer.height().min(geometry::HEIGHT),
        );
        if rect.is_empty() {
            return;
        }

        let bpp = buffer.format().bytes_per_pixel();
        let pixels = rect.width() as usize;
        self.src_row.resize(pixels * bpp, 0);
        self.wire_row.resize(pixels * geometry::WIRE_BPP, 0);

        for y in rect.y1..rect.y2 {
            let src_offset = y as usize * buffer.stride() as usize + rect.x1 as usize * bpp;
            buffer.read_bytes(src_offset, &mut self.src_row);
            pack_pixels(&mut self.wire_row, &self.src_row, buffer.format());

            let wire_offset = (y as usize * geometry::WIRE_WIDTH as usize
                + rect.x1 as usize)
                * geometry::WIRE_BPP;
            self.payload.copy_into(wire_offset, &self.wire_row);
        }
    }

    /// Upload all blocks, then draw. Aborts on the first failed or short
    /// exchange; no draw command is sent for an aborted cycle.
    async fn send_frame(&mut self, draw_timeout: Duration) -> Result<(), BeamError> {
        for index in 0..self.payload.block_count() {
            let command = DataCommand::for_block(index, self.parity);
            self.link
                .send_exact(
                    Endpoint::DataOut,
                    &command.encode(),
                    self.config.command_timeout,
                )
                .await?;
            self.link
                .send_exact(
                    Endpoint::DataOut,
                    self.payload.block(index),
                    self.config.data_timeout,
                )
                .await?;
            self.link
                .read_status(Endpoint::DataIn, self.config.command_timeout)
                .await?;
        }

        self.link
            .send_exact(
                Endpoint::DataOut,
                &DrawCommand.encode(),
                self.config.command_timeout,
            )
            .await?;
        self.link.read_status(Endpoint::DataIn, draw_timeout).await
    }

    /// Eight vertical color bars at the panel size.
    fn render_test_pattern(&self) -> Result<Arc<PixelBuffer>, BeamError> {
        // B, G, R, padding.
        const BARS: [[u8; 4]; 8] = [
            [0xff, 0xff, 0xff, 0x00], // white
            [0x00, 0xff, 0xff, 0x00], // yellow
            [0xff, 0xff, 0x00, 0x00], // cyan
            [0x00, 0xff, 0x00, 0x00], // green
            [0xff, 0x00, 0xff, 0x00], // magenta
            [0x00, 0x00, 0xff, 0x00], // red
            [0xff, 0x00, 0x00, 0x00], // blue
            [0x00, 0x00, 0x00, 0x00], // black
        ];

        let buffer =
            self.buffers
                .allocate(geometry::WIDTH, geometry::HEIGHT, PixelFormat::Xrgb8888)?;

        let width = geometry::WIDTH as usize;
        let mut row = vec![0u8; width * 4];
        for x in 0..width {
            let bar = x * BARS.len() / width;
            row[x * 4..x * 4 + 4].copy_from_slice(&BARS[bar]);
        }
        for y in 0..geometry::HEIGHT as usize {
            buffer.write_bytes(y * row.len(), &row);
        }
        Ok(buffer)
    }
}

// ── Tests ────────────────────────────────────────────────────────
