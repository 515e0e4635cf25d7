//! Wire protocol for GM12U320-class USB pico projectors.
//!
//! The device accepts frames exclusively as a fixed sequence of framed
//! payload blocks, each preceded by a 31-byte command wrapper on the data
//! endpoint and acknowledged by a 13-byte status reply. A parameterless
//! draw command latches the uploaded frame onto the panel.
//!
//! Submodules:
//! - [`command`] — the three command shapes (data, draw, misc).
//! - [`block`] — block framing constants and [`FramePayload`](block::FramePayload).

pub mod block;
pub mod command;

// ── Fixed exchange sizes ─────────────────────────────────────────

/// Every command wrapper is exactly this many bytes.
pub const CMD_SIZE: usize = 31;

/// Every status reply is exactly this many bytes.
pub const READ_STATUS_SIZE: usize = 13;

/// A misc request's value reply is exactly this many bytes.
pub const MISC_VALUE_SIZE: usize = 4;

// ── Panel geometry ───────────────────────────────────────────────

/// Wire geometry of the panel.
///
/// These are firmware constants of the device, measured against real
/// hardware; the transmitted payload size is fixed by them and never
/// derived from the source image. Sources must already be scaled to the
/// user-visible size before they reach the engine.
pub mod geometry {
    /// Width producers render at, in pixels.
    pub const WIDTH: u32 = 852;

    /// Width of one transmitted scanline, in pixels. The two pixels past
    /// [`WIDTH`] are padding and stay black.
    pub const WIRE_WIDTH: u32 = 854;

    /// Panel height in pixels.
    pub const HEIGHT: u32 = 480;

    /// Bytes per transmitted pixel (packed 24-bit).
    pub const WIRE_BPP: usize = 3;

    /// Number of payload blocks per frame.
    pub const BLOCK_COUNT: usize = 20;

    /// Content bytes carried by every block except the last.
    pub const BLOCK_CONTENT_SIZE: usize = 64512;

    /// Content bytes carried by the last block.
    pub const LAST_BLOCK_CONTENT_SIZE: usize = 4032;

    /// Total pixel payload of one frame.
    pub const TOTAL_PAYLOAD_SIZE: usize =
        (BLOCK_COUNT - 1) * BLOCK_CONTENT_SIZE + LAST_BLOCK_CONTENT_SIZE;

    /// Content bytes of block `index`.
    pub const fn content_size(index: usize) -> usize {
        if index == BLOCK_COUNT - 1 {
            LAST_BLOCK_CONTENT_SIZE
        } else {
            BLOCK_CONTENT_SIZE
        }
    }

    /// Byte offset of block `index`'s content within the flat payload.
    pub const fn content_offset(index: usize) -> usize {
        index * BLOCK_CONTENT_SIZE
    }
}
