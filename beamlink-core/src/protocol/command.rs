//! The three 31-byte command wrappers.
//!
//! Each command is a copy of a fixed template with a handful of parameter
//! fields overwritten at fixed offsets. The templates resemble bulk-only
//! transport command wrappers ("USBC" signature); everything outside the
//! named fields is opaque firmware ABI and must be sent verbatim.
//!
//! ## Data command parameter layout
//!
//! ```text
//! offset 8..10   block_size   u16 LE — size of the framed block that follows
//! offset 20      block_tag    u8     — 0xfc − 4·index, descending per block
//! offset 21      sequence     u8     — block index, frame parity in bit 7
//! ```
//!
//! ## Misc command parameter layout
//!
//! ```text
//! offset 20..22  request      (u8, u8)
//! offset 22..26  args         [u8; 4]
//! ```

use crate::protocol::{geometry, CMD_SIZE};

// ── Templates ────────────────────────────────────────────────────

const CMD_DATA_TEMPLATE: [u8; CMD_SIZE] = [
    0x55, 0x53, 0x42, 0x43, 0x00, 0x00, 0x00, 0x00, //
    0x68, 0xfc, 0x00, 0x00, 0x00, 0x00, 0x10, 0xff, //
    0x00, 0x00, 0x00, 0x00, 0xfc, 0x00, 0x80, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const CMD_DRAW_TEMPLATE: [u8; CMD_SIZE] = [
    0x55, 0x53, 0x42, 0x43, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0xfe, //
    0x00, 0x00, 0x00, 0xc0, 0xd1, 0x05, 0x00, 0x40, //
    0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const CMD_MISC_TEMPLATE: [u8; CMD_SIZE] = [
    0x55, 0x53, 0x42, 0x43, 0x00, 0x00, 0x00, 0x00, //
    0x04, 0x00, 0x00, 0x00, 0x80, 0x01, 0x10, 0xfd, //
    0x00, 0x00, 0x00, 0xc0, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

// ── FrameParity ──────────────────────────────────────────────────

/// The single bit the device uses to associate uploaded blocks with one
/// of its two internal frame buffers. Flipped after every fully
/// successful cycle; left unchanged by an aborted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameParity {
    #[default]
    Even,
    Odd,
}

impl FrameParity {
    /// The opposite parity.
    pub fn flip(self) -> Self {
        match self {
            FrameParity::Even => FrameParity::Odd,
            FrameParity::Odd => FrameParity::Even,
        }
    }

    /// The parity as the raw wire bit.
    pub const fn bit(self) -> u8 {
        match self {
            FrameParity::Even => 0,
            FrameParity::Odd => 1,
        }
    }
}

// ── DataCommand ──────────────────────────────────────────────────

/// Announces one framed payload block on the data-out endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataCommand {
    /// Total size of the framed block that follows (header + content +
    /// footer), little-endian on the wire.
    pub block_size: u16,
    /// Descending per-block tag.
    pub block_tag: u8,
    /// Block index with the frame parity in the high bit.
    pub sequence: u8,
}

impl DataCommand {
    /// Build the command for block `index` of a frame with `parity`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the frame's block range.
    pub fn for_block(index: usize, parity: FrameParity) -> Self {
        assert!(index < geometry::BLOCK_COUNT, "block index out of range");
        Self {
            block_size: crate::protocol::block::framed_size(index) as u16,
            block_tag: 0xfc - (index as u8) * 4,
            sequence: index as u8 | (parity.bit() << 7),
        }
    }

    /// Serialize to the on-wire command bytes.
    pub fn encode(&self) -> [u8; CMD_SIZE] {
        let mut buf = CMD_DATA_TEMPLATE;
        buf[8..10].copy_from_slice(&self.block_size.to_le_bytes());
        buf[20] = self.block_tag;
        buf[21] = self.sequence;
        buf
    }
}

// ── DrawCommand ──────────────────────────────────────────────────

/// Latches the uploaded blocks onto the panel. Carries no per-call
/// parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawCommand;

impl DrawCommand {
    /// Serialize to the on-wire command bytes (the template verbatim).
    pub fn encode(&self) -> [u8; CMD_SIZE] {
        CMD_DRAW_TEMPLATE
    }
}

// ── MiscCommand ──────────────────────────────────────────────────

/// A vendor control request on the misc endpoint pair. Not part of the
/// per-frame path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiscCommand {
    /// Request identifier pair.
    pub request: (u8, u8),
    /// Four raw argument bytes.
    pub args: [u8; 4],
}

impl MiscCommand {
    pub fn new(request: (u8, u8), args: [u8; 4]) -> Self {
        Self { request, args }
    }

    /// Serialize to the on-wire command bytes.
    pub fn encode(&self) -> [u8; CMD_SIZE] {
        let mut buf = CMD_MISC_TEMPLATE;
        buf[20] = self.request.0;
        buf[21] = self.request.1;
        buf[22..26].copy_from_slice(&self.args);
        buf
    }
}

// ── Tests ────────────────────────────────────────────────────────
