//! Block framing: header ‖ content ‖ footer.
//!
//! Every payload block is wrapped in a fixed 84-byte header and a fixed
//! 20-byte footer. The last block of a frame uses a distinct header
//! constant and a smaller content length; everything else about the
//! framing is identical across blocks.

use crate::protocol::geometry;

// ── Framing constants ────────────────────────────────────────────

/// Bytes of framing before a block's content.
pub const BLOCK_HEADER_SIZE: usize = 84;

/// Bytes of framing after a block's content.
pub const BLOCK_FOOTER_SIZE: usize = 20;

pub(crate) const BLOCK_HEADER: [u8; BLOCK_HEADER_SIZE] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0xfb, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x04, 0x15, 0x00, 0x00, 0xfc, 0x00, 0x00, //
    0x01, 0x00, 0x00, 0xdb,
];

pub(crate) const LAST_BLOCK_HEADER: [u8; BLOCK_HEADER_SIZE] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0xfb, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x2a, 0x00, 0x20, 0x00, 0xc0, 0x0f, 0x00, 0x00, //
    0x01, 0x00, 0x00, 0xd7,
];

pub(crate) const BLOCK_FOOTER: [u8; BLOCK_FOOTER_SIZE] = [
    0xfb, 0x14, 0x02, 0x20, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x80, 0x00, 0x00, 0x4f,
];

/// Header constant for block `index`.
pub fn header_for(index: usize) -> &'static [u8; BLOCK_HEADER_SIZE] {
    if index == geometry::BLOCK_COUNT - 1 {
        &LAST_BLOCK_HEADER
    } else {
        &BLOCK_HEADER
    }
}

/// Total on-wire size of block `index` including framing.
pub const fn framed_size(index: usize) -> usize {
    BLOCK_HEADER_SIZE + geometry::content_size(index) + BLOCK_FOOTER_SIZE
}

// ── FramePayload ─────────────────────────────────────────────────

/// One frame's worth of pre-framed payload blocks.
///
/// The header and footer bytes are written once at construction; only the
/// content windows change afterwards. Pixel packing addresses the content
/// as one flat range of [`geometry::TOTAL_PAYLOAD_SIZE`] bytes and
/// [`copy_into`](Self::copy_into) scatters writes across block boundaries.
pub struct FramePayload {
    blocks: Vec<Vec<u8>>,
}

impl FramePayload {
    /// Allocate and frame all blocks, content zeroed (black).
    pub fn new() -> Self {
        let blocks = (0..geometry::BLOCK_COUNT)
            .map(|i| {
                let mut block = vec![0u8; framed_size(i)];
                block[..BLOCK_HEADER_SIZE].copy_from_slice(header_for(i));
                let footer_at = framed_size(i) - BLOCK_FOOTER_SIZE;
                block[footer_at..].copy_from_slice(&BLOCK_FOOTER);
                block
            })
            .collect();
        Self { blocks }
    }

    /// The wire-ready bytes of block `index`.
    pub fn block(&self, index: usize) -> &[u8] {
        &self.blocks[index]
    }

    /// Number of blocks in a frame.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Locate a flat payload offset: `(block index, offset within that
    /// block's content)`.
    fn locate(offset: usize) -> (usize, usize) {
        let full = (geometry::BLOCK_COUNT - 1) * geometry::BLOCK_CONTENT_SIZE;
        if offset < full {
            (
                offset / geometry::BLOCK_CONTENT_SIZE,
                offset % geometry::BLOCK_CONTENT_SIZE,
            )
        } else {
            (geometry::BLOCK_COUNT - 1, offset - full)
        }
    }

    /// Copy `src` into the flat payload starting at `offset`, crossing
    /// block boundaries as needed.
    ///
    /// # Panics
    ///
    /// Panics if the copy would run past the end of the payload.
    pub fn copy_into(&mut self, offset: usize, src: &[u8]) {
        assert!(
            offset + src.len() <= geometry::TOTAL_PAYLOAD_SIZE,
            "payload write out of range"
        );

        let mut offset = offset;
        let mut src = src;
        while !src.is_empty() {
            let (index, within) = Self::locate(offset);
            let room = geometry::content_size(index) - within;
            let n = room.min(src.len());

            let at = BLOCK_HEADER_SIZE + within;
            self.blocks[index][at..at + n].copy_from_slice(&src[..n]);

            offset += n;
            src = &src[n..];
        }
    }

    /// Read back the flat content (test and emulation support).
    pub fn content(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(geometry::TOTAL_PAYLOAD_SIZE);
        for (i, block) in self.blocks.iter().enumerate() {
            let end = BLOCK_HEADER_SIZE + geometry::content_size(i);
            out.extend_from_slice(&block[BLOCK_HEADER_SIZE..end]);
        }
        out
    }
}

impl Default for FramePayload {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
