//! Dirty-region tracking: one pending update, lossy bounding-box merge.
//!
//! Producers race to record "this region of this buffer changed"; the
//! frame worker drains at most one `(buffer, region)` pair per cycle.
//! Marks for the buffer already pending grow its bounding box; a mark
//! for a different buffer replaces the pending entry outright. That is
//! deliberate: a buffer superseded before it was drained is dropped
//! entirely, never queued, because only the newest frame is worth
//! sending.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::buffer::PixelBuffer;
use crate::error::BeamError;

// ── DirtyRect ────────────────────────────────────────────────────

/// Half-open bounding rectangle of changed pixels: columns `x1..x2`,
/// rows `y1..y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    pub x1: u32,
    pub x2: u32,
    pub y1: u32,
    pub y2: u32,
}

impl DirtyRect {
    /// A validated rectangle; edges must not be inverted.
    pub fn new(x1: u32, x2: u32, y1: u32, y2: u32) -> Result<Self, BeamError> {
        if x1 > x2 || y1 > y2 {
            return Err(BeamError::InvalidRegion { x1, x2, y1, y2 });
        }
        Ok(Self { x1, x2, y1, y2 })
    }

    /// The full `width × height` area.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x1: 0,
            x2: width,
            y1: 0,
            y2: height,
        }
    }

    /// Bounding box of `self` and `other`.
    pub fn merge(self, other: Self) -> Self {
        Self {
            x1: self.x1.min(other.x1),
            x2: self.x2.max(other.x2),
            y1: self.y1.min(other.y1),
            y2: self.y2.max(other.y2),
        }
    }

    /// Restrict the rectangle to `width × height`.
    pub fn clamp(self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.min(width),
            x2: self.x2.min(width),
            y1: self.y1.min(height),
            y2: self.y2.min(height),
        }
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x1 == self.x2 || self.y1 == self.y2
    }
}

// ── UpdateSlot ───────────────────────────────────────────────────

/// An update waiting to be drained by the worker.
pub(crate) struct PendingUpdate {
    pub buffer: Arc<PixelBuffer>,
    pub rect: DirtyRect,
}

/// The single engine-owned pending-update slot.
///
/// The mutex guards a short read-modify-write only; it is never held
/// across a transport call or any await point.
pub(crate) struct UpdateSlot {
    pending: Mutex<Option<PendingUpdate>>,
    notify: Notify,
}

impl UpdateSlot {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Record `rect` as dirty on `buffer` and wake the worker.
    ///
    /// Buffer identity is `Arc` pointer identity: marks for the pending
    /// buffer merge, marks for any other buffer replace.
    pub fn mark(&self, buffer: &Arc<PixelBuffer>, rect: DirtyRect) {
        {
            let mut pending = self.pending.lock().unwrap();
            match pending.as_mut() {
                Some(update) if Arc::ptr_eq(&update.buffer, buffer) => {
                    update.rect = update.rect.merge(rect);
                }
                _ => {
                    *pending = Some(PendingUpdate {
                        buffer: Arc::clone(buffer),
                        rect,
                    });
                }
            }
        }
        // notify_one stores a permit, so a mark that lands between the
        // worker's drain and its next wait is not lost.
        self.notify.notify_one();
    }

    /// Take and clear the pending update, if any.
    pub fn take(&self) -> Option<PendingUpdate> {
        self.pending.lock().unwrap().take()
    }

    /// Wait until the next mark (or a stored permit).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wake the worker without recording an update (used by stop).
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferManager;
    use crate::format::PixelFormat;

    fn buffer() -> Arc<PixelBuffer> {
        BufferManager::new()
            .allocate(64, 64, PixelFormat::Xrgb8888)
            .unwrap()
    }

    #[test]
    fn rect_rejects_inverted_edges() {
        assert!(DirtyRect::new(10, 5, 0, 0).is_err());
        assert!(DirtyRect::new(0, 0, 8, 2).is_err());
        assert!(DirtyRect::new(3, 3, 4, 4).is_ok());
    }

    #[test]
    fn rect_merge_is_bounding_box() {
        let a = DirtyRect::new(0, 10, 0, 10).unwrap();
        let b = DirtyRect::new(5, 20, 5, 20).unwrap();
        assert_eq!(a.merge(b), DirtyRect::new(0, 20, 0, 20).unwrap());
    }

    #[test]
    fn marks_for_same_buffer_grow_the_region() {
        let slot = UpdateSlot::new();
        let buf = buffer();

        slot.mark(&buf, DirtyRect::new(0, 10, 0, 10).unwrap());
        slot.mark(&buf, DirtyRect::new(5, 20, 5, 20).unwrap());

        let update = slot.take().unwrap();
        assert!(Arc::ptr_eq(&update.buffer, &buf));
        assert_eq!(update.rect, DirtyRect::new(0, 20, 0, 20).unwrap());
        // Drained exactly once.
        assert!(slot.take().is_none());
    }

    #[test]
    fn mark_for_other_buffer_discards_pending() {
        let slot = UpdateSlot::new();
        let first = buffer();
        let second = buffer();

        slot.mark(&first, DirtyRect::new(0, 64, 0, 64).unwrap());
        slot.mark(&second, DirtyRect::new(1, 2, 3, 4).unwrap());

        let update = slot.take().unwrap();
        assert!(Arc::ptr_eq(&update.buffer, &second));
        assert_eq!(update.rect, DirtyRect::new(1, 2, 3, 4).unwrap());
    }

    #[test]
    fn mark_stores_a_wakeup_permit() {
        let slot = UpdateSlot::new();
        let buf = buffer();
        slot.mark(&buf, DirtyRect::full(64, 64));

        // The permit from the mark completes a later wait immediately.
        tokio_test::block_on(slot.notified());
    }

    #[test]
    fn rect_clamp_and_empty() {
        let r = DirtyRect::new(100, 900, 0, 500).unwrap().clamp(852, 480);
        assert_eq!(r, DirtyRect::new(100, 852, 0, 480).unwrap());
        assert!(!r.is_empty());
        assert!(DirtyRect::new(5, 5, 0, 10).unwrap().is_empty());
    }
}
