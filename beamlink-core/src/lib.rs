//! # beamlink-core
//!
//! Frame-streaming engine for USB pico projectors built around the
//! GM12U320 controller. The device accepts frames only through a
//! chunked bulk-transfer protocol and falls back to its built-in image
//! when no frame arrives within a short deadline, so the engine
//! perpetually re-arms a keep-alive resend of the last frame.
//!
//! This crate contains:
//! - **Buffers**: [`BufferManager`] / [`PixelBuffer`] — page-backed
//!   pixel memory, locally committed or imported from an external
//!   producer, exposed zero-copy through one stable CPU pointer
//! - **Protocol**: the three 31-byte command shapes and the fixed block
//!   framing in [`protocol`]
//! - **Dirty tracking**: [`DirtyRect`] and the single lossy-merge
//!   pending-update slot
//! - **Worker**: the serialized frame loop behind [`Engine`] —
//!   drain, pack, upload, draw, flip parity, re-arm
//! - **Transport**: [`BulkTransport`] — four bulk endpoints with
//!   bounded per-transfer timeouts, implemented by the embedding layer
//! - **Emulation**: [`EmulatedProjector`] — an in-process device model
//!   for bring-up, integration tests, and fault injection
//! - **Error**: [`BeamError`] — typed, `thiserror`-based error hierarchy

pub mod buffer;
pub mod dirty;
pub mod emulated;
pub mod engine;
pub mod error;
pub mod format;
pub mod protocol;
pub mod transport;

mod worker;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::{
    BufferManager, ExternalMapping, FaultStatus, PageMapper, PageRegion, PixelBuffer,
    SystemMapper, PAGE_SIZE,
};
pub use dirty::DirtyRect;
pub use emulated::{EmulatedProjector, FaultKind, FaultTrigger};
pub use engine::Engine;
pub use error::{BeamError, TransportError};
pub use format::PixelFormat;
pub use protocol::command::{DataCommand, DrawCommand, FrameParity, MiscCommand};
pub use transport::{BulkTransport, DeviceLink, Endpoint};
pub use worker::EngineConfig;
