//! Integration tests — full engine lifecycle against the emulated
//! projector: keep-alive cadence, parity discipline, abort semantics,
//! and stop's no-traffic-after-join guarantee.

use std::sync::Arc;
use std::time::Duration;

use beamlink_core::protocol::geometry;
use beamlink_core::{
    BulkTransport, EmulatedProjector, Engine, EngineConfig, FaultKind, FaultTrigger, PixelBuffer,
    PixelFormat,
};

// ── Helpers ──────────────────────────────────────────────────────

/// Short timeouts so a test exercises several cycles in well under a
/// second.
fn quick_config() -> EngineConfig {
    EngineConfig {
        command_timeout: Duration::from_millis(50),
        data_timeout: Duration::from_millis(100),
        idle_timeout: Duration::from_millis(60),
        first_draw_timeout: Duration::from_millis(100),
    }
}

fn engine_with(emu: &Arc<EmulatedProjector>, config: EngineConfig) -> Engine {
    Engine::new(Arc::clone(emu) as Arc<dyn BulkTransport>, config).unwrap()
}

fn panel_buffer(engine: &Engine) -> Arc<PixelBuffer> {
    engine
        .buffers()
        .allocate(geometry::WIDTH, geometry::HEIGHT, PixelFormat::Xrgb8888)
        .unwrap()
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

// ── Happy path ───────────────────────────────────────────────────

#[tokio::test]
async fn first_cycle_draws_within_one_idle_period() {
    let emu = Arc::new(EmulatedProjector::new());
    let mut engine = engine_with(&emu, quick_config());

    engine.start().unwrap();
    assert!(wait_until(quick_config().idle_timeout, || emu.frames_drawn() >= 1).await);

    // The first drawn frame carries the even parity.
    assert_eq!(emu.drawn_parities()[0], 0);

    engine.stop().await;
}

#[tokio::test]
async fn marked_pixels_reach_the_device() {
    let emu = Arc::new(EmulatedProjector::new());
    let mut engine = engine_with(&emu, quick_config());
    let buffer = panel_buffer(&engine);

    // A red-ish pixel at (3, 2) in XRGB bytes (B, G, R, pad).
    let offset = 2 * buffer.stride() as usize + 3 * 4;
    buffer.write_bytes(offset, &[0x10, 0x20, 0xd0, 0x00]);

    // Mark before start so the very first cycle drains this buffer.
    engine
        .mark_dirty(&buffer, 0, geometry::WIDTH, 0, geometry::HEIGHT)
        .unwrap();
    engine.start().unwrap();

    assert!(wait_until(Duration::from_secs(1), || emu.frames_drawn() >= 1).await);
    engine.stop().await;

    let frame = emu.last_frame().unwrap();
    let wire = (2 * geometry::WIRE_WIDTH as usize + 3) * geometry::WIRE_BPP;
    assert_eq!(&frame[wire..wire + 3], &[0x10, 0x20, 0xd0]);
}

#[tokio::test]
async fn keep_alive_resends_and_alternates_parity() {
    let emu = Arc::new(EmulatedProjector::new());
    let mut engine = engine_with(&emu, quick_config());
    let buffer = panel_buffer(&engine);
    buffer.write_bytes(0, &[0x42, 0x43, 0x44, 0x00]);

    engine
        .mark_dirty(&buffer, 0, geometry::WIDTH, 0, geometry::HEIGHT)
        .unwrap();
    engine.start().unwrap();

    // No further marks: the worker must keep drawing on its own.
    assert!(wait_until(Duration::from_secs(2), || emu.frames_drawn() >= 3).await);
    engine.stop().await;

    // Parity strictly alternates across successful frames.
    let parities = emu.drawn_parities();
    assert!(parities.len() >= 3);
    for pair in parities.windows(2) {
        assert_ne!(pair[0], pair[1], "parity must flip every frame");
    }

    // The keep-alive frames carry the same pixels.
    let frame = emu.last_frame().unwrap();
    assert_eq!(&frame[0..3], &[0x42, 0x43, 0x44]);
}

// ── Abort semantics ──────────────────────────────────────────────

#[tokio::test]
async fn failed_block_aborts_cycle_without_draw_or_flip() {
    let emu = Arc::new(EmulatedProjector::new());
    let mut engine = engine_with(&emu, quick_config());
    let buffer = panel_buffer(&engine);

    // The data transfer of the third block fails once.
    emu.inject_fault(FaultTrigger::BlockData(2), FaultKind::Timeout);

    engine
        .mark_dirty(&buffer, 0, geometry::WIDTH, 0, geometry::HEIGHT)
        .unwrap();
    engine.start().unwrap();

    // The first attempt aborts; a later cycle succeeds.
    assert!(wait_until(Duration::from_secs(2), || emu.frames_drawn() >= 1).await);
    engine.stop().await;

    // No draw command was ever issued for the aborted cycle…
    assert_eq!(emu.draw_commands(), emu.frames_drawn());
    // …and the abort did not consume a parity flip: the first frame that
    // did get drawn still carries the even parity.
    assert_eq!(emu.drawn_parities()[0], 0);
}

// ── Stop semantics ───────────────────────────────────────────────

#[tokio::test]
async fn no_transfers_after_stop_returns() {
    let emu = Arc::new(EmulatedProjector::new());
    let mut engine = engine_with(&emu, quick_config());

    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || emu.frames_drawn() >= 1).await);
    engine.stop().await;

    let settled = emu.transfer_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        emu.transfer_count(),
        settled,
        "transport must be quiet once stop has joined the worker"
    );
}

#[tokio::test]
async fn stopped_engine_can_be_restarted() {
    let emu = Arc::new(EmulatedProjector::new());
    let mut engine = engine_with(&emu, quick_config());

    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || emu.frames_drawn() >= 1).await);
    engine.stop().await;

    let drawn = emu.frames_drawn();
    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || emu.frames_drawn() > drawn).await);
    engine.stop().await;
}

// ── Dirty-region discipline ──────────────────────────────────────

#[tokio::test]
async fn merged_marks_drain_as_one_bounding_box() {
    let emu = Arc::new(EmulatedProjector::new());
    let mut engine = engine_with(&emu, quick_config());
    let buffer = panel_buffer(&engine);

    // Two pixels far apart, each marked with its own small region
    // before the worker starts draining.
    buffer.write_bytes(0, &[0x01, 0x02, 0x03, 0x00]);
    let far = 19 * buffer.stride() as usize + 19 * 4;
    buffer.write_bytes(far, &[0x04, 0x05, 0x06, 0x00]);

    engine.mark_dirty(&buffer, 0, 10, 0, 10).unwrap();
    engine.mark_dirty(&buffer, 5, 20, 5, 20).unwrap();

    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || emu.frames_drawn() >= 1).await);
    engine.stop().await;

    // Both pixels arrived: the merged (0,20,0,20) box covered them.
    let frame = emu.last_frame().unwrap();
    assert_eq!(&frame[0..3], &[0x01, 0x02, 0x03]);
    let wire = (19 * geometry::WIRE_WIDTH as usize + 19) * geometry::WIRE_BPP;
    assert_eq!(&frame[wire..wire + 3], &[0x04, 0x05, 0x06]);
}

#[tokio::test]
async fn superseded_buffer_is_never_drawn() {
    let emu = Arc::new(EmulatedProjector::new());
    let mut engine = engine_with(&emu, quick_config());

    let first = panel_buffer(&engine);
    first.write_bytes(0, &[0x0a, 0x0a, 0x0a, 0x00]);
    let second = panel_buffer(&engine);
    second.write_bytes(0, &[0x0b, 0x0b, 0x0b, 0x00]);

    // Both marked before start; the second replaces the first.
    engine
        .mark_dirty(&first, 0, geometry::WIDTH, 0, geometry::HEIGHT)
        .unwrap();
    engine
        .mark_dirty(&second, 0, geometry::WIDTH, 0, geometry::HEIGHT)
        .unwrap();

    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || emu.frames_drawn() >= 1).await);
    engine.stop().await;

    let frame = emu.last_frame().unwrap();
    assert_eq!(&frame[0..3], &[0x0b, 0x0b, 0x0b]);
}
