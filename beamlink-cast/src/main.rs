//! beamlink-cast — entry point.
//!
//! Drives the frame-streaming engine against the in-process emulated
//! projector, animating a moving test card. Handy for exercising the
//! whole pipeline (dirty marks, packing, block uploads, keep-alive)
//! without hardware attached.
//!
//! ```text
//! beamlink-cast                  Animate with defaults
//! beamlink-cast --config <path>  Load a custom config TOML
//! beamlink-cast --gen-config     Write default config to stdout
//! beamlink-cast --frames 600     Override the frame count
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use beamlink_core::protocol::geometry;
use beamlink_core::{BulkTransport, EmulatedProjector, Engine, PixelBuffer, PixelFormat};

use crate::config::CastConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "beamlink-cast", about = "beamlink demo caster")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "beamlink-cast.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the number of animated frames.
    #[arg(long)]
    frames: Option<u32>,
}

// ── Animation ────────────────────────────────────────────────────

const BACKGROUND: [u8; 4] = [0x10, 0x10, 0x10, 0x00]; // dark grey, BGRX
const STRIPE_COLOR: [u8; 4] = [0x20, 0xc0, 0xff, 0x00]; // warm orange
const STRIPE: u32 = 48;

fn fill_columns(buffer: &PixelBuffer, x1: u32, x2: u32, pixel: [u8; 4]) {
    let stride = buffer.stride() as usize;
    let mut run = vec![0u8; (x2 - x1) as usize * 4];
    for px in run.chunks_exact_mut(4) {
        px.copy_from_slice(&pixel);
    }
    for y in 0..buffer.height() as usize {
        buffer.write_bytes(y * stride + x1 as usize * 4, &run);
    }
}

/// Slide a vertical stripe one step and return the dirtied column range
/// (erased trail plus the new position).
fn paint_stripe(buffer: &PixelBuffer, step: u32) -> (u32, u32) {
    let span = buffer.width() - STRIPE;
    let x0 = (step * 8) % span;
    let prev = if step == 0 { x0 } else { ((step - 1) * 8) % span };

    fill_columns(buffer, prev, prev + STRIPE, BACKGROUND);
    fill_columns(buffer, x0, x0 + STRIPE, STRIPE_COLOR);

    (prev.min(x0), (prev + STRIPE).max(x0 + STRIPE))
}

fn clear(buffer: &PixelBuffer) {
    fill_columns(buffer, 0, buffer.width(), BACKGROUND);
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&CastConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = CastConfig::load(&cli.config);
    if let Some(frames) = cli.frames {
        config.animation.frames = frames;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("beamlink-cast v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "panel: {}x{} in {} blocks per frame",
        geometry::WIDTH,
        geometry::HEIGHT,
        geometry::BLOCK_COUNT
    );

    let projector = Arc::new(EmulatedProjector::new());
    let mut engine = Engine::new(
        Arc::clone(&projector) as Arc<dyn BulkTransport>,
        config.engine_config(),
    )?;

    let buffer = engine
        .buffers()
        .allocate(geometry::WIDTH, geometry::HEIGHT, PixelFormat::Xrgb8888)?;
    clear(&buffer);

    engine.start()?;
    engine.mark_dirty(&buffer, 0, geometry::WIDTH, 0, geometry::HEIGHT)?;

    // Ctrl-C ends the animation early.
    let frames = config.animation.frames;
    let frame_interval = Duration::from_secs_f64(1.0 / config.animation.fps.max(1) as f64);
    let mut drawn_steps = 0u32;

    let animation = async {
        for step in 0..frames {
            let (x1, x2) = paint_stripe(&buffer, step);
            engine.mark_dirty(&buffer, x1, x2, 0, geometry::HEIGHT)?;
            drawn_steps += 1;
            tokio::time::sleep(frame_interval).await;
        }
        Ok::<_, beamlink_core::BeamError>(())
    };

    tokio::select! {
        result = animation => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received — shutting down");
        }
    }

    engine.stop().await;

    info!(
        "animated {} steps; device drew {} frames over {} transfers",
        drawn_steps,
        projector.frames_drawn(),
        projector.transfer_count()
    );
    Ok(())
}
