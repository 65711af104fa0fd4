//! Tessera headless frame simulator
//!
//! Drives the binding and frame-sync core through the full frame protocol
//! against the in-memory mock device: frame slots, image reuse, uniform
//! updates, compute readback, a swapchain rebuild and teardown.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p tessera-sim -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-c, --config <PATH>`: TOML renderer config (defaults otherwise)
//! - `-n, --frames <N>`: Frames to simulate (default: 120)
//! - `--images <N>`: Swapchain image count (default: 3)
//! - `--resize-at <FRAME>`: Rebuild the swapchain with one more image at this frame
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::path::PathBuf;

use anyhow::{bail, Context};
use ash::vk;
use ash::vk::Handle;
use glam::Vec2;
use tessera_gpu::{MockDevice, VkResultExt};
use tessera_render::{
    init_logging, OrFatal, OrthoCamera, RenderConfig, RendererContext, SwapchainInfo,
    TextureBinding,
};
use tracing::{debug, info};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

/// Compute output used when no config file is given; the full-size default
/// would allocate a large host buffer for nothing.
const SIM_COMPUTE_SIZE: (u32, u32) = (320, 240);

/// Frames between compute dispatches.
const COMPUTE_INTERVAL: u64 = 30;

/// Simulated frame time.
const FRAME_DT: f32 = 1.0 / 60.0;

struct Options {
    config: Option<PathBuf>,
    frames: u64,
    images: usize,
    resize_at: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    init_logging("info");
    let options = parse_args()?;

    let config = match &options.config {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => RenderConfig::default().with_compute_size(SIM_COMPUTE_SIZE.0, SIM_COMPUTE_SIZE.1),
    };

    run(&options, config);
    Ok(())
}

fn run(options: &Options, config: RenderConfig) {
    let texture = TextureBinding {
        view: vk::ImageView::from_raw(1),
        sampler: vk::Sampler::from_raw(2),
    };
    let camera_config = config.camera.clone();
    let mut camera = OrthoCamera::from_config(&camera_config);
    let mut image_count = options.images;

    let mut context = RendererContext::new(
        MockDevice::new(),
        config,
        SwapchainInfo::new(image_count, WIDTH, HEIGHT),
        texture,
    )
    .or_fatal();

    for frame in 0..options.frames {
        if options.resize_at == Some(frame) {
            image_count += 1;
            context
                .recreate_swapchain(SwapchainInfo::new(image_count, WIDTH + 200, HEIGHT))
                .or_fatal();
        }

        camera.zoom(0.02, camera_config.zoom_speed, FRAME_DT);
        camera.pan(Vec2::X, camera_config.pan_speed, FRAME_DT);

        context.begin_frame().or_fatal();
        // The mock swapchain hands out images round-robin.
        let image_index = (frame % image_count as u64) as u32;
        let token = context.acquire_image(image_index).or_fatal();
        context.update_uniform_buffer(&token, &camera).or_fatal();
        let fence = context.prepare_submit(&token).or_fatal();
        context
            .device()
            .submit(fence)
            .check("vkQueueSubmit")
            .or_fatal();
        debug!(frame, image_index, slot = token.slot(), "Frame submitted");
        context.end_frame(token);

        if frame % COMPUTE_INTERVAL == 0 {
            let fence = context.begin_compute().or_fatal();
            context
                .device()
                .submit(fence)
                .check("vkQueueSubmit")
                .or_fatal();
            if context.compute_buffer().is_host_visible() {
                let pixels = context.read_compute_output().or_fatal();
                debug!(frame, pixels = pixels.len(), "Compute output read back");
            }
        }
    }

    let frames = context.scheduler().frame_count();
    let elapsed = context.scheduler().elapsed();
    let device = context.destroy().or_fatal();
    info!(
        frames,
        elapsed_ms = elapsed.as_millis() as u64,
        bounds = camera.bounds,
        leaked = device.live_objects(),
        "Simulation finished"
    );
}

fn parse_args() -> anyhow::Result<Options> {
    let mut options = Options {
        config: None,
        frames: 120,
        images: 3,
        resize_at: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || {
            args.next()
                .with_context(|| format!("Missing value for {arg}"))
        };
        match arg.as_str() {
            "-c" | "--config" => options.config = Some(PathBuf::from(value()?)),
            "-n" | "--frames" => options.frames = value()?.parse().context("Invalid frame count")?,
            "--images" => options.images = value()?.parse().context("Invalid image count")?,
            "--resize-at" => {
                options.resize_at = Some(value()?.parse().context("Invalid resize frame")?);
            }
            other => bail!("Unknown argument: {other}"),
        }
    }

    if options.images == 0 {
        bail!("At least one swapchain image is required");
    }
    Ok(options)
}

fn print_help() {
    eprintln!(
        "Tessera headless frame simulator

USAGE:
    tessera-sim [OPTIONS]

OPTIONS:
    -c, --config <PATH>     TOML renderer config
    -n, --frames <N>        Frames to simulate [default: 120]
        --images <N>        Swapchain image count [default: 3]
        --resize-at <FRAME> Rebuild the swapchain with one more image at FRAME
    -h, --help              Print help information

ENVIRONMENT:
    RUST_LOG                Log filter (e.g., info, debug, trace)"
    );
}
