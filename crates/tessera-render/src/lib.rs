//! Per-frame binding and synchronization for the Tessera renderer.
//!
//! This crate provides:
//! - Uniform payload and orthographic camera math
//! - Descriptor set allocation and binding for graphics and compute
//! - Frame slots and the fence discipline guarding host writes
//! - [`RendererContext`], which owns all of the above
//! - Configuration, logging setup and the fatal error policy

pub mod binder;
pub mod camera;
pub mod compute;
pub mod config;
pub mod context;
pub mod fatal;
pub mod logging;
pub mod scheduler;
pub mod uniform;

pub use binder::{
    allocate_and_bind_compute_set, allocate_and_bind_graphics_sets, write_texture,
    TextureBinding,
};
pub use camera::{orthographic_projection, viewport_aspect, OrthoCamera, Transform};
pub use compute::{ComputeTarget, Pixel};
pub use config::{CameraConfig, ComputeConfig, ConfigError, RenderConfig};
pub use context::{RendererContext, SwapchainInfo};
pub use fatal::{abort_on_error, OrFatal};
pub use logging::init_logging;
pub use scheduler::{FrameScheduler, FrameToken, SlotState, MAX_FRAMES_IN_FLIGHT};
pub use uniform::{update_uniform_buffer, UniformPayload};
