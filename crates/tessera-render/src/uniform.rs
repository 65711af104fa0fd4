//! Per-frame uniform buffer updates.

use std::time::Duration;

use ash::vk;
use tessera_gpu::{GpuBuffer, GpuDevice, GpuError, Result};
use tracing::trace;

use crate::camera::OrthoCamera;
use crate::scheduler::FrameToken;

/// Uniform block shared by every draw of a frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UniformPayload {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl UniformPayload {
    /// Size in bytes, also the descriptor range of the uniform binding.
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<Self>() as vk::DeviceSize;

    /// Build the payload for `camera` on a target with the given height / width.
    pub fn from_camera(camera: &OrthoCamera, viewport_aspect: f32) -> Self {
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            projection: camera.projection_matrix(viewport_aspect).to_cols_array_2d(),
        }
    }
}

/// Write a fresh payload into the uniform buffer of the token's image.
///
/// The token proves the previous submission that read this image's buffer
/// has completed, so the host write cannot race a GPU read.
/// `elapsed` is time since scheduler setup; it is logged but not yet part
/// of the payload.
pub fn update_uniform_buffer<D: GpuDevice + ?Sized>(
    device: &D,
    uniform_buffers: &[GpuBuffer],
    token: &FrameToken,
    camera: &OrthoCamera,
    viewport_aspect: f32,
    elapsed: Duration,
) -> Result<UniformPayload> {
    let index = token.image_index();
    let buffer = uniform_buffers
        .get(index as usize)
        .ok_or(GpuError::ImageIndexOutOfRange {
            index,
            count: uniform_buffers.len(),
        })?;

    let payload = UniformPayload::from_camera(camera, viewport_aspect);
    buffer.write_pod(device, &payload)?;

    trace!(
        image_index = index,
        elapsed_secs = elapsed.as_secs_f32(),
        "Uniform buffer updated"
    );
    Ok(payload)
}
