//! Synchronization primitives.

use ash::vk;
use tracing::trace;

use crate::device::GpuDevice;
use crate::error::{GpuError, Result, VkResultExt};

/// Create a semaphore.
pub fn create_semaphore<D: GpuDevice + ?Sized>(device: &D) -> Result<vk::Semaphore> {
    device.create_semaphore().check("vkCreateSemaphore")
}

/// Create a fence.
pub fn create_fence<D: GpuDevice + ?Sized>(device: &D, signaled: bool) -> Result<vk::Fence> {
    device.create_fence(signaled).check("vkCreateFence")
}

/// Wait for a fence to be signaled.
///
/// An expired wait becomes [`GpuError::FenceTimeout`].
#[track_caller]
pub fn wait_for_fence<D: GpuDevice + ?Sized>(
    device: &D,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    trace!(?fence, "Waiting for fence");
    match device.wait_for_fences(&[fence], timeout_ns) {
        Err(vk::Result::TIMEOUT) => Err(GpuError::FenceTimeout { timeout_ns }),
        other => other.check("vkWaitForFences"),
    }
}

/// Reset a fence to unsignaled state.
#[track_caller]
pub fn reset_fence<D: GpuDevice + ?Sized>(device: &D, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence]).check("vkResetFences")
}

/// Frame synchronization resources.
#[derive(Debug)]
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence to wait for frame completion
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// The fence starts signaled so the first wait on a fresh slot returns at once.
    pub fn new<D: GpuDevice + ?Sized>(device: &D) -> Result<Self> {
        let image_available = create_semaphore(device)?;
        let render_finished = match create_semaphore(device) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        let in_flight = match create_fence(device, true) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_semaphore(image_available);
                device.destroy_semaphore(render_finished);
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Wait for this frame to be available.
    pub fn wait<D: GpuDevice + ?Sized>(&self, device: &D, timeout_ns: u64) -> Result<()> {
        wait_for_fence(device, self.in_flight, timeout_ns)
    }

    /// Reset the fence for the next frame.
    pub fn reset<D: GpuDevice + ?Sized>(&self, device: &D) -> Result<()> {
        reset_fence(device, self.in_flight)
    }

    /// Destroy synchronization resources.
    ///
    /// The resources must not be in use.
    pub fn destroy<D: GpuDevice + ?Sized>(&self, device: &D) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
        device.destroy_fence(self.in_flight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FenceStatus, MockDevice};

    #[test]
    fn fresh_frame_sync_does_not_block() {
        let device = MockDevice::new();
        let sync = FrameSync::new(&device).unwrap();

        sync.wait(&device, 0).unwrap();
        sync.reset(&device).unwrap();
        assert_eq!(device.fence_status(sync.in_flight), Some(FenceStatus::Unsignaled));

        sync.destroy(&device);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn unsignaled_wait_times_out() {
        let device = MockDevice::new();
        let fence = create_fence(&device, false).unwrap();

        let err = wait_for_fence(&device, fence, 1_000_000).unwrap_err();
        assert!(matches!(err, GpuError::FenceTimeout { timeout_ns: 1_000_000 }));
        assert!(err.is_device_lost());
    }

    #[test]
    fn partial_creation_is_rolled_back() {
        let device = MockDevice::new();
        device.fail_next("vkCreateFence", vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        assert!(FrameSync::new(&device).is_err());
        assert_eq!(device.live_objects(), 0);
    }
}
