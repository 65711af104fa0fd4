//! GPU error types.

use std::panic::Location;

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// A device call returned a non-success result.
    #[error("{call} failed with {result:?} at {location}")]
    Device {
        /// Name of the originating device entry point.
        call: &'static str,
        result: vk::Result,
        location: &'static Location<'static>,
    },

    /// No memory type satisfies both the requirement bits and the property flags.
    #[error("No memory type matches bits {type_bits:#b} with properties {properties:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// A descriptor pool cannot satisfy an allocation request.
    #[error("Descriptor pool exhausted: requested {requested} sets, {remaining} remaining")]
    PoolExhausted { requested: u32, remaining: u32 },

    /// A fence wait expired.
    #[error("Fence wait timed out after {timeout_ns} ns")]
    FenceTimeout { timeout_ns: u64 },

    /// A swapchain image index outside the current image count.
    #[error("Image index {index} out of range for {count} swapchain images")]
    ImageIndexOutOfRange { index: u32, count: usize },

    /// A host write or read exceeds the buffer.
    #[error("Buffer of {size} bytes cannot hold {needed} bytes")]
    BufferTooSmall { needed: u64, size: u64 },

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// Whether the error belongs to the device-loss class.
    ///
    /// Expired fence waits are treated like a lost device: the GPU stopped
    /// making progress and nothing downstream can be trusted.
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::Device { result, .. } => *result == vk::Result::ERROR_DEVICE_LOST,
            Self::FenceTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Conversion of raw device results into [`GpuError::Device`].
pub trait VkResultExt<T> {
    /// Tag a raw device result with the entry point name and the caller's location.
    fn check(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    #[track_caller]
    fn check(self, call: &'static str) -> Result<T> {
        let location = Location::caller();
        self.map_err(|result| GpuError::Device {
            call,
            result,
            location,
        })
    }
}
