//! Vulkan resource layer for the Tessera renderer core.
//!
//! This crate provides:
//! - The [`GpuDevice`] seam over the Vulkan entry points the core uses, with
//!   an ash-backed implementation and an in-memory mock
//! - Memory-type selection and dedicated buffer allocation
//! - Descriptor pools and layouts for the graphics and compute bindings
//! - Fences, semaphores and per-frame sync objects

pub mod descriptors;
pub mod device;
pub mod error;
pub mod memory;
pub mod mock;
pub mod sync;

pub use descriptors::{
    create_compute_layout, create_compute_pool, create_graphics_layout, create_graphics_pool,
    BindingSlot, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    COMPUTE_STORAGE_BINDING, GRAPHICS_SAMPLER_BINDING, GRAPHICS_UNIFORM_BINDING,
};
pub use device::{AshDevice, DescriptorResource, DescriptorWrite, GpuDevice};
pub use error::{GpuError, Result, VkResultExt};
pub use memory::{find_memory_type, BufferAllocator, GpuBuffer};
pub use mock::MockDevice;
pub use sync::{create_fence, create_semaphore, reset_fence, wait_for_fence, FrameSync};
