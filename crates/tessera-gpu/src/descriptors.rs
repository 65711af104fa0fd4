//! Descriptor set management.
//!
//! Pools and layouts for the two fixed binding schemes:
//!
//! | pipeline | binding | descriptor               | stage    |
//! |----------|---------|--------------------------|----------|
//! | graphics | 0       | uniform buffer           | vertex   |
//! | graphics | 1       | combined image + sampler | fragment |
//! | compute  | 0       | storage buffer           | compute  |

use ash::vk;
use tracing::debug;

use crate::device::GpuDevice;
use crate::error::{GpuError, Result, VkResultExt};

/// Graphics binding holding the per-image uniform buffer.
pub const GRAPHICS_UNIFORM_BINDING: u32 = 0;
/// Graphics binding holding the shared texture.
pub const GRAPHICS_SAMPLER_BINDING: u32 = 1;
/// Compute binding holding the output storage buffer.
pub const COMPUTE_STORAGE_BINDING: u32 = 0;

/// One binding slot of a layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingSlot {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Descriptor set layout builder.
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    slots: Vec<BindingSlot>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    #[must_use]
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.slots.push(BindingSlot {
            binding,
            descriptor_type,
            stage_flags,
        });
        self
    }

    /// Add a uniform buffer binding.
    #[must_use]
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a storage buffer binding.
    #[must_use]
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags)
    }

    /// Add a sampled image binding.
    #[must_use]
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Build the descriptor set layout.
    pub fn build<D: GpuDevice + ?Sized>(self, device: &D) -> Result<DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = self
            .slots
            .iter()
            .map(|slot| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot.binding)
                    .descriptor_type(slot.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(slot.stage_flags)
            })
            .collect();

        let layout = device
            .create_descriptor_set_layout(&bindings)
            .check("vkCreateDescriptorSetLayout")?;

        Ok(DescriptorSetLayout {
            layout,
            slots: self.slots,
        })
    }
}

/// An immutable descriptor set layout.
#[derive(Debug)]
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    slots: Vec<BindingSlot>,
}

impl DescriptorSetLayout {
    /// Get the raw layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Binding slots in declaration order.
    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Destroy the layout.
    pub fn destroy<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_descriptor_set_layout(self.layout);
    }
}

/// Descriptor pool for allocating descriptor sets.
///
/// Tracks how many sets have been carved out so over-allocation is refused
/// before it reaches the driver.
#[derive(Debug)]
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    allocated_sets: u32,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    pub fn new<D: GpuDevice + ?Sized>(
        device: &D,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let pool = device
            .create_descriptor_pool(max_sets, pool_sizes)
            .check("vkCreateDescriptorPool")?;

        Ok(Self {
            pool,
            max_sets,
            pool_sizes: pool_sizes.to_vec(),
            allocated_sets: 0,
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    pub fn allocated_sets(&self) -> u32 {
        self.allocated_sets
    }

    /// Sets that can still be allocated.
    pub fn remaining_sets(&self) -> u32 {
        self.max_sets - self.allocated_sets
    }

    /// Total descriptors of `ty` the pool was sized for.
    pub fn descriptor_capacity(&self, ty: vk::DescriptorType) -> u32 {
        self.pool_sizes
            .iter()
            .filter(|size| size.ty == ty)
            .map(|size| size.descriptor_count)
            .sum()
    }

    /// Allocate one set per layout in a single batched call.
    ///
    /// Fails with [`GpuError::PoolExhausted`] instead of truncating when the
    /// request exceeds the remaining set capacity.
    pub fn allocate<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let requested = u32::try_from(layouts.len()).unwrap_or(u32::MAX);
        if requested > self.remaining_sets() {
            return Err(GpuError::PoolExhausted {
                requested,
                remaining: self.remaining_sets(),
            });
        }

        let sets = device
            .allocate_descriptor_sets(self.pool, layouts)
            .check("vkAllocateDescriptorSets")?;
        self.allocated_sets += requested;
        Ok(sets)
    }

    /// Destroy the pool, implicitly freeing every set allocated from it.
    pub fn destroy<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_descriptor_pool(self.pool);
    }
}

/// Graphics pool: `image_count` uniform and `image_count` sampler descriptors,
/// `image_count` sets.
pub fn create_graphics_pool<D: GpuDevice + ?Sized>(
    device: &D,
    image_count: u32,
) -> Result<DescriptorPool> {
    if image_count == 0 {
        return Err(GpuError::InvalidState(
            "Graphics descriptor pool needs at least one swapchain image".to_string(),
        ));
    }

    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: image_count,
        },
    ];
    let pool = DescriptorPool::new(device, image_count, &pool_sizes)?;
    debug!(image_count, "Graphics descriptor pool created");
    Ok(pool)
}

/// Compute pool: one storage-buffer descriptor, one set.
pub fn create_compute_pool<D: GpuDevice + ?Sized>(device: &D) -> Result<DescriptorPool> {
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::STORAGE_BUFFER,
        descriptor_count: 1,
    }];
    let pool = DescriptorPool::new(device, 1, &pool_sizes)?;
    debug!("Compute descriptor pool created");
    Ok(pool)
}

/// Graphics layout: uniform buffer for the vertex stage, sampler for the fragment stage.
pub fn create_graphics_layout<D: GpuDevice + ?Sized>(device: &D) -> Result<DescriptorSetLayout> {
    DescriptorSetLayoutBuilder::new()
        .uniform_buffer(GRAPHICS_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
        .sampled_image(GRAPHICS_SAMPLER_BINDING, vk::ShaderStageFlags::FRAGMENT)
        .build(device)
}

/// Compute layout: storage buffer for the compute stage.
pub fn create_compute_layout<D: GpuDevice + ?Sized>(device: &D) -> Result<DescriptorSetLayout> {
    DescriptorSetLayoutBuilder::new()
        .storage_buffer(COMPUTE_STORAGE_BINDING, vk::ShaderStageFlags::COMPUTE)
        .build(device)
}
