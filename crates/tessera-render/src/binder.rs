//! Descriptor set allocation and resource binding.

use ash::vk;
use tessera_gpu::{
    DescriptorPool, DescriptorResource, DescriptorSetLayout, DescriptorWrite, GpuBuffer,
    GpuDevice, GpuError, Result, COMPUTE_STORAGE_BINDING, GRAPHICS_SAMPLER_BINDING,
    GRAPHICS_UNIFORM_BINDING,
};
use tracing::debug;

use crate::uniform::UniformPayload;

/// Texture shared by every graphics set. The image must already be in
/// `SHADER_READ_ONLY_OPTIMAL` layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl TextureBinding {
    fn resource(self) -> DescriptorResource {
        DescriptorResource::CombinedImageSampler {
            view: self.view,
            sampler: self.sampler,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// Allocate one graphics set per swapchain image in a single batch and bind
/// set `i` to `uniform_buffers[i]` and to the shared texture.
pub fn allocate_and_bind_graphics_sets<D: GpuDevice + ?Sized>(
    device: &D,
    pool: &mut DescriptorPool,
    layout: &DescriptorSetLayout,
    image_count: usize,
    uniform_buffers: &[GpuBuffer],
    texture: TextureBinding,
) -> Result<Vec<vk::DescriptorSet>> {
    if uniform_buffers.len() != image_count {
        return Err(GpuError::InvalidState(format!(
            "{} uniform buffers for {image_count} swapchain images",
            uniform_buffers.len()
        )));
    }

    let layouts = vec![layout.handle(); image_count];
    let sets = pool.allocate(device, &layouts)?;

    let writes: Vec<DescriptorWrite> = sets
        .iter()
        .zip(uniform_buffers)
        .flat_map(|(&set, uniform)| {
            [
                DescriptorWrite {
                    set,
                    binding: GRAPHICS_UNIFORM_BINDING,
                    resource: DescriptorResource::UniformBuffer {
                        buffer: uniform.buffer,
                        offset: 0,
                        range: UniformPayload::SIZE,
                    },
                },
                DescriptorWrite {
                    set,
                    binding: GRAPHICS_SAMPLER_BINDING,
                    resource: texture.resource(),
                },
            ]
        })
        .collect();
    device.update_descriptor_sets(&writes);

    debug!(count = sets.len(), "Graphics descriptor sets bound");
    Ok(sets)
}

/// Point binding 1 of every set at a new texture.
///
/// None of `sets` may be read by a pending submission.
pub fn write_texture<D: GpuDevice + ?Sized>(
    device: &D,
    sets: &[vk::DescriptorSet],
    texture: TextureBinding,
) {
    let writes: Vec<DescriptorWrite> = sets
        .iter()
        .map(|&set| DescriptorWrite {
            set,
            binding: GRAPHICS_SAMPLER_BINDING,
            resource: texture.resource(),
        })
        .collect();
    device.update_descriptor_sets(&writes);
}

/// Allocate the compute set and bind it to the first `buffer_size` bytes of
/// the storage buffer.
pub fn allocate_and_bind_compute_set<D: GpuDevice + ?Sized>(
    device: &D,
    pool: &mut DescriptorPool,
    layout: &DescriptorSetLayout,
    compute_buffer: &GpuBuffer,
    buffer_size: vk::DeviceSize,
) -> Result<vk::DescriptorSet> {
    if buffer_size > compute_buffer.size {
        return Err(GpuError::BufferTooSmall {
            needed: buffer_size,
            size: compute_buffer.size,
        });
    }

    let set = pool
        .allocate(device, &[layout.handle()])?
        .pop()
        .ok_or_else(|| GpuError::InvalidState("Compute set allocation returned nothing".into()))?;

    device.update_descriptor_sets(&[DescriptorWrite {
        set,
        binding: COMPUTE_STORAGE_BINDING,
        resource: DescriptorResource::StorageBuffer {
            buffer: compute_buffer.buffer,
            offset: 0,
            range: buffer_size,
        },
    }]);

    debug!(buffer_size, "Compute descriptor set bound");
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use tessera_gpu::{
        create_compute_layout, create_compute_pool, create_graphics_layout,
        create_graphics_pool, BufferAllocator, MockDevice,
    };

    fn texture() -> TextureBinding {
        TextureBinding {
            view: vk::ImageView::from_raw(0xA0),
            sampler: vk::Sampler::from_raw(0xB0),
        }
    }

    #[test]
    fn graphics_sets_bind_per_image_buffers() {
        let device = MockDevice::new();
        let layout = create_graphics_layout(&device).unwrap();
        let mut pool = create_graphics_pool(&device, 3).unwrap();
        let uniforms = BufferAllocator::new(&device)
            .create_uniform_buffers::<UniformPayload>(3)
            .unwrap();

        let sets =
            allocate_and_bind_graphics_sets(&device, &mut pool, &layout, 3, &uniforms, texture())
                .unwrap();

        assert_eq!(sets.len(), 3);
        for (set, uniform) in sets.iter().zip(&uniforms) {
            assert_eq!(device.set_layout(*set), Some(layout.handle()));
            assert_eq!(
                device.descriptor(*set, 0),
                Some(DescriptorResource::UniformBuffer {
                    buffer: uniform.buffer,
                    offset: 0,
                    range: 128,
                })
            );
            assert_eq!(
                device.descriptor(*set, 1),
                Some(DescriptorResource::CombinedImageSampler {
                    view: texture().view,
                    sampler: texture().sampler,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                })
            );
        }
    }

    #[test]
    fn buffer_count_must_match_images() {
        let device = MockDevice::new();
        let layout = create_graphics_layout(&device).unwrap();
        let mut pool = create_graphics_pool(&device, 3).unwrap();
        let uniforms = BufferAllocator::new(&device)
            .create_uniform_buffers::<UniformPayload>(2)
            .unwrap();

        let err =
            allocate_and_bind_graphics_sets(&device, &mut pool, &layout, 3, &uniforms, texture())
                .unwrap_err();
        assert!(matches!(err, GpuError::InvalidState(_)));
        assert_eq!(pool.allocated_sets(), 0);
    }

    #[test]
    fn rebinding_texture_touches_only_sampler_binding() {
        let device = MockDevice::new();
        let layout = create_graphics_layout(&device).unwrap();
        let mut pool = create_graphics_pool(&device, 2).unwrap();
        let uniforms = BufferAllocator::new(&device)
            .create_uniform_buffers::<UniformPayload>(2)
            .unwrap();
        let sets =
            allocate_and_bind_graphics_sets(&device, &mut pool, &layout, 2, &uniforms, texture())
                .unwrap();
        let uniform_before = device.descriptor(sets[0], 0);

        let replacement = TextureBinding {
            view: vk::ImageView::from_raw(0xC0),
            sampler: vk::Sampler::from_raw(0xD0),
        };
        write_texture(&device, &sets, replacement);

        for set in &sets {
            assert_eq!(device.descriptor(*set, 1), Some(replacement.resource()));
        }
        assert_eq!(device.descriptor(sets[0], 0), uniform_before);
    }

    #[test]
    fn compute_set_covers_whole_buffer() {
        let device = MockDevice::new();
        let layout = create_compute_layout(&device).unwrap();
        let mut pool = create_compute_pool(&device).unwrap();
        let buffer = BufferAllocator::new(&device)
            .create_buffer(
                4096,
                vk::BufferUsageFlags::STORAGE_BUFFER,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                "compute",
            )
            .unwrap();

        let set = allocate_and_bind_compute_set(&device, &mut pool, &layout, &buffer, 4096).unwrap();
        assert_eq!(
            device.descriptor(set, 0),
            Some(DescriptorResource::StorageBuffer {
                buffer: buffer.buffer,
                offset: 0,
                range: 4096,
            })
        );

        // The pool holds exactly one compute set.
        let err =
            allocate_and_bind_compute_set(&device, &mut pool, &layout, &buffer, 4096).unwrap_err();
        assert!(matches!(err, GpuError::PoolExhausted { requested: 1, remaining: 0 }));
    }

    #[test]
    fn compute_range_cannot_exceed_buffer() {
        let device = MockDevice::new();
        let layout = create_compute_layout(&device).unwrap();
        let mut pool = create_compute_pool(&device).unwrap();
        let buffer = BufferAllocator::new(&device)
            .create_buffer(
                64,
                vk::BufferUsageFlags::STORAGE_BUFFER,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                "compute",
            )
            .unwrap();

        let err = allocate_and_bind_compute_set(&device, &mut pool, &layout, &buffer, 128).unwrap_err();
        assert!(matches!(err, GpuError::BufferTooSmall { needed: 128, size: 64 }));
        assert_eq!(pool.allocated_sets(), 0);
    }
}
