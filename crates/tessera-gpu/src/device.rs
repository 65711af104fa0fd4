//! Device seam between the binding core and the Vulkan driver.
//!
//! Every device call the core makes goes through [`GpuDevice`]. Methods return
//! the raw [`VkResult`] so the calling component can tag failures with its own
//! call site (see [`crate::error::VkResultExt`]).

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;

/// Resource written into a single descriptor binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorResource {
    UniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    CombinedImageSampler {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

impl DescriptorResource {
    /// Descriptor type this resource is written as.
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// A write of one resource into one binding of one descriptor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub resource: DescriptorResource,
}

/// The device entry points used by the binding core.
///
/// Handles passed to these methods must have been created by the same device
/// and must not have been destroyed.
pub trait GpuDevice {
    /// Memory-type table of the physical device.
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool>;

    /// Destroys the pool and implicitly frees every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout>;

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Allocates one set per entry of `layouts` in a single call.
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>>;

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer>;

    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory>;

    fn free_memory(&self, memory: vk::DeviceMemory);

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;

    /// Map `memory`, copy `data` in at `offset`, unmap.
    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()>;

    /// Map `memory`, copy `out.len()` bytes from `offset`, unmap.
    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> VkResult<()>;

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;

    fn destroy_fence(&self, fence: vk::Fence);

    /// Block until every fence is signaled or `timeout_ns` expires.
    ///
    /// An expired wait is reported as `Err(vk::Result::TIMEOUT)`.
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> VkResult<()>;

    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()>;

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
}

impl<T: GpuDevice + ?Sized> GpuDevice for &T {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        (**self).memory_properties()
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        (**self).create_descriptor_pool(max_sets, pool_sizes)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        (**self).destroy_descriptor_pool(pool);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        (**self).create_descriptor_set_layout(bindings)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        (**self).destroy_descriptor_set_layout(layout);
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        (**self).allocate_descriptor_sets(pool, layouts)
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        (**self).update_descriptor_sets(writes);
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        (**self).create_buffer(size, usage)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        (**self).destroy_buffer(buffer);
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        (**self).buffer_memory_requirements(buffer)
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        (**self).allocate_memory(size, memory_type_index)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        (**self).free_memory(memory);
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        (**self).bind_buffer_memory(buffer, memory, offset)
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        (**self).write_memory(memory, offset, data)
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> VkResult<()> {
        (**self).read_memory(memory, offset, out)
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        (**self).create_fence(signaled)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        (**self).destroy_fence(fence);
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> VkResult<()> {
        (**self).wait_for_fences(fences, timeout_ns)
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        (**self).reset_fences(fences)
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        (**self).create_semaphore()
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        (**self).destroy_semaphore(semaphore);
    }
}

/// [`GpuDevice`] backed by a real Vulkan logical device.
pub struct AshDevice {
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl AshDevice {
    /// Wrap a logical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid, and `device` must have
    /// been created from `physical_device`.
    pub unsafe fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: Arc<ash::Device>,
    ) -> Self {
        // SAFETY: caller guarantees the instance and physical device are valid
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        Self {
            device,
            memory_properties,
        }
    }

    /// Get the Vulkan device handle.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl GpuDevice for AshDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::empty())
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        // SAFETY: device is valid for the lifetime of self
        unsafe { self.device.create_descriptor_pool(&create_info, None) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: trait contract, pool belongs to this device
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        // SAFETY: device is valid for the lifetime of self
        unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        // SAFETY: trait contract, layout belongs to this device
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(layouts);

        // SAFETY: trait contract, pool and layouts belong to this device
        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        // Info structs must outlive the raw writes that point at them.
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::UniformBuffer {
                    buffer,
                    offset,
                    range,
                }
                | DescriptorResource::StorageBuffer {
                    buffer,
                    offset,
                    range,
                } => vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(offset)
                    .range(range),
                DescriptorResource::CombinedImageSampler { .. } => {
                    vk::DescriptorBufferInfo::default()
                }
            })
            .collect();

        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::CombinedImageSampler {
                    view,
                    sampler,
                    layout,
                } => vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .sampler(sampler)
                    .image_layout(layout),
                _ => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let raw_writes: Vec<vk::WriteDescriptorSet<'_>> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let raw = vk::WriteDescriptorSet::default()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.resource.descriptor_type());
                match write.resource {
                    DescriptorResource::CombinedImageSampler { .. } => {
                        raw.image_info(std::slice::from_ref(&image_infos[i]))
                    }
                    _ => raw.buffer_info(std::slice::from_ref(&buffer_infos[i])),
                }
            })
            .collect();

        // SAFETY: trait contract, every handle in the writes belongs to this device
        unsafe { self.device.update_descriptor_sets(&raw_writes, &[]) }
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: device is valid for the lifetime of self
        unsafe { self.device.create_buffer(&buffer_info, None) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        // SAFETY: trait contract, buffer belongs to this device
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        // SAFETY: trait contract, buffer belongs to this device
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        // SAFETY: device is valid for the lifetime of self
        unsafe { self.device.allocate_memory(&allocate_info, None) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        // SAFETY: trait contract, memory belongs to this device
        unsafe { self.device.free_memory(memory, None) }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        // SAFETY: trait contract, buffer and memory belong to this device
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        // SAFETY: trait contract; the mapped range is exactly data.len() bytes
        unsafe {
            let ptr = self.device.map_memory(
                memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> VkResult<()> {
        // SAFETY: trait contract; the mapped range is exactly out.len() bytes
        unsafe {
            let ptr = self.device.map_memory(
                memory,
                offset,
                out.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), out.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        // SAFETY: device is valid for the lifetime of self
        unsafe { self.device.create_fence(&create_info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: trait contract, fence belongs to this device
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> VkResult<()> {
        // SAFETY: trait contract, fences belong to this device
        unsafe { self.device.wait_for_fences(fences, true, timeout_ns) }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        // SAFETY: trait contract, fences belong to this device
        unsafe { self.device.reset_fences(fences) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        // SAFETY: device is valid for the lifetime of self
        unsafe { self.device.create_semaphore(&create_info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: trait contract, semaphore belongs to this device
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }
}
