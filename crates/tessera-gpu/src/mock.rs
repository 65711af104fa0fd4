//! In-memory [`GpuDevice`] for headless runs and tests.
//!
//! The mock follows the Vulkan rules the binding core depends on: pools
//! refuse allocations past `max_sets` or past their per-type descriptor
//! counts, host-visible memory keeps its bytes, fences move through
//! unsignaled → pending → signaled, and a wait on a fence nothing will
//! signal reports `TIMEOUT` instead of hanging.

use std::collections::{BTreeMap, HashMap, HashSet};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;

use crate::device::{DescriptorResource, DescriptorWrite, GpuDevice};

const MOCK_ALIGNMENT: vk::DeviceSize = 256;

/// Host-visible state of a fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Unsignaled,
    /// Submitted work that has not completed yet.
    Pending,
    Signaled,
}

/// Snapshot of a descriptor pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolInfo {
    pub max_sets: u32,
    pub pool_sizes: Vec<(vk::DescriptorType, u32)>,
    pub allocated_sets: u32,
}

/// Snapshot of one layout binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutBindingInfo {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Snapshot of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory: Option<vk::DeviceMemory>,
}

struct MockPool {
    max_sets: u32,
    capacity: Vec<(vk::DescriptorType, u32)>,
    used: HashMap<vk::DescriptorType, u32>,
    allocated_sets: u32,
}

struct MockSet {
    pool: u64,
    layout: u64,
    writes: BTreeMap<u32, DescriptorResource>,
}

struct MockBuffer {
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory: Option<u64>,
}

struct MockMemory {
    type_index: u32,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    pools: HashMap<u64, MockPool>,
    layouts: HashMap<u64, Vec<LayoutBindingInfo>>,
    sets: HashMap<u64, MockSet>,
    buffers: HashMap<u64, MockBuffer>,
    memory: HashMap<u64, MockMemory>,
    fences: HashMap<u64, FenceStatus>,
    semaphores: HashSet<u64>,
    /// Pending fault per entry point: successful calls left, then the result.
    faults: HashMap<&'static str, (u32, vk::Result)>,
    fence_waits: usize,
}

impl MockState {
    fn next<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn take_fault(&mut self, call: &'static str) -> VkResult<()> {
        let Some((skip, result)) = self.faults.get_mut(call) else {
            return Ok(());
        };
        if *skip > 0 {
            *skip -= 1;
            return Ok(());
        }
        let result = *result;
        self.faults.remove(call);
        Err(result)
    }
}

/// A fake device that keeps every object in host memory.
pub struct MockDevice {
    state: Mutex<MockState>,
    memory_types: Vec<vk::MemoryPropertyFlags>,
    buffer_type_bits: u32,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A device with a discrete-GPU-like memory table:
    /// device-local, host-visible+coherent, host-visible+cached.
    pub fn new() -> Self {
        Self::with_memory_types(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    /// A device exposing the given memory types, in index order.
    pub fn with_memory_types(memory_types: &[vk::MemoryPropertyFlags]) -> Self {
        assert!(memory_types.len() <= vk::MAX_MEMORY_TYPES);
        Self {
            state: Mutex::new(MockState::default()),
            memory_types: memory_types.to_vec(),
            buffer_type_bits: (1u32 << memory_types.len()) - 1,
        }
    }

    /// Restrict which memory types buffers report as compatible.
    #[must_use]
    pub fn with_buffer_type_bits(mut self, bits: u32) -> Self {
        self.buffer_type_bits = bits;
        self
    }

    /// Make the next call to `call` (a Vulkan entry point name) fail with `result`.
    pub fn fail_next(&self, call: &'static str, result: vk::Result) {
        self.fail_after(call, 0, result);
    }

    /// Let `skip` calls to `call` succeed, then fail the following one with `result`.
    pub fn fail_after(&self, call: &'static str, skip: u32, result: vk::Result) {
        self.state.lock().faults.insert(call, (skip, result));
    }

    /// Simulate a queue submission that signals `fence` on completion.
    pub fn submit(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        match state.fences.get_mut(&fence.as_raw()) {
            Some(status @ FenceStatus::Unsignaled) => {
                *status = FenceStatus::Pending;
                Ok(())
            }
            _ => Err(vk::Result::ERROR_VALIDATION_FAILED_EXT),
        }
    }

    /// Finish all submitted work that signals `fence`.
    pub fn complete(&self, fence: vk::Fence) {
        if let Some(status) = self.state.lock().fences.get_mut(&fence.as_raw()) {
            if *status == FenceStatus::Pending {
                *status = FenceStatus::Signaled;
            }
        }
    }

    pub fn fence_status(&self, fence: vk::Fence) -> Option<FenceStatus> {
        self.state.lock().fences.get(&fence.as_raw()).copied()
    }

    /// Number of fence waits performed so far.
    pub fn fence_waits(&self) -> usize {
        self.state.lock().fence_waits
    }

    pub fn pool_info(&self, pool: vk::DescriptorPool) -> Option<PoolInfo> {
        self.state.lock().pools.get(&pool.as_raw()).map(|p| PoolInfo {
            max_sets: p.max_sets,
            pool_sizes: p.capacity.clone(),
            allocated_sets: p.allocated_sets,
        })
    }

    pub fn layout_bindings(&self, layout: vk::DescriptorSetLayout) -> Option<Vec<LayoutBindingInfo>> {
        self.state.lock().layouts.get(&layout.as_raw()).cloned()
    }

    /// Layout a descriptor set was allocated with.
    pub fn set_layout(&self, set: vk::DescriptorSet) -> Option<vk::DescriptorSetLayout> {
        self.state
            .lock()
            .sets
            .get(&set.as_raw())
            .map(|s| vk::DescriptorSetLayout::from_raw(s.layout))
    }

    /// Resource last written into `binding` of `set`.
    pub fn descriptor(&self, set: vk::DescriptorSet, binding: u32) -> Option<DescriptorResource> {
        self.state
            .lock()
            .sets
            .get(&set.as_raw())
            .and_then(|s| s.writes.get(&binding).copied())
    }

    pub fn buffer_info(&self, buffer: vk::Buffer) -> Option<BufferInfo> {
        self.state.lock().buffers.get(&buffer.as_raw()).map(|b| BufferInfo {
            size: b.size,
            usage: b.usage,
            memory: b.memory.map(vk::DeviceMemory::from_raw),
        })
    }

    /// Memory type index an allocation was made from.
    pub fn memory_type(&self, memory: vk::DeviceMemory) -> Option<u32> {
        self.state
            .lock()
            .memory
            .get(&memory.as_raw())
            .map(|m| m.type_index)
    }

    /// Number of descriptor sets currently alive.
    pub fn descriptor_set_count(&self) -> usize {
        self.state.lock().sets.len()
    }

    /// Number of device objects that still need to be destroyed.
    pub fn live_objects(&self) -> usize {
        let state = self.state.lock();
        state.pools.len()
            + state.layouts.len()
            + state.buffers.len()
            + state.memory.len()
            + state.fences.len()
            + state.semaphores.len()
    }

    fn is_host_visible(&self, type_index: u32) -> bool {
        self.memory_types
            .get(type_index as usize)
            .is_some_and(|flags| flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE))
    }

    fn mapped_range(
        &self,
        mem: &MockMemory,
        offset: vk::DeviceSize,
        len: usize,
    ) -> VkResult<std::ops::Range<usize>> {
        if !self.is_host_visible(mem.type_index) {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        let start = usize::try_from(offset).map_err(|_| vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= mem.bytes.len())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        Ok(start..end)
    }
}

impl GpuDevice for MockDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: self.memory_types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, flags) in properties.memory_types.iter_mut().zip(&self.memory_types) {
            *slot = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        properties.memory_heaps[0] = vk::MemoryHeap {
            size: 1 << 32,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        properties
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let mut state = self.state.lock();
        state.take_fault("vkCreateDescriptorPool")?;

        let handle: vk::DescriptorPool = state.next();
        state.pools.insert(
            handle.as_raw(),
            MockPool {
                max_sets,
                capacity: pool_sizes
                    .iter()
                    .map(|size| (size.ty, size.descriptor_count))
                    .collect(),
                used: HashMap::new(),
                allocated_sets: 0,
            },
        );
        Ok(handle)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock();
        let raw = pool.as_raw();
        state.pools.remove(&raw);
        state.sets.retain(|_, set| set.pool != raw);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let mut state = self.state.lock();
        state.take_fault("vkCreateDescriptorSetLayout")?;

        let handle: vk::DescriptorSetLayout = state.next();
        let bindings = bindings
            .iter()
            .map(|b| LayoutBindingInfo {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                descriptor_count: b.descriptor_count,
                stage_flags: b.stage_flags,
            })
            .collect();
        state.layouts.insert(handle.as_raw(), bindings);
        Ok(handle)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().layouts.remove(&layout.as_raw());
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        state.take_fault("vkAllocateDescriptorSets")?;

        // Descriptor demand of the whole batch, per type.
        let mut demand: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for layout in layouts {
            let bindings = state
                .layouts
                .get(&layout.as_raw())
                .ok_or(vk::Result::ERROR_UNKNOWN)?;
            for binding in bindings {
                *demand.entry(binding.descriptor_type).or_default() += binding.descriptor_count;
            }
        }

        let raw_pool = pool.as_raw();
        let mock_pool = state
            .pools
            .get_mut(&raw_pool)
            .ok_or(vk::Result::ERROR_UNKNOWN)?;

        let requested = layouts.len() as u32;
        if mock_pool.allocated_sets + requested > mock_pool.max_sets {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        for (ty, count) in &demand {
            let capacity = mock_pool
                .capacity
                .iter()
                .filter(|(t, _)| t == ty)
                .map(|(_, c)| *c)
                .sum::<u32>();
            let used = mock_pool.used.get(ty).copied().unwrap_or(0);
            if used + count > capacity {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
        }

        mock_pool.allocated_sets += requested;
        for (ty, count) in demand {
            *mock_pool.used.entry(ty).or_default() += count;
        }

        let mut sets = Vec::with_capacity(layouts.len());
        for layout in layouts {
            let handle: vk::DescriptorSet = state.next();
            state.sets.insert(
                handle.as_raw(),
                MockSet {
                    pool: raw_pool,
                    layout: layout.as_raw(),
                    writes: BTreeMap::new(),
                },
            );
            sets.push(handle);
        }
        Ok(sets)
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        for write in writes {
            if let Some(set) = state.sets.get_mut(&write.set.as_raw()) {
                set.writes.insert(write.binding, write.resource);
            }
        }
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let mut state = self.state.lock();
        state.take_fault("vkCreateBuffer")?;

        let handle: vk::Buffer = state.next();
        state.buffers.insert(
            handle.as_raw(),
            MockBuffer {
                size,
                usage,
                memory: None,
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.state.lock().buffers.remove(&buffer.as_raw());
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self
            .state
            .lock()
            .buffers
            .get(&buffer.as_raw())
            .map_or(0, |b| b.size);
        vk::MemoryRequirements {
            size: size.div_ceil(MOCK_ALIGNMENT) * MOCK_ALIGNMENT,
            alignment: MOCK_ALIGNMENT,
            memory_type_bits: self.buffer_type_bits,
        }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state.lock();
        state.take_fault("vkAllocateMemory")?;

        if memory_type_index as usize >= self.memory_types.len() {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let len = usize::try_from(size).map_err(|_| vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;

        let handle: vk::DeviceMemory = state.next();
        state.memory.insert(
            handle.as_raw(),
            MockMemory {
                type_index: memory_type_index,
                bytes: vec![0; len],
            },
        );
        Ok(handle)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.state.lock().memory.remove(&memory.as_raw());
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_fault("vkBindBufferMemory")?;

        if !state.memory.contains_key(&memory.as_raw()) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let mock_buffer = state
            .buffers
            .get_mut(&buffer.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        if mock_buffer.memory.is_some() {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        mock_buffer.memory = Some(memory.as_raw());
        Ok(())
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_fault("vkMapMemory")?;

        let mem = state
            .memory
            .get_mut(&memory.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let range = self.mapped_range(mem, offset, data.len())?;
        mem.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_fault("vkMapMemory")?;

        let mem = state
            .memory
            .get(&memory.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let range = self.mapped_range(mem, offset, out.len())?;
        out.copy_from_slice(&mem.bytes[range]);
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        state.take_fault("vkCreateFence")?;

        let handle: vk::Fence = state.next();
        let status = if signaled {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        };
        state.fences.insert(handle.as_raw(), status);
        Ok(handle)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.lock().fences.remove(&fence.as_raw());
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_fault("vkWaitForFences")?;
        state.fence_waits += 1;

        for fence in fences {
            match state.fences.get(&fence.as_raw()) {
                Some(FenceStatus::Unsignaled) => return Err(vk::Result::TIMEOUT),
                None => return Err(vk::Result::ERROR_UNKNOWN),
                _ => {}
            }
        }
        // Blocking on pending work lets the fake GPU finish it.
        for fence in fences {
            state
                .fences
                .insert(fence.as_raw(), FenceStatus::Signaled);
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_fault("vkResetFences")?;

        for fence in fences {
            match state.fences.get_mut(&fence.as_raw()) {
                Some(FenceStatus::Pending) => return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT),
                Some(status) => *status = FenceStatus::Unsignaled,
                None => return Err(vk::Result::ERROR_UNKNOWN),
            }
        }
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        state.take_fault("vkCreateSemaphore")?;

        let handle: vk::Semaphore = state.next();
        state.semaphores.insert(handle.as_raw());
        Ok(handle)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore.as_raw());
    }
}
