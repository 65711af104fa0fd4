//! Renderer context.
//!
//! Owns every resource of the binding and frame-sync core so that no state
//! lives in globals. Build it once the device and swapchain exist, drive
//! frames through it, then tear it down with [`RendererContext::destroy`].

use ash::vk;
use tessera_gpu::{
    create_compute_layout, create_compute_pool, create_graphics_layout, create_graphics_pool,
    BufferAllocator, DescriptorPool, DescriptorSetLayout, GpuBuffer, GpuDevice, GpuError, Result,
};
use tracing::{debug, info};

use crate::binder::{
    allocate_and_bind_compute_set, allocate_and_bind_graphics_sets, write_texture,
    TextureBinding,
};
use crate::camera::{viewport_aspect, OrthoCamera};
use crate::compute::{ComputeTarget, Pixel};
use crate::config::RenderConfig;
use crate::scheduler::{FrameScheduler, FrameToken};
use crate::uniform::{update_uniform_buffer, UniformPayload};

/// Swapchain properties the core needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub image_count: usize,
    pub extent: vk::Extent2D,
}

impl SwapchainInfo {
    pub fn new(image_count: usize, width: u32, height: u32) -> Self {
        Self {
            image_count,
            extent: vk::Extent2D { width, height },
        }
    }
}

/// Per-image graphics resources; rebuilt with the swapchain.
struct GraphicsBindings {
    pool: DescriptorPool,
    uniform_buffers: Vec<GpuBuffer>,
    sets: Vec<vk::DescriptorSet>,
}

impl GraphicsBindings {
    fn create<D: GpuDevice + ?Sized>(
        device: &D,
        layout: &DescriptorSetLayout,
        image_count: usize,
        texture: TextureBinding,
    ) -> Result<Self> {
        let sets_needed = u32::try_from(image_count)
            .map_err(|_| GpuError::InvalidState(format!("{image_count} swapchain images")))?;
        let mut pool = create_graphics_pool(device, sets_needed)?;
        let allocator = BufferAllocator::new(device);
        let uniform_buffers = match allocator.create_uniform_buffers::<UniformPayload>(image_count)
        {
            Ok(buffers) => buffers,
            Err(e) => {
                pool.destroy(device);
                return Err(e);
            }
        };
        let sets = match allocate_and_bind_graphics_sets(
            device,
            &mut pool,
            layout,
            image_count,
            &uniform_buffers,
            texture,
        ) {
            Ok(sets) => sets,
            Err(e) => {
                for buffer in uniform_buffers {
                    allocator.free_buffer(buffer);
                }
                pool.destroy(device);
                return Err(e);
            }
        };

        Ok(Self {
            pool,
            uniform_buffers,
            sets,
        })
    }

    fn destroy<D: GpuDevice + ?Sized>(self, device: &D) {
        // Destroying the pool frees its sets.
        self.pool.destroy(device);
        for buffer in self.uniform_buffers {
            buffer.destroy(device);
        }
    }
}

/// Compute output buffer and its set.
struct ComputeBindings {
    pool: DescriptorPool,
    target: ComputeTarget,
    buffer: GpuBuffer,
    set: vk::DescriptorSet,
}

impl ComputeBindings {
    fn create<D: GpuDevice + ?Sized>(
        device: &D,
        layout: &DescriptorSetLayout,
        target: ComputeTarget,
    ) -> Result<Self> {
        let mut pool = create_compute_pool(device)?;
        let buffer = match target.create_buffer(&BufferAllocator::new(device)) {
            Ok(buffer) => buffer,
            Err(e) => {
                pool.destroy(device);
                return Err(e);
            }
        };
        let set = match allocate_and_bind_compute_set(
            device,
            &mut pool,
            layout,
            &buffer,
            target.buffer_size(),
        ) {
            Ok(set) => set,
            Err(e) => {
                buffer.destroy(device);
                pool.destroy(device);
                return Err(e);
            }
        };

        Ok(Self {
            pool,
            target,
            buffer,
            set,
        })
    }

    fn destroy<D: GpuDevice + ?Sized>(self, device: &D) {
        self.pool.destroy(device);
        self.buffer.destroy(device);
    }
}

/// Everything the binding and frame-sync core owns.
pub struct RendererContext<D: GpuDevice> {
    device: D,
    config: RenderConfig,
    swapchain: SwapchainInfo,
    texture: TextureBinding,
    graphics_layout: DescriptorSetLayout,
    compute_layout: DescriptorSetLayout,
    graphics: GraphicsBindings,
    compute: ComputeBindings,
    scheduler: FrameScheduler,
}

impl<D: GpuDevice> RendererContext<D> {
    /// Create layouts, pools, buffers and sets, then the frame scheduler.
    ///
    /// On error every object created so far is released again.
    pub fn new(
        device: D,
        config: RenderConfig,
        swapchain: SwapchainInfo,
        texture: TextureBinding,
    ) -> Result<Self> {
        let graphics_layout = create_graphics_layout(&device)?;
        let compute_layout = match create_compute_layout(&device) {
            Ok(layout) => layout,
            Err(e) => {
                graphics_layout.destroy(&device);
                return Err(e);
            }
        };
        let release_layouts = |device: &D, a: DescriptorSetLayout, b: DescriptorSetLayout| {
            a.destroy(device);
            b.destroy(device);
        };

        let graphics = match GraphicsBindings::create(
            &device,
            &graphics_layout,
            swapchain.image_count,
            texture,
        ) {
            Ok(graphics) => graphics,
            Err(e) => {
                release_layouts(&device, graphics_layout, compute_layout);
                return Err(e);
            }
        };

        let target = ComputeTarget::from(&config.compute);
        let compute = match ComputeBindings::create(&device, &compute_layout, target) {
            Ok(compute) => compute,
            Err(e) => {
                graphics.destroy(&device);
                release_layouts(&device, graphics_layout, compute_layout);
                return Err(e);
            }
        };

        let scheduler =
            match FrameScheduler::new(&device, swapchain.image_count, config.fence_timeout_ns) {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    compute.destroy(&device);
                    graphics.destroy(&device);
                    release_layouts(&device, graphics_layout, compute_layout);
                    return Err(e);
                }
            };

        info!(
            images = swapchain.image_count,
            width = swapchain.extent.width,
            height = swapchain.extent.height,
            compute_bytes = target.buffer_size(),
            "Renderer context created"
        );

        Ok(Self {
            device,
            config,
            swapchain,
            texture,
            graphics_layout,
            compute_layout,
            graphics,
            compute,
            scheduler,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn swapchain(&self) -> SwapchainInfo {
        self.swapchain
    }

    /// Height / width of the current swapchain.
    pub fn viewport_aspect(&self) -> f32 {
        viewport_aspect(self.swapchain.extent.width, self.swapchain.extent.height)
    }

    pub fn graphics_layout(&self) -> vk::DescriptorSetLayout {
        self.graphics_layout.handle()
    }

    pub fn compute_layout(&self) -> vk::DescriptorSetLayout {
        self.compute_layout.handle()
    }

    pub fn graphics_pool(&self) -> &DescriptorPool {
        &self.graphics.pool
    }

    pub fn compute_pool(&self) -> &DescriptorPool {
        &self.compute.pool
    }

    /// One set per swapchain image, indexed by image index.
    pub fn graphics_sets(&self) -> &[vk::DescriptorSet] {
        &self.graphics.sets
    }

    /// Set to bind when recording the frame of `token`.
    pub fn graphics_set(&self, token: &FrameToken) -> Result<vk::DescriptorSet> {
        let index = token.image_index();
        self.graphics
            .sets
            .get(index as usize)
            .copied()
            .ok_or(GpuError::ImageIndexOutOfRange {
                index,
                count: self.graphics.sets.len(),
            })
    }

    pub fn uniform_buffers(&self) -> &[GpuBuffer] {
        &self.graphics.uniform_buffers
    }

    pub fn compute_set(&self) -> vk::DescriptorSet {
        self.compute.set
    }

    pub fn compute_buffer(&self) -> &GpuBuffer {
        &self.compute.buffer
    }

    pub fn compute_target(&self) -> ComputeTarget {
        self.compute.target
    }

    pub fn texture(&self) -> TextureBinding {
        self.texture
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Wait for the current slot and return the acquire semaphore.
    pub fn begin_frame(&mut self) -> Result<vk::Semaphore> {
        self.scheduler.begin_frame(&self.device)
    }

    /// Claim the image returned by the swapchain acquire.
    pub fn acquire_image(&mut self, image_index: u32) -> Result<FrameToken> {
        self.scheduler.acquire_image(&self.device, image_index)
    }

    /// Write the camera matrices for the token's image.
    pub fn update_uniform_buffer(
        &self,
        token: &FrameToken,
        camera: &OrthoCamera,
    ) -> Result<UniformPayload> {
        update_uniform_buffer(
            &self.device,
            &self.graphics.uniform_buffers,
            token,
            camera,
            self.viewport_aspect(),
            self.scheduler.elapsed(),
        )
    }

    /// Fence to signal from the graphics submission.
    pub fn prepare_submit(&mut self, token: &FrameToken) -> Result<vk::Fence> {
        self.scheduler.prepare_submit(&self.device, token)
    }

    pub fn end_frame(&mut self, token: FrameToken) {
        self.scheduler.end_frame(token);
    }

    /// Fence to signal from the next compute dispatch.
    pub fn begin_compute(&mut self) -> Result<vk::Fence> {
        self.scheduler.begin_compute(&self.device)
    }

    /// Wait for the last dispatch and copy the pixel output to the host.
    pub fn read_compute_output(&mut self) -> Result<Vec<Pixel>> {
        if !self.compute.buffer.is_host_visible() {
            return Err(GpuError::InvalidState(
                "Compute output lives in device-local memory".to_string(),
            ));
        }
        self.scheduler.wait_compute(&self.device)?;

        let mut pixels = vec![Pixel::default(); self.compute.target.pixel_count()];
        self.compute
            .buffer
            .read_bytes(&self.device, 0, bytemuck::cast_slice_mut(&mut pixels))?;
        Ok(pixels)
    }

    /// Rebuild the per-image resources for a new swapchain.
    ///
    /// Waits for all in-flight work first. Fails while a frame token is
    /// outstanding, since that frame still targets the old images.
    pub fn recreate_swapchain(&mut self, swapchain: SwapchainInfo) -> Result<()> {
        if self.scheduler.frame_in_progress() {
            return Err(GpuError::InvalidState(
                "Swapchain recreated while a frame is being recorded".to_string(),
            ));
        }
        self.scheduler.wait_all(&self.device)?;

        let graphics = GraphicsBindings::create(
            &self.device,
            &self.graphics_layout,
            swapchain.image_count,
            self.texture,
        )?;
        let old = std::mem::replace(&mut self.graphics, graphics);
        old.destroy(&self.device);

        self.scheduler.reset_images(swapchain.image_count)?;
        self.swapchain = swapchain;

        info!(
            images = swapchain.image_count,
            width = swapchain.extent.width,
            height = swapchain.extent.height,
            "Swapchain resources recreated"
        );
        Ok(())
    }

    /// Bind a new texture to every graphics set.
    pub fn rebind_texture(&mut self, texture: TextureBinding) -> Result<()> {
        self.scheduler.wait_all(&self.device)?;
        write_texture(&self.device, &self.graphics.sets, texture);
        self.texture = texture;
        debug!("Texture rebound");
        Ok(())
    }

    /// Wait for the GPU, release everything and hand the device back.
    pub fn destroy(mut self) -> Result<D> {
        self.scheduler.wait_all(&self.device)?;

        self.scheduler.destroy(&self.device);
        self.compute.destroy(&self.device);
        self.graphics.destroy(&self.device);
        self.compute_layout.destroy(&self.device);
        self.graphics_layout.destroy(&self.device);

        info!(frames = self.scheduler.frame_count(), "Renderer context destroyed");
        Ok(self.device)
    }
}
