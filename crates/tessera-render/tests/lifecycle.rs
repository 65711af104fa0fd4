//! Creation, rebuild and teardown of the renderer context.

use ash::vk;
use ash::vk::Handle;
use tessera_gpu::{
    create_graphics_layout, create_graphics_pool, DescriptorResource, GpuError, MockDevice,
};
use tessera_render::{
    OrthoCamera, RenderConfig, RendererContext, SwapchainInfo, TextureBinding, UniformPayload,
};

fn texture(raw: u64) -> TextureBinding {
    TextureBinding {
        view: vk::ImageView::from_raw(raw),
        sampler: vk::Sampler::from_raw(raw + 1),
    }
}

fn config() -> RenderConfig {
    RenderConfig::default().with_compute_size(16, 16)
}

#[test]
fn sizes_follow_swapchain_image_count() {
    for image_count in 1..=4 {
        let context = RendererContext::new(
            MockDevice::new(),
            config(),
            SwapchainInfo::new(image_count, 800, 600),
            texture(0x10),
        )
        .unwrap();
        let device = context.device();
        let n = image_count as u32;

        assert_eq!(context.graphics_sets().len(), image_count);
        assert_eq!(context.uniform_buffers().len(), image_count);

        let graphics = device.pool_info(context.graphics_pool().handle()).unwrap();
        assert_eq!(graphics.max_sets, n);
        assert_eq!(graphics.allocated_sets, n);
        assert_eq!(
            graphics.pool_sizes,
            vec![
                (vk::DescriptorType::UNIFORM_BUFFER, n),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, n),
            ]
        );

        let compute = device.pool_info(context.compute_pool().handle()).unwrap();
        assert_eq!(compute.max_sets, 1);
        assert_eq!(compute.allocated_sets, 1);
        assert_eq!(compute.pool_sizes, vec![(vk::DescriptorType::STORAGE_BUFFER, 1)]);

        assert_eq!(device.descriptor_set_count(), image_count + 1);
    }
}

#[test]
fn every_graphics_set_has_its_own_uniform_buffer() {
    let context = RendererContext::new(
        MockDevice::new(),
        config(),
        SwapchainInfo::new(3, 800, 600),
        texture(0x10),
    )
    .unwrap();
    let device = context.device();

    let mut seen = Vec::new();
    for (set, buffer) in context.graphics_sets().iter().zip(context.uniform_buffers()) {
        assert_eq!(device.set_layout(*set), Some(context.graphics_layout()));
        assert_eq!(
            device.descriptor(*set, 0),
            Some(DescriptorResource::UniformBuffer {
                buffer: buffer.buffer,
                offset: 0,
                range: UniformPayload::SIZE,
            })
        );
        assert_eq!(buffer.size, UniformPayload::SIZE);
        assert!(!seen.contains(&buffer.memory));
        seen.push(buffer.memory);
    }

    let compute_set = context.compute_set();
    assert_eq!(device.set_layout(compute_set), Some(context.compute_layout()));
    assert_eq!(
        device.descriptor(compute_set, 0),
        Some(DescriptorResource::StorageBuffer {
            buffer: context.compute_buffer().buffer,
            offset: 0,
            range: 16 * 16 * 16,
        })
    );
}

#[test]
fn over_allocation_is_reported_not_truncated() {
    let device = MockDevice::new();
    let layout = create_graphics_layout(&device).unwrap();

    for n in 1..=4u32 {
        let mut pool = create_graphics_pool(&device, n).unwrap();
        let layouts = vec![layout.handle(); n as usize + 1];

        let err = pool.allocate(&device, &layouts).unwrap_err();
        assert!(matches!(
            err,
            GpuError::PoolExhausted { requested, remaining } if requested == n + 1 && remaining == n
        ));
        assert_eq!(pool.allocated_sets(), 0);

        pool.allocate(&device, &layouts[..n as usize]).unwrap();
        assert!(matches!(
            pool.allocate(&device, &layouts[..1]),
            Err(GpuError::PoolExhausted { requested: 1, remaining: 0 })
        ));
        pool.destroy(&device);
    }
}

#[test]
fn recreate_swapchain_rebuilds_per_image_resources() {
    let mut context = RendererContext::new(
        MockDevice::new(),
        config(),
        SwapchainInfo::new(3, 800, 600),
        texture(0x10),
    )
    .unwrap();
    let camera = OrthoCamera::default();

    // Leave a frame in flight so the rebuild has to wait for it.
    context.begin_frame().unwrap();
    let token = context.acquire_image(2).unwrap();
    context.update_uniform_buffer(&token, &camera).unwrap();
    let fence = context.prepare_submit(&token).unwrap();
    context.device().submit(fence).unwrap();
    context.end_frame(token);

    let compute_set = context.compute_set();
    let old_sets = context.graphics_sets().to_vec();

    context
        .recreate_swapchain(SwapchainInfo::new(2, 1024, 512))
        .unwrap();

    let device = context.device();
    assert_eq!(context.graphics_sets().len(), 2);
    assert_eq!(context.uniform_buffers().len(), 2);
    assert_eq!(context.graphics_pool().max_sets(), 2);
    assert_eq!(context.compute_set(), compute_set);
    assert_eq!(device.descriptor_set_count(), 3);
    for set in old_sets {
        assert_eq!(device.set_layout(set), None);
    }
    for set in context.graphics_sets() {
        assert_eq!(device.descriptor(*set, 1), Some(descriptor_for(texture(0x10))));
    }
    assert!((context.viewport_aspect() - 0.5).abs() < f32::EPSILON);

    // Image 2 no longer exists.
    context.begin_frame().unwrap();
    assert!(matches!(
        context.acquire_image(2),
        Err(GpuError::ImageIndexOutOfRange { index: 2, count: 2 })
    ));
    let token = context.acquire_image(1).unwrap();
    context.update_uniform_buffer(&token, &camera).unwrap();
}

#[test]
fn rebinding_texture_updates_every_set() {
    let mut context = RendererContext::new(
        MockDevice::new(),
        config(),
        SwapchainInfo::new(3, 800, 600),
        texture(0x10),
    )
    .unwrap();

    context.rebind_texture(texture(0x40)).unwrap();

    assert_eq!(context.texture(), texture(0x40));
    for set in context.graphics_sets() {
        assert_eq!(
            context.device().descriptor(*set, 1),
            Some(descriptor_for(texture(0x40)))
        );
    }
}

#[test]
fn destroy_releases_every_object() {
    let mut context = RendererContext::new(
        MockDevice::new(),
        config(),
        SwapchainInfo::new(3, 800, 600),
        texture(0x10),
    )
    .unwrap();
    let camera = OrthoCamera::default();

    for image in [0, 1, 2] {
        context.begin_frame().unwrap();
        let token = context.acquire_image(image).unwrap();
        context.update_uniform_buffer(&token, &camera).unwrap();
        let fence = context.prepare_submit(&token).unwrap();
        context.device().submit(fence).unwrap();
        context.end_frame(token);
    }
    let fence = context.begin_compute().unwrap();
    context.device().submit(fence).unwrap();

    let device = context.destroy().unwrap();
    assert_eq!(device.live_objects(), 0);
    assert_eq!(device.descriptor_set_count(), 0);
}

#[test]
fn destroy_after_swapchain_rebuild_is_leak_free() {
    let mut context = RendererContext::new(
        MockDevice::new(),
        config(),
        SwapchainInfo::new(2, 800, 600),
        texture(0x10),
    )
    .unwrap();
    context
        .recreate_swapchain(SwapchainInfo::new(4, 800, 600))
        .unwrap();

    let device = context.destroy().unwrap();
    assert_eq!(device.live_objects(), 0);
}

fn descriptor_for(texture: TextureBinding) -> DescriptorResource {
    DescriptorResource::CombinedImageSampler {
        view: texture.view,
        sampler: texture.sampler,
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}
