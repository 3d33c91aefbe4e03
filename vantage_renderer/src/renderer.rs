use anyhow::{Context as _, Result};
use vantage_core::vk;
use vantage_gpu::{
    Buffer, Device, Fence, Framebuffer, GpuPool, Handle, Image, ImageDesc, LoadOp,
    QueueType, ResourceUsage, RingBuffer, Sampler, SamplerDesc, Streamer, WorkPool, FRAME_QUEUE_LENGTH,
};

use crate::{
    pass::{opaque::OpaquePass, tonemap::TonemapPass, ui::UiPass},
    scene::{MeshResidency, Scene},
    types::{DecodedImage, Geometry, GlobalsUniform, Submesh, UiDrawList},
};

const GEOMETRY_VERTEX_CAPACITY: u32 = 1 << 20;
const GEOMETRY_INDEX_CAPACITY: u32 = 1 << 22;

/// Shader bytecode and tuning knobs fixed at `Renderer::new` time. The
/// three passes this runtime implements are the only ones wired up
/// here — shadow maps, voxel cone tracing, sky LUTs and the rest of a
/// full-featured engine's pass graph are external concerns this crate
/// does not schedule (spec §1 non-goals).
pub struct RendererDesc {
    pub opaque_vertex_shader: Vec<u8>,
    pub opaque_fragment_shader: Vec<u8>,
    pub tonemap_vertex_shader: Vec<u8>,
    pub tonemap_fragment_shader: Vec<u8>,
    pub ui_vertex_shader: Vec<u8>,
    pub ui_fragment_shader: Vec<u8>,
    pub exposure: f32,
}

/// Owns every GPU-driven rendering resource above the `Device` layer
/// and drives the fixed three-pass frame this runtime implements:
/// opaque geometry into an HDR target, tonemap into the swapchain
/// image, then an immediate-mode UI overlay on top (spec §6). Render
/// graphs that schedule an arbitrary set of passes, shadow/GI passes,
/// and scene/asset management are all left to the caller.
pub struct Renderer {
    device: Device,

    work_pools: Vec<WorkPool>,
    main_fence: Fence,
    frame_index: u64,

    uniform_ring: RingBuffer,
    instance_ring: RingBuffer,
    instance_ring_slot: u32,
    ui_vertex_ring: RingBuffer,
    ui_vertex_ring_slot: u32,
    ui_index_ring: RingBuffer,

    geometry_vertex_pool: GpuPool,
    geometry_vertex_pool_slot: u32,
    geometry_index_pool: GpuPool,

    streamer: Streamer,
    default_sampler: Handle<Sampler>,

    hdr_image: Handle<Image>,
    hdr_image_slot: u32,
    hdr_depth_image: Handle<Image>,
    hdr_framebuffer: Handle<Framebuffer>,
    swapchain_framebuffers: Vec<Handle<Framebuffer>>,

    opaque_pass: OpaquePass,
    tonemap_pass: TonemapPass,
    ui_pass: UiPass,

    exposure: f32,
    time_seconds: f32,
    resolution_dirty: bool,
}

impl Renderer {
    pub fn new(mut device: Device, desc: RendererDesc) -> Result<Self> {
        let extent = device.swapchain().extent();

        let work_pools = (0..FRAME_QUEUE_LENGTH)
            .map(|_| device.create_work_pool())
            .collect::<Result<Vec<_>>>()?;
        let main_fence = Fence::new(device.raw().clone(), FRAME_QUEUE_LENGTH)?;

        let uniform_alignment = device.physical_device().min_uniform_buffer_alignment();
        let mut uniform_ring = RingBuffer::new(
            device.raw().clone(),
            device.allocator().clone(),
            vantage_gpu::DEFAULT_UNIFORM_RING_SIZE,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            FRAME_QUEUE_LENGTH as usize,
            Some(uniform_alignment),
        )?;
        device.bind_globals_buffer_raw(uniform_ring.raw(), std::mem::size_of::<GlobalsUniform>() as u64);

        let mut instance_ring = RingBuffer::new(
            device.raw().clone(),
            device.allocator().clone(),
            vantage_gpu::DEFAULT_INSTANCE_RING_SIZE,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            FRAME_QUEUE_LENGTH as usize,
            None,
        )?;
        let instance_ring_slot = device
            .bind_storage_buffer_raw(instance_ring.raw(), instance_ring.size())
            .context("bind instance ring into bindless storage buffer array")?;

        let mut ui_vertex_ring = RingBuffer::new(
            device.raw().clone(),
            device.allocator().clone(),
            vantage_gpu::DEFAULT_VERTEX_RING_SIZE,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            FRAME_QUEUE_LENGTH as usize,
            None,
        )?;
        let ui_vertex_ring_slot = device
            .bind_storage_buffer_raw(ui_vertex_ring.raw(), ui_vertex_ring.size())
            .context("bind ui vertex ring into bindless storage buffer array")?;

        let ui_index_ring = RingBuffer::new(
            device.raw().clone(),
            device.allocator().clone(),
            vantage_gpu::DEFAULT_INDEX_RING_SIZE,
            vk::BufferUsageFlags::INDEX_BUFFER,
            FRAME_QUEUE_LENGTH as usize,
            None,
        )?;

        let mut geometry_vertex_pool = GpuPool::new(
            device.raw().clone(),
            device.allocator().clone(),
            std::mem::size_of::<[f32; 4]>() as u32,
            GEOMETRY_VERTEX_CAPACITY,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?;
        let geometry_vertex_pool_slot = device
            .bind_storage_buffer_raw(geometry_vertex_pool.device_buffer().raw(), geometry_vertex_pool.device_buffer().size())
            .context("bind geometry vertex pool into bindless storage buffer array")?;

        let geometry_index_pool = GpuPool::new(
            device.raw().clone(),
            device.allocator().clone(),
            std::mem::size_of::<u32>() as u32,
            GEOMETRY_INDEX_CAPACITY,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let streamer = Streamer::new(device.raw().clone(), device.allocator().clone())?;
        let default_sampler = device.create_sampler(&SamplerDesc::new())?;

        let (hdr_image, hdr_image_slot, hdr_depth_image, hdr_framebuffer) = create_hdr_target(&mut device, &default_sampler, extent)?;
        let swapchain_framebuffers = create_swapchain_framebuffers(&mut device, extent)?;

        let hdr_render_pass = {
            let fb = device.get_framebuffer_mut(hdr_framebuffer).context("hdr framebuffer missing")?;
            fb.find_or_create_renderpass(&[LoadOp::Clear, LoadOp::Clear])?
        };
        let opaque_pass = OpaquePass::new(&mut device, &hdr_render_pass, desc.opaque_vertex_shader, desc.opaque_fragment_shader)?;

        let swapchain_clear_pass = {
            let fb = device.get_framebuffer_mut(swapchain_framebuffers[0]).context("swapchain framebuffer missing")?;
            fb.find_or_create_renderpass(&[LoadOp::Clear])?
        };
        let tonemap_pass = TonemapPass::new(&mut device, &swapchain_clear_pass, desc.tonemap_vertex_shader, desc.tonemap_fragment_shader)?;

        let swapchain_load_pass = {
            let fb = device.get_framebuffer_mut(swapchain_framebuffers[0]).context("swapchain framebuffer missing")?;
            fb.find_or_create_renderpass(&[LoadOp::Load])?
        };
        let ui_pass = UiPass::new(&mut device, &swapchain_load_pass, desc.ui_vertex_shader, desc.ui_fragment_shader)?;

        Ok(Self {
            device,
            work_pools,
            main_fence,
            frame_index: 0,
            uniform_ring,
            instance_ring,
            instance_ring_slot,
            ui_vertex_ring,
            ui_vertex_ring_slot,
            ui_index_ring,
            geometry_vertex_pool,
            geometry_vertex_pool_slot,
            geometry_index_pool,
            streamer,
            default_sampler,
            hdr_image,
            hdr_image_slot,
            hdr_depth_image,
            hdr_framebuffer,
            swapchain_framebuffers,
            opaque_pass,
            tonemap_pass,
            ui_pass,
            exposure: desc.exposure,
            time_seconds: 0.0,
            resolution_dirty: false,
        })
    }

    /// Uploads a mesh's positions and indices into the shared geometry
    /// pools and returns the ranges a `Scene`'s draws should reference.
    /// Uploads are applied synchronously from the host-visible mirror
    /// at the start of the next frame (`GpuPool::upload_changes`), so
    /// no `Streamer`-style readiness polling is needed for geometry —
    /// only for textures, which really do take multiple frames to land.
    pub fn upload_geometry(&mut self, geometry: &Geometry) -> Result<MeshResidency> {
        let (ok, vertex_offset) = self.geometry_vertex_pool.allocate(geometry.positions.len() as u32);
        if !ok {
            anyhow::bail!("geometry vertex pool exhausted");
        }
        self.geometry_vertex_pool.update(vertex_offset, &geometry.positions);

        let (ok, index_offset) = self.geometry_index_pool.allocate(geometry.indices.len() as u32);
        if !ok {
            anyhow::bail!("geometry index pool exhausted");
        }
        self.geometry_index_pool.update(index_offset, &geometry.indices);

        let submeshes = geometry
            .submeshes
            .iter()
            .map(|submesh| Submesh {
                first_index: index_offset + submesh.first_index,
                index_count: submesh.index_count,
            })
            .collect();

        Ok(MeshResidency {
            vertex_offset: vertex_offset as i32,
            submeshes,
        })
    }

    /// Creates a sampled image and queues its pixels for asynchronous
    /// upload through the `Streamer`. Returns the handle `SceneDraw::texture`
    /// should carry — draws referencing it are skipped until the upload
    /// completes (spec §4.9/§4.10).
    pub fn create_texture(&mut self, image: &DecodedImage) -> Result<Handle<Image>> {
        let desc = ImageDesc::new(image.width, image.height, 1)
            .set_format(image.format.vk_format())
            .set_usage_flags(vk::ImageUsageFlags::SAMPLED);
        let handle = self.device.create_image(desc)?;
        self.device.bind_sampled_image(handle, self.default_sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        self.streamer.upload_image(handle, &image.data, image.width, image.height);
        Ok(handle)
    }

    /// Advances and renders one frame: waits for this frame slot's GPU
    /// work to retire, records the opaque/tonemap/ui passes, submits,
    /// and presents. Mirrors spec §4.10's `start_frame`→`update` flow.
    pub fn update(&mut self, scene: &dyn Scene, ui_draw_list: &UiDrawList, dt_seconds: f32) -> Result<()> {
        if self.resolution_dirty {
            self.on_resize()?;
        }

        self.time_seconds += dt_seconds;

        let wait_value = self.main_fence.wait_value(self.frame_index);
        self.device.wait_for_fence(&self.main_fence, wait_value)?;

        let pool_index = (self.frame_index % FRAME_QUEUE_LENGTH) as usize;
        self.device.reset_work_pool(&self.work_pools[pool_index])?;

        self.uniform_ring.start_frame();
        self.instance_ring.start_frame();
        self.ui_vertex_ring.start_frame();
        self.ui_index_ring.start_frame();

        if self.device.acquire_next_swapchain()? {
            self.resolution_dirty = true;
            return Ok(());
        }

        let extent = self.device.swapchain().extent();
        let mut work = self.device.get_graphics_work(&self.work_pools[pool_index])?;

        self.geometry_vertex_pool.upload_changes(&work);
        self.geometry_index_pool.upload_changes(&work);
        let transfer_signal_value = self.streamer.update(
            &work,
            |handle| self.device.get_buffer(handle).map(Buffer::raw),
            |handle| self.device.get_image(handle).map(Image::raw),
        );
        self.device.update_globals();

        let view = scene.view();
        let projection = scene.projection();
        let globals = GlobalsUniform {
            view,
            projection,
            view_projection: projection * view,
            camera_position: scene.camera_position(),
            time_seconds: self.time_seconds,
            screen_width: extent.width as f32,
            screen_height: extent.height as f32,
            _padding: 0.0,
        };
        let globals_offset = self.uniform_ring.allocate_copy(&globals);
        self.device.bind_globals(&work, globals_offset as u32);

        self.record_opaque_pass(&work, scene, extent)?;
        self.record_tonemap_and_ui_pass(&work, ui_draw_list, extent)?;

        self.device.barrier_swapchain_image(&work, ResourceUsage::Present);

        self.device.submit(
            QueueType::Graphics,
            &mut work,
            &[
                (&self.main_fence, vk::PipelineStageFlags2::ALL_COMMANDS, self.frame_index),
                // `submit` re-derives `signal_value(frame_index) = frame_index + 1`, so
                // feed back the index that reproduces the value `Streamer::update` already
                // computed rather than double-applying the +1.
                (self.streamer.transfer_fence(), vk::PipelineStageFlags2::ALL_COMMANDS, transfer_signal_value - 1),
            ],
        )?;

        self.uniform_ring.end_frame();
        self.instance_ring.end_frame();
        self.ui_vertex_ring.end_frame();
        self.ui_index_ring.end_frame();

        if self.device.present()? {
            self.resolution_dirty = true;
        }

        self.frame_index += 1;
        Ok(())
    }

    fn record_opaque_pass(&mut self, work: &vantage_gpu::Work, scene: &dyn Scene, extent: vk::Extent2D) -> Result<()> {
        self.device.clear_barrier_image(work, self.hdr_image, ResourceUsage::ColorAttachment);
        self.device.clear_barrier_image(work, self.hdr_depth_image, ResourceUsage::DepthAttachment);

        let render_pass = {
            let fb = self.device.get_framebuffer_mut(self.hdr_framebuffer).context("hdr framebuffer missing")?;
            fb.find_or_create_renderpass(&[LoadOp::Clear, LoadOp::Clear])?
        };

        let fb = self.device.get_framebuffer_mut(self.hdr_framebuffer).context("hdr framebuffer missing")?;
        let clear_values = [
            vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 0.0] } },
            vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 } },
        ];
        work.begin_pass(&render_pass, fb, &clear_values);
        work.set_viewport_and_scissor(extent.width, extent.height);

        self.opaque_pass.record(
            &self.device,
            work,
            scene.draws(),
            &self.streamer,
            &mut self.instance_ring,
            self.instance_ring_slot,
            self.geometry_index_pool.device_buffer().raw(),
            self.geometry_vertex_pool_slot,
        );

        work.end_pass();
        Ok(())
    }

    fn record_tonemap_and_ui_pass(&mut self, work: &vantage_gpu::Work, ui_draw_list: &UiDrawList, extent: vk::Extent2D) -> Result<()> {
        self.device.barrier_image(work, self.hdr_image, ResourceUsage::GraphicsShaderRead);

        let swapchain_index = self.device.swapchain().current_image_index() as usize;
        let swapchain_framebuffer = self.swapchain_framebuffers[swapchain_index];

        self.device.clear_barrier_swapchain_image(work, ResourceUsage::ColorAttachment);

        let clear_pass = {
            let fb = self.device.get_framebuffer_mut(swapchain_framebuffer).context("swapchain framebuffer missing")?;
            fb.find_or_create_renderpass(&[LoadOp::Clear])?
        };
        {
            let fb = self.device.get_framebuffer_mut(swapchain_framebuffer).context("swapchain framebuffer missing")?;
            let clear_values = [vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] } }];
            work.begin_pass(&clear_pass, fb, &clear_values);
        }
        work.set_viewport_and_scissor(extent.width, extent.height);
        self.tonemap_pass.record(&self.device, work, self.hdr_image_slot, self.exposure);
        work.end_pass();

        let load_pass = {
            let fb = self.device.get_framebuffer_mut(swapchain_framebuffer).context("swapchain framebuffer missing")?;
            fb.find_or_create_renderpass(&[LoadOp::Load])?
        };
        {
            let fb = self.device.get_framebuffer_mut(swapchain_framebuffer).context("swapchain framebuffer missing")?;
            let clear_values = [vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] } }];
            work.begin_pass(&load_pass, fb, &clear_values);
        }
        work.set_viewport_and_scissor(extent.width, extent.height);
        self.ui_pass.record(
            &self.device,
            work,
            ui_draw_list,
            &mut self.ui_vertex_ring,
            &mut self.ui_index_ring,
            self.ui_vertex_ring_slot,
            extent.width as f32,
            extent.height as f32,
        );
        work.end_pass();

        Ok(())
    }

    /// Recreates the swapchain and every extent-dependent framebuffer
    /// (spec §4.10 `on_resize`). Pipelines need no recompilation —
    /// viewport/scissor are dynamic state, and render-pass compatibility
    /// does not depend on extent.
    fn on_resize(&mut self) -> Result<()> {
        self.device.recreate_swapchain()?;
        let extent = self.device.swapchain().extent();

        self.device.destroy_framebuffer(self.hdr_framebuffer);
        self.device.destroy_image(self.hdr_image);
        self.device.destroy_image(self.hdr_depth_image);
        for handle in self.swapchain_framebuffers.drain(..) {
            self.device.destroy_framebuffer(handle);
        }

        let (hdr_image, hdr_image_slot, hdr_depth_image, hdr_framebuffer) = create_hdr_target(&mut self.device, &self.default_sampler, extent)?;
        self.hdr_image = hdr_image;
        self.hdr_image_slot = hdr_image_slot;
        self.hdr_depth_image = hdr_depth_image;
        self.hdr_framebuffer = hdr_framebuffer;
        self.swapchain_framebuffers = create_swapchain_framebuffers(&mut self.device, extent)?;

        self.resolution_dirty = false;
        Ok(())
    }
}

fn create_hdr_target(device: &mut Device, sampler: &Handle<Sampler>, extent: vk::Extent2D) -> Result<(Handle<Image>, u32, Handle<Image>, Handle<Framebuffer>)> {
    let color = device.create_image(
        ImageDesc::new(extent.width, extent.height, 1)
            .set_format(vk::Format::R16G16B16A16_SFLOAT)
            .set_usage_flags(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED),
    )?;
    let color_slot = device
        .bind_sampled_image(color, *sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .context("bind hdr color target into bindless sampled image array")?;

    let depth = device.create_image(
        ImageDesc::new(extent.width, extent.height, 1)
            .set_format(vk::Format::D32_SFLOAT)
            .set_usage_flags(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
    )?;

    let color_view = device.get_image(color).context("hdr color image missing")?.raw_view();
    let depth_view = device.get_image(depth).context("hdr depth image missing")?.raw_view();
    let framebuffer = device.create_framebuffer(
        &[(vk::Format::R16G16B16A16_SFLOAT, color_view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)],
        Some((vk::Format::D32_SFLOAT, depth_view, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
        extent,
    )?;

    Ok((color, color_slot, depth, framebuffer))
}

fn create_swapchain_framebuffers(device: &mut Device, extent: vk::Extent2D) -> Result<Vec<Handle<Framebuffer>>> {
    let format = device.swapchain().format();
    let image_count = device.swapchain().image_count();
    (0..image_count)
        .map(|index| {
            let view = device.swapchain().image_handle(index).raw_view();
            device.create_framebuffer(&[(format, view, vk::ImageLayout::PRESENT_SRC_KHR)], None, extent)
        })
        .collect()
}
