use std::{ffi::CString, sync::Arc};

use anyhow::{Context as _, Result};
use gpu_allocator::{
    vulkan::{Allocator, AllocatorCreateDesc},
    AllocatorDebugSettings,
};
use parking_lot::Mutex;
use vantage_core::{ash, vk};

use crate::{
    bindless::{BindlessKind, BindlessSet},
    buffer::{Buffer, BufferDesc, BufferLocation},
    constants::{
        DEFAULT_PUSH_CONSTANT_SIZE, DEFAULT_SAMPLED_IMAGE_CAPACITY, DEFAULT_STORAGE_BUFFER_CAPACITY,
        DEFAULT_STORAGE_IMAGE_CAPACITY, FENCE_WAIT_TIMEOUT_SECS, FRAME_QUEUE_LENGTH,
    },
    context::Context,
    framebuffer::Framebuffer,
    handle::{Handle, Table},
    image::{Image, ImageDesc},
    physical_device::PhysicalDevice,
    program::{ComputeProgram, GraphicsProgram},
    queue::{Queue, QueueFamily, QueueFamilyIndices, QueueType, SemaphoreSubmitInfo},
    sampler::{Sampler, SamplerDesc},
    shader::Shader,
    surface::Surface,
    swapchain::{Swapchain, SwapchainDesc},
    sync::{self, Fence, ResourceUsage, Semaphore, SemaphoreType},
    work::{Work, WorkPool},
};

/// Configuration fixed at device construction (spec §6). `push_constant_size`
/// binds every program to the same push-constant range for the lifetime
/// of the device, resolving spec §9's push-constant layout collision
/// note by construction rather than by a runtime check.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceDescription {
    pub physical_device_index: Option<usize>,
    pub push_constant_size: u32,
    pub buffer_device_address: bool,
    pub sampled_image_capacity: u32,
    pub storage_image_capacity: u32,
    pub storage_buffer_capacity: u32,
}

impl Default for DeviceDescription {
    fn default() -> Self {
        Self {
            physical_device_index: None,
            push_constant_size: DEFAULT_PUSH_CONSTANT_SIZE,
            buffer_device_address: false,
            sampled_image_capacity: DEFAULT_SAMPLED_IMAGE_CAPACITY,
            storage_image_capacity: DEFAULT_STORAGE_IMAGE_CAPACITY,
            storage_buffer_capacity: DEFAULT_STORAGE_BUFFER_CAPACITY,
        }
    }
}

/// The stable four-set layout of spec §4.2.1: set 0 is one dynamic
/// uniform buffer ("globals"), sets 1-3 are the three bindless arrays.
/// Every program links against `pipeline_layout` plus, optionally, its
/// own local set 4 (`descriptor_set::DescriptorSetLayout`).
pub struct GlobalDescriptorSets {
    device: ash::Device,
    pool: vk::DescriptorPool,
    globals_layout: vk::DescriptorSetLayout,
    sampled_image_layout: vk::DescriptorSetLayout,
    storage_image_layout: vk::DescriptorSetLayout,
    storage_buffer_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,

    globals_set: vk::DescriptorSet,
    sampled_image_set: vk::DescriptorSet,
    storage_image_set: vk::DescriptorSet,
    storage_buffer_set: vk::DescriptorSet,

    bindless: BindlessSet,
}

impl GlobalDescriptorSets {
    fn new(device: ash::Device, desc: &DeviceDescription, push_constant_size: u32) -> Result<Self> {
        let globals_layout = {
            let binding = vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build();
            let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(std::slice::from_ref(&binding));
            unsafe { device.create_descriptor_set_layout(&create_info, None) }.context("create globals set layout")?
        };

        let make_bindless_layout = |descriptor_type: vk::DescriptorType, count: u32| -> Result<vk::DescriptorSetLayout> {
            let binding = vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build();
            let binding_flags = vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
            let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(std::slice::from_ref(&binding_flags));
            let create_info = vk::DescriptorSetLayoutCreateInfo::builder()
                .bindings(std::slice::from_ref(&binding))
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .push_next(&mut flags_info);
            unsafe { device.create_descriptor_set_layout(&create_info, None) }.context("create bindless set layout")
        };

        let sampled_image_layout = make_bindless_layout(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, desc.sampled_image_capacity)?;
        let storage_image_layout = make_bindless_layout(vk::DescriptorType::STORAGE_IMAGE, desc.storage_image_capacity)?;
        let storage_buffer_layout = make_bindless_layout(vk::DescriptorType::STORAGE_BUFFER, desc.storage_buffer_capacity)?;

        let pool_sizes = [
            vk::DescriptorPoolSize::builder().ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC).descriptor_count(1).build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(desc.sampled_image_capacity)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(desc.storage_image_capacity)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(desc.storage_buffer_capacity)
                .build(),
        ];
        let pool_create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(4)
            .pool_sizes(&pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND);
        let pool = unsafe { device.create_descriptor_pool(&pool_create_info, None) }.context("create global descriptor pool")?;

        let layouts = [globals_layout, sampled_image_layout, storage_image_layout, storage_buffer_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder().descriptor_pool(pool).set_layouts(&layouts);
        let sets = unsafe { device.allocate_descriptor_sets(&allocate_info) }.context("allocate global descriptor sets")?;
        let (globals_set, sampled_image_set, storage_image_set, storage_buffer_set) = (sets[0], sets[1], sets[2], sets[3]);

        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size(push_constant_size)
            .build();
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&layouts)
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        let pipeline_layout = unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }.context("create global pipeline layout")?;

        Ok(Self {
            device,
            pool,
            globals_layout,
            sampled_image_layout,
            storage_image_layout,
            storage_buffer_layout,
            pipeline_layout,
            globals_set,
            sampled_image_set,
            storage_image_set,
            storage_buffer_set,
            bindless: BindlessSet::new(desc.sampled_image_capacity, desc.storage_image_capacity, desc.storage_buffer_capacity),
        })
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn globals_set(&self) -> vk::DescriptorSet {
        self.globals_set
    }

    /// Flushes `pending_bind`/`pending_unbind` for all three bindless
    /// arrays (spec §4.2 `update_globals`).
    fn flush_bindless(&mut self) {
        self.bindless
            .flush(&self.device, self.sampled_image_set, self.storage_image_set, self.storage_buffer_set);
    }

    fn write_sentinels(&mut self, empty_view: vk::ImageView, empty_sampler: vk::Sampler, empty_buffer: vk::Buffer) -> Result<()> {
        self.bindless
            .write_sentinels(&self.device, self.sampled_image_set, self.storage_image_set, self.storage_buffer_set, empty_view, empty_sampler, empty_buffer)
    }
}

impl Drop for GlobalDescriptorSets {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.globals_layout, None);
            self.device.destroy_descriptor_set_layout(self.sampled_image_layout, None);
            self.device.destroy_descriptor_set_layout(self.storage_image_layout, None);
            self.device.destroy_descriptor_set_layout(self.storage_buffer_layout, None);
        }
    }
}

/// Destroys the `VkDevice` on drop. Pulled out of `Device` itself so
/// field declaration order can guarantee every other Vulkan object
/// this runtime owns is torn down first: Rust drops struct fields in
/// declaration order, so this must be declared last among the fields
/// that reach the device, with `surface`/`context` (instance-level
/// objects the device does not own) declared after it.
struct RawDeviceDestroyer(ash::Device);

impl Drop for RawDeviceDestroyer {
    fn drop(&mut self) {
        unsafe { self.0.destroy_device(None) };
    }
}

/// The logical device: queues, resource tables, the global bindless
/// descriptor layout, and the swapchain it presents to. Owns every
/// long-lived GPU object other than the transient allocators (spec §2
/// lists those as separate components, constructed by the renderer
/// against this device's raw handles).
///
/// Field order matters: Rust drops fields top-to-bottom, and every
/// Vulkan object below must be destroyed before `device_destroyer`
/// destroys the `VkDevice`, which in turn must be destroyed before
/// `surface`/`physical_device`/`context` tear down the instance.
pub struct Device {
    shaders: Table<Shader>,
    buffers: Table<Buffer>,
    images: Table<Image>,
    samplers: Table<Sampler>,
    graphics_programs: Table<GraphicsProgram>,
    compute_programs: Table<ComputeProgram>,
    framebuffers: Table<Framebuffer>,

    globals: GlobalDescriptorSets,

    swapchain: Swapchain,
    acquire_semaphores: Vec<Semaphore>,
    present_semaphores: Vec<Semaphore>,

    allocator: Arc<Mutex<Allocator>>,
    graphics_queue: Queue,
    compute_queue: Queue,
    transfer_queue: Queue,

    raw: ash::Device,
    device_destroyer: RawDeviceDestroyer,

    surface: Surface,
    physical_device: PhysicalDevice,
    context: Context,

    queue_family_indices: QueueFamilyIndices,
    frame_slot: usize,
    pending_acquire: Option<usize>,

    empty_sampler: Handle<Sampler>,
    empty_image: Handle<Image>,
    empty_buffer: Handle<Buffer>,
}

impl Device {
    pub fn new(
        context: Context,
        surface: Surface,
        window_width: u32,
        window_height: u32,
        desc: DeviceDescription,
    ) -> Result<Self> {
        let physical_devices = context.enumerate_physical_devices(&surface)?;
        let physical_device = select_physical_device(&physical_devices, desc.physical_device_index)?;
        let queue_family_indices = select_queue_family_indices(&physical_device);

        log::info!("gpu: {}", physical_device.name);
        log::info!("graphics family: {}", queue_family_indices.graphics.index());
        log::info!("present family: {}", queue_family_indices.present.index());
        log::info!("compute family: {}", queue_family_indices.compute.index());
        log::info!("transfer family: {}", queue_family_indices.transfer.index());

        let raw = new_vulkan_device(&context, &physical_device, &queue_family_indices, desc.buffer_device_address)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.raw().clone(),
            device: raw.clone(),
            physical_device: physical_device.raw(),
            debug_settings: AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: desc.buffer_device_address,
        })?;
        let allocator = Arc::new(Mutex::new(allocator));

        let graphics_queue = Queue::new(raw.clone(), unsafe { raw.get_device_queue(queue_family_indices.graphics.index(), 0) }, queue_family_indices.graphics.index());
        let compute_queue = Queue::new(raw.clone(), unsafe { raw.get_device_queue(queue_family_indices.compute.index(), 0) }, queue_family_indices.compute.index());
        let transfer_queue = Queue::new(raw.clone(), unsafe { raw.get_device_queue(queue_family_indices.transfer.index(), 0) }, queue_family_indices.transfer.index());

        let swapchain_desc = SwapchainDesc::new(window_width, window_height, queue_family_indices.graphics.index(), queue_family_indices.present.index());
        let swapchain = Swapchain::new(&context, &surface, &physical_device, raw.clone(), swapchain_desc)?;

        let acquire_semaphores = (0..FRAME_QUEUE_LENGTH)
            .map(|_| Semaphore::new(raw.clone(), SemaphoreType::Binary))
            .collect::<Result<Vec<_>>>()?;
        let present_semaphores = (0..FRAME_QUEUE_LENGTH)
            .map(|_| Semaphore::new(raw.clone(), SemaphoreType::Binary))
            .collect::<Result<Vec<_>>>()?;

        let push_constant_size = desc.push_constant_size;
        let mut globals = GlobalDescriptorSets::new(raw.clone(), &desc, push_constant_size)?;

        let device_destroyer = RawDeviceDestroyer(raw.clone());

        let mut device = Self {
            shaders: Table::new(),
            buffers: Table::new(),
            images: Table::new(),
            samplers: Table::new(),
            graphics_programs: Table::new(),
            compute_programs: Table::new(),
            framebuffers: Table::new(),
            globals,
            swapchain,
            acquire_semaphores,
            present_semaphores,
            allocator,
            graphics_queue,
            compute_queue,
            transfer_queue,
            raw,
            device_destroyer,
            surface,
            physical_device,
            context,
            queue_family_indices,
            frame_slot: 0,
            pending_acquire: None,
            empty_sampler: Handle::INVALID,
            empty_image: Handle::INVALID,
            empty_buffer: Handle::INVALID,
        };

        device.create_sentinels()?;
        let (empty_view, empty_sampler_raw, empty_buffer_raw) = (
            device.images.get(device.empty_image).expect("sentinel image").raw_view(),
            device.samplers.get(device.empty_sampler).expect("sentinel sampler").raw(),
            device.buffers.get(device.empty_buffer).expect("sentinel buffer").raw(),
        );
        device.globals.write_sentinels(empty_view, empty_sampler_raw, empty_buffer_raw)?;

        Ok(device)
    }

    fn create_sentinels(&mut self) -> Result<()> {
        let sampler = Sampler::new(self.raw.clone(), &SamplerDesc::new())?;
        self.empty_sampler = self.samplers.insert(sampler);

        let image = Image::create(
            self.raw.clone(),
            self.allocator.clone(),
            ImageDesc::new(1, 1, 1)
                .set_format(vk::Format::R8G8B8A8_UNORM)
                .set_usage_flags(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE),
        )?;
        self.empty_image = self.images.insert(image);

        let buffer = Buffer::new(
            self.raw.clone(),
            self.allocator.clone(),
            BufferDesc::new()
                .set_size(16)
                .set_location(BufferLocation::GpuOnly)
                .set_usage_flags(vk::BufferUsageFlags::STORAGE_BUFFER),
        )?;
        self.empty_buffer = self.buffers.insert(buffer);

        Ok(())
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn allocator(&self) -> &Arc<Mutex<Allocator>> {
        &self.allocator
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.globals.pipeline_layout()
    }

    pub fn queue_family(&self, queue_type: QueueType) -> &QueueFamily {
        match queue_type {
            QueueType::Graphics => &self.queue_family_indices.graphics,
            QueueType::Compute => &self.queue_family_indices.compute,
            QueueType::Transfer => &self.queue_family_indices.transfer,
        }
    }

    // ---- resource tables ----

    pub fn create_shader(&mut self, filename: &str, bytecode: Vec<u8>, stage: vk::ShaderStageFlags) -> Result<Handle<Shader>> {
        let shader = Shader::from_bytecode(self.raw.clone(), filename, bytecode, stage)?;
        Ok(self.shaders.insert(shader))
    }

    pub fn destroy_shader(&mut self, handle: Handle<Shader>) {
        if self.shaders.remove(handle).is_none() {
            log::error!("destroy_shader: invalid handle");
        }
    }

    pub fn get_shader(&self, handle: Handle<Shader>) -> Option<&Shader> {
        self.shaders.get(handle)
    }

    pub fn create_buffer(&mut self, desc: BufferDesc) -> Result<Handle<Buffer>> {
        let buffer = Buffer::new(self.raw.clone(), self.allocator.clone(), desc)?;
        Ok(self.buffers.insert(buffer))
    }

    pub fn destroy_buffer(&mut self, handle: Handle<Buffer>) {
        if let Some(buffer) = self.buffers.get(handle) {
            let slot = buffer.storage_slot();
            if slot != u32::MAX {
                self.globals.bindless.unbind(BindlessKind::StorageBuffer, slot);
            }
        } else {
            log::error!("destroy_buffer: invalid handle");
            return;
        }
        self.buffers.remove(handle);
    }

    pub fn get_buffer(&self, handle: Handle<Buffer>) -> Option<&Buffer> {
        self.buffers.get(handle)
    }

    pub fn get_buffer_mut(&mut self, handle: Handle<Buffer>) -> Option<&mut Buffer> {
        self.buffers.get_mut(handle)
    }

    pub fn create_image(&mut self, desc: ImageDesc) -> Result<Handle<Image>> {
        let image = Image::create(self.raw.clone(), self.allocator.clone(), desc)?;
        Ok(self.images.insert(image))
    }

    pub fn destroy_image(&mut self, handle: Handle<Image>) {
        if let Some(image) = self.images.get(handle) {
            let (sampled, storage) = (image.sampled_slot(), image.storage_slot());
            if sampled != u32::MAX {
                self.globals.bindless.unbind(BindlessKind::SampledImage, sampled);
            }
            if storage != u32::MAX {
                self.globals.bindless.unbind(BindlessKind::StorageImage, storage);
            }
        } else {
            log::error!("destroy_image: invalid handle");
            return;
        }
        self.images.remove(handle);
    }

    pub fn get_image(&self, handle: Handle<Image>) -> Option<&Image> {
        self.images.get(handle)
    }

    pub fn get_image_mut(&mut self, handle: Handle<Image>) -> Option<&mut Image> {
        self.images.get_mut(handle)
    }

    pub fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<Handle<Sampler>> {
        let sampler = Sampler::new(self.raw.clone(), desc)?;
        Ok(self.samplers.insert(sampler))
    }

    pub fn destroy_sampler(&mut self, handle: Handle<Sampler>) {
        if self.samplers.remove(handle).is_none() {
            log::error!("destroy_sampler: invalid handle");
        }
    }

    pub fn get_sampler(&self, handle: Handle<Sampler>) -> Option<&Sampler> {
        self.samplers.get(handle)
    }

    pub fn create_graphics_program(&mut self, shader_stages: Vec<vk::PipelineShaderStageCreateInfo>) -> Handle<GraphicsProgram> {
        let program = GraphicsProgram::new(self.raw.clone(), self.globals.pipeline_layout(), shader_stages);
        self.graphics_programs.insert(program)
    }

    pub fn destroy_graphics_program(&mut self, handle: Handle<GraphicsProgram>) {
        if self.graphics_programs.remove(handle).is_none() {
            log::error!("destroy_graphics_program: invalid handle");
        }
    }

    pub fn get_graphics_program(&self, handle: Handle<GraphicsProgram>) -> Option<&GraphicsProgram> {
        self.graphics_programs.get(handle)
    }

    pub fn get_graphics_program_mut(&mut self, handle: Handle<GraphicsProgram>) -> Option<&mut GraphicsProgram> {
        self.graphics_programs.get_mut(handle)
    }

    pub fn create_compute_program(&mut self, shader_stage: vk::PipelineShaderStageCreateInfo) -> Result<Handle<ComputeProgram>> {
        let program = ComputeProgram::new(self.raw.clone(), self.globals.pipeline_layout(), shader_stage)?;
        Ok(self.compute_programs.insert(program))
    }

    pub fn destroy_compute_program(&mut self, handle: Handle<ComputeProgram>) {
        if self.compute_programs.remove(handle).is_none() {
            log::error!("destroy_compute_program: invalid handle");
        }
    }

    pub fn get_compute_program(&self, handle: Handle<ComputeProgram>) -> Option<&ComputeProgram> {
        self.compute_programs.get(handle)
    }

    pub fn create_framebuffer(
        &mut self,
        color_attachments: &[(vk::Format, vk::ImageView, vk::ImageLayout)],
        depth_attachment: Option<(vk::Format, vk::ImageView, vk::ImageLayout)>,
        extent: vk::Extent2D,
    ) -> Result<Handle<Framebuffer>> {
        let framebuffer = Framebuffer::new(self.raw.clone(), color_attachments, depth_attachment, extent)?;
        Ok(self.framebuffers.insert(framebuffer))
    }

    pub fn destroy_framebuffer(&mut self, handle: Handle<Framebuffer>) {
        if self.framebuffers.remove(handle).is_none() {
            log::error!("destroy_framebuffer: invalid handle");
        }
    }

    pub fn get_framebuffer_mut(&mut self, handle: Handle<Framebuffer>) -> Option<&mut Framebuffer> {
        self.framebuffers.get_mut(handle)
    }

    // ---- bindless binding ----

    pub fn bind_sampled_image(&mut self, handle: Handle<Image>, sampler: Handle<Sampler>, layout: vk::ImageLayout) -> Option<u32> {
        let (view, sampler_raw) = {
            let image = self.images.get(handle)?;
            let sampler_raw = self.samplers.get(sampler)?.raw();
            (image.raw_view(), sampler_raw)
        };
        let slot = self.globals.bindless.bind_image(BindlessKind::SampledImage, view, sampler_raw, layout)?;
        self.images.get_mut(handle)?.set_sampled_slot(slot);
        Some(slot)
    }

    pub fn bind_storage_image(&mut self, handle: Handle<Image>, layout: vk::ImageLayout) -> Option<u32> {
        let view = self.images.get(handle)?.raw_view();
        let slot = self.globals.bindless.bind_image(BindlessKind::StorageImage, view, vk::Sampler::null(), layout)?;
        self.images.get_mut(handle)?.set_storage_slot(slot);
        Some(slot)
    }

    pub fn bind_storage_buffer(&mut self, handle: Handle<Buffer>) -> Option<u32> {
        let (raw, size) = {
            let buffer = self.buffers.get(handle)?;
            (buffer.raw(), buffer.size())
        };
        let slot = self.globals.bindless.bind_buffer(raw, size)?;
        self.buffers.get_mut(handle)?.set_storage_slot(slot);
        Some(slot)
    }

    /// Binds a raw `vk::Buffer` the Device's own resource table does
    /// not own — the `RingBuffer`/`GpuPool` transient allocators are
    /// constructed directly against the device's raw handles (spec §2)
    /// rather than through `create_buffer`, so their backing buffers
    /// have no `Handle<Buffer>` to bind through.
    pub fn bind_storage_buffer_raw(&mut self, raw: vk::Buffer, size: u64) -> Option<u32> {
        self.globals.bindless.bind_buffer(raw, size)
    }

    // ---- barriers ----

    /// Transitions `handle`'s usage tag to `new_usage`, emitting the
    /// barrier whose source side is read from the resource's current
    /// tag (spec §4.5 `barrier(image, usage)`). The tag is mutated
    /// unconditionally, even when no barrier was emitted (the
    /// read-read no-op case).
    pub fn barrier_image(&mut self, work: &Work, handle: Handle<Image>, new_usage: ResourceUsage) {
        self.barrier_image_impl(work, handle, new_usage, false);
    }

    /// Like `barrier_image`, but the source access is taken as `None`
    /// regardless of the image's current tag — used when the caller
    /// knows the previous contents are unneeded (spec §4.5 `clear_barrier`).
    pub fn clear_barrier_image(&mut self, work: &Work, handle: Handle<Image>, new_usage: ResourceUsage) {
        self.barrier_image_impl(work, handle, new_usage, true);
    }

    fn barrier_image_impl(&mut self, work: &Work, handle: Handle<Image>, new_usage: ResourceUsage, clear: bool) {
        let Some(image) = self.images.get_mut(handle) else {
            log::error!("barrier_image: invalid handle");
            return;
        };
        let old_usage = if clear { ResourceUsage::None } else { image.usage() };
        if let Some(barrier) = sync::image_barrier(image.raw(), image.aspect_mask(), old_usage, new_usage) {
            work.image_barrier(barrier);
        }
        image.set_usage(new_usage);
    }

    /// Like `barrier_image`, but for the swapchain's current image —
    /// which has no `Handle<Image>` since the swapchain owns it
    /// directly rather than through the Device's resource table.
    pub fn barrier_swapchain_image(&mut self, work: &Work, new_usage: ResourceUsage) {
        self.barrier_swapchain_image_impl(work, new_usage, false);
    }

    pub fn clear_barrier_swapchain_image(&mut self, work: &Work, new_usage: ResourceUsage) {
        self.barrier_swapchain_image_impl(work, new_usage, true);
    }

    fn barrier_swapchain_image_impl(&mut self, work: &Work, new_usage: ResourceUsage, clear: bool) {
        let image = self.swapchain.current_image_mut();
        let old_usage = if clear { ResourceUsage::None } else { image.usage() };
        if let Some(barrier) = sync::image_barrier(image.raw(), image.aspect_mask(), old_usage, new_usage) {
            work.image_barrier(barrier);
        }
        image.set_usage(new_usage);
    }

    pub fn barrier_buffer(&mut self, work: &Work, handle: Handle<Buffer>, new_usage: ResourceUsage) {
        self.barrier_buffer_impl(work, handle, new_usage, false);
    }

    pub fn clear_barrier_buffer(&mut self, work: &Work, handle: Handle<Buffer>, new_usage: ResourceUsage) {
        self.barrier_buffer_impl(work, handle, new_usage, true);
    }

    fn barrier_buffer_impl(&mut self, work: &Work, handle: Handle<Buffer>, new_usage: ResourceUsage, clear: bool) {
        let Some(buffer) = self.buffers.get_mut(handle) else {
            log::error!("barrier_buffer: invalid handle");
            return;
        };
        let old_usage = if clear { ResourceUsage::None } else { buffer.usage() };
        if let Some(barrier) = sync::buffer_barrier(buffer.raw(), buffer.size(), old_usage, new_usage) {
            work.buffer_barrier(barrier);
        }
        buffer.set_usage(new_usage);
    }

    /// Batches barrier transitions for several images/buffers into one
    /// pipeline barrier (spec §4.5 `barriers(images[], buffers[])`).
    pub fn barriers(&mut self, work: &Work, images: &[(Handle<Image>, ResourceUsage)], buffers: &[(Handle<Buffer>, ResourceUsage)]) {
        let mut image_barriers = Vec::with_capacity(images.len());
        for &(handle, new_usage) in images {
            let Some(image) = self.images.get_mut(handle) else {
                log::error!("barriers: invalid image handle");
                continue;
            };
            let old_usage = image.usage();
            if let Some(barrier) = sync::image_barrier(image.raw(), image.aspect_mask(), old_usage, new_usage) {
                image_barriers.push(barrier);
            }
            image.set_usage(new_usage);
        }

        let mut buffer_barriers = Vec::with_capacity(buffers.len());
        for &(handle, new_usage) in buffers {
            let Some(buffer) = self.buffers.get_mut(handle) else {
                log::error!("barriers: invalid buffer handle");
                continue;
            };
            let old_usage = buffer.usage();
            if let Some(barrier) = sync::buffer_barrier(buffer.raw(), buffer.size(), old_usage, new_usage) {
                buffer_barriers.push(barrier);
            }
            buffer.set_usage(new_usage);
        }

        work.barriers(&image_barriers, &buffer_barriers);
    }

    // ---- work pools / submission ----

    pub fn create_work_pool(&self) -> Result<WorkPool> {
        WorkPool::new(
            self.raw.clone(),
            self.queue_family_indices.graphics.index(),
            self.queue_family_indices.compute.index(),
            self.queue_family_indices.transfer.index(),
        )
    }

    pub fn reset_work_pool(&self, pool: &WorkPool) -> Result<()> {
        pool.reset()
    }

    pub fn get_graphics_work(&self, pool: &WorkPool) -> Result<Work> {
        let mut work = pool.get_graphics_work()?;
        work.begin()?;
        work.bind_descriptor_sets(
            self.globals.pipeline_layout(),
            1,
            &[self.globals.sampled_image_set, self.globals.storage_image_set, self.globals.storage_buffer_set],
            &[],
        );
        Ok(work)
    }

    pub fn get_compute_work(&self, pool: &WorkPool) -> Result<Work> {
        let mut work = pool.get_compute_work()?;
        work.begin()?;
        work.bind_descriptor_sets(
            self.globals.pipeline_layout(),
            1,
            &[self.globals.sampled_image_set, self.globals.storage_image_set, self.globals.storage_buffer_set],
            &[],
        );
        Ok(work)
    }

    pub fn get_transfer_work(&self, pool: &WorkPool) -> Result<Work> {
        let mut work = pool.get_transfer_work()?;
        work.begin()?;
        Ok(work)
    }

    /// Binds set 0 (the dynamic globals UBO) at `dynamic_offset` into
    /// `work`. Called once per frame after the ring-buffer write.
    pub fn bind_globals(&self, work: &Work, dynamic_offset: u32) {
        work.bind_descriptor_sets(self.globals.pipeline_layout(), 0, &[self.globals.globals_set], &[dynamic_offset]);
    }

    pub fn bind_globals_buffer(&mut self, buffer: Handle<Buffer>, range: u64) -> Result<()> {
        let raw = self.buffers.get(buffer).context("bind_globals_buffer: invalid handle")?.raw();
        self.bind_globals_buffer_raw(raw, range);
        Ok(())
    }

    /// Like `bind_globals_buffer`, but for a raw `vk::Buffer` the
    /// Device's own table does not own — the globals UBO is typically
    /// backed by a `RingBuffer`, which (like `GpuPool`) is constructed
    /// directly against the device's raw handles (spec §2).
    pub fn bind_globals_buffer_raw(&mut self, raw: vk::Buffer, range: u64) {
        let buffer_info = vk::DescriptorBufferInfo::builder().buffer(raw).offset(0).range(range).build();
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.globals.globals_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(std::slice::from_ref(&buffer_info))
            .build();
        unsafe { self.raw.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }

    /// Flushes `pending_bind`/`pending_unbind` for all three bindless
    /// arrays (spec §4.2 `update_globals`). Called once per frame.
    pub fn update_globals(&mut self) {
        self.globals.flush_bindless();
    }

    /// Submits `work` on `queue_type`'s queue, signalling each
    /// `(fence, stage, frame_index)` triple to `fence.signal_value(frame_index)`.
    /// A graphics submission additionally waits on the pending swapchain
    /// acquire (if any) and signals the frame's present semaphore.
    pub fn submit(&mut self, queue_type: QueueType, work: &mut Work, fences: &[(&Fence, vk::PipelineStageFlags2, u64)]) -> Result<()> {
        work.end()?;
        let queue = match queue_type {
            QueueType::Graphics => &self.graphics_queue,
            QueueType::Compute => &self.compute_queue,
            QueueType::Transfer => &self.transfer_queue,
        };

        let mut wait_infos = Vec::new();
        if queue_type == QueueType::Graphics {
            if let Some(slot) = self.pending_acquire {
                wait_infos.push(SemaphoreSubmitInfo {
                    semaphore: &self.acquire_semaphores[slot],
                    stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    value: None,
                });
            }
        }

        let mut signal_infos = fences
            .iter()
            .map(|(fence, stage, frame_index)| SemaphoreSubmitInfo {
                semaphore: fence.raw(),
                stage_mask: *stage,
                value: Some(fence.signal_value(*frame_index)),
            })
            .collect::<Vec<_>>();

        if queue_type == QueueType::Graphics {
            signal_infos.push(SemaphoreSubmitInfo {
                semaphore: &self.present_semaphores[self.frame_slot],
                stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                value: None,
            });
        }

        let work_ref: &Work = work;
        queue.submit(&[work_ref], &wait_infos, &signal_infos)
    }

    /// Blocks until an image is acquired via the next frame slot's
    /// binary semaphore. Returns true on out-of-date (spec §4.2).
    pub fn acquire_next_swapchain(&mut self) -> Result<bool> {
        self.frame_slot = (self.frame_slot + 1) % self.acquire_semaphores.len();
        let out_of_date = self.swapchain.acquire_next_image(&self.acquire_semaphores[self.frame_slot])?;
        self.pending_acquire = Some(self.frame_slot);
        Ok(out_of_date)
    }

    pub fn present(&mut self) -> Result<bool> {
        let out_of_date = self.swapchain.queue_present(&[&self.present_semaphores[self.frame_slot]], &self.graphics_queue)?;
        self.pending_acquire = None;
        Ok(out_of_date)
    }

    pub fn wait_for_fence(&self, fence: &Fence, value: u64) -> Result<()> {
        fence.wait(&self.raw, value, FENCE_WAIT_TIMEOUT_SECS)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw.device_wait_idle()? };
        Ok(())
    }

    /// Recreates the swapchain at the surface's current extent. Callers
    /// are responsible for recreating any framebuffers that depend on
    /// the swapchain's images/extent afterwards (spec §4.10 `on_resize`).
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        self.wait_idle()?;
        self.swapchain.recreate(&self.context, &self.surface, &self.physical_device)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("device dropped");
        let _ = unsafe { self.raw.device_wait_idle() };
        // Field declaration order handles the rest: resources and the
        // swapchain drop first, `device_destroyer` destroys the VkDevice,
        // then surface/instance teardown runs last.
    }
}

fn select_physical_device(devices: &[PhysicalDevice], preferred_index: Option<usize>) -> Result<PhysicalDevice> {
    if let Some(index) = preferred_index {
        return devices.get(index).cloned().context("physical_device_index out of range");
    }
    devices
        .iter()
        .find(|device| device.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| devices.first())
        .cloned()
        .context("no suitable gpu found")
}

/// Fails soft per spec §4.2: if no dedicated transfer-only family
/// exists, transfer aliases the compute family.
fn select_queue_family_indices(device: &PhysicalDevice) -> QueueFamilyIndices {
    let mut graphics = None;
    let mut present = None;
    let mut compute = None;
    let mut transfer = None;

    for family in device.queue_families.iter().filter(|family| family.queue_count() > 0) {
        if family.supports_graphics() && graphics.is_none() {
            graphics = Some(*family);
            if family.supports_present() {
                present = Some(*family);
            }
        } else if family.supports_compute() && compute.is_none() {
            compute = Some(*family);
        } else if family.supports_transfer() && !family.supports_compute() && transfer.is_none() {
            transfer = Some(*family);
        }
    }

    if present.is_none() {
        present = device.queue_families.iter().find(|f| f.supports_present()).copied();
    }

    let graphics = graphics.expect("device has no graphics-capable queue family");
    let compute = compute.unwrap_or(graphics);
    let transfer = transfer.unwrap_or(compute);
    let present = present.unwrap_or(graphics);

    QueueFamilyIndices { graphics, present, compute, transfer }
}

fn new_vulkan_device(
    context: &Context,
    physical_device: &PhysicalDevice,
    queue_family_indices: &QueueFamilyIndices,
    buffer_device_address: bool,
) -> Result<ash::Device> {
    let queue_priorities = [1.0f32];

    let mut indices = [
        queue_family_indices.graphics.index(),
        queue_family_indices.present.index(),
        queue_family_indices.compute.index(),
        queue_family_indices.transfer.index(),
    ]
    .to_vec();
    indices.sort();
    indices.dedup();

    let queue_create_infos = indices
        .iter()
        .map(|index| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(*index)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect::<Vec<_>>();

    let device_extension_strs = ["VK_KHR_swapchain"];
    let device_extension_strs = device_extension_strs.iter().map(|str| CString::new(*str)).collect::<Result<Vec<_>, _>>()?;
    let device_extension_cstrs = device_extension_strs.iter().map(|ext| ext.as_ptr()).collect::<Vec<_>>();

    let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::builder()
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_update_unused_while_pending(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_image_update_after_bind(true)
        .descriptor_binding_storage_buffer_update_after_bind(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .timeline_semaphore(true)
        .buffer_device_address(buffer_device_address);
    let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::builder().synchronization2(true);

    let mut device_features2 = vk::PhysicalDeviceFeatures2::builder()
        .push_next(&mut vulkan12_features)
        .push_next(&mut vulkan13_features);

    let device_create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extension_cstrs)
        .push_next(&mut device_features2);

    let device = unsafe { context.raw().create_device(physical_device.raw(), &device_create_info, None)? };
    Ok(device)
}
