use anyhow::{Context as _, Result};
use vantage_core::{ash, vk};

use crate::{
    framebuffer::{Framebuffer, RenderPass},
    queue::QueueType,
};

/// A command buffer pre-bound with the bindless pipeline layout and
/// tagged with the queue capability it was allocated from. `QueueType`
/// expresses `Transfer ⊂ Compute ⊂ Graphics` (spec §4.5) so a function
/// that only needs `Transfer` accepts a `Work` recorded from any pool.
pub struct Work {
    device: ash::Device,
    raw: vk::CommandBuffer,
    queue_type: QueueType,
    is_recording: bool,
}

impl Work {
    pub(crate) fn new(device: ash::Device, raw: vk::CommandBuffer, queue_type: QueueType) -> Self {
        Self {
            device,
            raw,
            queue_type,
            is_recording: false,
        }
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    pub fn device_raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.is_recording {
            log::warn!("work buffer begin() called while already recording");
            return Ok(());
        }
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.raw, &begin_info)? };
        self.is_recording = true;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        if !self.is_recording {
            log::warn!("work buffer end() called while not recording");
            return Ok(());
        }
        unsafe { self.device.end_command_buffer(self.raw)? };
        self.is_recording = false;
        Ok(())
    }

    pub fn image_barrier(&self, barrier: vk::ImageMemoryBarrier2) {
        let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(self.raw, &dependency_info) };
    }

    pub fn buffer_barrier(&self, barrier: vk::BufferMemoryBarrier2) {
        let dependency_info = vk::DependencyInfo::builder().buffer_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(self.raw, &dependency_info) };
    }

    /// Batches any number of image/buffer barriers into a single
    /// `vkCmdPipelineBarrier2` call (spec §4.5 `barriers(images[], buffers[])`).
    /// A no-op if both slices are empty.
    pub fn barriers(&self, image_barriers: &[vk::ImageMemoryBarrier2], buffer_barriers: &[vk::BufferMemoryBarrier2]) {
        if image_barriers.is_empty() && buffer_barriers.is_empty() {
            return;
        }
        let dependency_info = vk::DependencyInfo::builder()
            .image_memory_barriers(image_barriers)
            .buffer_memory_barriers(buffer_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.raw, &dependency_info) };
    }

    /// Begins a classic render pass (spec §4.4), not dynamic rendering.
    pub fn begin_pass(
        &self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.raw())
            .framebuffer(framebuffer.raw())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: framebuffer.extent(),
            })
            .clear_values(clear_values);
        unsafe { self.device.cmd_begin_render_pass(self.raw, &begin_info, vk::SubpassContents::INLINE) };
    }

    pub fn end_pass(&self) {
        unsafe { self.device.cmd_end_render_pass(self.raw) };
    }

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::GRAPHICS, pipeline) };
    }

    pub fn bind_compute_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::COMPUTE, pipeline) };
    }

    pub fn bind_descriptor_sets(&self, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet], dynamic_offsets: &[u32]) {
        let bind_point = match self.queue_type {
            QueueType::Graphics => vk::PipelineBindPoint::GRAPHICS,
            QueueType::Compute => vk::PipelineBindPoint::COMPUTE,
            QueueType::Transfer => {
                log::warn!("bind_descriptor_sets called on a transfer-only Work");
                vk::PipelineBindPoint::GRAPHICS
            }
        };
        unsafe {
            self.device.cmd_bind_descriptor_sets(self.raw, bind_point, layout, first_set, sets, dynamic_offsets);
        }
    }

    pub fn push_constants(&self, layout: vk::PipelineLayout, stage_flags: vk::ShaderStageFlags, data: &[u8]) {
        unsafe { self.device.cmd_push_constants(self.raw, layout, stage_flags, 0, data) };
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: u64) {
        unsafe { self.device.cmd_bind_index_buffer(self.raw, buffer, offset, vk::IndexType::UINT32) };
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.device.cmd_draw(self.raw, vertex_count, instance_count, first_vertex, first_instance) };
    }

    pub fn draw_indexed(&self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(self.raw, index_count, instance_count, first_index, vertex_offset, first_instance);
        }
    }

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe { self.device.cmd_dispatch(self.raw, group_count_x, group_count_y, group_count_z) };
    }

    pub fn set_viewport_and_scissor(&self, width: u32, height: u32) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D { width, height },
        };
        unsafe {
            self.device.cmd_set_viewport(self.raw, 0, std::slice::from_ref(&viewport));
            self.device.cmd_set_scissor(self.raw, 0, std::slice::from_ref(&scissor));
        }
    }

    /// Sets just the scissor rect, leaving the viewport as last set.
    /// Used for per-draw-command clipping (e.g. a UI draw-list's clip
    /// rects), where `set_viewport_and_scissor`'s full-framebuffer
    /// scissor would be wrong.
    pub fn set_scissor(&self, x: i32, y: i32, width: u32, height: u32) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x, y },
            extent: vk::Extent2D { width, height },
        };
        unsafe { self.device.cmd_set_scissor(self.raw, 0, std::slice::from_ref(&scissor)) };
    }

    pub fn begin_debug_label(&self, name: &str) {
        let _ = name; // debug-utils label extension wiring is left to the owning Context.
    }

    pub fn end_debug_label(&self) {}
}

/// A single queue family's command pool; hands out `Work` buffers
/// tagged with that queue's capability.
struct QueuePool {
    device: ash::Device,
    pool: vk::CommandPool,
    queue_type: QueueType,
}

impl QueuePool {
    fn new(device: ash::Device, queue_family_index: u32, queue_type: QueueType) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&create_info, None) }.context("create command pool")?;
        Ok(Self { device, pool, queue_type })
    }

    fn reset(&self) -> Result<()> {
        unsafe { self.device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())? };
        Ok(())
    }

    fn get_work(&self) -> Result<Work> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }.context("allocate command buffer")?;
        Ok(Work::new(self.device.clone(), buffers[0], self.queue_type))
    }
}

impl Drop for QueuePool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// Owns one command pool per queue type — graphics, compute, transfer
/// — and hands out `Work` buffers from the right one. Spec §4.2:
/// "a `WorkPool` contains one command pool per queue type. Resetting
/// frees all buffers previously allocated from all three sub-pools."
/// `reset` is called once per frame, after the corresponding fence
/// value has been waited on.
pub struct WorkPool {
    graphics: QueuePool,
    compute: QueuePool,
    transfer: QueuePool,
}

impl WorkPool {
    pub fn new(
        device: ash::Device,
        graphics_queue_family_index: u32,
        compute_queue_family_index: u32,
        transfer_queue_family_index: u32,
    ) -> Result<Self> {
        Ok(Self {
            graphics: QueuePool::new(device.clone(), graphics_queue_family_index, QueueType::Graphics)?,
            compute: QueuePool::new(device.clone(), compute_queue_family_index, QueueType::Compute)?,
            transfer: QueuePool::new(device, transfer_queue_family_index, QueueType::Transfer)?,
        })
    }

    pub fn reset(&self) -> Result<()> {
        self.graphics.reset()?;
        self.compute.reset()?;
        self.transfer.reset()?;
        Ok(())
    }

    pub fn get_graphics_work(&self) -> Result<Work> {
        self.graphics.get_work()
    }

    pub fn get_compute_work(&self) -> Result<Work> {
        self.compute.get_work()
    }

    pub fn get_transfer_work(&self) -> Result<Work> {
        self.transfer.get_work()
    }
}
