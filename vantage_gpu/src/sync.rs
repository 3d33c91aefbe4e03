use anyhow::Result;
use vantage_core::{ash, vk};

use crate::error;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreType {
    Binary,
    Timeline,
}

/// Thin wrapper over `vk::Semaphore`. Binary semaphores are reserved
/// for swapchain acquire/present (spec §4.5); everything else —
/// cross-queue dependencies, frame pipelining — goes through timeline
/// semaphores via `Fence` below.
pub struct Semaphore {
    device: ash::Device,
    raw: vk::Semaphore,
    semaphore_type: SemaphoreType,
}

impl Semaphore {
    pub fn new(device: ash::Device, semaphore_type: SemaphoreType) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder().semaphore_type(match semaphore_type {
            SemaphoreType::Binary => vk::SemaphoreType::BINARY,
            SemaphoreType::Timeline => vk::SemaphoreType::TIMELINE,
        });
        let info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let raw = unsafe { device.create_semaphore(&info, None)? };
        Ok(Self {
            device,
            raw,
            semaphore_type,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }

    pub fn semaphore_type(&self) -> SemaphoreType {
        self.semaphore_type
    }

    pub fn counter_value(&self) -> Result<u64> {
        Ok(unsafe { self.device.get_semaphore_counter_value(self.raw)? })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.raw, None) };
    }
}

/// One per-frame timeline fence. Spec §4.5's frame-pipelining formula:
/// submitting frame `N` signals the timeline to `N + 1`; the CPU may
/// start recording frame `N` once the timeline reaches
/// `N - FRAME_QUEUE_LENGTH + 1`.
pub struct Fence {
    semaphore: Semaphore,
    frame_queue_length: u64,
}

impl Fence {
    pub fn new(device: ash::Device, frame_queue_length: u64) -> Result<Self> {
        Ok(Self {
            semaphore: Semaphore::new(device, SemaphoreType::Timeline)?,
            frame_queue_length,
        })
    }

    pub fn raw(&self) -> &Semaphore {
        &self.semaphore
    }

    /// Value this fence will be signaled to once frame `frame_index`
    /// (0-based, monotonically increasing) is submitted.
    pub fn signal_value(&self, frame_index: u64) -> u64 {
        frame_index + 1
    }

    /// Value the CPU must wait for before it may start recording
    /// `frame_index`: blocks until at most `frame_queue_length` frames
    /// are in flight.
    pub fn wait_value(&self, frame_index: u64) -> u64 {
        frame_index.saturating_sub(self.frame_queue_length - 1)
    }

    /// Blocks the calling thread until the timeline reaches `value`,
    /// or `timeout_secs` elapses. Per spec §7 a timeout here is Fatal.
    pub fn wait(&self, device: &ash::Device, value: u64, timeout_secs: u64) -> Result<()> {
        if value == 0 {
            return Ok(());
        }
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(std::slice::from_ref(&self.semaphore.raw))
            .values(std::slice::from_ref(&value));
        let result = unsafe { device.wait_semaphores(&wait_info, timeout_secs * 1_000_000_000) };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                error::fatal(&format!("timeline wait for value {value} timed out"))
            }
            Err(other) => error::check(other),
        }
    }
}

/// Fixed table of `(pipeline stage, access mask, image layout)` per
/// resource usage, spec.md §4.5. `usage_transition` never consults a
/// prior usage other than to special-case "no transition needed" when
/// old == new and neither is a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceUsage {
    None,
    GraphicsShaderRead,
    GraphicsShaderReadWrite,
    ComputeShaderRead,
    ComputeShaderReadWrite,
    TransferSrc,
    TransferDst,
    ColorAttachment,
    DepthAttachment,
    Present,
    IndexBuffer,
    VertexBuffer,
    DrawCommands,
    HostWrite,
}

pub struct UsageInfo {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

pub fn usage_info(usage: ResourceUsage) -> UsageInfo {
    use vk::{AccessFlags2 as A, ImageLayout as L, PipelineStageFlags2 as S};
    match usage {
        ResourceUsage::None => UsageInfo {
            stage: S::TOP_OF_PIPE,
            access: A::NONE,
            layout: L::UNDEFINED,
        },
        ResourceUsage::GraphicsShaderRead => UsageInfo {
            stage: S::VERTEX_SHADER | S::FRAGMENT_SHADER,
            access: A::SHADER_READ,
            layout: L::SHADER_READ_ONLY_OPTIMAL,
        },
        ResourceUsage::GraphicsShaderReadWrite => UsageInfo {
            stage: S::VERTEX_SHADER | S::FRAGMENT_SHADER,
            access: A::SHADER_READ | A::SHADER_WRITE,
            layout: L::GENERAL,
        },
        ResourceUsage::ComputeShaderRead => UsageInfo {
            stage: S::COMPUTE_SHADER,
            access: A::SHADER_READ,
            layout: L::SHADER_READ_ONLY_OPTIMAL,
        },
        ResourceUsage::ComputeShaderReadWrite => UsageInfo {
            stage: S::COMPUTE_SHADER,
            access: A::SHADER_READ | A::SHADER_WRITE,
            layout: L::GENERAL,
        },
        ResourceUsage::TransferSrc => UsageInfo {
            stage: S::TRANSFER,
            access: A::TRANSFER_READ,
            layout: L::TRANSFER_SRC_OPTIMAL,
        },
        ResourceUsage::TransferDst => UsageInfo {
            stage: S::TRANSFER,
            access: A::TRANSFER_WRITE,
            layout: L::TRANSFER_DST_OPTIMAL,
        },
        ResourceUsage::ColorAttachment => UsageInfo {
            stage: S::COLOR_ATTACHMENT_OUTPUT,
            access: A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            layout: L::COLOR_ATTACHMENT_OPTIMAL,
        },
        ResourceUsage::DepthAttachment => UsageInfo {
            stage: S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            access: A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            layout: L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        },
        ResourceUsage::Present => UsageInfo {
            stage: S::BOTTOM_OF_PIPE,
            access: A::NONE,
            layout: L::PRESENT_SRC_KHR,
        },
        ResourceUsage::IndexBuffer => UsageInfo {
            stage: S::INDEX_INPUT,
            access: A::INDEX_READ,
            layout: L::UNDEFINED,
        },
        ResourceUsage::VertexBuffer => UsageInfo {
            stage: S::VERTEX_ATTRIBUTE_INPUT,
            access: A::VERTEX_ATTRIBUTE_READ,
            layout: L::UNDEFINED,
        },
        ResourceUsage::DrawCommands => UsageInfo {
            stage: S::DRAW_INDIRECT,
            access: A::INDIRECT_COMMAND_READ,
            layout: L::UNDEFINED,
        },
        ResourceUsage::HostWrite => UsageInfo {
            stage: S::HOST,
            access: A::HOST_WRITE,
            layout: L::UNDEFINED,
        },
    }
}

fn is_write(usage: ResourceUsage) -> bool {
    matches!(
        usage,
        ResourceUsage::GraphicsShaderReadWrite
            | ResourceUsage::ComputeShaderReadWrite
            | ResourceUsage::TransferDst
            | ResourceUsage::ColorAttachment
            | ResourceUsage::DepthAttachment
            | ResourceUsage::HostWrite
    )
}

/// Builds the image-memory-barrier for an old→new usage transition, or
/// `None` when old == new and neither is a write (spec.md §4.5's no-op
/// special case — re-reading the same usage needs no barrier).
pub fn image_barrier(
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_usage: ResourceUsage,
    new_usage: ResourceUsage,
) -> Option<vk::ImageMemoryBarrier2> {
    if old_usage == new_usage && !is_write(old_usage) {
        return None;
    }
    let old = usage_info(old_usage);
    let new = usage_info(new_usage);
    Some(
        vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(old.stage)
            .src_access_mask(old.access)
            .dst_stage_mask(new.stage)
            .dst_access_mask(new.access)
            .old_layout(old.layout)
            .new_layout(new.layout)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect_mask)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS)
                    .build(),
            )
            .build(),
    )
}

pub fn buffer_barrier(
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    old_usage: ResourceUsage,
    new_usage: ResourceUsage,
) -> Option<vk::BufferMemoryBarrier2> {
    if old_usage == new_usage && !is_write(old_usage) {
        return None;
    }
    let old = usage_info(old_usage);
    let new = usage_info(new_usage);
    Some(
        vk::BufferMemoryBarrier2::builder()
            .src_stage_mask(old.stage)
            .src_access_mask(old.access)
            .dst_stage_mask(new.stage)
            .dst_access_mask(new.access)
            .buffer(buffer)
            .offset(0)
            .size(size)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_read_usage_needs_no_barrier() {
        let image = vk::Image::null();
        assert!(image_barrier(
            image,
            vk::ImageAspectFlags::COLOR,
            ResourceUsage::GraphicsShaderRead,
            ResourceUsage::GraphicsShaderRead,
        )
        .is_none());
    }

    #[test]
    fn repeated_write_usage_still_barriers() {
        let image = vk::Image::null();
        assert!(image_barrier(
            image,
            vk::ImageAspectFlags::COLOR,
            ResourceUsage::ColorAttachment,
            ResourceUsage::ColorAttachment,
        )
        .is_some());
    }
}
