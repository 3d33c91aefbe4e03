use anyhow::Result;
use vantage_core::{ash, vk};

use crate::{sync::Semaphore, work::Work};

#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    index: u32,
    properties: vk::QueueFamilyProperties,
    supports_present: bool,
}

impl QueueFamily {
    pub fn new(index: u32, properties: vk::QueueFamilyProperties, supports_present: bool) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn supports_present(&self) -> bool {
        self.supports_present
    }

    pub fn supports_compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    pub fn supports_transfer(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::TRANSFER)
    }

    pub fn queue_count(&self) -> u32 {
        self.properties.queue_count
    }
}

pub struct QueueFamilyIndices {
    pub graphics: QueueFamily,
    pub present: QueueFamily,
    pub compute: QueueFamily,
    pub transfer: QueueFamily,
}

/// Capability tag carried by a `Work` buffer rather than expressed
/// through struct inheritance: `Transfer ⊂ Compute ⊂ Graphics`, so code
/// that needs a `Transfer`-capable work item accepts any `QueueType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    Transfer,
    Compute,
    Graphics,
}

impl QueueType {
    pub fn allows(&self, required: QueueType) -> bool {
        use QueueType::*;
        match (self, required) {
            (Graphics, _) => true,
            (Compute, Compute | Transfer) => true,
            (Transfer, Transfer) => true,
            _ => false,
        }
    }
}

pub struct SemaphoreSubmitInfo<'a> {
    pub semaphore: &'a Semaphore,
    pub stage_mask: vk::PipelineStageFlags2,
    pub value: Option<u64>,
}

#[derive(Clone)]
pub struct Queue {
    device: ash::Device,
    raw: vk::Queue,
    family_index: u32,
}

impl Queue {
    pub fn new(device: ash::Device, raw: vk::Queue, family_index: u32) -> Self {
        Self {
            device,
            raw,
            family_index,
        }
    }

    pub fn submit(
        &self,
        work: &[&Work],
        wait_semaphores: &[SemaphoreSubmitInfo],
        signal_semaphores: &[SemaphoreSubmitInfo],
    ) -> Result<()> {
        let to_submit_info = |submit_info: &SemaphoreSubmitInfo| {
            vk::SemaphoreSubmitInfo::builder()
                .semaphore(submit_info.semaphore.raw())
                .stage_mask(submit_info.stage_mask)
                .value(submit_info.value.unwrap_or(0))
                .build()
        };

        let wait_infos = wait_semaphores.iter().map(to_submit_info).collect::<Vec<_>>();
        let signal_infos = signal_semaphores.iter().map(to_submit_info).collect::<Vec<_>>();
        let command_buffer_infos = work
            .iter()
            .map(|w| vk::CommandBufferSubmitInfo::builder().command_buffer(w.raw()).build())
            .collect::<Vec<_>>();

        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&command_buffer_infos)
            .build();

        unsafe {
            self.device
                .queue_submit2(self.raw, std::slice::from_ref(&submit_info), vk::Fence::null())?
        };

        Ok(())
    }

    pub fn raw(&self) -> vk::Queue {
        self.raw
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }
}
