use std::sync::Arc;

use anyhow::{Context as _, Result};
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};
use parking_lot::Mutex;
use vantage_core::{ash, vk};

use crate::{handle::Handle, sampler::Sampler, sync::ResourceUsage};

pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_layer_count: u32,
    pub mip_level_count: u32,
    pub format: vk::Format,
    pub image_type: vk::ImageType,
    pub usage_flags: vk::ImageUsageFlags,
}

impl ImageDesc {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
            array_layer_count: 1,
            mip_level_count: 1,
            format: vk::Format::UNDEFINED,
            image_type: vk::ImageType::TYPE_2D,
            usage_flags: vk::ImageUsageFlags::empty(),
        }
    }

    pub fn set_format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    pub fn set_usage_flags(mut self, usage_flags: vk::ImageUsageFlags) -> Self {
        self.usage_flags = usage_flags;
        self
    }

    pub fn set_mip_level_count(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }
}

pub fn format_has_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

/// GPU image plus its default (full-mip, full-layer) view. `sampled_slot`
/// and `storage_slot` are `u32::MAX` until `BindlessSet::bind_image`
/// assigns each a slot (spec §3 "Image" carries up to two bindless slot
/// indices).
pub struct Image {
    device: ash::Device,
    allocator: Option<Arc<Mutex<Allocator>>>,
    allocation: Option<Allocation>,

    raw: vk::Image,
    raw_view: vk::ImageView,

    usage: ResourceUsage,
    sampler: Option<Handle<Sampler>>,

    format: vk::Format,
    extent: vk::Extent3D,
    subresource_range: vk::ImageSubresourceRange,

    owning: bool,
    sampled_slot: u32,
    storage_slot: u32,
}

impl Image {
    pub(crate) fn create(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        desc: ImageDesc,
    ) -> Result<Self> {
        let usage_flags =
            desc.usage_flags | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
        };

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(extent)
            .mip_levels(desc.mip_level_count)
            .array_layers(desc.array_layer_count)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage_flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = unsafe { device.create_image(&create_info, None) }.context("create image")?;
        let requirements = unsafe { device.get_image_memory_requirements(raw) };

        let allocation = allocator.lock().allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
        })?;

        unsafe { device.bind_image_memory(raw, allocation.memory(), allocation.offset())? };

        let aspect_mask = if format_has_depth(desc.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let subresource_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(aspect_mask)
            .base_mip_level(0)
            .level_count(desc.mip_level_count)
            .base_array_layer(0)
            .layer_count(desc.array_layer_count)
            .build();

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(subresource_range);
        let raw_view = unsafe { device.create_image_view(&view_info, None) }.context("create image view")?;

        Ok(Self {
            device,
            allocator: Some(allocator),
            allocation: Some(allocation),
            raw,
            raw_view,
            usage: ResourceUsage::None,
            format: desc.format,
            extent,
            subresource_range,
            sampler: None,
            owning: true,
            sampled_slot: u32::MAX,
            storage_slot: u32::MAX,
        })
    }

    /// Wraps a borrowed swapchain image (spec §4.6). Not destroyed on
    /// drop — the swapchain owns its lifetime.
    pub(crate) fn from_swapchain(
        device: ash::Device,
        raw: vk::Image,
        raw_view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            device,
            allocator: None,
            allocation: None,
            raw,
            raw_view,
            usage: ResourceUsage::None,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            subresource_range: vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1)
                .build(),
            sampler: None,
            owning: false,
            sampled_slot: u32::MAX,
            storage_slot: u32::MAX,
        }
    }

    pub(crate) fn set_sampled_slot(&mut self, index: u32) {
        self.sampled_slot = index;
    }

    pub(crate) fn set_storage_slot(&mut self, index: u32) {
        self.storage_slot = index;
    }

    /// Bindless sampled-image array slot, or `u32::MAX` until
    /// `BindlessSet::bind_image` has assigned one (spec §4.3).
    pub fn sampled_slot(&self) -> u32 {
        self.sampled_slot
    }

    /// Bindless storage-image array slot, or `u32::MAX` until bound.
    pub fn storage_slot(&self) -> u32 {
        self.storage_slot
    }

    pub fn raw(&self) -> vk::Image {
        self.raw
    }

    pub fn raw_view(&self) -> vk::ImageView {
        self.raw_view
    }

    pub fn linked_sampler(&self) -> Option<Handle<Sampler>> {
        self.sampler
    }

    pub fn set_linked_sampler(&mut self, sampler: Handle<Sampler>) {
        self.sampler = Some(sampler);
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn has_depth(&self) -> bool {
        format_has_depth(self.format)
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.subresource_range
    }

    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.subresource_range.aspect_mask
    }

    pub fn usage(&self) -> ResourceUsage {
        self.usage
    }

    pub fn set_usage(&mut self, usage: ResourceUsage) {
        self.usage = usage;
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image_view(self.raw_view, None) };
        if !self.owning {
            return;
        }
        unsafe { self.device.destroy_image(self.raw, None) };
        if let (Some(allocator), Some(allocation)) = (&self.allocator, self.allocation.take()) {
            if let Err(err) = allocator.lock().free(allocation) {
                log::error!("failed to free image allocation: {err}");
            }
        }
    }
}
