use anyhow::{Context as _, Result};
use vantage_core::{ash, ash::extensions::khr, vk};

use crate::{
    context::Context, image::Image, physical_device::PhysicalDevice, queue::Queue,
    surface::Surface, sync::Semaphore,
};

pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub graphics_queue_family_index: u32,
    pub present_queue_family_index: u32,
    pub present_mode: vk::PresentModeKHR,
}

impl SwapchainDesc {
    pub fn new(width: u32, height: u32, graphics_queue_family_index: u32, present_queue_family_index: u32) -> Self {
        Self {
            width,
            height,
            graphics_queue_family_index,
            present_queue_family_index,
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }

    pub fn set_present_mode(mut self, present_mode: vk::PresentModeKHR) -> Self {
        self.present_mode = present_mode;
        self
    }
}

/// Owns the `VkSwapchainKHR`, its images, and a fixed pool of binary
/// semaphores used for acquire/present — the one place in this runtime
/// binary semaphores are mandated by the windowing protocol (spec
/// §4.6). `current_image`/`previous_image` track the handles exposed
/// to `Device::acquire_next_swapchain`.
pub struct Swapchain {
    device: ash::Device,
    ash_swapchain: khr::Swapchain,
    raw: vk::SwapchainKHR,

    graphics_queue_family_index: u32,
    present_queue_family_index: u32,

    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,

    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    image_handles: Vec<Image>,

    current_image: u32,
    previous_image: u32,
}

impl Swapchain {
    pub fn new(
        context: &Context,
        surface: &Surface,
        physical_device: &PhysicalDevice,
        device: ash::Device,
        desc: SwapchainDesc,
    ) -> Result<Self> {
        let surface_format = {
            let formats = unsafe { surface.ash().get_physical_device_surface_formats(physical_device.raw(), surface.vulkan())? };
            if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }
            } else {
                *formats
                    .iter()
                    .find(|f| f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
                    .unwrap_or(&formats[0])
            }
        };

        let present_modes = unsafe { surface.ash().get_physical_device_surface_present_modes(physical_device.raw(), surface.vulkan())? };
        let present_mode = if present_modes.contains(&desc.present_mode) {
            desc.present_mode
        } else {
            vk::PresentModeKHR::FIFO
        };

        let capabilities = unsafe { surface.ash().get_physical_device_surface_capabilities(physical_device.raw(), surface.vulkan())? };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            let min = capabilities.min_image_extent;
            let max = capabilities.max_image_extent;
            vk::Extent2D {
                width: desc.width.clamp(min.width, max.width),
                height: desc.height.clamp(min.height, max.height),
            }
        };

        let image_count = if capabilities.max_image_count == 0 {
            capabilities.min_image_count + 1
        } else {
            capabilities.max_image_count.min(capabilities.min_image_count + 1)
        };

        log::info!("swapchain: {image_count} images at {}x{}", extent.width, extent.height);

        let queue_family_indices = [desc.graphics_queue_family_index, desc.present_queue_family_index];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.vulkan())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        if desc.graphics_queue_family_index == desc.present_queue_family_index {
            create_info = create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        } else {
            create_info = create_info.image_sharing_mode(vk::SharingMode::CONCURRENT).queue_family_indices(&queue_family_indices);
        }

        let ash_swapchain = khr::Swapchain::new(context.raw(), &device);
        let raw = unsafe { ash_swapchain.create_swapchain(&create_info, None) }.context("create swapchain")?;

        let mut swapchain = Self {
            device,
            ash_swapchain,
            raw,
            graphics_queue_family_index: desc.graphics_queue_family_index,
            present_queue_family_index: desc.present_queue_family_index,
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            image_handles: Vec::new(),
            current_image: 0,
            previous_image: 0,
        };
        swapchain.init_images()?;
        Ok(swapchain)
    }

    fn init_images(&mut self) -> Result<()> {
        let images = unsafe { self.ash_swapchain.get_swapchain_images(self.raw) }.context("get swapchain images")?;

        let mut image_views = Vec::with_capacity(images.len());
        let mut image_handles = Vec::with_capacity(images.len());

        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1)
                        .build(),
                );
            let view = unsafe { self.device.create_image_view(&view_info, None) }.context("create swapchain image view")?;
            image_views.push(view);
            image_handles.push(Image::from_swapchain(self.device.clone(), image, view, self.format, self.extent));
        }

        self.images = images;
        self.image_views = image_views;
        self.image_handles = image_handles;
        Ok(())
    }

    /// Blocks until an image is acquired via `signal_semaphore` (a
    /// binary semaphore from the surface's pool); returns `true` if the
    /// swapchain is out-of-date and must be recreated. Swapchain-stale
    /// codes are handled here as a `bool`, not routed through
    /// `error::check` (spec §7).
    pub fn acquire_next_image(&mut self, signal_semaphore: &Semaphore) -> Result<bool> {
        let result = unsafe { self.ash_swapchain.acquire_next_image(self.raw, u64::MAX, signal_semaphore.raw(), vk::Fence::null()) };
        let (index, suboptimal) = match result {
            Ok(pair) => pair,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(true),
            Err(other) => return Err(other.into()),
        };
        self.previous_image = self.current_image;
        self.current_image = index;
        Ok(suboptimal)
    }

    pub fn queue_present(&self, wait_semaphores: &[&Semaphore], queue: &Queue) -> Result<bool> {
        let swapchains = [self.raw];
        let image_indices = [self.current_image];
        let waits = wait_semaphores.iter().map(|s| s.raw()).collect::<Vec<_>>();
        let present_info = vk::PresentInfoKHR::builder().wait_semaphores(&waits).swapchains(&swapchains).image_indices(&image_indices);
        match unsafe { self.ash_swapchain.queue_present(queue.raw(), &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(other) => Err(other.into()),
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    pub fn current_image_index(&self) -> u32 {
        self.current_image
    }

    pub fn current_image(&self) -> &Image {
        &self.image_handles[self.current_image as usize]
    }

    pub fn current_image_mut(&mut self) -> &mut Image {
        &mut self.image_handles[self.current_image as usize]
    }

    pub fn previous_image(&self) -> &Image {
        &self.image_handles[self.previous_image as usize]
    }

    pub fn image_count(&self) -> usize {
        self.image_handles.len()
    }

    /// Image handle at a fixed swapchain index, for building one
    /// framebuffer per swapchain image ahead of time rather than per
    /// frame (spec §4.6/§4.10).
    pub fn image_handle(&self, index: usize) -> &Image {
        &self.image_handles[index]
    }

    /// Rebuilds the swapchain at the surface's current extent, keeping
    /// present mode and queue-family wiring. Called on
    /// `Device::on_resize` / out-of-date acquire-or-present results.
    pub fn recreate(&mut self, context: &Context, surface: &Surface, physical_device: &PhysicalDevice) -> Result<()> {
        let desc = SwapchainDesc::new(u32::MAX, u32::MIN, self.graphics_queue_family_index, self.present_queue_family_index)
            .set_present_mode(self.present_mode);
        self.destroy_swapchain_objects();
        let rebuilt = Swapchain::new(context, surface, physical_device, self.device.clone(), desc)?;
        *self = rebuilt;
        Ok(())
    }

    fn destroy_swapchain_objects(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
        self.image_handles.clear();
        unsafe { self.ash_swapchain.destroy_swapchain(self.raw, None) };
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_swapchain_objects();
    }
}
