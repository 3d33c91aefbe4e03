use anyhow::Result;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use vantage_core::{ash::extensions::khr, vk};

use crate::context::Context;

/// Owns the `VkSurfaceKHR` and the loader functions to query it. Spec
/// §4.6 treats the surface as the anchor the swapchain is built from;
/// it carries no rendering state of its own.
pub struct Surface {
    ash_surface: khr::Surface,
    vulkan_surface: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(
        context: &Context,
        window_handle: &dyn HasRawWindowHandle,
        display_handle: &dyn HasRawDisplayHandle,
    ) -> Result<Self> {
        let ash_surface = khr::Surface::new(context.entry(), context.raw());
        let vulkan_surface = unsafe {
            ash_window::create_surface(
                context.entry(),
                context.raw(),
                display_handle.raw_display_handle(),
                window_handle.raw_window_handle(),
                None,
            )?
        };

        Ok(Self {
            ash_surface,
            vulkan_surface,
        })
    }

    pub fn ash(&self) -> &khr::Surface {
        &self.ash_surface
    }

    pub fn vulkan(&self) -> vk::SurfaceKHR {
        self.vulkan_surface
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.ash_surface.destroy_surface(self.vulkan_surface, None);
        }
    }
}
