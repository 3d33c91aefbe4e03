use std::collections::HashMap;

use anyhow::{Context as _, Result};
use vantage_core::vk;

/// What happens to an attachment's prior contents at the start of a
/// pass — the cache key for `RenderPass` objects (spec §4.4). The
/// teacher's dynamic-rendering approach (`vk::PipelineRenderingCreateInfo`,
/// `cmd_begin_rendering`) needs no such object; this runtime is
/// required to build and cache classic `VkRenderPass`/`VkFramebuffer`
/// pairs instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    DontCare,
    Load,
    Clear,
}

impl LoadOp {
    fn vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        }
    }
}

#[derive(Clone)]
struct AttachmentSlot {
    format: vk::Format,
    final_layout: vk::ImageLayout,
    is_depth: bool,
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct RenderPassKey {
    // load_op per attachment, color attachments first then depth, matching `slots` order.
    load_ops: Vec<u8>,
}

pub struct RenderPass {
    raw: vk::RenderPass,
    color_attachment_count: u32,
    has_depth: bool,
}

impl RenderPass {
    pub fn raw(&self) -> vk::RenderPass {
        self.raw
    }
}

/// MAX_RENDERPASS cap (spec §4.4): once a `Framebuffer`'s own cache is
/// full, the oldest entry is evicted to make room — render-pass objects
/// are cheap to rebuild and this keeps the cache from growing unbounded
/// across a long-running application that cycles through many load-op
/// combinations (e.g. a capture tool swapping clear vs. load passes).
const MAX_RENDERPASS: usize = 64;

/// A `VkFramebuffer` bound to a fixed set of attachment image views,
/// paired with the small render-pass cache the spec requires it to own
/// directly (spec §4.4: "`find_or_create_renderpass(fb, load_ops)`" is
/// a method on the framebuffer, not a free-standing cache object).
/// Render passes differing only in load/store ops are render-pass-
/// compatible, so a single `vk::Framebuffer` serves every variant this
/// cache produces.
pub struct Framebuffer {
    device: vantage_core::ash::Device,
    raw: vk::Framebuffer,
    extent: vk::Extent2D,
    slots: Vec<AttachmentSlot>,
    render_passes: HashMap<RenderPassKey, vk::RenderPass>,
    order: Vec<RenderPassKey>,
}

impl Framebuffer {
    pub fn new(
        device: vantage_core::ash::Device,
        color_attachments: &[(vk::Format, vk::ImageView, vk::ImageLayout)],
        depth_attachment: Option<(vk::Format, vk::ImageView, vk::ImageLayout)>,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(color_attachments.len() + 1);
        let mut views = Vec::with_capacity(color_attachments.len() + 1);
        for &(format, view, final_layout) in color_attachments {
            slots.push(AttachmentSlot {
                format,
                final_layout,
                is_depth: false,
            });
            views.push(view);
        }
        if let Some((format, view, final_layout)) = depth_attachment {
            slots.push(AttachmentSlot {
                format,
                final_layout,
                is_depth: true,
            });
            views.push(view);
        }

        let mut framebuffer = Self {
            device,
            raw: vk::Framebuffer::null(),
            extent,
            slots,
            render_passes: HashMap::new(),
            order: Vec::new(),
        };

        let initial_load_ops = vec![LoadOp::DontCare; framebuffer.slots.len()];
        let compatible_pass = framebuffer.find_or_create_renderpass(&initial_load_ops)?;

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(compatible_pass.raw())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        framebuffer.raw = unsafe { framebuffer.device.create_framebuffer(&create_info, None) }.context("create framebuffer")?;

        Ok(framebuffer)
    }

    /// Looks up (or builds) the render pass matching this framebuffer's
    /// attachment formats/layouts for the given per-attachment load ops
    /// — color attachments first, then depth if present, same order the
    /// framebuffer was constructed with.
    pub fn find_or_create_renderpass(&mut self, load_ops: &[LoadOp]) -> Result<RenderPass> {
        debug_assert_eq!(load_ops.len(), self.slots.len());

        let color_attachment_count = self.slots.iter().filter(|s| !s.is_depth).count() as u32;
        let has_depth = self.slots.iter().any(|s| s.is_depth);

        let key = RenderPassKey {
            load_ops: load_ops.iter().map(|op| *op as u8).collect(),
        };
        if let Some(&raw) = self.render_passes.get(&key) {
            return Ok(RenderPass {
                raw,
                color_attachment_count,
                has_depth,
            });
        }

        if self.order.len() >= MAX_RENDERPASS {
            let evicted = self.order.remove(0);
            if let Some(raw) = self.render_passes.remove(&evicted) {
                unsafe { self.device.destroy_render_pass(raw, None) };
            }
        }

        let mut descriptions = Vec::with_capacity(self.slots.len());
        let mut color_refs = Vec::new();
        let mut depth_ref = None;

        for (slot, &load_op) in self.slots.iter().zip(load_ops) {
            let index = descriptions.len() as u32;
            descriptions.push(
                vk::AttachmentDescription::builder()
                    .format(slot.format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(load_op.vk())
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .initial_layout(if load_op == LoadOp::Load {
                        slot.final_layout
                    } else {
                        vk::ImageLayout::UNDEFINED
                    })
                    .final_layout(slot.final_layout)
                    .build(),
            );
            if slot.is_depth {
                depth_ref = Some(
                    vk::AttachmentReference::builder()
                        .attachment(index)
                        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                        .build(),
                );
            } else {
                color_refs.push(
                    vk::AttachmentReference::builder()
                        .attachment(index)
                        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .build(),
                );
            }
        }

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&descriptions)
            .subpasses(std::slice::from_ref(&subpass));

        let raw = unsafe { self.device.create_render_pass(&create_info, None) }.context("create render pass")?;

        self.render_passes.insert(key.clone(), raw);
        self.order.push(key);

        Ok(RenderPass {
            raw,
            color_attachment_count,
            has_depth,
        })
    }

    pub fn raw(&self) -> vk::Framebuffer {
        self.raw
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.raw, None) };
        for raw in self.render_passes.values() {
            unsafe { self.device.destroy_render_pass(*raw, None) };
        }
    }
}
