use std::ffi::CString;

use anyhow::{Context as _, Result};
use vantage_core::{ash, vk};

use crate::framebuffer::RenderPass;

/// Per-variant rasterization/depth state (spec §4.1/§4.4). Vertex
/// input is fixed to empty at every variant — geometry is read through
/// descriptor-indexed storage buffers, not vertex-buffer bindings.
#[derive(Clone, Copy, Debug)]
pub struct RenderState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_bias: bool,
    pub cull_mode: vk::CullModeFlags,
    pub topology: vk::PrimitiveTopology,
    pub conservative_raster: bool,
    pub alpha_blend: bool,
}

impl RenderState {
    pub fn new() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_bias: false,
            cull_mode: vk::CullModeFlags::NONE,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            conservative_raster: false,
            alpha_blend: false,
        }
    }

    pub fn set_depth_test(mut self, enable: bool) -> Self {
        self.depth_test = enable;
        self
    }

    pub fn set_depth_write(mut self, enable: bool) -> Self {
        self.depth_write = enable;
        self
    }

    pub fn set_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn set_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn set_alpha_blend(mut self, enable: bool) -> Self {
        self.alpha_blend = enable;
        self
    }

    pub fn set_conservative_raster(mut self, enable: bool) -> Self {
        self.conservative_raster = enable;
        self
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new()
    }
}

struct PipelineVariant {
    raw: vk::Pipeline,
    #[allow(dead_code)]
    render_state: RenderState,
}

/// A renderpass-compatible graphics program: a list of compiled
/// pipeline variants sharing one shader set, keyed by positional
/// index (spec §3 "GraphicsProgram"). `compile()` appends a new
/// variant and is the only way the variant list grows.
pub struct GraphicsProgram {
    device: ash::Device,
    layout: vk::PipelineLayout,
    shader_stages: Vec<vk::PipelineShaderStageCreateInfo>,
    entry_point: CString,
    variants: Vec<PipelineVariant>,
}

impl GraphicsProgram {
    pub fn new(device: ash::Device, layout: vk::PipelineLayout, shader_stages: Vec<vk::PipelineShaderStageCreateInfo>) -> Self {
        Self {
            device,
            layout,
            shader_stages,
            entry_point: CString::new("main").expect("entry point name has no interior nul"),
            variants: Vec::new(),
        }
    }

    /// Compiles and appends one pipeline variant, returning its index.
    /// Vertex input is always empty; front face is always
    /// counter-clockwise; sample count is always 1; depth bounds and
    /// stencil testing are always disabled (spec §4.4).
    pub fn compile(
        &mut self,
        render_pass: &RenderPass,
        color_attachment_count: u32,
        render_state: RenderState,
    ) -> Result<usize> {
        let stages = self
            .shader_stages
            .iter()
            .map(|s| vk::PipelineShaderStageCreateInfo { p_name: self.entry_point.as_ptr(), ..*s })
            .collect::<Vec<_>>();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(render_state.topology)
            .primitive_restart_enable(false);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);

        let blend_attachment = if render_state.alpha_blend {
            vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(true)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .build()
        };
        let blend_attachments = vec![blend_attachment; color_attachment_count as usize];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(render_state.depth_test)
            .depth_write_enable(render_state.depth_write)
            .depth_compare_op(if render_state.depth_test {
                vk::CompareOp::LESS_OR_EQUAL
            } else {
                vk::CompareOp::ALWAYS
            })
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let mut conservative_raster_state = vk::PipelineRasterizationConservativeStateCreateInfoEXT::builder()
            .conservative_rasterization_mode(vk::ConservativeRasterizationModeEXT::OVERESTIMATE);

        let mut rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(render_state.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(render_state.depth_bias)
            .depth_clamp_enable(false)
            .line_width(1.0);
        if render_state.conservative_raster {
            rasterization_state = rasterization_state.push_next(&mut conservative_raster_state);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(render_pass.raw())
            .subpass(0)
            .build();

        let raw = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
                .map_err(|(_, err)| err)
                .context("create graphics pipeline")?[0]
        };

        self.variants.push(PipelineVariant { raw, render_state });
        Ok(self.variants.len() - 1)
    }

    pub fn variant(&self, index: usize) -> Option<vk::Pipeline> {
        self.variants.get(index).map(|v| v.raw)
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsProgram {
    fn drop(&mut self) {
        for variant in &self.variants {
            unsafe { self.device.destroy_pipeline(variant.raw, None) };
        }
    }
}

/// A single compiled compute pipeline bound to one shader module
/// (spec §3 "ComputeProgram").
pub struct ComputeProgram {
    device: ash::Device,
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputeProgram {
    pub fn new(device: ash::Device, layout: vk::PipelineLayout, shader_stage: vk::PipelineShaderStageCreateInfo) -> Result<Self> {
        let create_info = vk::ComputePipelineCreateInfo::builder().stage(shader_stage).layout(layout).build();
        let raw = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
                .map_err(|(_, err)| err)
                .context("create compute pipeline")?[0]
        };
        Ok(Self { device, raw, layout })
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for ComputeProgram {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.raw, None) };
    }
}
