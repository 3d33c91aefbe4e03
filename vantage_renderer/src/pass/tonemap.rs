use anyhow::{Context as _, Result};
use vantage_core::vk;
use vantage_gpu::{Device, GraphicsProgram, Handle, RenderState, Shader, Work};

#[repr(C)]
#[derive(Clone, Copy)]
struct TonemapPushConstants {
    hdr_slot: u32,
    exposure: f32,
}

/// Tonemap pass (spec §6): a fullscreen triangle generated entirely
/// from `gl_VertexIndex` (no vertex buffer, no index buffer — three
/// bare `draw` calls worth of vertices), sampling the opaque pass's
/// HDR render target through its bindless sampled-image slot.
pub struct TonemapPass {
    program: Handle<GraphicsProgram>,
    variant: usize,
    #[allow(dead_code)]
    vertex_shader: Handle<Shader>,
    #[allow(dead_code)]
    fragment_shader: Handle<Shader>,
}

impl TonemapPass {
    pub fn new(
        device: &mut Device,
        render_pass: &vantage_gpu::RenderPass,
        vertex_bytecode: Vec<u8>,
        fragment_bytecode: Vec<u8>,
    ) -> Result<Self> {
        let vertex_shader = device.create_shader("tonemap.vert", vertex_bytecode, vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader = device.create_shader("tonemap.frag", fragment_bytecode, vk::ShaderStageFlags::FRAGMENT)?;

        let entry_point = std::ffi::CString::new("main").unwrap();
        let stages = vec![
            device.get_shader(vertex_shader).context("tonemap vertex shader")?.stage_create_info(&entry_point),
            device.get_shader(fragment_shader).context("tonemap fragment shader")?.stage_create_info(&entry_point),
        ];

        let program = device.create_graphics_program(stages);
        let render_state = RenderState::new().set_cull_mode(vk::CullModeFlags::NONE);
        let variant = device
            .get_graphics_program_mut(program)
            .context("tonemap program missing immediately after creation")?
            .compile(render_pass, 1, render_state)?;

        Ok(Self {
            program,
            variant,
            vertex_shader,
            fragment_shader,
        })
    }

    pub fn record(&self, device: &Device, work: &Work, hdr_slot: u32, exposure: f32) {
        let Some(program) = device.get_graphics_program(self.program) else {
            log::error!("tonemap pass: program handle is stale");
            return;
        };
        let Some(pipeline) = program.variant(self.variant) else {
            log::error!("tonemap pass: missing compiled variant");
            return;
        };

        work.bind_graphics_pipeline(pipeline);

        let push_constants = TonemapPushConstants { hdr_slot, exposure };
        let bytes = unsafe {
            std::slice::from_raw_parts(
                (&push_constants as *const TonemapPushConstants) as *const u8,
                std::mem::size_of::<TonemapPushConstants>(),
            )
        };
        work.push_constants(device.pipeline_layout(), vk::ShaderStageFlags::ALL, bytes);

        work.draw(3, 1, 0, 0);
    }
}
