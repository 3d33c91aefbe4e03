use anyhow::{Context as _, Result};
use vantage_core::vk;
use vantage_gpu::{Device, GraphicsProgram, Handle, RenderState, RingBuffer, Shader, Streamer, Work};

use crate::scene::SceneDraw;
use crate::types::DrawInstance;

/// GPU-visible layout matched by the opaque pass's vertex shader: one
/// push-constant range per draw, pointing at the `DrawInstance` the
/// shader should read out of the bindless instance storage buffer and
/// the bindless storage buffer holding that mesh's positions.
#[repr(C)]
#[derive(Clone, Copy)]
struct OpaquePushConstants {
    instance_ring_slot: u32,
    instance_index: u32,
    vertex_buffer_slot: u32,
}

/// Opaque geometry pass (spec §6): reads vertex positions through a
/// bindless storage buffer rather than a bound vertex buffer, so the
/// pipeline's vertex input state stays empty — `GraphicsProgram::compile`
/// already fixes this (spec §4.4). Grounded on the teacher's
/// `SimplePbrPass`/`SimplePbrRenderPass` split: a descriptor-holder
/// struct that hands out a render closure per frame.
pub struct OpaquePass {
    program: Handle<GraphicsProgram>,
    variant: usize,
    #[allow(dead_code)]
    vertex_shader: Handle<Shader>,
    #[allow(dead_code)]
    fragment_shader: Handle<Shader>,
}

impl OpaquePass {
    pub fn new(
        device: &mut Device,
        render_pass: &vantage_gpu::RenderPass,
        vertex_bytecode: Vec<u8>,
        fragment_bytecode: Vec<u8>,
    ) -> Result<Self> {
        let vertex_shader = device.create_shader("opaque.vert", vertex_bytecode, vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader = device.create_shader("opaque.frag", fragment_bytecode, vk::ShaderStageFlags::FRAGMENT)?;

        let entry_point = std::ffi::CString::new("main").unwrap();
        let stages = vec![
            device.get_shader(vertex_shader).context("opaque vertex shader")?.stage_create_info(&entry_point),
            device.get_shader(fragment_shader).context("opaque fragment shader")?.stage_create_info(&entry_point),
        ];

        let program = device.create_graphics_program(stages);
        let render_state = RenderState::new()
            .set_depth_test(true)
            .set_depth_write(true)
            .set_cull_mode(vk::CullModeFlags::BACK)
            .set_topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let variant = device
            .get_graphics_program_mut(program)
            .context("opaque program missing immediately after creation")?
            .compile(render_pass, 1, render_state)?;

        Ok(Self {
            program,
            variant,
            vertex_shader,
            fragment_shader,
        })
    }

    /// Records one draw call per `SceneDraw`, skipping any whose
    /// texture has not finished streaming in yet (spec §4.10). Each
    /// draw's transform and material index travel through the instance
    /// ring rather than a push-constant-resident matrix, keeping the
    /// push-constant range well under the device's 128-byte budget.
    pub fn record(
        &self,
        device: &Device,
        work: &Work,
        draws: &[SceneDraw],
        streamer: &Streamer,
        instance_ring: &mut RingBuffer,
        instance_ring_slot: u32,
        index_buffer: vk::Buffer,
        vertex_buffer_slot: u32,
    ) {
        let Some(program) = device.get_graphics_program(self.program) else {
            log::error!("opaque pass: program handle is stale");
            return;
        };
        let Some(pipeline) = program.variant(self.variant) else {
            log::error!("opaque pass: missing compiled variant");
            return;
        };

        work.bind_graphics_pipeline(pipeline);
        work.bind_index_buffer(index_buffer, 0);

        for draw in draws {
            if let Some(texture) = draw.texture {
                if !streamer.is_image_uploaded(texture) {
                    continue;
                }
            }

            let instance = DrawInstance {
                model: draw.model,
                first_index: draw.first_index,
                index_count: draw.index_count,
                vertex_offset: draw.vertex_offset,
                material_index: draw.material_index,
            };
            let offset = instance_ring.allocate_copy(&instance);
            let instance_index = (offset / std::mem::size_of::<DrawInstance>() as u64) as u32;

            let push_constants = OpaquePushConstants {
                instance_ring_slot,
                instance_index,
                vertex_buffer_slot,
            };
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    (&push_constants as *const OpaquePushConstants) as *const u8,
                    std::mem::size_of::<OpaquePushConstants>(),
                )
            };
            work.push_constants(device.pipeline_layout(), vk::ShaderStageFlags::ALL, bytes);

            work.draw_indexed(draw.index_count, 1, draw.first_index, draw.vertex_offset, 0);
        }
    }
}
