use anyhow::{Context as _, Result};
use vantage_core::vk;
use vantage_gpu::{Device, GraphicsProgram, Handle, RenderState, RingBuffer, Shader, Work};

use crate::types::{UiDrawList, UiVertex};

#[repr(C)]
#[derive(Clone, Copy)]
struct UiPushConstants {
    texture_slot: u32,
    vertex_buffer_slot: u32,
    screen_width: f32,
    screen_height: f32,
}

/// Immediate-mode UI overlay pass (spec §6). The UI library itself —
/// layout, widgets, input handling — is an external collaborator; this
/// pass only knows how to replay an already-built `UiDrawList` of
/// vertices/indices/clip rects, uploading both into this frame's ring
/// buffers the same way the opaque pass pulls vertices through a
/// bindless storage buffer rather than a bound vertex attribute.
pub struct UiPass {
    program: Handle<GraphicsProgram>,
    variant: usize,
    #[allow(dead_code)]
    vertex_shader: Handle<Shader>,
    #[allow(dead_code)]
    fragment_shader: Handle<Shader>,
}

impl UiPass {
    pub fn new(
        device: &mut Device,
        render_pass: &vantage_gpu::RenderPass,
        vertex_bytecode: Vec<u8>,
        fragment_bytecode: Vec<u8>,
    ) -> Result<Self> {
        let vertex_shader = device.create_shader("ui.vert", vertex_bytecode, vk::ShaderStageFlags::VERTEX)?;
        let fragment_shader = device.create_shader("ui.frag", fragment_bytecode, vk::ShaderStageFlags::FRAGMENT)?;

        let entry_point = std::ffi::CString::new("main").unwrap();
        let stages = vec![
            device.get_shader(vertex_shader).context("ui vertex shader")?.stage_create_info(&entry_point),
            device.get_shader(fragment_shader).context("ui fragment shader")?.stage_create_info(&entry_point),
        ];

        let program = device.create_graphics_program(stages);
        let render_state = RenderState::new().set_cull_mode(vk::CullModeFlags::NONE).set_alpha_blend(true);
        let variant = device
            .get_graphics_program_mut(program)
            .context("ui program missing immediately after creation")?
            .compile(render_pass, 1, render_state)?;

        Ok(Self {
            program,
            variant,
            vertex_shader,
            fragment_shader,
        })
    }

    /// Uploads `draw_list`'s vertices/indices into this frame's rings
    /// and replays each command with its own scissor rect and bindless
    /// texture slot. A draw list with no commands records nothing.
    pub fn record(
        &self,
        device: &Device,
        work: &Work,
        draw_list: &UiDrawList,
        vertex_ring: &mut RingBuffer,
        index_ring: &mut RingBuffer,
        vertex_buffer_slot: u32,
        screen_width: f32,
        screen_height: f32,
    ) {
        if draw_list.commands.is_empty() {
            return;
        }

        let Some(program) = device.get_graphics_program(self.program) else {
            log::error!("ui pass: program handle is stale");
            return;
        };
        let Some(pipeline) = program.variant(self.variant) else {
            log::error!("ui pass: missing compiled variant");
            return;
        };

        let vertex_byte_offset = write_slice(vertex_ring, &draw_list.vertices);
        let index_byte_offset = write_slice(index_ring, &draw_list.indices);
        let vertex_base = (vertex_byte_offset / std::mem::size_of::<UiVertex>() as u64) as i32;

        work.bind_graphics_pipeline(pipeline);
        work.bind_index_buffer(index_ring.raw(), index_byte_offset);

        for command in &draw_list.commands {
            let [x, y, width, height] = command.clip_rect;
            work.set_scissor(x as i32, y as i32, width.max(0.0) as u32, height.max(0.0) as u32);

            let push_constants = UiPushConstants {
                texture_slot: command.texture_slot,
                vertex_buffer_slot,
                screen_width,
                screen_height,
            };
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    (&push_constants as *const UiPushConstants) as *const u8,
                    std::mem::size_of::<UiPushConstants>(),
                )
            };
            work.push_constants(device.pipeline_layout(), vk::ShaderStageFlags::ALL, bytes);

            work.draw_indexed(command.index_count, 1, command.first_index, vertex_base + command.vertex_offset, 0);
        }
    }
}

fn write_slice<T: Copy>(ring: &mut RingBuffer, data: &[T]) -> u64 {
    if data.is_empty() {
        return 0;
    }
    let (ptr, offset) = ring.allocate((std::mem::size_of::<T>() * data.len()) as u64);
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr() as *mut T, data.len()) };
    offset
}
