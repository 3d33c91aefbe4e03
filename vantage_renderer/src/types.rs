use vantage_core::{Mat4, Vec4};

/// Per-frame "globals" uniform (spec §4.2.1 set 0: one dynamic UBO
/// bound per frame with a moving offset). Written into the uniform
/// ring buffer once per frame and bound via `Device::bind_globals`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GlobalsUniform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec4,
    pub time_seconds: f32,
    pub screen_width: f32,
    pub screen_height: f32,
    pub _padding: f32,
}

/// One GPU-driven draw instance (spec §4.10 "collect draw instances").
/// `material_index` is opaque to the core (spec §6: "Materials (opaque
/// to the core, carried in instance records)") — the core never
/// interprets it, only forwards it to the shader via push constants.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DrawInstance {
    pub model: Mat4,
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub material_index: u32,
}

/// A contiguous range within a mesh's index buffer (spec §6 "Geometry:
/// ... submesh ranges `{first_index, index_count}`").
#[derive(Clone, Copy, Debug)]
pub struct Submesh {
    pub first_index: u32,
    pub index_count: u32,
}

/// Geometry handed in from the asset pipeline (spec §6). Positions are
/// `float4` (the fourth component is padding so the vertex-storage
/// buffer stride matches the bindless shader's expectations); indices
/// are `u32`.
pub struct Geometry {
    pub positions: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<Submesh>,
}

/// Pixel formats the asset pipeline may hand the core (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    R8Unorm,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
}

impl PixelFormat {
    pub fn vk_format(self) -> vantage_core::vk::Format {
        use vantage_core::vk::Format;
        match self {
            PixelFormat::R8Unorm => Format::R8_UNORM,
            PixelFormat::R8G8Unorm => Format::R8G8_UNORM,
            PixelFormat::R8G8B8A8Unorm => Format::R8G8B8A8_UNORM,
            PixelFormat::R8G8B8A8Srgb => Format::R8G8B8A8_SRGB,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R8Unorm => 1,
            PixelFormat::R8G8Unorm => 2,
            PixelFormat::R8G8B8A8Unorm | PixelFormat::R8G8B8A8Srgb => 4,
        }
    }
}

/// A decoded, row-tight pixel buffer handed in from the asset pipeline
/// (spec §6). Decoding the source image format (PNG/JPEG/KTX/...) is
/// external to the core; this is the post-decode interface.
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// One vertex of an external UI immediate-mode library's draw-list
/// (spec §1: "a UI draw-list" is the one interface the core consumes
/// from the UI library).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct UiVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [u8; 4],
}

/// One draw call within a UI draw-list: a contiguous index range, a
/// scissor rect, and a bindless sampled-image slot for the command's
/// texture (fonts atlas or a user texture).
#[derive(Clone, Copy, Debug)]
pub struct UiDrawCommand {
    pub clip_rect: [f32; 4],
    pub texture_slot: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
}

/// The full per-frame draw-list handed in by the external UI library
/// (spec §1/§6). The core uploads `vertices`/`indices` into the
/// transient ring buffers and replays `commands` verbatim.
pub struct UiDrawList {
    pub vertices: Vec<UiVertex>,
    pub indices: Vec<u32>,
    pub commands: Vec<UiDrawCommand>,
}

impl UiDrawList {
    pub fn empty() -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            commands: Vec::new(),
        }
    }
}

bitflags::bitflags! {
    pub struct DrawFlags: u32 {
        const ALPHA_MASK = 0x1;
    }
}
