use vantage_core::{Mat4, Vec4};
use vantage_gpu::{Handle, Image};

/// One instance of previously-uploaded geometry, positioned for the
/// current frame. `first_index`/`index_count`/`vertex_offset` address
/// into the renderer's shared index/vertex pools exactly as returned
/// by `Renderer::upload_geometry` (spec §6 "scene iteration callback").
#[derive(Clone, Copy)]
pub struct SceneDraw {
    pub model: Mat4,
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub material_index: u32,
    /// Texture the material reads from, if any. A draw referencing a
    /// texture that is not yet `Streamer::is_image_uploaded` is skipped
    /// for the frame rather than sampling garbage (spec §4.10).
    pub texture: Option<Handle<Image>>,
}

/// The renderer's external collaborator for camera state and draw
/// lists. Scene graph evaluation, ECS storage, and asset import are
/// all out of scope here (spec §1 non-goals) — a `Scene` only needs to
/// answer "what does this frame look like" on demand.
pub trait Scene {
    fn view(&self) -> Mat4;
    fn projection(&self) -> Mat4;
    fn camera_position(&self) -> Vec4;
    fn draws(&self) -> &[SceneDraw];
}

/// Minimal `Scene` useful for a single fixed camera and a static draw
/// list, e.g. tests and small demos that don't need their own type.
pub struct StaticScene {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec4,
    pub draws: Vec<SceneDraw>,
}

impl Scene for StaticScene {
    fn view(&self) -> Mat4 {
        self.view
    }

    fn projection(&self) -> Mat4 {
        self.projection
    }

    fn camera_position(&self) -> Vec4 {
        self.camera_position
    }

    fn draws(&self) -> &[SceneDraw] {
        &self.draws
    }
}

/// Result of `Renderer::upload_geometry`: where the mesh's vertices and
/// indices now live in the shared pools, and the submesh ranges
/// `SceneDraw`s should reference.
#[derive(Clone)]
pub struct MeshResidency {
    pub vertex_offset: i32,
    pub submeshes: Vec<crate::types::Submesh>,
}
