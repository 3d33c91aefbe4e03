pub use ash;
pub use ash::vk;
pub use nalgebra;
pub use nalgebra_glm as glm;

pub type Vec2 = nalgebra::Vector2<f32>;
pub type Vec3 = nalgebra::Vector3<f32>;
pub type Vec4 = nalgebra::Vector4<f32>;
pub type Mat4 = nalgebra::Matrix4<f32>;
pub type Quat = nalgebra::UnitQuaternion<f32>;
