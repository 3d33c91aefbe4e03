pub mod pass;
pub mod renderer;
pub mod scene;
pub mod types;
