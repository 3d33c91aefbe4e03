pub mod opaque;
pub mod tonemap;
pub mod ui;
