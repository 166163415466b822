//! The three samples: two one-shot copy exercises on a headless device and
//! the interactive textured cube.

pub mod copy_texture;
pub mod cubemap_copy;
pub mod textured_cube;
