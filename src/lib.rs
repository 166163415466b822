//! Vulkan sample applications on a thin `ash` abstraction layer.
//!
//! - `backend`: device, resources, command lists, swapchain
//! - `host`: winit event loop running an interactive sample
//! - `samples`: texture copy, cubemap copy, textured cube

pub mod animation;
pub mod assets;
pub mod backend;
pub mod config;
pub mod host;
pub mod logging;
pub mod mesh;
pub mod samples;

pub use config::Config;
pub use logging::init_logging;
