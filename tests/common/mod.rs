//! Shared helpers for GPU integration tests.

use std::sync::Arc;

use vk_samples::backend::{GraphicsDevice, GraphicsDeviceOptions, PixelFormat};

/// Headless device without validation, or `None` when no Vulkan device is available.
pub fn headless_device() -> Option<Arc<GraphicsDevice>> {
    let options = GraphicsDeviceOptions::new(false, Some(PixelFormat::R16UNorm), true);
    match GraphicsDevice::create_vulkan(&options) {
        Ok(device) => Some(device),
        Err(e) => {
            eprintln!("No Vulkan device available, skipping: {:#}", e);
            None
        }
    }
}
