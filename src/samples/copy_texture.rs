// Whole-texture copy between two sampled RGBA8 textures on a headless device.

use anyhow::Result;
use std::sync::Arc;

use crate::backend::{
    CommandList, GraphicsDevice, GraphicsDeviceOptions, PixelFormat, Texture, TextureDescription,
    TextureUsage,
};
use crate::config::Config;

pub const TEXTURE_SIZE: u32 = 512;

pub fn device_options(config: &Config) -> GraphicsDeviceOptions {
    GraphicsDeviceOptions::new(
        config.validation_enabled(true),
        Some(PixelFormat::R16UNorm),
        true,
    )
}

/// Create both textures on `device`, copy one into the other and wait for the GPU.
pub fn run_on(device: &Arc<GraphicsDevice>) -> Result<()> {
    let description = TextureDescription::texture_2d(
        TEXTURE_SIZE,
        TEXTURE_SIZE,
        1,
        1,
        PixelFormat::R8G8B8A8UNorm,
        TextureUsage::SAMPLED,
    );
    let src = Texture::new(device, &description)?;
    let dst = Texture::new(device, &description)?;

    let mut cl = CommandList::new(device)?;
    cl.begin()?;
    cl.copy_texture(&src, &dst)?;
    cl.end()?;

    device.submit_commands(&cl)?;
    device.wait_for_idle()?;
    log::info!("Copied {0}x{0} texture", TEXTURE_SIZE);

    drop(cl);
    drop(dst);
    drop(src);
    Ok(())
}

pub fn run(options: &GraphicsDeviceOptions) -> Result<()> {
    let device = GraphicsDevice::create_vulkan(options)?;
    run_on(&device)?;
    drop(device);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_sixteen_bit_unorm_depth_with_vsync() {
        let options = device_options(&Config::default());
        assert!(options.debug);
        assert_eq!(options.swapchain_depth_format, Some(PixelFormat::R16UNorm));
        assert!(options.sync_to_vertical_blank);
    }
}
