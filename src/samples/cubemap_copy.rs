// Region copy from a sampled BGRA8 texture into the first face (+X) of an
// RGBA8 cubemap on a headless device.

use anyhow::Result;
use std::sync::Arc;

use crate::backend::{
    CommandList, GraphicsDevice, GraphicsDeviceOptions, PixelFormat, Texture, TextureDescription,
    TextureUsage,
};
use crate::config::Config;

pub const TEXTURE_SIZE: u32 = 512;

/// The depth format only matters for windowed devices; this sample has none.
pub fn device_options(config: &Config) -> GraphicsDeviceOptions {
    GraphicsDeviceOptions::new(
        config.validation_enabled(true),
        Some(PixelFormat::R16Float),
        true,
    )
}

pub fn run_on(device: &Arc<GraphicsDevice>) -> Result<()> {
    let cubemap = Texture::new(
        device,
        &TextureDescription::texture_2d(
            TEXTURE_SIZE,
            TEXTURE_SIZE,
            1,
            1,
            PixelFormat::R8G8B8A8UNorm,
            TextureUsage::CUBEMAP,
        ),
    )?;

    // Contents are left undefined; only the copy itself is exercised
    let sampled = Texture::new(
        device,
        &TextureDescription::texture_2d(
            TEXTURE_SIZE,
            TEXTURE_SIZE,
            1,
            1,
            PixelFormat::B8G8R8A8UNorm,
            TextureUsage::SAMPLED,
        ),
    )?;

    let mut cl = CommandList::new(device)?;
    cl.begin()?;
    cl.copy_texture_region(
        &sampled, 0, 0, 0, 0, 0, &cubemap, 0, 0, 0, 0, 0, TEXTURE_SIZE, TEXTURE_SIZE, 0, 1,
    )?;
    cl.end()?;

    device.submit_commands(&cl)?;
    device.wait_for_idle()?;
    log::info!("Copied {0}x{0} texture into cubemap face +X", TEXTURE_SIZE);

    drop(cl);
    drop(sampled);
    drop(cubemap);
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
    fn uses_half_float_depth() {
        let options = device_options(&Config::default());
        assert_eq!(options.swapchain_depth_format, Some(PixelFormat::R16Float));
        assert!(options.sync_to_vertical_blank);
    }

    #[test]
    fn validation_follows_config() {
        let mut config = Config::default();
        config.debug.validation_layers = false;
        assert!(!device_options(&config).debug);
    }
}
