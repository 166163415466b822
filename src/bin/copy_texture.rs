// Copy one 512x512 texture into another on a headless device.

use anyhow::Result;
use vk_samples::{init_logging, samples::copy_texture, Config};

fn main() -> Result<()> {
    let (config, config_error) = Config::load();
    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::info!("Starting copy_texture sample");

    copy_texture::run(&copy_texture::device_options(&config))?;

    log::info!("copy_texture finished");
    Ok(())
}
