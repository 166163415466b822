// Copy a 512x512 texture into one face of a cubemap on a headless device.

use anyhow::Result;
use vk_samples::{init_logging, samples::cubemap_copy, Config};

fn main() -> Result<()> {
    let (config, config_error) = Config::load();
    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::info!("Starting cubemap_copy sample");

    cubemap_copy::run(&cubemap_copy::device_options(&config))?;

    log::info!("cubemap_copy finished");
    Ok(())
}
