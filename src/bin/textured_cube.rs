// Rotating textured cube with a fade-in. Esc quits, F11 toggles fullscreen.

use anyhow::Result;
use vk_samples::{host, init_logging, samples::textured_cube::TexturedCube, Config};

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, config_error) = Config::load();

    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::info!("Starting textured_cube sample");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    host::run(TexturedCube::new(), config)
}
