// =============================================================================
// LOGGING SETUP
// =============================================================================
//
// env_logger at `info` by default, overridable through RUST_LOG. With
// `debug.log_to_file` the output goes to a freshly truncated log file instead
// of stderr.

use std::fs::OpenOptions;
use std::io::Write;

use crate::config::Config;

/// Initialise the global logger. Later calls are ignored.
pub fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Vulkan Samples Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!(
                    "Could not open log file {}: {}; logging to stderr",
                    config.debug.log_file, e
                );
            }
        }
    }

    let _ = builder.try_init();
}
