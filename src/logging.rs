use log::{info, warn};
use std::path::Path;

/// Initialize log4rs from `config_file`, falling back to env_logger
/// (default filter `info`) when the file is missing or invalid.
pub fn init_logging(config_file: &str) {
    if Path::new(config_file).exists() {
        match log4rs::init_file(config_file, Default::default()) {
            Ok(()) => {
                info!("Logging configured from {}", config_file);
                return;
            }
            Err(e) => eprintln!("Failed to load log config {}: {}", config_file, e),
        }
    }

    let fallback = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
    match fallback {
        Ok(()) => warn!("Log config {} unavailable, using env_logger", config_file),
        Err(e) => eprintln!("Logger already initialized: {}", e),
    }
}
