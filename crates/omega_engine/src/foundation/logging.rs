//! Logging utilities and structured logging support

use crate::core::config::LoggingConfig;

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    // A host may already have installed a logger
    let _ = env_logger::try_init();
}

/// Initialize the logging system with the configured default filter
///
/// `RUST_LOG` still takes precedence when set. Calling this more than once
/// is harmless; later calls keep the first logger.
pub fn init_with_config(config: &LoggingConfig) {
    let env = env_logger::Env::default().default_filter_or(config.level.as_str());
    let mut builder = env_logger::Builder::from_env(env);
    builder.format_timestamp_millis();
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized, keeping existing configuration");
    }
}
