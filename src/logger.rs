//! Logger setup for the stpl binary.

/// Initializes `env_logger`; `RUST_LOG` still overrides the level.
pub fn init_logger(verbose: bool) {
    env_logger::Builder::new()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .parse_default_env()
        .init();
}
