
pub use log::{trace, debug, info, warn, error, log_enabled, Level, LevelFilter};

/// Install the process-wide logger.
///
/// `RUST_LOG` is still honoured and overrides `level` per module.
pub fn initialize(level: LevelFilter) -> Result<(), anyhow::Error> {
    env_logger::builder()
        .filter_level(level)
        .filter_module("keel_rhi::vulkan", level.min(LevelFilter::Debug))
        .parse_default_env()
        .try_init()?;

    Ok(())
}
