use std::sync::OnceLock;

use env_logger::Env;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Installs the process logger once. `RUST_LOG` overrides the level; `verbose`
/// raises the default from `info` to `debug`.
pub fn init(verbose: bool) {
    LOGGER_INIT.get_or_init(|| {
        let default_level = if verbose { "debug" } else { "info" };
        // A logger installed by an embedding binary wins.
        let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .try_init();
    });
}
