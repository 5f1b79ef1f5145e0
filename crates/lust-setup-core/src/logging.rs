//! Process-wide logging bootstrap shared by the binaries.

use env_logger::Env;

/// Initialise env_logger with `default_level` unless RUST_LOG overrides it.
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: &str) {
    let env = Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .try_init();
}
