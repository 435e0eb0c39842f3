// rust/patch-loader/src/logging.rs

use tracing_subscriber::EnvFilter;

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "PLD_LOG";

/// Installs a global fmt subscriber filtered by [`env_filter`].
///
/// Log fields used by the loader:
/// - `split` on every prefetch and balancing event.
/// - `samples` and `rows` on catalog and planning summaries.
/// - `path` and `kind` on snapshot I/O.
///
/// Returns quietly if a global subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init();
}

/// `PLD_LOG` first, then `RUST_LOG`, then `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
        tracing::info!(split = 0, "logging initialized");
    }
}
