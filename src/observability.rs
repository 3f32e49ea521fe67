//! Logging setup.
//!
//! The crate logs through `tracing` under `reqcycle::*` targets
//! (`reqcycle::engine`, `reqcycle::cache`, `reqcycle::transport`,
//! `reqcycle::redirection`, `reqcycle::dispatch`). Applications that already
//! install a subscriber need nothing from here.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber for `reqcycle` logs.
///
/// `RUST_LOG` wins over `default_filter` when set. Returns `false` if a
/// global subscriber was already installed, which is not an error.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        init_tracing("reqcycle=debug");
        assert!(!init_tracing("reqcycle=trace"));
    }
}
