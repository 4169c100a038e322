//! Logging setup for embedders and this crate's own tests. The dispatch
//! loop and code generator log through the plain [`log`] facade (`trace!`
//! for per-instruction detail, `debug!` for frame-lifecycle events); this
//! module only wires up a backend, the way the rest of the pack's tests
//! call `env_logger::try_init` rather than reaching for `tracing`.

/// Installs `env_logger` as the global logger, if one isn't already
/// installed. Safe to call more than once (e.g. from several test
/// modules run in the same process) — later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
