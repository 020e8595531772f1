//! Log output for tests.

use tracing_subscriber::EnvFilter;

/// Installs a subscriber that writes engine logs through the test
/// harness's captured output.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Calling this
/// more than once is harmless; only the first call installs anything.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestEnvironment;

    #[test]
    fn init_twice_is_harmless() {
        init_test_logging();
        init_test_logging();
        let test_env = TestEnvironment::memory();
        tracing::info!(generation = %test_env.generation(), "logging from a test");
    }
}
