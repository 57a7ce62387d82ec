//! Test-only tracing setup, shared across `#[cfg(test)]` modules so the
//! scheduling races this crate's tests are built to exercise (dispatcher
//! vs. worker vs. downstream disposal) are debuggable via `RUST_LOG`
//! instead of guessed at.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing_subscriber` writer scoped to the test harness.
/// Idempotent and cheap to call at the top of every test that wants
/// `RUST_LOG=pipeflow=trace cargo test -- --nocapture` output.
pub(crate) fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Polls `pred` once per cooperative step (`tokio::task::yield_now`), up to
/// `max_steps` times, panicking if it never becomes `true`. The disposal-
/// propagation invariant in SPEC_FULL.md §9 is specified as holding "within a
/// bounded number of cooperative steps" rather than any wall-clock duration,
/// so tests for it bound on steps instead of a timer (which would need real
/// or paused time the test may not otherwise care about).
pub(crate) async fn wait_for(max_steps: usize, mut pred: impl FnMut() -> bool) {
    for _ in 0..max_steps {
        if pred() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not met after {max_steps} cooperative steps");
}
