//! Subscriber initialization for binaries and tests (§10). Library code in
//! this crate only ever emits through the `tracing` facade; nothing here
//! runs unless a binary or test harness calls [`init`].

use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, defaulting to
/// `info` when the variable isn't set. Safe to call more than once — a
/// second call is a no-op rather than a panic.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
