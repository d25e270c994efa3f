// Ambient logging setup: one place that wires `tracing-subscriber` with an
// env filter, matching the teacher's init pattern
// (knhk-closed-loop binaries init a global subscriber once at startup).

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading level filters from
/// `RUST_LOG`, defaulting to `info` when unset. Safe to call once per
/// process; a second call is a no-op (the underlying `try_init` ignores the
/// "already set" error).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
