//! Ambient `tracing` init helper, mirroring the teacher's `ensure_init`/
//! `Once`-gated subscriber install (`lib.rs::ensure_init`, `op_count.rs`).

use std::sync::Once;
use tracing::Level;

static INIT: Once = Once::new();

/// Installs a process-wide `tracing_subscriber::fmt` subscriber once.
/// Debug builds log at `TRACE`; release builds at `WARN`, matching the
/// teacher's `#[cfg(debug_assertions)]`-gated verbosity split in
/// `op_count.rs`.
pub fn ensure_init() {
    INIT.call_once(|| {
        let level = if cfg!(debug_assertions) { Level::TRACE } else { Level::WARN };
        let _ = tracing_subscriber::fmt().with_max_level(level).without_time().try_init();
    });
}
