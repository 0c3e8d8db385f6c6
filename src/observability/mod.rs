//! Structured logging via `tracing`.
//!
//! The engine instruments durable-store transactions and index rebuilds
//! with spans carrying `project_path`, `session_id`, and `memory_id` fields
//! where applicable; callers initialize a subscriber once at startup with
//! [`init_tracing`].

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Initialize a process-wide `tracing` subscriber reading verbosity from
/// `log_level` (falls back to the `RUST_LOG` env var, then `info`).
///
/// Safe to call more than once; only the first call takes effect.
pub fn init_tracing(log_level: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
        // A prior global subscriber (e.g. installed by a host process) wins silently.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Short correlation id for tagging one external call's log lines, e.g.
/// `tracing::info_span!("remember", request_id = %request_id())`.
#[must_use]
pub fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing("debug");
        init_tracing("debug");
    }

    #[test]
    fn request_id_is_short_and_unique() {
        let a = request_id();
        let b = request_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }
}
