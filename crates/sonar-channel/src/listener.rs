// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel-wide listener hooks and callback isolation.

use std::panic::{catch_unwind, AssertUnwindSafe};

use sonar_core::Log;
use tracing::error;

use crate::group::GroupConfig;

/// Observes channel-level events. Every hook defaults to a no-op.
///
/// Hooks run on the channel worker. A panicking hook is logged and skipped;
/// it never leaves the worker in a half-updated state.
pub trait ChannelListener: Send + Sync + 'static {
    fn on_group_added(&self, _group: &str, _config: &GroupConfig) {}

    fn on_group_removed(&self, _group: &str) {}

    /// Called before a log is decorated and persisted. The log may be edited.
    fn on_preparing_log(&self, _log: &mut Log, _group: &str) {}

    /// Called once the log carries its device snapshot and timestamp.
    fn on_prepared_log(&self, _log: &Log, _group: &str) {}

    /// Return `true` to drop the log before it is persisted.
    fn should_filter(&self, _log: &Log) -> bool {
        false
    }

    fn on_globally_enabled(&self, _enabled: bool) {}

    fn on_clear(&self, _group: &str) {}

    fn on_paused(&self, _group: &str) {}

    fn on_resumed(&self, _group: &str) {}
}

/// Run a listener callback, turning a panic into an error log and `fallback`.
pub(crate) fn guarded<R>(callback: &'static str, fallback: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(callback, panic = %message, "listener callback panicked");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn guarded_returns_value() {
        assert_eq!(guarded("test", 0, || 42), 42);
    }

    #[traced_test]
    #[test]
    fn guarded_swallows_panic() {
        let filtered = guarded("should_filter", false, || panic!("listener bug"));
        assert!(!filtered);
        assert!(logs_contain("listener callback panicked"));
        assert!(logs_contain("listener bug"));
    }

    #[test]
    fn default_hooks_are_noops() {
        struct Silent;
        impl ChannelListener for Silent {}

        let mut log = Log::new("event");
        let before = log.clone();
        Silent.on_preparing_log(&mut log, "g");
        assert_eq!(log, before);
        assert!(!Silent.should_filter(&log));
    }
}
