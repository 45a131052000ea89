// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recoverable versus fatal ingestion failures.
//!
//! A recoverable failure suspends the channel and keeps the logs for a later
//! retry. Anything else is fatal: the remote rejected the payload and the
//! affected group's backlog is discarded.

use sonar_core::SonarError;

/// HTTP statuses worth retrying: server errors, request timeout, throttling.
pub fn is_recoverable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

pub fn is_recoverable_error(err: &SonarError) -> bool {
    match err {
        SonarError::Network { .. } | SonarError::Timeout { .. } => true,
        SonarError::Http { status, .. } | SonarError::Throttled { status, .. } => {
            is_recoverable_status(*status)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> SonarError {
        SonarError::Http {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn connectivity_failures_are_recoverable() {
        assert!(is_recoverable_error(&SonarError::Network {
            message: "connection reset".into(),
            source: None,
        }));
        assert!(is_recoverable_error(&SonarError::Timeout {
            duration: std::time::Duration::from_secs(20),
        }));
    }

    #[test]
    fn server_errors_and_throttling_are_recoverable() {
        for status in [408, 429, 500, 503, 599] {
            assert!(is_recoverable_error(&http(status)), "status {status}");
        }
    }

    #[test]
    fn throttled_answers_are_recoverable() {
        assert!(is_recoverable_error(&SonarError::Throttled {
            status: 429,
            body: String::new(),
            retry_after: std::time::Duration::from_secs(1),
        }));
    }

    #[test]
    fn client_errors_are_fatal() {
        for status in [400, 401, 403, 404, 413] {
            assert!(!is_recoverable_error(&http(status)), "status {status}");
        }
        assert!(!is_recoverable_error(&SonarError::Serialization {
            message: "bad".into(),
            source: None,
        }));
        assert!(!is_recoverable_error(&SonarError::Cancelled));
    }
}
