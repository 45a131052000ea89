// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Log ingestion transport for the Sonar telemetry SDK.

pub mod classify;
pub mod http;
pub mod retry;

pub use classify::{is_recoverable_error, is_recoverable_status};
pub use http::{mask_secret, HttpIngestion};
pub use retry::{RetryPolicy, RetryingIngestion};
