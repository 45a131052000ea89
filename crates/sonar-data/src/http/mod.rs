// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! reqwest implementations of the remote document and token seams.

pub mod cosmos;
pub mod token_exchange;

pub use cosmos::HttpDocumentClient;
pub use token_exchange::HttpTokenExchange;
