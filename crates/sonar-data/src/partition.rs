// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partition names, document id rules and table resolution.

use std::sync::LazyLock;

use regex::Regex;
use sonar_core::{SonarError, TokenResult};
use sonar_storage::{user_table_name, READONLY_TABLE};

/// Documents shared by every user of the application, read-only on device.
pub const READONLY: &str = "readonly";

/// Documents private to the signed-in user.
pub const USER: &str = "user";

static DOCUMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/\\#\s?]+$").unwrap());

pub fn is_valid_partition(partition: &str) -> bool {
    partition == READONLY || partition == USER
}

pub fn is_valid_document_id(document_id: &str) -> bool {
    DOCUMENT_ID.is_match(document_id)
}

/// Reject a bad partition or document id before anything touches the cache.
pub fn validate(partition: &str, document_id: Option<&str>) -> Result<(), SonarError> {
    if !is_valid_partition(partition) {
        return Err(SonarError::InvalidArgument(format!(
            "partition name can be either '{READONLY}' or '{USER}' but not '{partition}'"
        )));
    }
    if let Some(id) = document_id {
        if !is_valid_document_id(id) {
            return Err(SonarError::InvalidArgument(format!(
                "invalid document id '{id}'"
            )));
        }
    }
    Ok(())
}

/// Strip the account suffix a user token carries (`user-<account>` -> `user`).
pub fn remove_account_id(partition: &str) -> &str {
    if partition == READONLY {
        return partition;
    }
    match partition.split_once('-') {
        Some((prefix, _)) => prefix,
        None => partition,
    }
}

/// Cache table holding the documents a token grants access to.
pub fn table_for_token(token: &TokenResult) -> Result<String, SonarError> {
    if !token.partition.starts_with(USER) {
        return Ok(READONLY_TABLE.to_string());
    }
    token
        .account_id
        .as_deref()
        .map(user_table_name)
        .ok_or_else(|| SonarError::Token {
            message: format!("token for partition '{}' has no account id", token.partition),
            source: None,
        })
}

/// Key of the outgoing-call set for one document.
pub fn outgoing_id(partition: &str, document_id: &str) -> String {
    format!("{partition}_{document_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn token(partition: &str, account_id: Option<&str>) -> TokenResult {
        TokenResult {
            partition: partition.into(),
            db_account: Some("account".into()),
            db_name: Some("db".into()),
            db_collection_name: Some("collection".into()),
            token: Some("secret".into()),
            status: Some("Succeed".into()),
            expires_on: Utc::now(),
            account_id: account_id.map(String::from),
        }
    }

    #[test]
    fn only_known_partitions_are_valid() {
        assert!(validate(READONLY, Some("doc1")).is_ok());
        assert!(validate(USER, None).is_ok());
        let err = validate("other", Some("doc1")).unwrap_err();
        assert!(matches!(err, SonarError::InvalidArgument(_)));
        assert!(err.to_string().contains("'other'"));
    }

    #[test]
    fn document_ids_reject_reserved_characters() {
        for id in ["doc1", "a.b-c_d", "émoji"] {
            assert!(is_valid_document_id(id), "{id} should be valid");
        }
        for id in ["", "a/b", "a\\b", "a#b", "a b", "a?b", "tab\there"] {
            assert!(!is_valid_document_id(id), "{id:?} should be invalid");
        }
    }

    #[test]
    fn account_suffix_is_removed() {
        assert_eq!(remove_account_id("readonly"), "readonly");
        assert_eq!(
            remove_account_id("user-8d3f8d39-54c4-4b6e-bd1a-4b0c5d7a9d8f"),
            "user"
        );
        assert_eq!(remove_account_id("user"), "user");
    }

    #[test]
    fn tables_resolve_from_tokens() {
        assert_eq!(
            table_for_token(&token("readonly", None)).unwrap(),
            READONLY_TABLE
        );
        assert_eq!(
            table_for_token(&token("user-ab-cd", Some("ab-cd"))).unwrap(),
            "user_abcd"
        );
        assert!(matches!(
            table_for_token(&token("user-ab", None)),
            Err(SonarError::Token { .. })
        ));
    }

    #[test]
    fn outgoing_ids_join_partition_and_document() {
        assert_eq!(outgoing_id("readonly", "doc1"), "readonly_doc1");
    }
}
