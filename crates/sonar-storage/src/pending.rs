// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory pending markers shared by the log store implementations.

use std::collections::{HashMap, HashSet};

/// Row ids handed out in batches that are not yet deleted or released.
#[derive(Debug, Default)]
pub(crate) struct PendingBatches {
    groups: HashMap<String, HashMap<String, Vec<i64>>>,
}

impl PendingBatches {
    /// Every row id of `group` currently marked pending.
    pub fn ids(&self, group: &str) -> HashSet<i64> {
        self.groups
            .get(group)
            .map(|batches| batches.values().flatten().copied().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|batches| batches.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Record `ids` under a fresh batch identifier.
    pub fn mark(&mut self, group: &str, ids: Vec<i64>) -> String {
        let batch_id = uuid::Uuid::new_v4().to_string();
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(batch_id.clone(), ids);
        batch_id
    }

    pub fn take(&mut self, group: &str, batch_id: &str) -> Option<Vec<i64>> {
        let batches = self.groups.get_mut(group)?;
        let ids = batches.remove(batch_id);
        if batches.is_empty() {
            self.groups.remove(group);
        }
        ids
    }

    /// Drop `id` from whichever batch holds it.
    pub fn forget_id(&mut self, group: &str, id: i64) {
        if let Some(batches) = self.groups.get_mut(group) {
            for ids in batches.values_mut() {
                ids.retain(|pending| *pending != id);
            }
        }
    }

    pub fn forget_group(&mut self, group: &str) {
        self.groups.remove(group);
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
