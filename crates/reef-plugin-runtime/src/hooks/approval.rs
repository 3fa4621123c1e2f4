//! In-memory mirror of durable hook approval state

use parking_lot::RwLock;
use reef_state::{HookKey, HookRow};
use serde::Serialize;
use std::collections::HashMap;

/// Approval flags of one (plugin, event, table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ApprovalState {
    /// Approved by an operator
    pub approved: bool,
    /// Temporarily disabled
    pub disabled: bool,
}

impl ApprovalState {
    /// Approved and not disabled
    pub fn is_eligible(&self) -> bool {
        self.approved && !self.disabled
    }
}

impl From<&HookRow> for ApprovalState {
    fn from(row: &HookRow) -> Self {
        Self {
            approved: row.approved,
            disabled: row.disabled,
        }
    }
}

/// Approval map consulted on every dispatch
///
/// Writers go through the hook engine, which serializes them with the
/// matching store update. Unknown keys are never eligible.
#[derive(Debug, Default)]
pub(crate) struct ApprovalMirror {
    states: RwLock<HashMap<HookKey, ApprovalState>>,
}

impl ApprovalMirror {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &HookKey) -> Option<ApprovalState> {
        self.states.read().get(key).copied()
    }

    pub(crate) fn is_eligible(&self, key: &HookKey) -> bool {
        self.get(key).map(|s| s.is_eligible()).unwrap_or(false)
    }

    pub(crate) fn set_approved(&self, key: &HookKey, approved: bool) {
        self.states.write().entry(key.clone()).or_default().approved = approved;
    }

    pub(crate) fn set_disabled(&self, key: &HookKey, disabled: bool) {
        self.states.write().entry(key.clone()).or_default().disabled = disabled;
    }

    /// Replace every state of `plugin` with `rows`
    pub(crate) fn replace_plugin(&self, plugin: &str, rows: &[HookRow]) {
        let mut states = self.states.write();
        states.retain(|key, _| key.plugin != plugin);
        for row in rows {
            states.insert(row.key(), ApprovalState::from(row));
        }
    }

    /// Keep only plugins in `plugins`; an empty slice clears everything
    pub(crate) fn retain_plugins(&self, plugins: &[String]) {
        self.states
            .write()
            .retain(|key, _| plugins.iter().any(|p| *p == key.plugin));
    }

    /// Rebuild from a full listing of the store
    pub(crate) fn load(&self, rows: &[HookRow]) {
        let fresh = rows
            .iter()
            .map(|row| (row.key(), ApprovalState::from(row)))
            .collect();
        *self.states.write() = fresh;
    }

    pub(crate) fn len(&self) -> usize {
        self.states.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(plugin: &str, table: &str, approved: bool) -> HookRow {
        HookRow {
            plugin: plugin.to_string(),
            event: "before_create".to_string(),
            table_name: table.to_string(),
            priority: 100,
            wildcard: table == "*",
            handler: "hook:1".to_string(),
            plugin_version: "1.0.0".to_string(),
            approved,
            disabled: false,
            approved_by: None,
            approved_at: None,
        }
    }

    #[test]
    fn test_unknown_key_not_eligible() {
        let mirror = ApprovalMirror::new();
        assert!(!mirror.is_eligible(&HookKey::new("p", "before_create", "posts")));
    }

    #[test]
    fn test_disable_overrides_approval() {
        let mirror = ApprovalMirror::new();
        let key = HookKey::new("p", "before_create", "posts");

        mirror.set_approved(&key, true);
        assert!(mirror.is_eligible(&key));

        mirror.set_disabled(&key, true);
        assert!(!mirror.is_eligible(&key));

        mirror.set_disabled(&key, false);
        assert!(mirror.is_eligible(&key));
    }

    #[test]
    fn test_replace_plugin_only_touches_that_plugin() {
        let mirror = ApprovalMirror::new();
        mirror.load(&[row("a", "posts", true), row("b", "posts", true)]);

        mirror.replace_plugin("a", &[row("a", "users", false)]);

        assert_eq!(mirror.len(), 2);
        assert!(mirror.get(&HookKey::new("a", "before_create", "posts")).is_none());
        assert!(mirror.is_eligible(&HookKey::new("b", "before_create", "posts")));
    }

    #[test]
    fn test_retain_plugins() {
        let mirror = ApprovalMirror::new();
        mirror.load(&[row("a", "posts", true), row("b", "posts", true)]);

        mirror.retain_plugins(&["a".to_string()]);
        assert_eq!(mirror.len(), 1);

        mirror.retain_plugins(&[]);
        assert_eq!(mirror.len(), 0);
    }
}
