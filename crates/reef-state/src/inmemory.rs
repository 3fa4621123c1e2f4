//! In-memory hook store

use crate::store::{merge_registrations, HookKey, HookRegistrationRow, HookRow, HookStore, UpsertOutcome};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// In-memory hook store
///
/// Single-instance only. Suitable for development, tests and hosts that
/// re-approve hooks on every start.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHookStore {
    rows: Arc<RwLock<BTreeMap<HookKey, HookRow>>>,
}

impl InMemoryHookStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the store has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl HookStore for InMemoryHookStore {
    async fn upsert_hook_registrations(
        &self,
        plugin: &str,
        version: &str,
        registrations: &[HookRegistrationRow],
    ) -> Result<UpsertOutcome> {
        let mut rows = self.rows.write();
        let existing: Vec<HookRow> = rows
            .values()
            .filter(|row| row.plugin == plugin)
            .cloned()
            .collect();

        let (merged, revoked) = merge_registrations(plugin, version, &existing, registrations);

        rows.retain(|key, _| key.plugin != plugin);
        let written = merged.len();
        for row in merged {
            rows.insert(row.key(), row);
        }

        debug!(plugin, version, rows = written, revoked, "Hook rows replaced");
        Ok(UpsertOutcome {
            rows: written,
            revoked,
        })
    }

    async fn cleanup_orphaned_hooks(&self, discovered: &[String]) -> Result<u64> {
        let keep: HashSet<&str> = discovered.iter().map(String::as_str).collect();
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|key, _| keep.contains(key.plugin.as_str()));
        let removed = (before - rows.len()) as u64;

        if removed > 0 {
            debug!(removed, "Orphaned hook rows removed");
        }
        Ok(removed)
    }

    async fn set_approval(&self, key: &HookKey, approved: bool, actor: &str) -> Result<bool> {
        trace!(hook = %key, approved, "In-memory SET APPROVAL");
        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(key) else {
            return Ok(false);
        };

        row.approved = approved;
        if approved {
            row.approved_by = Some(actor.to_string());
            row.approved_at = Some(Utc::now());
        } else {
            row.approved_by = None;
            row.approved_at = None;
        }
        Ok(true)
    }

    async fn set_disabled(&self, key: &HookKey, disabled: bool) -> Result<bool> {
        trace!(hook = %key, disabled, "In-memory SET DISABLED");
        Ok(self
            .rows
            .write()
            .get_mut(key)
            .map(|row| row.disabled = disabled)
            .is_some())
    }

    async fn list_hooks(&self) -> Result<Vec<HookRow>> {
        Ok(self.rows.read().values().cloned().collect())
    }

    async fn list_plugin_hooks(&self, plugin: &str) -> Result<Vec<HookRow>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| row.plugin == plugin)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(event: &str, table: &str) -> HookRegistrationRow {
        HookRegistrationRow {
            event: event.to_string(),
            table_name: table.to_string(),
            priority: 100,
            wildcard: table == "*",
            handler: "hook:1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_approve() {
        let store = InMemoryHookStore::new();
        store
            .upsert_hook_registrations("a", "1.0", &[reg("before_create", "posts")])
            .await
            .unwrap();

        let key = HookKey::new("a", "before_create", "posts");
        assert!(store.set_approval(&key, true, "admin").await.unwrap());
        assert!(!store
            .set_approval(&HookKey::new("a", "before_create", "users"), true, "admin")
            .await
            .unwrap());

        let rows = store.list_plugin_hooks("a").await.unwrap();
        assert!(rows[0].is_eligible());
        assert_eq!(rows[0].approved_by.as_deref(), Some("admin"));

        store.set_disabled(&key, true).await.unwrap();
        assert!(!store.list_hooks().await.unwrap()[0].is_eligible());
    }

    #[tokio::test]
    async fn test_version_change_revokes_only_that_plugin() {
        let store = InMemoryHookStore::new();
        store
            .upsert_hook_registrations("a", "1.0", &[reg("before_create", "posts")])
            .await
            .unwrap();
        store
            .upsert_hook_registrations("b", "1.0", &[reg("before_create", "*")])
            .await
            .unwrap();
        for plugin in ["a", "b"] {
            let rows = store.list_plugin_hooks(plugin).await.unwrap();
            store.set_approval(&rows[0].key(), true, "admin").await.unwrap();
        }

        let outcome = store
            .upsert_hook_registrations("a", "2.0", &[reg("before_create", "posts")])
            .await
            .unwrap();
        assert!(outcome.revoked);

        assert!(!store.list_plugin_hooks("a").await.unwrap()[0].approved);
        assert!(store.list_plugin_hooks("b").await.unwrap()[0].approved);
    }

    #[tokio::test]
    async fn test_reregister_drops_stale_rows() {
        let store = InMemoryHookStore::new();
        store
            .upsert_hook_registrations(
                "a",
                "1.0",
                &[reg("before_create", "posts"), reg("after_delete", "posts")],
            )
            .await
            .unwrap();
        store
            .upsert_hook_registrations("a", "1.0", &[reg("after_delete", "posts")])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_orphaned() {
        let store = InMemoryHookStore::new();
        for plugin in ["a", "b"] {
            store
                .upsert_hook_registrations(plugin, "1.0", &[reg("before_create", "posts")])
                .await
                .unwrap();
        }

        assert_eq!(
            store.cleanup_orphaned_hooks(&["a".to_string()]).await.unwrap(),
            1
        );
        let rows = store.list_hooks().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].plugin, "a");

        assert_eq!(store.cleanup_orphaned_hooks(&[]).await.unwrap(), 1);
        assert!(store.is_empty());
    }
}
