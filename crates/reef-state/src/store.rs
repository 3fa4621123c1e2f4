//! Hook store trait and the shared row-merge rules

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Composite key of a durable hook row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HookKey {
    /// Plugin name
    pub plugin: String,
    /// Event name, e.g. `before_create`
    pub event: String,
    /// Table name or `*`
    pub table_name: String,
}

impl HookKey {
    /// Build a key
    pub fn new(plugin: impl Into<String>, event: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            event: event.into(),
            table_name: table_name.into(),
        }
    }
}

impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.plugin, self.event, self.table_name)
    }
}

/// A plugin's registration as reported by one load generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRegistrationRow {
    /// Event name
    pub event: String,
    /// Table name or `*`
    pub table_name: String,
    /// Priority in `[1, 1000]`
    pub priority: i64,
    /// Whether the registration matches every table
    pub wildcard: bool,
    /// Handler identity
    pub handler: String,
}

/// One durable row per (plugin, event, table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRow {
    /// Plugin name
    pub plugin: String,
    /// Event name
    pub event: String,
    /// Table name or `*`
    pub table_name: String,
    /// Priority in `[1, 1000]`
    pub priority: i64,
    /// Whether the row matches every table
    pub wildcard: bool,
    /// Handler identity
    pub handler: String,
    /// Plugin version that registered the row
    pub plugin_version: String,
    /// Approved for dispatch
    pub approved: bool,
    /// Temporarily disabled by an operator
    pub disabled: bool,
    /// Approving actor
    pub approved_by: Option<String>,
    /// Approval time
    pub approved_at: Option<DateTime<Utc>>,
}

impl HookRow {
    /// Composite key of this row
    pub fn key(&self) -> HookKey {
        HookKey::new(&self.plugin, &self.event, &self.table_name)
    }

    /// Approved and not disabled
    pub fn is_eligible(&self) -> bool {
        self.approved && !self.disabled
    }
}

/// Result of replacing a plugin's rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertOutcome {
    /// Rows written
    pub rows: usize,
    /// Prior approvals were revoked because the plugin version changed
    pub revoked: bool,
}

/// Durable hook-registration table
#[async_trait]
pub trait HookStore: Send + Sync + fmt::Debug + 'static {
    /// Replace `plugin`'s rows with `registrations`
    ///
    /// Approval is preserved for surviving rows unless the stored version
    /// differs from `version`, in which case every row of the plugin is
    /// written unapproved.
    async fn upsert_hook_registrations(
        &self,
        plugin: &str,
        version: &str,
        registrations: &[HookRegistrationRow],
    ) -> Result<UpsertOutcome>;

    /// Delete rows of plugins not in `discovered`; an empty slice deletes all
    async fn cleanup_orphaned_hooks(&self, discovered: &[String]) -> Result<u64>;

    /// Set or clear approval; returns whether the row exists
    async fn set_approval(&self, key: &HookKey, approved: bool, actor: &str) -> Result<bool>;

    /// Set or clear the disabled flag; returns whether the row exists
    async fn set_disabled(&self, key: &HookKey, disabled: bool) -> Result<bool>;

    /// All rows, ordered by key
    async fn list_hooks(&self) -> Result<Vec<HookRow>>;

    /// Rows of one plugin, ordered by key
    async fn list_plugin_hooks(&self, plugin: &str) -> Result<Vec<HookRow>>;

    /// Verify the backend is reachable
    async fn health_check(&self) -> Result<()> {
        self.list_hooks().await.map(|_| ())
    }
}

/// Compute a plugin's new rows from its stored rows and fresh registrations
///
/// Registrations sharing one (event, table) collapse into one row holding the
/// lowest priority and the first handler.
pub(crate) fn merge_registrations(
    plugin: &str,
    version: &str,
    existing: &[HookRow],
    registrations: &[HookRegistrationRow],
) -> (Vec<HookRow>, bool) {
    let revoked = existing.iter().any(|row| row.plugin_version != version);
    let previous: HashMap<(&str, &str), &HookRow> = existing
        .iter()
        .map(|row| ((row.event.as_str(), row.table_name.as_str()), row))
        .collect();

    let mut merged: BTreeMap<(String, String), HookRow> = BTreeMap::new();
    for reg in registrations {
        let slot = (reg.event.clone(), reg.table_name.clone());
        if let Some(row) = merged.get_mut(&slot) {
            row.priority = row.priority.min(reg.priority);
            continue;
        }

        let prior = previous
            .get(&(reg.event.as_str(), reg.table_name.as_str()))
            .filter(|_| !revoked);

        merged.insert(
            slot,
            HookRow {
                plugin: plugin.to_string(),
                event: reg.event.clone(),
                table_name: reg.table_name.clone(),
                priority: reg.priority,
                wildcard: reg.wildcard,
                handler: reg.handler.clone(),
                plugin_version: version.to_string(),
                approved: prior.map(|p| p.approved).unwrap_or(false),
                disabled: prior.map(|p| p.disabled).unwrap_or(false),
                approved_by: prior.and_then(|p| p.approved_by.clone()),
                approved_at: prior.and_then(|p| p.approved_at),
            },
        );
    }

    (merged.into_values().collect(), revoked)
}
