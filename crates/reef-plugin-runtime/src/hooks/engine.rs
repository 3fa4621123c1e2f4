//! Hook registry, approval gating and dispatch

use super::approval::{ApprovalMirror, ApprovalState};
use super::entry::HookEntry;
use super::HookEngineConfig;
use crate::error::HookError;
use crate::pool::Pool;
use parking_lot::RwLock;
use reef_health::{safe_execute, ExecuteError, AUDIT_TARGET};
use reef_scripting::{CallContext, HookEvent, HookRegistration, ScriptError};
use reef_state::{HookKey, HookRegistrationRow, HookRow, HookStore, UpsertOutcome};
use rhai::Dynamic;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

type Result<T> = std::result::Result<T, HookError>;

/// Merges plugin hook subscriptions and dispatches data-lifecycle events
pub struct HookEngine {
    store: Arc<dyn HookStore>,
    config: HookEngineConfig,
    entries: RwLock<Vec<HookEntry>>,
    pools: RwLock<HashMap<String, Arc<Pool>>>,
    approvals: ApprovalMirror,
    // Serializes store writes with the matching mirror update
    approval_lock: Mutex<()>,
    // First-seen rank per plugin, kept across reloads
    ranks: RwLock<HashMap<String, u64>>,
    next_rank: AtomicU64,
    closing: AtomicBool,
    tracker: TaskTracker,
}

impl HookEngine {
    /// Create an engine over `store`
    pub fn new(store: Arc<dyn HookStore>, config: HookEngineConfig) -> Self {
        Self {
            store,
            config,
            entries: RwLock::new(Vec::new()),
            pools: RwLock::new(HashMap::new()),
            approvals: ApprovalMirror::new(),
            approval_lock: Mutex::new(()),
            ranks: RwLock::new(HashMap::new()),
            next_rank: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            tracker: TaskTracker::new(),
        }
    }

    /// Durable hook store
    pub fn store(&self) -> &Arc<dyn HookStore> {
        &self.store
    }

    /// Install `plugin`'s merged entries, served from `pool`
    ///
    /// Entries from the plugin's previous generation are replaced as one step,
    /// so dispatch never sees a mix of both. A plugin keeps the rank it got on
    /// its first registration, so reloading it does not move it among
    /// equal-priority entries of other plugins.
    pub fn register_hooks(&self, plugin: &str, pool: Arc<Pool>, pending: &[HookRegistration]) {
        let mut entries = self.entries.write();
        let rank = *self
            .ranks
            .write()
            .entry(plugin.to_string())
            .or_insert_with(|| self.next_rank.fetch_add(1, Ordering::Relaxed));

        entries.retain(|e| e.plugin != plugin);
        for (order, registration) in pending.iter().enumerate() {
            entries.push(HookEntry::from_registration(plugin, registration, rank, order as u64));
        }
        self.pools.write().insert(plugin.to_string(), pool);
        drop(entries);

        info!(plugin = %plugin, hooks = pending.len(), "Hooks registered");
    }

    /// Drop `plugin`'s entries and pool reference; durable rows are kept
    pub fn unregister_plugin(&self, plugin: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.plugin != plugin);
        let removed = self.pools.write().remove(plugin).is_some();
        drop(entries);

        debug!(plugin = %plugin, "Hooks unregistered");
        removed || before > 0
    }

    /// Whether any plugin subscribes to `event` on `table`, approved or not
    pub fn has_hooks(&self, event: HookEvent, table: &str) -> bool {
        self.entries.read().iter().any(|e| e.matches(event, table))
    }

    /// Eligible entries for `event` on `table`, in dispatch order
    ///
    /// Empty once the engine is closing.
    pub fn gather_entries(&self, event: HookEvent, table: &str) -> Vec<HookEntry> {
        if self.is_closing() {
            return Vec::new();
        }

        let mut matched: Vec<HookEntry> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.matches(event, table))
            .filter(|e| self.approvals.is_eligible(&e.key()))
            .cloned()
            .collect();
        matched.sort_by(HookEntry::dispatch_cmp);
        matched
    }

    /// Run eligible before-hooks in order; the first rejection aborts
    ///
    /// A handler rejects by returning `false` or raising an error. Failing to
    /// check out a context also rejects, so an overloaded plugin cannot be
    /// bypassed.
    pub async fn run_before_hooks(
        &self,
        event: HookEvent,
        table: &str,
        record: &serde_json::Value,
        call: &CallContext,
    ) -> Result<()> {
        let entries = self.gather_entries(event, table);
        if entries.is_empty() {
            return Ok(());
        }
        let record = to_record(record)?;

        for entry in entries {
            let pool = self.pool_for(&entry.plugin).ok_or_else(|| HookError::Unavailable {
                plugin: entry.plugin.clone(),
            })?;

            let mut ctx = pool.get_for_hook(call).await.map_err(|e| {
                warn!(plugin = %entry.plugin, event = %event, table = %table, error = %e, "No context for before-hook");
                HookError::Unavailable {
                    plugin: entry.plugin.clone(),
                }
            })?;

            let outcome = safe_execute(None, || {
                ctx.call_handler(&entry.handler_key, (table.to_string(), record.clone()))
            });

            let rejection = match outcome {
                Ok(value) if value.as_bool() == Ok(false) => Some("handler returned false".to_string()),
                Ok(_) => None,
                Err(ExecuteError::Failed(e)) => Some(e.to_string()),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = rejection {
                warn!(
                    plugin = %entry.plugin,
                    event = %event,
                    table = %table,
                    handler = %entry.handler_key,
                    reason = %reason,
                    "Before-hook rejected operation"
                );
                return Err(HookError::Rejected {
                    plugin: entry.plugin,
                    event: event.to_string(),
                    table: table.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Dispatch eligible after-hooks in the background
    ///
    /// Returns the number of dispatches started. Failures are logged only.
    /// Must be called from within a tokio runtime.
    pub fn run_after_hooks(
        &self,
        event: HookEvent,
        table: &str,
        record: &serde_json::Value,
        call: &CallContext,
    ) -> usize {
        let entries = self.gather_entries(event, table);
        if entries.is_empty() {
            return 0;
        }
        let record = match to_record(record) {
            Ok(record) => record,
            Err(e) => {
                error!(event = %event, table = %table, error = %e, "After-hook record conversion failed");
                return 0;
            }
        };

        let mut started = 0;
        for entry in entries {
            let Some(pool) = self.pool_for(&entry.plugin) else {
                continue;
            };
            let table = table.to_string();
            let record = record.clone();
            let call = call.clone();

            self.tracker.spawn(async move {
                run_after_hook(pool, entry, event, table, record, call).await;
            });
            started += 1;
        }
        started
    }

    /// Stop dispatching and wait for in-flight after-hooks
    ///
    /// Idempotent. Returns whether every dispatch finished within the
    /// configured close timeout.
    pub async fn close(&self) -> bool {
        if !self.closing.swap(true, Ordering::SeqCst) {
            info!(in_flight = self.tracker.len(), "Closing hook engine");
        }
        self.tracker.close();

        let finished = tokio::time::timeout(self.config.close_timeout, self.tracker.wait())
            .await
            .is_ok();
        if !finished {
            warn!(
                in_flight = self.tracker.len(),
                timeout = ?self.config.close_timeout,
                "After-hook dispatches still running at close"
            );
        }
        finished
    }

    /// Whether `close` has been called
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Persist `plugin`'s registrations and refresh its approval mirror
    ///
    /// A version change revokes every prior approval of the plugin.
    pub async fn sync_plugin(
        &self,
        plugin: &str,
        version: &str,
        registrations: &[HookRegistration],
    ) -> Result<UpsertOutcome> {
        let rows: Vec<HookRegistrationRow> = registrations
            .iter()
            .map(|r| HookRegistrationRow {
                event: r.event.as_str().to_string(),
                table_name: r.table.clone(),
                priority: r.priority,
                wildcard: r.is_wildcard(),
                handler: r.handler_key.clone(),
            })
            .collect();

        let _guard = self.approval_lock.lock().await;
        let outcome = self
            .store
            .upsert_hook_registrations(plugin, version, &rows)
            .await?;
        let stored = self.store.list_plugin_hooks(plugin).await?;
        self.approvals.replace_plugin(plugin, &stored);

        if outcome.revoked {
            warn!(
                target: AUDIT_TARGET,
                plugin = %plugin,
                version = %version,
                "Plugin version changed, hook approvals revoked"
            );
        }
        debug!(plugin = %plugin, rows = outcome.rows, "Hook registrations synced");
        Ok(outcome)
    }

    /// Delete durable rows of plugins not in `discovered`; empty deletes all
    pub async fn cleanup_orphaned_hooks(&self, discovered: &[String]) -> Result<u64> {
        let _guard = self.approval_lock.lock().await;
        let removed = self.store.cleanup_orphaned_hooks(discovered).await?;
        self.approvals.retain_plugins(discovered);

        if removed > 0 {
            info!(removed, "Orphaned hook rows removed");
        }
        Ok(removed)
    }

    /// Approve a hook for dispatch
    pub async fn approve_hook(&self, key: &HookKey, actor: &str) -> Result<()> {
        self.set_approval(key, true, actor).await
    }

    /// Withdraw a hook's approval
    pub async fn revoke_hook(&self, key: &HookKey, actor: &str) -> Result<()> {
        self.set_approval(key, false, actor).await
    }

    async fn set_approval(&self, key: &HookKey, approved: bool, actor: &str) -> Result<()> {
        let _guard = self.approval_lock.lock().await;
        if !self.store.set_approval(key, approved, actor).await? {
            return Err(HookError::NotFound(key.to_string()));
        }
        self.approvals.set_approved(key, approved);

        info!(
            target: AUDIT_TARGET,
            hook = %key,
            actor = %actor,
            approved,
            "Hook approval changed"
        );
        Ok(())
    }

    /// Disable or re-enable an approved hook
    pub async fn set_hook_disabled(&self, key: &HookKey, disabled: bool, actor: &str) -> Result<()> {
        let _guard = self.approval_lock.lock().await;
        if !self.store.set_disabled(key, disabled).await? {
            return Err(HookError::NotFound(key.to_string()));
        }
        self.approvals.set_disabled(key, disabled);

        info!(
            target: AUDIT_TARGET,
            hook = %key,
            actor = %actor,
            disabled,
            "Hook enablement changed"
        );
        Ok(())
    }

    /// Rebuild the approval mirror from the store
    pub async fn load_approvals(&self) -> Result<usize> {
        let _guard = self.approval_lock.lock().await;
        let rows = self.store.list_hooks().await?;
        self.approvals.load(&rows);
        Ok(rows.len())
    }

    /// Mirrored approval flags for `key`
    pub fn approval(&self, key: &HookKey) -> Option<ApprovalState> {
        self.approvals.get(key)
    }

    /// All durable rows
    pub async fn list_hooks(&self) -> Result<Vec<HookRow>> {
        Ok(self.store.list_hooks().await?)
    }

    fn pool_for(&self, plugin: &str) -> Option<Arc<Pool>> {
        self.pools.read().get(plugin).cloned()
    }
}

async fn run_after_hook(
    pool: Arc<Pool>,
    entry: HookEntry,
    event: HookEvent,
    table: String,
    record: Dynamic,
    call: CallContext,
) {
    let mut ctx = match pool.get_for_hook(&call).await {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!(plugin = %entry.plugin, event = %event, table = %table, error = %e, "No context for after-hook");
            return;
        }
    };

    let outcome = safe_execute(None, || ctx.call_handler(&entry.handler_key, (table.clone(), record)));
    if let Err(e) = outcome {
        warn!(
            plugin = %entry.plugin,
            event = %event,
            table = %table,
            handler = %entry.handler_key,
            error = %e,
            "After-hook failed"
        );
    }
}

fn to_record(record: &serde_json::Value) -> Result<Dynamic> {
    rhai::serde::to_dynamic(record).map_err(|e| HookError::InvalidRecord(ScriptError::from(e).to_string()))
}

impl fmt::Debug for HookEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEngine")
            .field("entries", &self.entries.read().len())
            .field("plugins", &self.pools.read().len())
            .field("approvals", &self.approvals.len())
            .field("closing", &self.is_closing())
            .finish()
    }
}
