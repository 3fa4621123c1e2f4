//! Plugin host: generation lifecycle and blue-green reload

use crate::error::{PluginRuntimeError, Result};
use crate::hooks::HookEngine;
use crate::hot_reload::PluginReloader;
use crate::pool::{Pool, PoolConfig, PoolStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reef_health::{BreakerRegistry, CircuitState};
use reef_scripting::loader::{self, ENTRY_FILE};
use reef_scripting::{PluginLoader, RouteRegistration};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default time an old generation gets to return its contexts
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One loaded generation of a plugin
#[derive(Debug)]
pub struct Generation {
    /// Plugin version the generation was loaded as
    pub version: String,
    /// Plugin root directory
    pub root: PathBuf,
    /// Context pool serving this generation
    pub pool: Arc<Pool>,
    /// Load time
    pub loaded_at: DateTime<Utc>,
}

/// Result of a successful reload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    /// Version now serving
    pub version: String,
    /// Whether the previous generation returned every context in time
    ///
    /// `false` means the old pool was force-closed; escalating (e.g. tripping
    /// the plugin's breaker) is the caller's decision.
    pub drained: bool,
}

/// Summary of a loaded plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    /// Plugin name
    pub name: String,
    /// Serving version
    pub version: String,
    /// Plugin root
    pub root: PathBuf,
    /// Load time of the serving generation
    pub loaded_at: DateTime<Utc>,
    /// Hook registrations
    pub hooks: usize,
    /// Route registrations
    pub routes: usize,
    /// Pool counters
    pub pool: PoolStats,
    /// Breaker state
    pub breaker: CircuitState,
}

/// Owns every loaded plugin generation
///
/// A reload builds and publishes the new generation before the old one is
/// drained, so callers never check out from a half-initialized pool. A failed
/// build leaves the serving generation untouched.
pub struct PluginHost {
    loader: PluginLoader,
    hooks: Arc<HookEngine>,
    breakers: BreakerRegistry,
    pool_config: PoolConfig,
    drain_timeout: Duration,
    plugins: DashMap<String, Arc<Generation>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl PluginHost {
    /// Create a host
    pub fn new(loader: PluginLoader, hooks: Arc<HookEngine>, breakers: BreakerRegistry) -> Self {
        Self {
            loader,
            hooks,
            breakers,
            pool_config: PoolConfig::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            plugins: DashMap::new(),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Set pool sizing
    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set how long a replaced generation may take to drain
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Hook engine
    pub fn hooks(&self) -> &Arc<HookEngine> {
        &self.hooks
    }

    /// Per-plugin breakers
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Load a new plugin from `root`
    pub async fn load_plugin(&self, name: &str, root: impl AsRef<Path>, version: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.plugins.contains_key(name) {
            return Err(PluginRuntimeError::already_exists(name));
        }

        let generation = self.build_generation(name, root.as_ref(), version).await?;
        self.plugins.insert(name.to_string(), generation);

        info!(plugin = %name, version = %version, "Plugin loaded");
        Ok(())
    }

    /// Replace `name`'s generation with a fresh load of its root
    ///
    /// `version` defaults to the serving version.
    pub async fn reload_plugin(&self, name: &str, version: Option<&str>) -> Result<ReloadOutcome> {
        let _guard = self.lifecycle.lock().await;
        let current = self
            .generation(name)
            .ok_or_else(|| PluginRuntimeError::not_found(name))?;
        let version = version.unwrap_or(current.version.as_str()).to_string();

        let next = match self.build_generation(name, &current.root, &version).await {
            Ok(next) => next,
            Err(e) => {
                error!(plugin = %name, error = %e, "Reload failed, keeping current generation");
                return Err(e);
            }
        };
        self.plugins.insert(name.to_string(), next);

        let drained = current.pool.drain(self.drain_timeout).await;
        if !drained {
            warn!(
                plugin = %name,
                timeout = ?self.drain_timeout,
                "Previous generation did not drain in time"
            );
        }

        info!(plugin = %name, version = %version, drained, "Plugin reloaded");
        Ok(ReloadOutcome { version, drained })
    }

    /// Unload `name`; returns whether its pool drained in time
    ///
    /// Durable hook rows are kept; see [`PluginHost::cleanup_orphans`].
    pub async fn unload_plugin(&self, name: &str) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        let (_, generation) = self
            .plugins
            .remove(name)
            .ok_or_else(|| PluginRuntimeError::not_found(name))?;

        self.hooks.unregister_plugin(name);
        let drained = generation.pool.drain(self.drain_timeout).await;
        self.breakers.remove(name);

        info!(plugin = %name, drained, "Plugin unloaded");
        Ok(drained)
    }

    async fn build_generation(&self, name: &str, root: &Path, version: &str) -> Result<Arc<Generation>> {
        let entry = root.join(ENTRY_FILE);
        let source = tokio::fs::read_to_string(&entry)
            .await
            .map_err(|e| loader::unreadable(&entry, e))?;
        let factory = self.loader.factory_from_source(name, root, source);

        // Loading runs every context's top level; keep it off the async workers
        let (size, reserved) = self.pool_config.sizing_for(name);
        let plugin = name.to_string();
        let pool = tokio::task::spawn_blocking(move || {
            Pool::new(&plugin, Arc::new(factory), size, reserved)
        })
        .await
        .map_err(|e| PluginRuntimeError::other(format!("pool build task failed: {e}")))??;
        let pool = Arc::new(pool);

        let registrations = pool.registrations().hooks.clone();
        let outcome = self.hooks.sync_plugin(name, version, &registrations).await?;
        self.hooks
            .register_hooks(name, Arc::clone(&pool), &registrations);

        info!(
            plugin = %name,
            version = %version,
            hooks = registrations.len(),
            routes = pool.registrations().routes.len(),
            approvals_revoked = outcome.revoked,
            "Plugin generation built"
        );

        Ok(Arc::new(Generation {
            version: version.to_string(),
            root: root.to_path_buf(),
            pool,
            loaded_at: Utc::now(),
        }))
    }

    /// Serving generation of `name`
    pub fn generation(&self, name: &str) -> Option<Arc<Generation>> {
        self.plugins.get(name).map(|g| Arc::clone(g.value()))
    }

    /// Pool of `name`'s serving generation
    pub fn pool(&self, name: &str) -> Option<Arc<Pool>> {
        self.generation(name).map(|g| Arc::clone(&g.pool))
    }

    /// Routes registered by `name`'s serving generation
    pub fn routes(&self, name: &str) -> Vec<RouteRegistration> {
        self.generation(name)
            .map(|g| g.pool.registrations().routes.clone())
            .unwrap_or_default()
    }

    /// Loaded plugin names, sorted
    pub fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Summaries of every loaded plugin, sorted by name
    pub fn plugins(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self
            .plugins
            .iter()
            .map(|entry| {
                let generation = entry.value();
                let registrations = generation.pool.registrations();
                PluginInfo {
                    name: entry.key().clone(),
                    version: generation.version.clone(),
                    root: generation.root.clone(),
                    loaded_at: generation.loaded_at,
                    hooks: registrations.hooks.len(),
                    routes: registrations.routes.len(),
                    pool: generation.pool.stats(),
                    breaker: self.breakers.state(entry.key()),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Delete durable hook rows of plugins that are not loaded
    pub async fn cleanup_orphans(&self) -> Result<u64> {
        Ok(self.hooks.cleanup_orphaned_hooks(&self.plugin_names()).await?)
    }

    /// Close the hook engine and drain every pool
    ///
    /// Returns whether everything finished within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let _guard = self.lifecycle.lock().await;
        info!(plugins = self.plugins.len(), "Shutting down plugin host");

        let hooks_closed = self.hooks.close().await;
        let pools: Vec<Arc<Pool>> = self.plugins.iter().map(|e| Arc::clone(&e.pool)).collect();
        let drained = futures::future::join_all(pools.iter().map(|p| p.drain(timeout))).await;

        self.plugins.clear();
        hooks_closed && drained.into_iter().all(|d| d)
    }
}

#[async_trait]
impl PluginReloader for PluginHost {
    async fn reload(&self, plugin: &str) -> anyhow::Result<()> {
        self.reload_plugin(plugin, None).await?;
        Ok(())
    }
}

impl fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.plugin_names())
            .field("pool_config", &self.pool_config)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}
