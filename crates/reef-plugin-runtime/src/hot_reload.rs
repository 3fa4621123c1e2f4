//! Hot reload: checksum polling, debounce, cooldown and slow-reload backoff
//!
//! One background task polls every watched plugin. A change must hold a
//! stable checksum for the debounce window before it triggers a reload;
//! reloads are single-flight across plugins and spaced by a per-plugin
//! cooldown. Plugins whose reloads keep running slow stop being polled until
//! resumed; an admin reload is always available.

use crate::checksum::{plugin_checksum_blocking, ChecksumLimits};
use async_trait::async_trait;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use reef_health::{safe_execute_async, BreakerRegistry, ExecuteError, AUDIT_TARGET};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Performs the actual reload of one plugin
#[async_trait]
pub trait PluginReloader: Send + Sync {
    /// Reload `plugin`; the prior generation must keep serving on error
    async fn reload(&self, plugin: &str) -> anyhow::Result<()>;
}

/// Watcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Interval between polls
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How long a changed checksum must stay stable
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,

    /// Minimum spacing between reload attempts of one plugin
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,

    /// Reloads slower than this count toward pausing
    #[serde(default = "default_slow_threshold", with = "humantime_serde")]
    pub slow_threshold: Duration,

    /// Consecutive slow reloads before polling pauses
    #[serde(default = "default_pause_after")]
    pub pause_after: u32,

    /// Script files per checksum pass
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Script bytes per checksum pass
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Wake the poll loop early on filesystem events
    #[serde(default)]
    pub fs_events: bool,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_debounce() -> Duration {
    Duration::from_secs(1)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(10)
}

fn default_slow_threshold() -> Duration {
    Duration::from_secs(10)
}

fn default_pause_after() -> u32 {
    3
}

fn default_max_files() -> usize {
    100
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            debounce: default_debounce(),
            cooldown: default_cooldown(),
            slow_threshold: default_slow_threshold(),
            pause_after: default_pause_after(),
            max_files: default_max_files(),
            max_bytes: default_max_bytes(),
            fs_events: false,
        }
    }
}

impl WatcherConfig {
    fn limits(&self) -> ChecksumLimits {
        ChecksumLimits {
            max_files: self.max_files,
            max_bytes: self.max_bytes,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingChange {
    checksum: String,
    first_seen: Instant,
}

#[derive(Debug)]
struct WatchedPlugin {
    root: PathBuf,
    baseline: Option<String>,
    pending: Option<PendingChange>,
    last_reload: Option<Instant>,
    slow_streak: u32,
    paused: bool,
}

impl WatchedPlugin {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            baseline: None,
            pending: None,
            last_reload: None,
            slow_streak: 0,
            paused: false,
        }
    }

    /// Feed one checksum; returns whether the change is now stable
    fn observe(&mut self, checksum: String, now: Instant, debounce: Duration) -> bool {
        let Some(baseline) = &self.baseline else {
            self.baseline = Some(checksum);
            return false;
        };

        if *baseline == checksum {
            self.pending = None;
            return false;
        }

        match &mut self.pending {
            Some(pending) if pending.checksum == checksum => {
                now.saturating_duration_since(pending.first_seen) >= debounce
            }
            // Still settling
            Some(pending) => {
                pending.checksum = checksum;
                pending.first_seen = now;
                false
            }
            None => {
                self.pending = Some(PendingChange {
                    checksum,
                    first_seen: now,
                });
                false
            }
        }
    }

    fn adopt_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.baseline = Some(pending.checksum);
        }
    }

    fn in_cooldown(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_reload
            .map(|at| now.saturating_duration_since(at) < cooldown)
            .unwrap_or(false)
    }
}

/// Watch state of one plugin
#[derive(Debug, Clone, Serialize)]
pub struct WatchStatus {
    /// Plugin root
    pub root: PathBuf,
    /// Checksum of the source currently considered loaded
    pub baseline: Option<String>,
    /// Checksum of a change still settling
    pub pending: Option<String>,
    /// Consecutive slow reloads
    pub slow_streak: u32,
    /// Polling paused
    pub paused: bool,
}

/// Polling plugin watcher driving hot reload
pub struct PluginWatcher {
    config: WatcherConfig,
    reloader: Arc<dyn PluginReloader>,
    plugins: Mutex<HashMap<String, WatchedPlugin>>,
    reload_lock: tokio::sync::Mutex<()>,
    breakers: Option<BreakerRegistry>,
    fs_watcher: Mutex<Option<RecommendedWatcher>>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl PluginWatcher {
    /// Create a watcher delegating reloads to `reloader`
    pub fn new(config: WatcherConfig, reloader: Arc<dyn PluginReloader>) -> Self {
        Self {
            config,
            reloader,
            plugins: Mutex::new(HashMap::new()),
            reload_lock: tokio::sync::Mutex::new(()),
            breakers: None,
            fs_watcher: Mutex::new(None),
            wake: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Guard reload attempts with one breaker per plugin
    pub fn with_breakers(mut self, breakers: BreakerRegistry) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Start watching `plugin`; the first poll records its baseline
    pub fn watch(&self, plugin: &str, root: impl Into<PathBuf>) {
        let root = root.into();
        if let Some(watcher) = self.fs_watcher.lock().as_mut() {
            watch_root(watcher, &root);
        }

        info!(plugin = %plugin, root = %root.display(), "Watching plugin");
        self.plugins
            .lock()
            .insert(plugin.to_string(), WatchedPlugin::new(root));
    }

    /// Stop watching `plugin`
    pub fn unwatch(&self, plugin: &str) -> bool {
        let Some(watched) = self.plugins.lock().remove(plugin) else {
            return false;
        };
        if let Some(watcher) = self.fs_watcher.lock().as_mut() {
            let _ = watcher.unwatch(&watched.root);
        }
        debug!(plugin = %plugin, "Stopped watching plugin");
        true
    }

    /// Stop polling `plugin`
    pub fn pause(&self, plugin: &str) -> bool {
        self.set_paused(plugin, true)
    }

    /// Resume polling `plugin` and clear its slow-reload streak
    pub fn resume(&self, plugin: &str) -> bool {
        self.set_paused(plugin, false)
    }

    fn set_paused(&self, plugin: &str, paused: bool) -> bool {
        let mut plugins = self.plugins.lock();
        let Some(watched) = plugins.get_mut(plugin) else {
            return false;
        };
        watched.paused = paused;
        if !paused {
            watched.slow_streak = 0;
        }
        info!(plugin = %plugin, paused, "Plugin polling state changed");
        true
    }

    /// Whether polling of `plugin` is paused
    pub fn is_paused(&self, plugin: &str) -> bool {
        self.plugins
            .lock()
            .get(plugin)
            .map(|w| w.paused)
            .unwrap_or(false)
    }

    /// Watch state of `plugin`
    pub fn status(&self, plugin: &str) -> Option<WatchStatus> {
        self.plugins.lock().get(plugin).map(|w| WatchStatus {
            root: w.root.clone(),
            baseline: w.baseline.clone(),
            pending: w.pending.as_ref().map(|p| p.checksum.clone()),
            slow_streak: w.slow_streak,
            paused: w.paused,
        })
    }

    /// Run one poll pass now
    pub async fn poll(&self) -> Vec<String> {
        self.poll_at(Instant::now()).await
    }

    /// Run one poll pass as of `now`; returns the plugins reloaded successfully
    pub async fn poll_at(&self, now: Instant) -> Vec<String> {
        let targets: Vec<(String, PathBuf)> = self
            .plugins
            .lock()
            .iter()
            .filter(|(_, w)| !w.paused)
            .map(|(name, w)| (name.clone(), w.root.clone()))
            .collect();

        let mut stable = Vec::new();
        for (plugin, root) in targets {
            let checksum = match plugin_checksum_blocking(root.clone(), self.config.limits()).await {
                Ok(checksum) => checksum,
                Err(e) => {
                    warn!(plugin = %plugin, root = %root.display(), error = %e, "Checksum pass failed");
                    continue;
                }
            };

            let mut plugins = self.plugins.lock();
            let Some(watched) = plugins.get_mut(&plugin) else {
                continue;
            };
            if !watched.observe(checksum, now, self.config.debounce) {
                continue;
            }

            if watched.in_cooldown(now, self.config.cooldown) {
                debug!(plugin = %plugin, "Change adopted during reload cooldown");
                watched.adopt_pending();
            } else {
                stable.push(plugin);
            }
        }

        let mut reloaded = Vec::new();
        for plugin in stable {
            if self.trigger_reload(&plugin, now).await {
                reloaded.push(plugin);
            }
        }
        reloaded
    }

    async fn trigger_reload(&self, plugin: &str, now: Instant) -> bool {
        // Leave the change pending so a later tick retries
        let Ok(_guard) = self.reload_lock.try_lock() else {
            debug!(plugin = %plugin, "Reload in progress elsewhere, skipping tick");
            return false;
        };

        {
            let mut plugins = self.plugins.lock();
            let Some(watched) = plugins.get_mut(plugin) else {
                return false;
            };
            watched.adopt_pending();
            watched.last_reload = Some(now);
        }

        info!(plugin = %plugin, "Plugin source changed, reloading");
        let breaker = self.breakers.as_ref().map(|r| r.breaker(plugin));
        let started = Instant::now();
        let outcome = safe_execute_async(breaker.as_deref(), self.reloader.reload(plugin)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                self.record_duration(plugin, elapsed);
                true
            }
            Err(ExecuteError::Rejected) => {
                warn!(plugin = %plugin, "Reload rejected by open circuit");
                false
            }
            Err(e) => {
                error!(plugin = %plugin, error = %e, "Plugin reload failed, previous generation keeps serving");
                false
            }
        }
    }

    fn record_duration(&self, plugin: &str, elapsed: Duration) {
        let mut plugins = self.plugins.lock();
        let Some(watched) = plugins.get_mut(plugin) else {
            return;
        };

        if elapsed <= self.config.slow_threshold {
            watched.slow_streak = 0;
            info!(plugin = %plugin, elapsed = ?elapsed, "Plugin reloaded");
            return;
        }

        watched.slow_streak += 1;
        warn!(
            plugin = %plugin,
            elapsed = ?elapsed,
            streak = watched.slow_streak,
            "Slow plugin reload"
        );
        if watched.slow_streak >= self.config.pause_after && !watched.paused {
            watched.paused = true;
            warn!(plugin = %plugin, "Polling paused after repeated slow reloads");
        }
    }

    /// Reload `plugin` on operator request
    ///
    /// Ignores pause and cooldown and waits for any in-flight reload. The
    /// baseline is refreshed so the poll loop does not reload the same
    /// change again.
    pub async fn admin_reload(&self, plugin: &str, actor: &str) -> anyhow::Result<()> {
        let root = self
            .plugins
            .lock()
            .get(plugin)
            .map(|w| w.root.clone())
            .ok_or_else(|| anyhow::anyhow!("plugin '{}' is not watched", plugin))?;

        info!(target: AUDIT_TARGET, plugin = %plugin, actor = %actor, "Admin reload requested");

        let _guard = self.reload_lock.lock().await;
        let checksum = plugin_checksum_blocking(root, self.config.limits()).await;
        {
            let mut plugins = self.plugins.lock();
            if let Some(watched) = plugins.get_mut(plugin) {
                if let Ok(checksum) = &checksum {
                    watched.baseline = Some(checksum.clone());
                }
                watched.pending = None;
                watched.last_reload = Some(Instant::now());
            }
        }

        let started = Instant::now();
        self.reloader.reload(plugin).await?;
        self.record_duration(plugin, started.elapsed());
        Ok(())
    }

    /// Run the poll loop until [`PluginWatcher::shutdown`]
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        if self.config.fs_events {
            self.start_fs_events();
        }

        tokio::spawn(async move {
            info!(interval = ?self.config.poll_interval, "Plugin watcher started");
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = self.wake.notified() => {}
                }
                self.poll().await;
            }
            info!("Plugin watcher stopped");
        })
    }

    fn start_fs_events(&self) {
        let wake = Arc::clone(&self.wake);
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if !matches!(event.kind, EventKind::Access(_)) => wake.notify_one(),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "File watcher error"),
            },
            Config::default(),
        );

        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(error = %e, "Filesystem events unavailable, polling only");
                return;
            }
        };

        let roots: Vec<PathBuf> = self.plugins.lock().values().map(|w| w.root.clone()).collect();
        for root in roots {
            watch_root(&mut watcher, &root);
        }
        *self.fs_watcher.lock() = Some(watcher);
    }

    /// Stop the poll loop
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.fs_watcher.lock().take();
    }
}

fn watch_root(watcher: &mut RecommendedWatcher, root: &Path) {
    if let Err(e) = watcher.watch(root, RecursiveMode::NonRecursive) {
        warn!(root = %root.display(), error = %e, "Failed to watch plugin directory for events");
    }
}

impl fmt::Debug for PluginWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginWatcher")
            .field("config", &self.config)
            .field("plugins", &self.plugins.lock().len())
            .field("fs_events", &self.fs_watcher.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_health::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingReloader {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl PluginReloader for CountingReloader {
        async fn reload(&self, _plugin: &str) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("reload failed");
            }
            Ok(())
        }
    }

    fn config() -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_secs(1),
            cooldown: Duration::from_secs(10),
            ..WatcherConfig::default()
        }
    }

    fn setup(reloader: Arc<CountingReloader>) -> (TempDir, PluginWatcher) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rhai"), "let v = 0;").unwrap();
        let watcher = PluginWatcher::new(config(), reloader);
        watcher.watch("demo", dir.path());
        (dir, watcher)
    }

    fn edit(dir: &TempDir, version: u32) {
        std::fs::write(dir.path().join("main.rhai"), format!("let v = {};", version)).unwrap();
    }

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    #[tokio::test]
    async fn test_first_poll_adopts_baseline() {
        let reloader = Arc::new(CountingReloader::default());
        let (_dir, watcher) = setup(Arc::clone(&reloader));

        assert!(watcher.poll().await.is_empty());
        assert!(watcher.status("demo").unwrap().baseline.is_some());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_debounce_then_reload() {
        let reloader = Arc::new(CountingReloader::default());
        let (dir, watcher) = setup(Arc::clone(&reloader));
        let t0 = Instant::now();

        watcher.poll_at(t0).await;
        edit(&dir, 1);
        assert!(watcher.poll_at(secs(t0, 1)).await.is_empty());
        assert!(watcher.status("demo").unwrap().pending.is_some());

        let reloaded = watcher.poll_at(secs(t0, 2)).await;
        assert_eq!(reloaded, vec!["demo".to_string()]);
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 1);
        assert!(watcher.status("demo").unwrap().pending.is_none());
    }

    #[tokio::test]
    async fn test_revert_clears_pending() {
        let reloader = Arc::new(CountingReloader::default());
        let (dir, watcher) = setup(Arc::clone(&reloader));
        let t0 = Instant::now();

        watcher.poll_at(t0).await;
        edit(&dir, 1);
        watcher.poll_at(secs(t0, 1)).await;
        edit(&dir, 0);
        watcher.poll_at(secs(t0, 2)).await;

        assert!(watcher.status("demo").unwrap().pending.is_none());
        assert!(watcher.poll_at(secs(t0, 5)).await.is_empty());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cooldown_adopts_without_reload() {
        let reloader = Arc::new(CountingReloader::default());
        let (dir, watcher) = setup(Arc::clone(&reloader));
        let t0 = Instant::now();

        watcher.poll_at(t0).await;
        edit(&dir, 1);
        watcher.poll_at(secs(t0, 1)).await;
        watcher.poll_at(secs(t0, 2)).await;
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 1);

        edit(&dir, 2);
        watcher.poll_at(secs(t0, 3)).await;
        assert!(watcher.poll_at(secs(t0, 4)).await.is_empty());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 1);

        // The change was adopted as baseline, so nothing fires after cooldown
        assert!(watcher.poll_at(secs(t0, 20)).await.is_empty());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_is_not_retried() {
        let reloader = Arc::new(CountingReloader {
            fail: true,
            ..Default::default()
        });
        let (dir, watcher) = setup(Arc::clone(&reloader));
        let t0 = Instant::now();

        watcher.poll_at(t0).await;
        edit(&dir, 1);
        watcher.poll_at(secs(t0, 1)).await;
        assert!(watcher.poll_at(secs(t0, 2)).await.is_empty());
        assert!(watcher.poll_at(secs(t0, 30)).await.is_empty());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_reload() {
        let reloader = Arc::new(CountingReloader::default());
        let breakers = BreakerRegistry::new(CircuitBreakerConfig::default());
        breakers.breaker("demo").trip("maintenance");

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rhai"), "let v = 0;").unwrap();
        let watcher = PluginWatcher::new(config(), reloader.clone()).with_breakers(breakers);
        watcher.watch("demo", dir.path());

        let t0 = Instant::now();
        watcher.poll_at(t0).await;
        edit(&dir, 1);
        watcher.poll_at(secs(t0, 1)).await;
        assert!(watcher.poll_at(secs(t0, 2)).await.is_empty());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reloads_pause_polling() {
        let reloader = Arc::new(CountingReloader {
            delay: Duration::from_secs(11),
            ..Default::default()
        });
        let (dir, watcher) = setup(Arc::clone(&reloader));
        let mut now = Instant::now();
        watcher.poll_at(now).await;

        for version in 1..=3 {
            edit(&dir, version);
            now += Duration::from_secs(20);
            watcher.poll_at(now).await;
            now += Duration::from_secs(2);
            watcher.poll_at(now).await;
        }

        assert_eq!(reloader.calls.load(Ordering::SeqCst), 3);
        assert!(watcher.is_paused("demo"));

        edit(&dir, 4);
        now += Duration::from_secs(20);
        watcher.poll_at(now).await;
        assert!(watcher.status("demo").unwrap().pending.is_none());

        // Admin reload still works while paused
        watcher.admin_reload("demo", "ops").await.unwrap();
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 4);

        assert!(watcher.resume("demo"));
        assert_eq!(watcher.status("demo").unwrap().slow_streak, 0);
    }

    #[tokio::test]
    async fn test_checksum_failure_keeps_baseline() {
        let reloader = Arc::new(CountingReloader::default());
        let (dir, watcher) = setup(Arc::clone(&reloader));
        watcher.poll().await;
        let baseline = watcher.status("demo").unwrap().baseline;

        for i in 0..150 {
            std::fs::write(dir.path().join(format!("f{}.rhai", i)), "").unwrap();
        }
        watcher.poll().await;
        assert_eq!(watcher.status("demo").unwrap().baseline, baseline);
    }

    #[tokio::test]
    async fn test_admin_reload_unknown_plugin() {
        let watcher = PluginWatcher::new(config(), Arc::new(CountingReloader::default()));
        assert!(watcher.admin_reload("ghost", "ops").await.is_err());
        assert!(!watcher.unwatch("ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_and_shutdown() {
        let reloader = Arc::new(CountingReloader::default());
        let (_dir, watcher) = setup(Arc::clone(&reloader));
        let watcher = Arc::new(watcher);

        let handle = Arc::clone(&watcher).spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(watcher.status("demo").unwrap().baseline.is_some());

        watcher.shutdown();
        handle.await.unwrap();
    }
}
