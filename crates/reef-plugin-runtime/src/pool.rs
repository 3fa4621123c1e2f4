//! Execution-context pool
//!
//! A fixed set of contexts split into a *general* segment for ordinary calls
//! and a *reserved* segment only hook dispatch may draw from. Every context is
//! in exactly one of: general, reserved, checked out, destroyed.

use crate::error::PoolError;
use parking_lot::Mutex;
use reef_scripting::{CallContext, ContextFactory, ExecutionContext, NamespaceSnapshot, Registrations};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long a checkout waits for a free context
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Interval at which `drain` re-checks outstanding checkouts
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Contexts per plugin
    #[serde(default = "default_size")]
    pub size: usize,

    /// Contexts held back for hook dispatch
    #[serde(default = "default_reserved")]
    pub reserved: usize,

    /// Per-plugin overrides
    #[serde(default)]
    pub overrides: HashMap<String, PoolSizing>,
}

/// Sizing override for one plugin
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolSizing {
    /// Contexts for this plugin
    pub size: usize,
    /// Reserved contexts for this plugin
    #[serde(default = "default_reserved")]
    pub reserved: usize,
}

fn default_size() -> usize {
    4
}

fn default_reserved() -> usize {
    1
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            reserved: default_reserved(),
            overrides: HashMap::new(),
        }
    }
}

impl PoolConfig {
    /// `(size, reserved)` for `plugin`
    pub fn sizing_for(&self, plugin: &str) -> (usize, usize) {
        match self.overrides.get(plugin) {
            Some(o) => (o.size, o.reserved),
            None => (self.size, self.reserved),
        }
    }
}

/// Pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    /// Accepting checkouts
    Open,
    /// Rejecting checkouts, waiting for outstanding ones
    Draining,
    /// Shut down; returned contexts are destroyed
    Closed,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolState::Open,
            1 => PoolState::Draining,
            _ => PoolState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PoolState::Open => 0,
            PoolState::Draining => 1,
            PoolState::Closed => 2,
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Open => write!(f, "open"),
            PoolState::Draining => write!(f, "draining"),
            PoolState::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Plugin name
    pub plugin: String,
    /// Configured size
    pub size: usize,
    /// Idle general contexts
    pub general_idle: usize,
    /// Idle reserved contexts
    pub reserved_idle: usize,
    /// Contexts currently checked out
    pub outstanding: usize,
    /// Lifecycle state
    pub state: PoolState,
    /// Successful checkouts
    pub checkouts: u64,
    /// Checkouts that failed with exhaustion
    pub exhausted: u64,
    /// Contexts replaced after failing the health check
    pub replaced: u64,
}

struct Segment {
    idle: Mutex<VecDeque<ExecutionContext>>,
    capacity: usize,
    available: Notify,
}

impl Segment {
    fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
        }
    }

    fn len(&self) -> usize {
        self.idle.lock().len()
    }

    fn try_pop(&self) -> Option<ExecutionContext> {
        self.idle.lock().pop_front()
    }

    async fn acquire(&self, timeout: Duration) -> Option<ExecutionContext> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(ctx) = self.try_pop() {
                return Some(ctx);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Push unless full or the pool is closed; gives the context back otherwise
    fn offer(
        &self,
        ctx: ExecutionContext,
        state: &AtomicU8,
    ) -> std::result::Result<(), ExecutionContext> {
        let mut idle = self.idle.lock();
        if PoolState::from_u8(state.load(Ordering::SeqCst)) == PoolState::Closed
            || idle.len() >= self.capacity
        {
            return Err(ctx);
        }
        idle.push_back(ctx);
        drop(idle);
        self.available.notify_one();
        Ok(())
    }

    fn clear(&self) -> usize {
        let drained: Vec<_> = self.idle.lock().drain(..).collect();
        drained.len()
    }
}

type ReplaceCallback = Arc<dyn Fn(&ExecutionContext) + Send + Sync>;

/// Pool of execution contexts for one plugin generation
pub struct Pool {
    plugin: String,
    factory: Arc<dyn ContextFactory>,
    size: usize,
    general: Segment,
    reserved: Segment,
    outstanding: AtomicUsize,
    state: AtomicU8,
    snapshot: OnceLock<Arc<NamespaceSnapshot>>,
    registrations: Registrations,
    on_replace: Option<ReplaceCallback>,
    checkouts: AtomicU64,
    exhausted: AtomicU64,
    replaced: AtomicU64,
}

impl Pool {
    /// Build `size` contexts, `reserve` of them held back for hook dispatch
    ///
    /// `reserve` is clamped to `[0, size]`. The namespace snapshot is taken
    /// from the first context, right after its one-time load.
    pub fn new(
        plugin: &str,
        factory: Arc<dyn ContextFactory>,
        size: usize,
        reserve: usize,
    ) -> std::result::Result<Self, PoolError> {
        let size = size.max(1);
        let reserve = reserve.min(size);

        let pool = Self {
            plugin: plugin.to_string(),
            factory,
            size,
            general: Segment::new(size - reserve),
            reserved: Segment::new(reserve),
            outstanding: AtomicUsize::new(0),
            state: AtomicU8::new(PoolState::Open.as_u8()),
            snapshot: OnceLock::new(),
            registrations: Registrations::default(),
            on_replace: None,
            checkouts: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            replaced: AtomicU64::new(0),
        };
        pool.populate()
    }

    fn populate(mut self) -> std::result::Result<Self, PoolError> {
        for i in 0..self.size {
            let ctx = self.create_context()?;
            if i == 0 {
                self.snapshot_globals(&ctx);
                self.registrations = ctx.registrations().clone();
            }
            let segment = if i < self.general.capacity {
                &self.general
            } else {
                &self.reserved
            };
            segment.idle.lock().push_back(ctx);
        }

        info!(
            plugin = %self.plugin,
            size = self.size,
            reserved = self.reserved.capacity,
            "Execution pool created"
        );
        Ok(self)
    }

    /// Invoke `callback` with every context destroyed for failing the health check
    pub fn with_on_replace<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ExecutionContext) + Send + Sync + 'static,
    {
        self.on_replace = Some(Arc::new(callback));
        self
    }

    /// Plugin name
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Configured size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Registrations captured by this generation's load
    pub fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    /// Lifecycle state
    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Contexts currently checked out
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Record the namespace baseline; only the first call has any effect
    pub fn snapshot_globals(&self, ctx: &ExecutionContext) -> bool {
        self.snapshot
            .set(Arc::new(NamespaceSnapshot::capture(ctx)))
            .is_ok()
    }

    /// Baseline recorded by [`Pool::snapshot_globals`]
    pub fn snapshot(&self) -> Option<&NamespaceSnapshot> {
        self.snapshot.get().map(Arc::as_ref)
    }

    /// Check out a general context, waiting up to [`ACQUIRE_TIMEOUT`]
    pub async fn get(self: &Arc<Self>, call: &CallContext) -> std::result::Result<PooledContext, PoolError> {
        if self.state() != PoolState::Open {
            return Err(self.exhausted_error());
        }

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        match self.general.acquire(ACQUIRE_TIMEOUT).await {
            Some(ctx) => self.hand_out(ctx, call),
            None => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                Err(self.exhausted_error())
            }
        }
    }

    /// Check out a context for hook dispatch
    ///
    /// Tries the general segment without waiting, then the reserved segment
    /// for up to [`ACQUIRE_TIMEOUT`].
    pub async fn get_for_hook(
        self: &Arc<Self>,
        call: &CallContext,
    ) -> std::result::Result<PooledContext, PoolError> {
        if self.state() != PoolState::Open {
            return Err(self.exhausted_error());
        }

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let ctx = match self.general.try_pop() {
            Some(ctx) => Some(ctx),
            None => self.reserved.acquire(ACQUIRE_TIMEOUT).await,
        };
        match ctx {
            Some(ctx) => self.hand_out(ctx, call),
            None => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                Err(self.exhausted_error())
            }
        }
    }

    fn hand_out(
        self: &Arc<Self>,
        ctx: ExecutionContext,
        call: &CallContext,
    ) -> std::result::Result<PooledContext, PoolError> {
        // Drain may have started while this caller waited
        if self.state() != PoolState::Open {
            self.put(ctx);
            return Err(self.exhausted_error());
        }

        ctx.bind(call);
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        Ok(PooledContext {
            ctx: Some(ctx),
            pool: Arc::clone(self),
        })
    }

    /// Return a checked-out context
    ///
    /// Resets it, strips globals added since the snapshot and runs the health
    /// check. Healthy contexts go back to a segment (reserved first); unhealthy
    /// ones are destroyed and, unless the pool is closed, replaced.
    pub fn put(&self, mut ctx: ExecutionContext) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);

        ctx.reset();
        if let Some(snapshot) = self.snapshot.get() {
            let removed = ctx.strip_globals(snapshot);
            if removed > 0 {
                debug!(plugin = %self.plugin, context_id = ctx.id(), removed, "Stripped leaked globals");
            }
        }

        let ctx = if ctx.is_healthy() {
            ctx
        } else {
            warn!(
                plugin = %self.plugin,
                context_id = ctx.id(),
                "Execution context failed health check, replacing"
            );
            if let Some(callback) = &self.on_replace {
                callback(&ctx);
            }
            drop(ctx);
            self.replaced.fetch_add(1, Ordering::Relaxed);

            if self.state() == PoolState::Closed {
                return;
            }
            match self.create_context() {
                Ok(fresh) => fresh,
                Err(e) => {
                    error!(plugin = %self.plugin, error = %e, "Failed to create replacement context");
                    return;
                }
            }
        };

        self.insert(ctx);
    }

    fn insert(&self, ctx: ExecutionContext) {
        let ctx = match self.reserved.offer(ctx, &self.state) {
            Ok(()) => return,
            Err(ctx) => ctx,
        };
        let ctx = match self.general.offer(ctx, &self.state) {
            Ok(()) => return,
            Err(ctx) => ctx,
        };

        if self.state() != PoolState::Closed {
            error!(
                plugin = %self.plugin,
                context_id = ctx.id(),
                "Both pool segments full on return, destroying context"
            );
        }
    }

    /// Stop accepting checkouts and wait up to `timeout` for outstanding ones
    ///
    /// Returns whether every context came back in time. The pool is closed and
    /// idle contexts destroyed either way; late returns are destroyed on `put`.
    ///
    /// A caller still waiting inside [`Pool::get`] counts as outstanding for up
    /// to [`ACQUIRE_TIMEOUT`], even though it holds no context. With no general
    /// capacity (`reserve == size`) such a waiter can therefore make a drain
    /// shorter than [`ACQUIRE_TIMEOUT`] return `false` with nothing checked out.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let _ = self.state.compare_exchange(
            PoolState::Open.as_u8(),
            PoolState::Draining.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        info!(plugin = %self.plugin, outstanding = self.outstanding(), "Draining execution pool");

        let deadline = Instant::now() + timeout;
        let drained = loop {
            if self.outstanding() == 0 {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        };

        self.state.store(PoolState::Closed.as_u8(), Ordering::SeqCst);
        let destroyed = self.general.clear() + self.reserved.clear();
        self.general.available.notify_waiters();
        self.reserved.available.notify_waiters();

        if drained {
            info!(plugin = %self.plugin, destroyed, "Execution pool drained");
        } else {
            warn!(
                plugin = %self.plugin,
                outstanding = self.outstanding(),
                destroyed,
                "Execution pool drain timed out, forcing close"
            );
        }
        drained
    }

    /// Point-in-time counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            plugin: self.plugin.clone(),
            size: self.size,
            general_idle: self.general.len(),
            reserved_idle: self.reserved.len(),
            outstanding: self.outstanding(),
            state: self.state(),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
        }
    }

    fn create_context(&self) -> std::result::Result<ExecutionContext, PoolError> {
        self.factory.create().map_err(|source| PoolError::Create {
            plugin: self.plugin.clone(),
            source,
        })
    }

    fn exhausted_error(&self) -> PoolError {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
        PoolError::exhausted(&self.plugin)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("plugin", &self.plugin)
            .field("size", &self.size)
            .field("state", &self.state())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// A checked-out context; returned to its pool on drop
pub struct PooledContext {
    ctx: Option<ExecutionContext>,
    pool: Arc<Pool>,
}

impl PooledContext {
    /// Pool the context belongs to
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Take the context out of the guard; the caller must hand it to [`Pool::put`]
    pub fn into_inner(mut self) -> ExecutionContext {
        match self.ctx.take() {
            Some(ctx) => ctx,
            None => unreachable!("pooled context is present until drop"),
        }
    }
}

impl Deref for PooledContext {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        match &self.ctx {
            Some(ctx) => ctx,
            None => unreachable!("pooled context is present until drop"),
        }
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        match &mut self.ctx {
            Some(ctx) => ctx,
            None => unreachable!("pooled context is present until drop"),
        }
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.put(ctx);
        }
    }
}

impl fmt::Debug for PooledContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledContext")
            .field("context", &self.ctx)
            .field("plugin", &self.pool.plugin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_scripting::{
        capabilities::{hooks, log},
        ContextBuilder, LoadState, RegistrationLimits, SandboxOptions,
    };
    use std::sync::atomic::AtomicUsize;

    const SOURCE: &str = r#"
        let base = 1;
        fn ping() { "pong" }
        fn check(table, record) { true }
        hooks::register("before_create", "posts", Fn("check"));
    "#;

    fn factory() -> Arc<dyn ContextFactory> {
        Arc::new(|| {
            let state = Arc::new(LoadState::new("demo", RegistrationLimits::default()));
            let mut builder = ContextBuilder::new("demo", &SandboxOptions::default())
                .with_load_state(Arc::clone(&state));
            builder.bind(log::MODULE, log::table("demo"));
            builder.bind(hooks::MODULE, hooks::table(state));
            builder.freeze_module(log::MODULE);
            builder.freeze_module(hooks::MODULE);
            builder.load(SOURCE)
        })
    }

    fn pool(size: usize, reserve: usize) -> Arc<Pool> {
        Arc::new(Pool::new("demo", factory(), size, reserve).unwrap())
    }

    fn assert_quiescent(pool: &Pool) {
        let stats = pool.stats();
        assert_eq!(
            stats.general_idle + stats.reserved_idle + stats.outstanding,
            stats.size
        );
    }

    #[tokio::test]
    async fn test_new_splits_segments() {
        let pool = pool(4, 1);
        let stats = pool.stats();
        assert_eq!(stats.general_idle, 3);
        assert_eq!(stats.reserved_idle, 1);
        assert_eq!(pool.registrations().hooks.len(), 1);
        assert!(pool.snapshot().is_some());

        let clamped = Arc::new(Pool::new("demo", factory(), 2, 9).unwrap());
        assert_eq!(clamped.stats().general_idle, 0);
        assert_eq!(clamped.stats().reserved_idle, 2);
    }

    #[tokio::test]
    async fn test_get_and_return() {
        let pool = pool(2, 1);
        {
            let mut ctx = pool.get(&CallContext::new()).await.unwrap();
            assert!(ctx.is_bound());
            let out = ctx.call_fn("ping", ()).unwrap();
            assert_eq!(out.into_string().unwrap(), "pong");
            assert_eq!(pool.outstanding(), 1);
            assert_quiescent(&pool);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_quiescent(&pool);
        assert_eq!(pool.stats().checkouts, 1);
    }

    #[tokio::test]
    async fn test_general_exhaustion_leaves_reserved_for_hooks() {
        let pool = pool(2, 1);
        let held = pool.get(&CallContext::new()).await.unwrap();

        let started = std::time::Instant::now();
        let err = pool.get(&CallContext::new()).await.unwrap_err();
        assert!(err.is_exhausted());
        assert!(started.elapsed() >= Duration::from_millis(90));

        let hook_ctx = pool.get_for_hook(&CallContext::new()).await.unwrap();
        assert_eq!(pool.outstanding(), 2);
        assert!(pool.get_for_hook(&CallContext::new()).await.is_err());

        drop(held);
        drop(hook_ctx);
        assert_quiescent(&pool);
        // Returns refill the reserved segment first
        assert_eq!(pool.stats().reserved_idle, 1);
    }

    #[tokio::test]
    async fn test_waiting_get_is_woken_by_put() {
        let pool = pool(1, 0);
        let held = pool.get(&CallContext::new()).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get(&CallContext::new()).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_strip_globals_on_return() {
        let pool = pool(1, 0);
        {
            let mut ctx = pool.get(&CallContext::new()).await.unwrap();
            ctx.eval("let leaked = 42; base = 7;").unwrap();
        }
        let mut ctx = pool.get(&CallContext::new()).await.unwrap();
        let names = ctx.global_names();
        assert!(!names.contains(&"leaked".to_string()));
        assert!(names.contains(&"base".to_string()));
        assert!(ctx.eval("leaked").is_err());
    }

    #[tokio::test]
    async fn test_unhealthy_context_replaced() {
        let replaced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&replaced);
        let pool = Arc::new(
            Pool::new("demo", factory(), 1, 0)
                .unwrap()
                .with_on_replace(move |_ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        );

        let old_id = {
            let mut ctx = pool.get(&CallContext::new()).await.unwrap();
            ctx.scope_mut().clear();
            ctx.id()
        };

        assert_eq!(replaced.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().replaced, 1);
        let ctx = pool.get(&CallContext::new()).await.unwrap();
        assert_ne!(ctx.id(), old_id);
        assert!(ctx.is_healthy());
    }

    #[tokio::test]
    async fn test_drain_all_returned() {
        let pool = pool(3, 1);
        let ctx = pool.get(&CallContext::new()).await.unwrap();

        let drainer = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.drain(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.state(), PoolState::Draining);
        assert!(pool.get(&CallContext::new()).await.is_err());

        drop(ctx);
        assert!(drainer.await.unwrap());

        let stats = pool.stats();
        assert_eq!(stats.state, PoolState::Closed);
        assert_eq!(stats.general_idle + stats.reserved_idle, 0);
    }

    #[tokio::test]
    async fn test_drain_timeout_forces_close() {
        let pool = pool(2, 0);
        let stuck = pool.get(&CallContext::new()).await.unwrap();

        assert!(!pool.drain(Duration::from_millis(50)).await);
        assert_eq!(pool.state(), PoolState::Closed);
        assert_eq!(pool.stats().general_idle, 0);

        // A late return is destroyed rather than reinserted
        drop(stuck);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.general_idle + stats.reserved_idle, 0);
    }

    #[tokio::test]
    async fn test_waiting_get_counts_as_outstanding_during_drain() {
        let pool = pool(1, 1);
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get(&CallContext::new()).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.outstanding(), 1);

        assert!(!pool.drain(Duration::from_millis(30)).await);

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::Exhausted { .. })));
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.stats().reserved_idle, 0);
    }

    #[tokio::test]
    async fn test_snapshot_recorded_once() {
        let pool = pool(1, 0);
        let ctx = pool.get(&CallContext::new()).await.unwrap();
        assert!(!pool.snapshot_globals(&ctx));
    }

    #[test]
    fn test_sizing_overrides() {
        let mut config = PoolConfig::default();
        config.overrides.insert(
            "heavy".to_string(),
            PoolSizing {
                size: 8,
                reserved: 2,
            },
        );
        assert_eq!(config.sizing_for("heavy"), (8, 2));
        assert_eq!(config.sizing_for("light"), (4, 1));
    }
}
