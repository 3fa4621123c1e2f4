//! # Reef Plugin Runtime
//!
//! Pooled execution, hook dispatch and hot reload for Reef plugins.
//!
//! ## Features
//!
//! - **Execution Pools**: general and hook-reserved segments, health-checked returns
//! - **Hook Engine**: deterministic ordering, durable approval gating
//! - **Hot Reload**: checksum polling with debounce, cooldown and slow-reload pause
//! - **Blue-Green Reload**: new generation published before the old one drains
//!
//! ## Example
//!
//! ```rust,no_run
//! use reef_health::{BreakerRegistry, CircuitBreakerConfig};
//! use reef_plugin_runtime::*;
//! use reef_scripting::{PluginLoader, RegistrationLimits, SandboxOptions};
//! use reef_state::InMemoryHookStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let hooks = Arc::new(HookEngine::new(
//!     Arc::new(InMemoryHookStore::new()),
//!     HookEngineConfig::default(),
//! ));
//! let loader = PluginLoader::new(SandboxOptions::default(), RegistrationLimits::default());
//! let host = Arc::new(PluginHost::new(
//!     loader,
//!     hooks,
//!     BreakerRegistry::new(CircuitBreakerConfig::default()),
//! ));
//!
//! host.load_plugin("moderation", "plugins/moderation", "1.0.0").await?;
//!
//! // Reload on source changes
//! let watcher = Arc::new(PluginWatcher::new(WatcherConfig::default(), host.clone()));
//! watcher.watch("moderation", "plugins/moderation");
//! let _task = watcher.clone().spawn();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod checksum;
pub mod error;
pub mod hooks;
pub mod hot_reload;
pub mod manager;
pub mod pool;

pub use checksum::{plugin_checksum, plugin_checksum_blocking, ChecksumLimits};
pub use error::{ChecksumError, HookError, PluginRuntimeError, PoolError, Result};
pub use hooks::{ApprovalState, HookEngine, HookEngineConfig, HookEntry};
pub use hot_reload::{PluginReloader, PluginWatcher, WatchStatus, WatcherConfig};
pub use manager::{Generation, PluginHost, PluginInfo, ReloadOutcome, DEFAULT_DRAIN_TIMEOUT};
pub use pool::{Pool, PoolConfig, PoolSizing, PoolState, PoolStats, PooledContext, ACQUIRE_TIMEOUT};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::error::{HookError, PluginRuntimeError, PoolError, Result};
    pub use crate::hooks::{HookEngine, HookEngineConfig};
    pub use crate::hot_reload::{PluginReloader, PluginWatcher, WatcherConfig};
    pub use crate::manager::PluginHost;
    pub use crate::pool::{Pool, PoolConfig, PooledContext};
    pub use reef_scripting::prelude::*;
}
