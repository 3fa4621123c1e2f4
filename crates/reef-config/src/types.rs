//! Configuration types

use reef_health::{BreakerRegistry, CircuitBreakerConfig};
use reef_plugin_runtime::{HookEngine, HookEngineConfig, PoolConfig, WatcherConfig, DEFAULT_DRAIN_TIMEOUT};
use reef_scripting::{PluginLoader, RegistrationLimits, SandboxOptions};
use reef_state::StateConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Sandbox applied to every execution context
    #[serde(default)]
    pub sandbox: SandboxOptions,

    /// Per-plugin registration ceilings
    #[serde(default)]
    pub limits: RegistrationLimits,

    /// Pool sizing
    #[serde(default)]
    pub pool: PoolConfig,

    /// Hook engine
    #[serde(default)]
    pub hooks: HookEngineConfig,

    /// Hot reload watcher
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Per-plugin circuit breakers
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,

    /// Runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Durable hook store
    #[serde(default)]
    pub state: StateConfig,
}

/// Plugin host runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How long a replaced generation may take to return its contexts
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// How long shutdown waits for hooks and pools
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

fn default_drain_timeout() -> Duration {
    DEFAULT_DRAIN_TIMEOUT
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl HostConfig {
    /// Plugin loader using this sandbox and these limits
    pub fn plugin_loader(&self) -> PluginLoader {
        PluginLoader::new(self.sandbox.clone(), self.limits)
    }

    /// Breaker registry with this breaker configuration
    pub fn breaker_registry(&self) -> BreakerRegistry {
        BreakerRegistry::new(self.breaker.clone())
    }

    /// Connect the hook store and build the hook engine
    pub async fn hook_engine(&self) -> reef_state::Result<HookEngine> {
        let store = self.state.connect().await?;
        Ok(HookEngine::new(store, self.hooks.clone()))
    }
}
