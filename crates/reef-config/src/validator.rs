//! Configuration validation

use crate::error::{ConfigError, Result};
use crate::HostConfig;
use std::time::Duration;

/// Validate configuration
pub fn validate_config(config: &HostConfig) -> Result<()> {
    validate_sandbox(config)?;
    validate_pool(config)?;
    validate_watcher(config)?;
    validate_runtime(config)?;
    Ok(())
}

fn require_positive(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(ConfigError::invalid(format!("{name} must be > 0")));
    }
    Ok(())
}

fn validate_sandbox(config: &HostConfig) -> Result<()> {
    require_positive("sandbox.exec_deadline", config.sandbox.exec_deadline)?;

    if config.sandbox.exec_deadline.as_secs() > 60 {
        tracing::warn!("sandbox.exec_deadline is very high (>1 minute)");
    }

    if config.limits.max_hooks == 0 || config.limits.max_routes == 0 {
        return Err(ConfigError::invalid("registration limits must be > 0"));
    }

    Ok(())
}

fn validate_pool(config: &HostConfig) -> Result<()> {
    let pool = &config.pool;
    if pool.size == 0 {
        return Err(ConfigError::invalid("pool.size must be > 0"));
    }
    if pool.reserved > pool.size {
        return Err(ConfigError::invalid("pool.reserved must not exceed pool.size"));
    }
    if pool.reserved == pool.size {
        tracing::warn!("pool.reserved equals pool.size; ordinary calls will always be exhausted");
    }

    for (plugin, sizing) in &pool.overrides {
        if sizing.size == 0 {
            return Err(ConfigError::invalid(format!(
                "pool.overrides.{plugin}.size must be > 0"
            )));
        }
        if sizing.reserved > sizing.size {
            return Err(ConfigError::invalid(format!(
                "pool.overrides.{plugin}.reserved must not exceed its size"
            )));
        }
    }

    Ok(())
}

fn validate_watcher(config: &HostConfig) -> Result<()> {
    let watcher = &config.watcher;
    require_positive("watcher.poll_interval", watcher.poll_interval)?;
    require_positive("watcher.debounce", watcher.debounce)?;
    require_positive("watcher.slow_threshold", watcher.slow_threshold)?;

    if watcher.pause_after == 0 {
        return Err(ConfigError::invalid("watcher.pause_after must be > 0"));
    }
    if watcher.max_files == 0 || watcher.max_bytes == 0 {
        return Err(ConfigError::invalid("watcher checksum ceilings must be > 0"));
    }

    if watcher.debounce < watcher.poll_interval {
        tracing::debug!("watcher.debounce is shorter than poll_interval; changes settle after one extra poll");
    }

    Ok(())
}

fn validate_runtime(config: &HostConfig) -> Result<()> {
    if config.breaker.max_failures == 0 {
        return Err(ConfigError::invalid("breaker.max_failures must be > 0"));
    }
    require_positive("breaker.reset_interval", config.breaker.reset_interval)?;
    require_positive("hooks.close_timeout", config.hooks.close_timeout)?;
    require_positive("runtime.drain_timeout", config.runtime.drain_timeout)?;
    require_positive("runtime.shutdown_timeout", config.runtime.shutdown_timeout)?;
    Ok(())
}
