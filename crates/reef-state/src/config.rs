//! Configuration for hook store backends

use crate::{HookStore, InMemoryHookStore, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "postgres-backend")]
use std::time::Duration;

/// Hook store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Backend type
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-memory backend (default, single-instance only)
    #[default]
    InMemory,

    /// PostgreSQL backend
    #[cfg(feature = "postgres-backend")]
    Postgres {
        /// PostgreSQL connection URL
        url: String,

        /// Connection pool size
        #[serde(default = "default_pool_size")]
        pool_size: u32,

        /// Connection timeout
        #[serde(default = "default_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

#[cfg(feature = "postgres-backend")]
fn default_pool_size() -> u32 {
    10
}

#[cfg(feature = "postgres-backend")]
fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl StateConfig {
    /// Open the configured backend
    pub async fn connect(&self) -> Result<Arc<dyn HookStore>> {
        match &self.backend {
            BackendConfig::InMemory => Ok(Arc::new(InMemoryHookStore::new())),
            #[cfg(feature = "postgres-backend")]
            BackendConfig::Postgres {
                url,
                pool_size,
                timeout,
            } => {
                let store =
                    crate::PostgresHookStore::connect(url, *pool_size, *timeout).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_is_in_memory() {
        let config: StateConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(config.backend, BackendConfig::InMemory));

        let store = config.connect().await.unwrap();
        store.health_check().await.unwrap();
    }

    #[test]
    fn test_tagged_backend() {
        let config: StateConfig =
            serde_json::from_str(r#"{ "backend": { "type": "inmemory" } }"#).unwrap();
        assert!(matches!(config.backend, BackendConfig::InMemory));
    }
}
