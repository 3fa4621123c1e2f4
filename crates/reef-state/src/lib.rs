//! # Reef State
//!
//! Durable hook-registration table: one row per (plugin, event, table) with
//! priority, wildcard flag, handler identity, plugin version and approval.
//!
//! ## Backends
//!
//! - **InMemory**: single-instance, default
//! - **PostgreSQL**: durable `plugin_hooks` table (feature `postgres-backend`)
//!
//! ## Example
//!
//! ```rust
//! use reef_state::{HookKey, HookRegistrationRow, HookStore, InMemoryHookStore};
//!
//! #[tokio::main]
//! async fn main() -> reef_state::Result<()> {
//!     let store = InMemoryHookStore::new();
//!
//!     let registration = HookRegistrationRow {
//!         event: "before_create".to_string(),
//!         table_name: "posts".to_string(),
//!         priority: 100,
//!         wildcard: false,
//!         handler: "hook:1".to_string(),
//!     };
//!     store.upsert_hook_registrations("audit", "1.0.0", &[registration]).await?;
//!
//!     let key = HookKey::new("audit", "before_create", "posts");
//!     store.set_approval(&key, true, "admin").await?;
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod config;
mod error;
mod inmemory;
mod store;

#[cfg(feature = "postgres-backend")]
mod postgres;

pub use config::{BackendConfig, StateConfig};
pub use error::{Error, Result};
pub use inmemory::InMemoryHookStore;
pub use store::{HookKey, HookRegistrationRow, HookRow, HookStore, UpsertOutcome};

#[cfg(feature = "postgres-backend")]
pub use postgres::{PostgresHookStore, TABLE_NAME};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{BackendConfig, StateConfig};
    pub use crate::error::{Error, Result};
    pub use crate::inmemory::InMemoryHookStore;
    pub use crate::store::{HookKey, HookRegistrationRow, HookRow, HookStore};

    #[cfg(feature = "postgres-backend")]
    pub use crate::postgres::PostgresHookStore;
}
