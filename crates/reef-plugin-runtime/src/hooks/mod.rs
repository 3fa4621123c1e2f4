//! Data-lifecycle hooks
//!
//! Plugins subscribe during load; the engine merges subscriptions from every
//! plugin, gates them on durable operator approval and dispatches
//! before-hooks (blocking, may veto) and after-hooks (background, never
//! observable to the trigger).

mod approval;
mod engine;
mod entry;

pub use approval::ApprovalState;
pub use engine::HookEngine;
pub use entry::HookEntry;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hook engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEngineConfig {
    /// How long `close` waits for in-flight after-hooks
    #[serde(default = "default_close_timeout", with = "humantime_serde")]
    pub close_timeout: Duration,
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for HookEngineConfig {
    fn default() -> Self {
        Self {
            close_timeout: default_close_timeout(),
        }
    }
}
