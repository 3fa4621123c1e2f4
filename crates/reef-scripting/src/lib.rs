//! # Reef Scripting
//!
//! Sandboxed Rhai execution contexts for Reef plugins.
//!
//! ## Features
//!
//! - Allow-listed engine packages, `eval` disabled
//! - Cooperative execution deadline and cancellation
//! - Frozen capability modules (`log`, `data`, `hooks`, `routes`)
//! - `import` restricted to the plugin's `lib/` directory
//! - Load-phase guarded hook and route registration
//! - Namespace snapshots and structural health checks for pooling

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod capabilities;
pub mod context;
pub mod error;
pub mod frozen;
pub mod loader;
pub mod module_loader;
pub mod sandbox;

pub use capabilities::{
    DataSource, HookEvent, HookRegistration, InMemoryDataSource, LoadPhase, LoadState,
    RegistrationLimits, Registrations, RouteMethod, RouteRegistration,
};
pub use context::{ContextBuilder, ExecutionContext, NamespaceSnapshot};
pub use error::{Result, ScriptError};
pub use frozen::{CapabilityTable, FreezeViolation, FrozenModule};
pub use loader::{ContextFactory, PluginFactory, PluginLoader};
pub use module_loader::PluginModuleResolver;
pub use sandbox::{build_sandbox, CallContext, ExecControl, SandboxOptions};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::capabilities::{HookEvent, HookRegistration, RegistrationLimits};
    pub use crate::context::{ExecutionContext, NamespaceSnapshot};
    pub use crate::error::{Result, ScriptError};
    pub use crate::loader::{ContextFactory, PluginLoader};
    pub use crate::sandbox::{CallContext, SandboxOptions};
}
