//! Capability modules bound into every plugin context
//!
//! Each module is a table of native functions. Registration modules (`hooks`,
//! `routes`) write into a per-context [`LoadState`] builder that is read back
//! once after the plugin's top-level load and then treated as immutable.

pub mod data;
pub mod hooks;
pub mod log;
pub mod routes;

use parking_lot::{Mutex, RwLock};
use rhai::{EvalAltResult, FnPtr, Position};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use data::{DataSource, InMemoryDataSource};
pub use hooks::{HookEvent, HookRegistration};
pub use routes::{RouteMethod, RouteRegistration};

/// Names of the capability modules every context exposes
pub const CAPABILITY_MODULES: &[&str] = &[log::MODULE, data::MODULE, hooks::MODULE, routes::MODULE];

/// Default per-plugin ceiling for hook and route registrations
pub const DEFAULT_MAX_REGISTRATIONS: usize = 50;

/// Per-plugin registration ceilings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegistrationLimits {
    /// Maximum hook registrations per plugin
    #[serde(default = "default_max_registrations")]
    pub max_hooks: usize,
    /// Maximum route registrations per plugin
    #[serde(default = "default_max_registrations")]
    pub max_routes: usize,
}

fn default_max_registrations() -> usize {
    DEFAULT_MAX_REGISTRATIONS
}

impl Default for RegistrationLimits {
    fn default() -> Self {
        Self {
            max_hooks: DEFAULT_MAX_REGISTRATIONS,
            max_routes: DEFAULT_MAX_REGISTRATIONS,
        }
    }
}

/// Phase of a context's one-time load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Executing the plugin's top-level statements
    TopLevel,
    /// Running the post-load `init()` callback
    Init,
    /// Load finished
    Ready,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPhase::TopLevel => write!(f, "top-level"),
            LoadPhase::Init => write!(f, "init"),
            LoadPhase::Ready => write!(f, "ready"),
        }
    }
}

/// Registrations captured during one load generation
#[derive(Debug, Clone, Default)]
pub struct Registrations {
    /// Pending hook registrations, in registration order
    pub hooks: Vec<HookRegistration>,
    /// Pending route registrations, in registration order
    pub routes: Vec<RouteRegistration>,
}

/// Mutable builder shared with the registration closures during load
#[derive(Debug)]
pub struct LoadState {
    plugin: String,
    limits: RegistrationLimits,
    phase: RwLock<LoadPhase>,
    hooks: Mutex<Vec<HookRegistration>>,
    routes: Mutex<Vec<RouteRegistration>>,
    handlers: Mutex<HashMap<String, FnPtr>>,
    next_key: AtomicU64,
}

impl LoadState {
    /// Create a builder in the top-level phase
    pub fn new(plugin: &str, limits: RegistrationLimits) -> Self {
        Self {
            plugin: plugin.to_string(),
            limits,
            phase: RwLock::new(LoadPhase::TopLevel),
            hooks: Mutex::new(Vec::new()),
            routes: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(1),
        }
    }

    /// Plugin name
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Current phase
    pub fn phase(&self) -> LoadPhase {
        *self.phase.read()
    }

    /// Advance the phase
    pub fn set_phase(&self, phase: LoadPhase) {
        *self.phase.write() = phase;
    }

    /// Registration calls succeed only while top-level code is running
    pub(crate) fn guard_phase(&self, call: &str) -> Result<(), Box<EvalAltResult>> {
        let phase = self.phase();
        if phase == LoadPhase::TopLevel {
            Ok(())
        } else {
            Err(capability_error(format!(
                "{} may only be called from top-level plugin code (current phase: {})",
                call, phase
            )))
        }
    }

    /// Store a handler under a generated key, deterministic across contexts
    /// that execute the same source
    fn store_handler(&self, kind: &str, handler: FnPtr) -> String {
        let key = format!("{}:{}", kind, self.next_key.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().insert(key.clone(), handler);
        key
    }

    /// Take the registrations and handler table once the load is complete
    pub(crate) fn finish(&self) -> (Registrations, HashMap<String, FnPtr>) {
        self.set_phase(LoadPhase::Ready);
        let registrations = Registrations {
            hooks: std::mem::take(&mut *self.hooks.lock()),
            routes: std::mem::take(&mut *self.routes.lock()),
        };
        let handlers = std::mem::take(&mut *self.handlers.lock());
        (registrations, handlers)
    }
}

/// Script-visible capability misuse error
pub(crate) fn capability_error(message: String) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(message.into(), Position::NONE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_guard() {
        let state = LoadState::new("p", RegistrationLimits::default());
        assert!(state.guard_phase("hooks::register").is_ok());

        state.set_phase(LoadPhase::Init);
        let err = state.guard_phase("hooks::register").unwrap_err();
        assert!(err.to_string().contains("top-level"));
    }

    #[test]
    fn test_handler_keys_are_sequential() {
        let state = LoadState::new("p", RegistrationLimits::default());
        let a = state.store_handler("hook", FnPtr::new("a").unwrap());
        let b = state.store_handler("route", FnPtr::new("b").unwrap());
        assert_eq!(a, "hook:1");
        assert_eq!(b, "route:2");

        let (_, handlers) = state.finish();
        assert_eq!(handlers.len(), 2);
        assert_eq!(state.phase(), LoadPhase::Ready);
    }
}
