//! `hooks` capability: data-lifecycle hook registration

use super::{capability_error, LoadState};
use crate::frozen::CapabilityTable;
use rhai::{Dynamic, EvalAltResult, FnPtr, ImmutableString, Map};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Module name
pub const MODULE: &str = "hooks";

/// Table name matching every table
pub const WILDCARD_TABLE: &str = "*";

/// Default hook priority
pub const DEFAULT_PRIORITY: i64 = 100;

/// Lowest accepted priority (runs first)
pub const MIN_PRIORITY: i64 = 1;

/// Highest accepted priority (runs last)
pub const MAX_PRIORITY: i64 = 1000;

/// Data-lifecycle events plugins may subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    /// Before a record is created; may veto
    BeforeCreate,
    /// After a record was created
    AfterCreate,
    /// Before a record is updated; may veto
    BeforeUpdate,
    /// After a record was updated
    AfterUpdate,
    /// Before a record is deleted; may veto
    BeforeDelete,
    /// After a record was deleted
    AfterDelete,
}

impl HookEvent {
    /// All events
    pub const ALL: [HookEvent; 6] = [
        HookEvent::BeforeCreate,
        HookEvent::AfterCreate,
        HookEvent::BeforeUpdate,
        HookEvent::AfterUpdate,
        HookEvent::BeforeDelete,
        HookEvent::AfterDelete,
    ];

    /// Wire name, e.g. `before_create`
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeCreate => "before_create",
            HookEvent::AfterCreate => "after_create",
            HookEvent::BeforeUpdate => "before_update",
            HookEvent::AfterUpdate => "after_update",
            HookEvent::BeforeDelete => "before_delete",
            HookEvent::AfterDelete => "after_delete",
        }
    }

    /// Whether handlers for this event can veto the operation
    pub fn is_before(&self) -> bool {
        matches!(
            self,
            HookEvent::BeforeCreate | HookEvent::BeforeUpdate | HookEvent::BeforeDelete
        )
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| format!("unknown hook event '{}'", s))
    }
}

/// A hook registration captured during plugin load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRegistration {
    /// Subscribed event
    pub event: HookEvent,
    /// Table name or `*`
    pub table: String,
    /// Priority in `[1, 1000]`, lower runs first
    pub priority: i64,
    /// Key of the handler in the context's handler table
    pub handler_key: String,
}

impl HookRegistration {
    /// Whether this registration matches every table
    pub fn is_wildcard(&self) -> bool {
        self.table == WILDCARD_TABLE
    }
}

/// Build the `hooks` table writing into `state`
pub fn table(state: Arc<LoadState>) -> CapabilityTable {
    let mut table = CapabilityTable::new();

    let s = Arc::clone(&state);
    let hash = table.module_mut().set_native_fn(
        "register",
        move |event: ImmutableString,
              target: ImmutableString,
              handler: FnPtr|
              -> Result<(), Box<EvalAltResult>> {
            register(&s, &event, &target, handler, &Dynamic::UNIT)
        },
    );
    table.record("register", hash);

    let s = state;
    let hash = table.module_mut().set_native_fn(
        "register",
        move |event: ImmutableString,
              target: ImmutableString,
              handler: FnPtr,
              options: Dynamic|
              -> Result<(), Box<EvalAltResult>> {
            register(&s, &event, &target, handler, &options)
        },
    );
    table.record("register", hash);

    table
}

fn register(
    state: &LoadState,
    event: &str,
    target: &str,
    handler: FnPtr,
    options: &Dynamic,
) -> Result<(), Box<EvalAltResult>> {
    let event = HookEvent::from_str(event).map_err(capability_error)?;

    if target.trim().is_empty() {
        return Err(capability_error(
            "hooks::register: table name must not be empty".to_string(),
        ));
    }

    state.guard_phase("hooks::register")?;

    // Multiple hooks for one (event, table) are merged at dispatch time
    let mut hooks = state.hooks.lock();
    if hooks.len() >= state.limits.max_hooks {
        return Err(capability_error(format!(
            "plugin '{}' exceeded the hook registration limit ({})",
            state.plugin, state.limits.max_hooks
        )));
    }

    let priority = parse_priority(options);
    let handler_key = state.store_handler("hook", handler);

    debug!(
        plugin = %state.plugin,
        event = %event,
        table = %target,
        priority = priority,
        handler = %handler_key,
        "Hook registered"
    );

    hooks.push(HookRegistration {
        event,
        table: target.to_string(),
        priority,
        handler_key,
    });

    Ok(())
}

fn parse_priority(options: &Dynamic) -> i64 {
    options
        .read_lock::<Map>()
        .and_then(|map| map.get("priority").and_then(|v| v.as_int().ok()))
        .map(|p| p.clamp(MIN_PRIORITY, MAX_PRIORITY))
        .unwrap_or(DEFAULT_PRIORITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{LoadPhase, RegistrationLimits};
    use crate::frozen::FrozenModule;
    use rhai::Engine;

    fn engine_for(state: &Arc<LoadState>) -> Engine {
        let frozen = FrozenModule::new(MODULE, table(Arc::clone(state)));
        let mut engine = Engine::new();
        engine.register_static_module(MODULE, frozen.backing());
        engine
    }

    #[test]
    fn test_event_parsing() {
        assert_eq!(
            "before_create".parse::<HookEvent>().unwrap(),
            HookEvent::BeforeCreate
        );
        assert!("before_upsert".parse::<HookEvent>().is_err());
        assert!(HookEvent::BeforeDelete.is_before());
        assert!(!HookEvent::AfterUpdate.is_before());
    }

    #[test]
    fn test_register_with_priority_clamp() {
        let state = Arc::new(LoadState::new("p", RegistrationLimits::default()));
        let engine = engine_for(&state);

        engine
            .run(
                r#"
                fn check(table, record) { true }
                hooks::register("before_create", "posts", Fn("check"));
                hooks::register("after_create", "*", |t, r| { () }, #{ priority: 5000 });
                hooks::register("after_delete", "posts", Fn("check"), #{ priority: -3 });
                hooks::register("after_update", "posts", Fn("check"), "not a map");
                "#,
            )
            .unwrap();

        let (regs, handlers) = state.finish();
        let hooks = regs.hooks;
        assert_eq!(hooks.len(), 4);
        assert_eq!(hooks[0].priority, DEFAULT_PRIORITY);
        assert_eq!(hooks[0].handler_key, "hook:1");
        assert!(hooks[1].is_wildcard());
        assert_eq!(hooks[1].priority, MAX_PRIORITY);
        assert_eq!(hooks[2].priority, MIN_PRIORITY);
        assert_eq!(hooks[3].priority, DEFAULT_PRIORITY);
        assert_eq!(handlers.len(), 4);
    }

    #[test]
    fn test_validation_order() {
        let state = Arc::new(LoadState::new("p", RegistrationLimits::default()));
        state.set_phase(LoadPhase::Init);
        let engine = engine_for(&state);

        // Unknown event is reported before the phase guard
        let err = engine
            .run(r#"hooks::register("on_boot", "posts", || ());"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown hook event"));

        let err = engine
            .run(r#"hooks::register("before_create", "", || ());"#)
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));

        let err = engine
            .run(r#"hooks::register("before_create", "posts", || ());"#)
            .unwrap_err();
        assert!(err.to_string().contains("top-level"));
    }

    #[test]
    fn test_limit() {
        let limits = RegistrationLimits {
            max_hooks: 2,
            max_routes: 2,
        };
        let state = Arc::new(LoadState::new("p", limits));
        let engine = engine_for(&state);

        let err = engine
            .run(
                r#"
                hooks::register("before_create", "a", || ());
                hooks::register("before_create", "a", || ());
                hooks::register("before_create", "a", || ());
                "#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("limit"));
        assert_eq!(state.finish().0.hooks.len(), 2);
    }
}
