//! Read-only views over bound capability modules
//!
//! Freezing moves a capability's native functions into an immutable backing
//! [`rhai::Module`] (callable as `name::function(..)`) and exposes the global
//! `name` as an opaque [`FrozenModule`] proxy. Reads go to the backing table;
//! writes fail with an error naming the module and key. The proxy cannot be
//! enumerated: iterating it yields nothing.

use rhai::{Dynamic, Engine, EvalAltResult, Module, Position};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Opaque type name reported by `type_of()` for frozen proxies
pub const FROZEN_TYPE_NAME: &str = "frozen_module";

/// Attempted write to a frozen module
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot modify frozen module '{module}' (key '{key}')")]
pub struct FreezeViolation {
    /// Module name
    pub module: String,
    /// Key being written
    pub key: String,
}

/// A capability module's native functions before freezing
#[derive(Debug, Default)]
pub struct CapabilityTable {
    module: Module,
    entry_points: BTreeMap<String, Vec<u64>>,
}

impl CapabilityTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Module the native functions are bound into
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// Record the hash returned when binding `name`
    pub fn record(&mut self, name: &str, hash: u64) {
        self.entry_points
            .entry(name.to_string())
            .or_default()
            .push(hash);
    }
}

/// Immutable facade over a capability module's native entry points
#[derive(Clone)]
pub struct FrozenModule {
    name: Arc<str>,
    backing: Arc<Module>,
    entry_points: Arc<BTreeMap<String, Vec<u64>>>,
}

impl FrozenModule {
    /// Freeze a table, moving its functions into the hidden backing module
    pub fn new(name: &str, table: CapabilityTable) -> Self {
        let CapabilityTable {
            mut module,
            entry_points,
        } = table;
        module.build_index();
        Self {
            name: Arc::from(name),
            backing: Arc::new(module),
            entry_points: Arc::new(entry_points),
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing module registered with the engine
    pub fn backing(&self) -> Arc<Module> {
        Arc::clone(&self.backing)
    }

    /// Whether an entry point with this name exists
    pub fn contains(&self, key: &str) -> bool {
        self.entry_points.contains_key(key)
    }

    /// Read an entry point's native function hashes (one per overload)
    pub fn get(&self, key: &str) -> Option<&[u64]> {
        self.entry_points.get(key).map(Vec::as_slice)
    }

    /// Writes are always rejected
    pub fn set(&self, key: &str) -> Result<(), FreezeViolation> {
        Err(self.violation(key))
    }

    /// Whether `other` is a view over the same backing table
    pub fn same_backing(&self, other: &FrozenModule) -> bool {
        Arc::ptr_eq(&self.backing, &other.backing)
    }

    /// Every recorded entry point is still present in the backing module
    pub fn is_intact(&self) -> bool {
        self.entry_points
            .values()
            .flatten()
            .all(|hash| self.backing.contains_fn(*hash))
    }

    fn violation(&self, key: &str) -> FreezeViolation {
        FreezeViolation {
            module: self.name.to_string(),
            key: key.to_string(),
        }
    }

    /// Register the proxy type's read/write interception with an engine
    pub(crate) fn register_type(engine: &mut Engine) {
        engine.register_type_with_name::<FrozenModule>(FROZEN_TYPE_NAME);

        engine.register_indexer_get(|m: &mut FrozenModule, key: &str| -> Dynamic {
            if m.contains(key) {
                Dynamic::TRUE
            } else {
                Dynamic::UNIT
            }
        });

        engine.register_indexer_set(
            |m: &mut FrozenModule,
             key: &str,
             _value: Dynamic|
             -> Result<(), Box<EvalAltResult>> {
                Err(Box::new(EvalAltResult::ErrorRuntime(
                    m.violation(key).to_string().into(),
                    Position::NONE,
                )))
            },
        );

        engine.register_fn("to_string", |_m: FrozenModule| -> String {
            format!("<{}>", FROZEN_TYPE_NAME)
        });
        engine.register_fn("to_debug", |_m: FrozenModule| -> String {
            format!("<{}>", FROZEN_TYPE_NAME)
        });
    }
}

impl fmt::Debug for FrozenModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenModule")
            .field("name", &self.name)
            .field("entry_points", &self.entry_points.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::{ImmutableString, Scope};

    fn frozen_log() -> FrozenModule {
        let mut table = CapabilityTable::new();
        let hash = table.module_mut().set_native_fn(
            "info",
            |_msg: ImmutableString| -> Result<(), Box<EvalAltResult>> { Ok(()) },
        );
        table.record("info", hash);
        FrozenModule::new("log", table)
    }

    fn engine_with(frozen: &FrozenModule) -> (Engine, Scope<'static>) {
        let mut engine = Engine::new();
        FrozenModule::register_type(&mut engine);
        engine.register_static_module(frozen.name(), frozen.backing());
        let mut scope = Scope::new();
        scope.push_constant(frozen.name().to_string(), frozen.clone());
        (engine, scope)
    }

    #[test]
    fn test_reads_delegate() {
        let frozen = frozen_log();
        assert!(frozen.contains("info"));
        assert!(frozen.get("info").is_some());
        assert!(frozen.get("warn").is_none());
        assert!(frozen.is_intact());
    }

    #[test]
    fn test_writes_rejected() {
        let frozen = frozen_log();
        let err = frozen.set("info").unwrap_err();
        assert_eq!(err.module, "log");
        assert_eq!(err.key, "info");
        assert_eq!(
            err.to_string(),
            "cannot modify frozen module 'log' (key 'info')"
        );
    }

    #[test]
    fn test_script_calls_backing_and_cannot_write() {
        let frozen = frozen_log();
        let (engine, mut scope) = engine_with(&frozen);

        engine.run_with_scope(&mut scope, r#"log::info("hi")"#).unwrap();

        let present: bool = engine.eval_with_scope(&mut scope, r#"log["info"]"#).unwrap();
        assert!(present);

        assert!(engine
            .run_with_scope(&mut scope, r#"log["info"] = 42;"#)
            .is_err());
        assert!(frozen.is_intact());
    }

    #[test]
    fn test_reflection_is_opaque() {
        let frozen = frozen_log();
        let (engine, mut scope) = engine_with(&frozen);
        let name: String = engine.eval_with_scope(&mut scope, "type_of(log)").unwrap();
        assert_eq!(name, FROZEN_TYPE_NAME);
        let text: String = engine.eval_with_scope(&mut scope, "log.to_string()").unwrap();
        assert_eq!(text, "<frozen_module>");
    }

    #[test]
    fn test_same_backing() {
        let frozen = frozen_log();
        let copy = frozen.clone();
        assert!(frozen.same_backing(&copy));
        assert!(!frozen.same_backing(&frozen_log()));
    }
}
