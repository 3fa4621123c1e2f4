//! Execution contexts: one sandboxed engine, compiled plugin source and global scope

use crate::capabilities::{LoadPhase, LoadState, Registrations};
use crate::error::{Result, ScriptError};
use crate::frozen::{CapabilityTable, FrozenModule};
use crate::module_loader::PluginModuleResolver;
use crate::sandbox::{build_sandbox, CallContext, ExecControl, SandboxOptions};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FnPtr, FuncArgs, Scope, AST};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the optional one-time callback run after the top-level load
pub const INIT_FN: &str = "init";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Assembles one execution context step by step
pub struct ContextBuilder {
    plugin: Arc<str>,
    engine: Engine,
    control: Arc<ExecControl>,
    scope: Scope<'static>,
    bound: HashMap<String, CapabilityTable>,
    frozen: Vec<FrozenModule>,
    load_state: Option<Arc<LoadState>>,
}

impl ContextBuilder {
    /// Start from a fresh sandbox
    pub fn new(plugin: &str, options: &SandboxOptions) -> Self {
        let control = ExecControl::new(options.exec_deadline);
        let mut engine = build_sandbox(plugin, options, Arc::clone(&control));
        FrozenModule::register_type(&mut engine);

        Self {
            plugin: Arc::from(plugin),
            engine,
            control,
            scope: Scope::new(),
            bound: HashMap::new(),
            frozen: Vec::new(),
            load_state: None,
        }
    }

    /// Resolve `import` statements against `<root>/lib`
    pub fn with_module_loader(mut self, root: impl AsRef<Path>) -> Self {
        self.engine
            .set_module_resolver(PluginModuleResolver::new(root));
        self
    }

    /// Attach the registration builder the capability tables write into
    pub fn with_load_state(mut self, state: Arc<LoadState>) -> Self {
        self.load_state = Some(state);
        self
    }

    /// Bind a capability table under `name`; it becomes callable once frozen
    pub fn bind(&mut self, name: &str, table: CapabilityTable) -> &mut Self {
        self.bound.insert(name.to_string(), table);
        self
    }

    /// Freeze a bound capability table
    ///
    /// Returns `false` if nothing was bound under `name`.
    pub fn freeze_module(&mut self, name: &str) -> bool {
        let Some(table) = self.bound.remove(name) else {
            return false;
        };

        let frozen = FrozenModule::new(name, table);
        self.engine
            .register_static_module(name, frozen.backing());
        self.scope.push_constant(name.to_string(), frozen.clone());
        self.frozen.push(frozen);
        true
    }

    /// Compile and run the plugin source, then call `init()` if defined
    pub fn load(mut self, source: &str) -> Result<ExecutionContext> {
        if !self.bound.is_empty() {
            let names: Vec<_> = self.bound.keys().cloned().collect();
            warn!(plugin = %self.plugin, modules = ?names, "Bound capability modules were never frozen");
        }

        let ast = self.engine.compile_with_scope(&self.scope, source)?;

        self.control.arm_default();
        let result = self.run_load(&ast);
        self.control.detach();

        let registrations = match &self.load_state {
            Some(state) => state.finish(),
            None => Default::default(),
        };
        result?;
        let (registrations, handlers) = registrations;

        let context = ExecutionContext {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            plugin: self.plugin,
            engine: self.engine,
            ast,
            scope: self.scope,
            handlers,
            frozen: self.frozen,
            control: self.control,
            registrations,
        };

        debug!(
            plugin = %context.plugin,
            context_id = context.id,
            hooks = context.registrations.hooks.len(),
            routes = context.registrations.routes.len(),
            "Execution context loaded"
        );

        Ok(context)
    }

    fn run_load(&mut self, ast: &AST) -> Result<()> {
        if let Some(state) = &self.load_state {
            state.set_phase(LoadPhase::TopLevel);
        }
        self.engine.run_ast_with_scope(&mut self.scope, ast)?;

        let has_init = ast.iter_functions().any(|f| f.name == INIT_FN && f.params.is_empty());
        if has_init {
            if let Some(state) = &self.load_state {
                state.set_phase(LoadPhase::Init);
            }
            let options = CallFnOptions::new().eval_ast(false).rewind_scope(false);
            self.engine
                .call_fn_with_options::<Dynamic>(options, &mut self.scope, ast, INIT_FN, ())?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("plugin", &self.plugin)
            .field("bound", &self.bound.keys().collect::<Vec<_>>())
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// One loaded plugin instance, exclusively owned by a single caller at a time
pub struct ExecutionContext {
    id: u64,
    plugin: Arc<str>,
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    handlers: HashMap<String, FnPtr>,
    frozen: Vec<FrozenModule>,
    control: Arc<ExecControl>,
    registrations: Registrations,
}

impl ExecutionContext {
    /// Process-unique context id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Owning plugin
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Registrations captured while this context was loaded
    pub fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    /// Whether a handler key resolves in this context
    pub fn has_handler(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Invoke a registered handler by key
    pub fn call_handler(&mut self, key: &str, args: impl FuncArgs) -> Result<Dynamic> {
        let handler = self
            .handlers
            .get(key)
            .cloned()
            .ok_or_else(|| ScriptError::HandlerNotFound {
                key: key.to_string(),
            })?;
        self.guarded(|ctx| handler.call::<Dynamic>(&ctx.engine, &ctx.ast, args))
    }

    /// Call a script function defined by the plugin
    pub fn call_fn(&mut self, name: &str, args: impl FuncArgs) -> Result<Dynamic> {
        self.guarded(|ctx| {
            let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
            ctx.engine
                .call_fn_with_options::<Dynamic>(options, &mut ctx.scope, &ctx.ast, name, args)
        })
    }

    /// Evaluate code against this context's globals and functions
    pub fn eval(&mut self, code: &str) -> Result<Dynamic> {
        let snippet = self.engine.compile_with_scope(&self.scope, code)?;
        let merged = self.ast.clone_functions_only().merge(&snippet);
        self.guarded(|ctx| ctx.engine.eval_ast_with_scope::<Dynamic>(&mut ctx.scope, &merged))
    }

    /// Whether the plugin defines a script function `name`
    pub fn has_fn(&self, name: &str) -> bool {
        self.ast.iter_functions().any(|f| f.name == name)
    }

    /// Bind a caller's deadline and cancellation
    pub fn bind(&self, call: &CallContext) {
        self.control.bind(call);
    }

    /// Detach the caller binding
    ///
    /// Rhai keeps no call stack between calls, so the binding is the only
    /// per-call state left behind.
    pub fn reset(&self) {
        self.control.detach();
    }

    /// Whether a caller binding is attached
    pub fn is_bound(&self) -> bool {
        self.control.is_bound()
    }

    /// Remove every global not present in `snapshot`; returns how many were removed
    pub fn strip_globals(&mut self, snapshot: &NamespaceSnapshot) -> usize {
        let before = self.scope.len();
        if before > snapshot.len {
            self.scope.rewind(snapshot.len);
        }

        if self
            .scope
            .iter_raw()
            .all(|(name, _, _)| snapshot.names.contains(name))
        {
            return before - self.scope.len();
        }

        let kept: Vec<(String, bool, Dynamic)> = self
            .scope
            .iter_raw()
            .filter(|(name, _, _)| snapshot.names.contains(*name))
            .map(|(name, constant, value)| (name.to_string(), constant, value.clone()))
            .collect();

        self.scope.clear();
        for (name, constant, value) in kept {
            if constant {
                self.scope.push_constant_dynamic(name, value);
            } else {
                self.scope.push_dynamic(name, value);
            }
        }
        before - self.scope.len()
    }

    /// Structural health check
    ///
    /// Every frozen capability must still be visible as a constant proxy over
    /// the same backing module, and every native entry point must still be
    /// present in that backing module.
    pub fn is_healthy(&self) -> bool {
        self.frozen.iter().all(|expected| {
            if self.scope.is_constant(expected.name()) != Some(true) {
                return false;
            }
            let visible = match self
                .scope
                .get(expected.name())
                .and_then(|value| value.read_lock::<FrozenModule>())
            {
                Some(visible) => visible.same_backing(expected),
                None => false,
            };
            visible && expected.is_intact()
        })
    }

    /// Names of all globals, in declaration order
    pub fn global_names(&self) -> Vec<String> {
        self.scope
            .iter_raw()
            .map(|(name, _, _)| name.to_string())
            .collect()
    }

    /// Frozen capability views
    pub fn frozen_modules(&self) -> &[FrozenModule] {
        &self.frozen
    }

    /// Direct access to the global scope
    pub fn scope_mut(&mut self) -> &mut Scope<'static> {
        &mut self.scope
    }

    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> std::result::Result<T, Box<EvalAltResult>>,
    ) -> Result<T> {
        // Unbound calls still run under the default deadline
        let armed = !self.control.is_bound();
        if armed {
            self.control.arm_default();
        }
        let result = f(self);
        if armed {
            self.control.detach();
        }
        result.map_err(ScriptError::from)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("plugin", &self.plugin)
            .field("handlers", &self.handlers.len())
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// Global names present right after a context's one-time load
#[derive(Debug, Clone, Default)]
pub struct NamespaceSnapshot {
    names: HashSet<String>,
    len: usize,
}

impl NamespaceSnapshot {
    /// Record the current globals of `context`
    pub fn capture(context: &ExecutionContext) -> Self {
        Self {
            names: context.global_names().into_iter().collect(),
            len: context.scope.len(),
        }
    }

    /// Whether `name` is part of the baseline
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of scope entries in the baseline
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the baseline is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{hooks, log, RegistrationLimits};
    use std::time::Duration;

    const SOURCE: &str = r#"
        let greeting = "hello";
        let counter = 0;

        fn check(table, record) { record.ok == true }
        fn add(a, b) { a + b }
        fn init() { log::info("ready"); }

        hooks::register("before_create", "posts", Fn("check"));
    "#;

    fn load(source: &str) -> Result<ExecutionContext> {
        let options = SandboxOptions::default();
        let state = Arc::new(LoadState::new("demo", RegistrationLimits::default()));
        let mut builder = ContextBuilder::new("demo", &options).with_load_state(Arc::clone(&state));
        builder.bind(log::MODULE, log::table("demo"));
        builder.bind(hooks::MODULE, hooks::table(state));
        assert!(builder.freeze_module(log::MODULE));
        assert!(builder.freeze_module(hooks::MODULE));
        builder.load(source)
    }

    #[test]
    fn test_freeze_unknown_is_noop() {
        let mut builder = ContextBuilder::new("demo", &SandboxOptions::default());
        assert!(!builder.freeze_module("missing"));
    }

    #[test]
    fn test_load_and_call() {
        let mut ctx = load(SOURCE).unwrap();
        assert_eq!(ctx.registrations().hooks.len(), 1);
        assert!(ctx.has_fn("add"));
        assert!(!ctx.has_fn("nope"));

        let sum = ctx.call_fn("add", (2_i64, 3_i64)).unwrap();
        assert_eq!(sum.as_int().unwrap(), 5);

        let key = ctx.registrations().hooks[0].handler_key.clone();
        let mut record = rhai::Map::new();
        record.insert("ok".into(), Dynamic::TRUE);
        let accepted = ctx
            .call_handler(&key, ("posts".to_string(), record))
            .unwrap();
        assert!(accepted.as_bool().unwrap());

        assert!(matches!(
            ctx.call_handler("hook:99", ()),
            Err(ScriptError::HandlerNotFound { .. })
        ));
    }

    #[test]
    fn test_registration_in_init_rejected() {
        let err = load(
            r#"
            fn init() { hooks::register("before_create", "posts", || true); }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("top-level"));
    }

    #[test]
    fn test_compile_error() {
        assert!(matches!(
            load("let = ;"),
            Err(ScriptError::CompilationError { .. })
        ));
    }

    #[test]
    fn test_strip_globals() {
        let mut ctx = load(SOURCE).unwrap();
        let snapshot = NamespaceSnapshot::capture(&ctx);

        ctx.eval("let leaked = 1; counter = 5;").unwrap();
        assert!(ctx.global_names().contains(&"leaked".to_string()));

        assert_eq!(ctx.strip_globals(&snapshot), 1);
        assert!(!ctx.global_names().contains(&"leaked".to_string()));
        assert!(ctx.global_names().contains(&"greeting".to_string()));
        assert_eq!(ctx.eval("greeting").unwrap().into_string().unwrap(), "hello");
        assert_eq!(ctx.strip_globals(&snapshot), 0);
    }

    #[test]
    fn test_frozen_global_cannot_be_replaced() {
        let mut ctx = load(SOURCE).unwrap();
        assert!(ctx.is_healthy());
        assert!(ctx.eval("log = 1;").is_err());
        assert!(ctx.eval(r#"log["info"] = 1;"#).is_err());
        assert!(ctx.is_healthy());
    }

    #[test]
    fn test_health_detects_missing_capability() {
        let mut ctx = load(SOURCE).unwrap();
        ctx.scope_mut().clear();
        assert!(!ctx.is_healthy());
    }

    #[test]
    fn test_runaway_handler_times_out() {
        let mut ctx = load("fn spin() { let n = 0; loop { n += 1; } }").unwrap();
        ctx.bind(&CallContext::with_timeout(Duration::from_millis(20)));
        let err = ctx.call_fn("spin", ()).unwrap_err();
        assert!(err.is_timeout());
        ctx.reset();
        assert!(!ctx.is_bound());
    }
}
