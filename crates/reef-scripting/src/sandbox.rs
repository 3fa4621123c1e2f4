//! Restricted Rhai engine construction and the cooperative execution deadline

use crate::error::{CANCELLED_TOKEN, DEADLINE_TOKEN};
use parking_lot::Mutex;
use rhai::packages::{
    ArithmeticPackage, BasicArrayPackage, BasicFnPackage, BasicIteratorPackage,
    BasicMapPackage, BasicMathPackage, BasicStringPackage, LanguageCorePackage, LogicPackage,
    MoreStringPackage, Package,
};
use rhai::{Dynamic, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Symbols disabled in every sandbox because they execute arbitrary code
pub const FORBIDDEN_SYMBOLS: &[&str] = &["eval"];

/// Extension of plugin script files
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Sandbox options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOptions {
    /// Load the iterator/generator package (`range`, custom iteration)
    #[serde(default)]
    pub allow_cooperative_multitasking: bool,

    /// Deadline applied to every execution unless the caller binds its own
    #[serde(default = "default_exec_deadline", with = "humantime_serde")]
    pub exec_deadline: Duration,

    /// Maximum string size in bytes
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Maximum array / map size
    #[serde(default = "default_max_collection_size")]
    pub max_collection_size: usize,
}

fn default_exec_deadline() -> Duration {
    Duration::from_secs(5)
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_max_collection_size() -> usize {
    10_000
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            allow_cooperative_multitasking: false,
            exec_deadline: default_exec_deadline(),
            max_string_size: default_max_string_size(),
            max_collection_size: default_max_collection_size(),
        }
    }
}

/// Caller-supplied execution bounds bound to a context while it is checked out
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallContext {
    /// No caller deadline; the sandbox default applies
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Set an absolute deadline
    pub fn deadline(mut self, at: Instant) -> Self {
        self.deadline = Some(at);
        self
    }

    /// Attach a cancellation token
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Absolute deadline, if any
    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }
}

#[derive(Debug, Default)]
struct Binding {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

/// Deadline and cancellation state checked by the engine's progress callback
#[derive(Debug)]
pub struct ExecControl {
    default_deadline: Duration,
    binding: Mutex<Binding>,
}

impl ExecControl {
    pub(crate) fn new(default_deadline: Duration) -> Arc<Self> {
        Arc::new(Self {
            default_deadline,
            binding: Mutex::new(Binding::default()),
        })
    }

    /// Bind a caller's deadline/cancellation; the earlier of the caller deadline
    /// and the default deadline wins
    pub fn bind(&self, call: &CallContext) {
        let default_at = Instant::now() + self.default_deadline;
        let deadline = match call.deadline {
            Some(at) if at < default_at => at,
            _ => default_at,
        };
        let mut binding = self.binding.lock();
        binding.deadline = Some(deadline);
        binding.cancel = call.cancel.clone();
    }

    /// Arm only the default deadline, used for load-time execution
    pub(crate) fn arm_default(&self) {
        self.bind(&CallContext::new());
    }

    /// Detach any bound deadline/cancellation
    pub fn detach(&self) {
        *self.binding.lock() = Binding::default();
    }

    /// Whether a deadline or token is currently bound
    pub fn is_bound(&self) -> bool {
        let binding = self.binding.lock();
        binding.deadline.is_some() || binding.cancel.is_some()
    }

    fn check(&self) -> Option<Dynamic> {
        let binding = self.binding.lock();
        if binding
            .cancel
            .as_ref()
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
        {
            return Some(Dynamic::from(CANCELLED_TOKEN));
        }
        match binding.deadline {
            Some(at) if Instant::now() >= at => Some(Dynamic::from(DEADLINE_TOKEN)),
            _ => None,
        }
    }
}

/// Build an engine exposing only the allow-listed facility subset
pub fn build_sandbox(plugin: &str, options: &SandboxOptions, control: Arc<ExecControl>) -> Engine {
    let mut engine = Engine::new_raw();

    // Control flow/errors, tables and strings, math
    engine.register_global_module(LanguageCorePackage::new().as_shared_module());
    engine.register_global_module(LogicPackage::new().as_shared_module());
    engine.register_global_module(ArithmeticPackage::new().as_shared_module());
    engine.register_global_module(BasicMathPackage::new().as_shared_module());
    engine.register_global_module(BasicStringPackage::new().as_shared_module());
    engine.register_global_module(MoreStringPackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.register_global_module(BasicFnPackage::new().as_shared_module());

    if options.allow_cooperative_multitasking {
        engine.register_global_module(BasicIteratorPackage::new().as_shared_module());
    }

    for symbol in FORBIDDEN_SYMBOLS {
        engine.disable_symbol(*symbol);
    }

    engine.set_max_expr_depths(64, 32);
    engine.set_max_string_size(options.max_string_size);
    engine.set_max_array_size(options.max_collection_size);
    engine.set_max_map_size(options.max_collection_size);
    engine.set_max_call_levels(64);

    let print_plugin = plugin.to_string();
    engine.on_print(move |msg| {
        info!(plugin = %print_plugin, script_log = msg, "plugin print");
    });
    let debug_plugin = plugin.to_string();
    engine.on_debug(move |msg, _source, pos| {
        debug!(plugin = %debug_plugin, script_log = msg, position = %pos, "plugin debug");
    });

    engine.on_progress(move |_ops| control.check());

    engine
}
