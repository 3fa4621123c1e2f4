//! `log` capability: structured logging from plugin code

use crate::frozen::CapabilityTable;
use rhai::{Dynamic, EvalAltResult};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Module name
pub const MODULE: &str = "log";

/// Build the `log` table for `plugin`
pub fn table(plugin: &str) -> CapabilityTable {
    let mut table = CapabilityTable::new();
    let plugin: Arc<str> = Arc::from(plugin);

    let p = Arc::clone(&plugin);
    let hash = table.module_mut().set_native_fn(
        "debug",
        move |msg: Dynamic| -> Result<(), Box<EvalAltResult>> {
            debug!(plugin = %p, script_log = %msg, "plugin log");
            Ok(())
        },
    );
    table.record("debug", hash);

    let p = Arc::clone(&plugin);
    let hash = table.module_mut().set_native_fn(
        "info",
        move |msg: Dynamic| -> Result<(), Box<EvalAltResult>> {
            info!(plugin = %p, script_log = %msg, "plugin log");
            Ok(())
        },
    );
    table.record("info", hash);

    let p = Arc::clone(&plugin);
    let hash = table.module_mut().set_native_fn(
        "warn",
        move |msg: Dynamic| -> Result<(), Box<EvalAltResult>> {
            warn!(plugin = %p, script_log = %msg, "plugin log");
            Ok(())
        },
    );
    table.record("warn", hash);

    let p = plugin;
    let hash = table.module_mut().set_native_fn(
        "error",
        move |msg: Dynamic| -> Result<(), Box<EvalAltResult>> {
            error!(plugin = %p, script_log = %msg, "plugin log");
            Ok(())
        },
    );
    table.record("error", hash);

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frozen::FrozenModule;
    use rhai::Engine;

    #[test]
    fn test_log_functions_callable() {
        let frozen = FrozenModule::new(MODULE, table("demo"));
        let mut engine = Engine::new();
        engine.register_static_module(MODULE, frozen.backing());

        engine
            .run(r#"log::debug("d"); log::info("i"); log::warn(42); log::error("e");"#)
            .unwrap();

        for name in ["debug", "info", "warn", "error"] {
            assert!(frozen.contains(name), "missing {name}");
        }
        assert!(frozen.is_intact());
    }
}
