//! `import` resolution restricted to a plugin's `lib/` directory

use crate::sandbox::SCRIPT_EXTENSION;
use parking_lot::RwLock;
use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Scope};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Directory under the plugin root holding importable modules
pub const LIB_DIR: &str = "lib";

/// Resolves `import "name"` to `<root>/lib/<name>.rhai`
///
/// Only simple identifiers are accepted. Resolved modules are cached by name.
#[derive(Debug)]
pub struct PluginModuleResolver {
    lib_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Module>>>,
}

impl PluginModuleResolver {
    /// Create a resolver for the plugin rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            lib_dir: root.as_ref().join(LIB_DIR),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached modules
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    fn module_path(&self, name: &str, pos: Position) -> Result<PathBuf, Box<EvalAltResult>> {
        if !is_simple_identifier(name) {
            return Err(argument_error(
                format!("invalid module name '{}': only simple identifiers may be imported", name),
                pos,
            ));
        }

        let path = self.lib_dir.join(format!("{}.{}", name, SCRIPT_EXTENSION));
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_file() => Ok(path),
            _ => Err(Box::new(EvalAltResult::ErrorModuleNotFound(
                name.to_string(),
                pos,
            ))),
        }
    }
}

impl ModuleResolver for PluginModuleResolver {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Arc<Module>, Box<EvalAltResult>> {
        if let Some(module) = self.cache.read().get(path) {
            return Ok(Arc::clone(module));
        }

        let file = self.module_path(path, pos)?;
        let code = std::fs::read_to_string(&file).map_err(|e| {
            argument_error(format!("failed to read module '{}': {}", path, e), pos)
        })?;

        let mut ast = engine.compile(code).map_err(|e| {
            Box::new(EvalAltResult::ErrorInModule(
                path.to_string(),
                Box::new(EvalAltResult::ErrorParsing(*e.0, e.1)),
                pos,
            ))
        })?;
        ast.set_source(path);

        let module = Module::eval_ast_as_new(Scope::new(), &ast, engine)
            .map_err(|e| Box::new(EvalAltResult::ErrorInModule(path.to_string(), e, pos)))?;
        let module = Arc::new(module);

        debug!(module = %path, file = %file.display(), "Plugin module loaded");
        self.cache
            .write()
            .insert(path.to_string(), Arc::clone(&module));

        Ok(module)
    }
}

fn argument_error(message: String, pos: Position) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(message.into(), pos))
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub(crate) fn is_simple_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn plugin_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(LIB_DIR)).unwrap();
        fs::write(
            dir.path().join(LIB_DIR).join("util.rhai"),
            "fn double(x) { x * 2 }",
        )
        .unwrap();
        fs::write(dir.path().join(LIB_DIR).join("broken.rhai"), "fn (").unwrap();
        dir
    }

    fn engine_for(root: &Path) -> (Engine, Arc<PluginModuleResolver>) {
        let resolver = Arc::new(PluginModuleResolver::new(root));
        let mut engine = Engine::new();
        engine.set_module_resolver(ResolverHandle(Arc::clone(&resolver)));
        (engine, resolver)
    }

    struct ResolverHandle(Arc<PluginModuleResolver>);

    impl ModuleResolver for ResolverHandle {
        fn resolve(
            &self,
            engine: &Engine,
            source: Option<&str>,
            path: &str,
            pos: Position,
        ) -> Result<Arc<Module>, Box<EvalAltResult>> {
            self.0.resolve(engine, source, path, pos)
        }
    }

    #[test]
    fn test_simple_identifier() {
        assert!(is_simple_identifier("util"));
        assert!(is_simple_identifier("_private2"));
        assert!(!is_simple_identifier("../secret"));
        assert!(!is_simple_identifier("a/b"));
        assert!(!is_simple_identifier("2fast"));
        assert!(!is_simple_identifier(""));
    }

    #[test]
    fn test_import_resolves_and_caches() {
        let root = plugin_root();
        let (engine, resolver) = engine_for(root.path());

        let result: i64 = engine
            .eval(r#"import "util" as u; u::double(21)"#)
            .unwrap();
        assert_eq!(result, 42);

        let _: i64 = engine.eval(r#"import "util" as u; u::double(1)"#).unwrap();
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_traversal_rejected() {
        let root = plugin_root();
        let (engine, _) = engine_for(root.path());
        let err = engine.run(r#"import "../util" as u;"#).unwrap_err();
        assert!(err.to_string().contains("invalid module name"));
    }

    #[test]
    fn test_missing_module() {
        let root = plugin_root();
        let (engine, _) = engine_for(root.path());
        assert!(engine.run(r#"import "nope" as n;"#).is_err());
    }

    #[test]
    fn test_load_error_propagates() {
        let root = plugin_root();
        let (engine, resolver) = engine_for(root.path());
        assert!(engine.run(r#"import "broken" as b;"#).is_err());
        assert_eq!(resolver.cached(), 0);
    }
}
