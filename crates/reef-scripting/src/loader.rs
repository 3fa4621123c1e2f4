//! Plugin loader: turns a plugin root into an execution-context factory

use crate::capabilities::{
    data, hooks, log, routes, DataSource, InMemoryDataSource, LoadState, RegistrationLimits,
    CAPABILITY_MODULES,
};
use crate::context::{ContextBuilder, ExecutionContext};
use crate::error::{Result, ScriptError};
use crate::sandbox::SandboxOptions;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Entry file under the plugin root
pub const ENTRY_FILE: &str = "main.rhai";

/// Produces fully loaded execution contexts for one plugin generation
pub trait ContextFactory: Send + Sync {
    /// Build a new context
    fn create(&self) -> Result<ExecutionContext>;
}

impl<F> ContextFactory for F
where
    F: Fn() -> Result<ExecutionContext> + Send + Sync,
{
    fn create(&self) -> Result<ExecutionContext> {
        self()
    }
}

/// Shared settings used to build plugin factories
#[derive(Debug, Clone)]
pub struct PluginLoader {
    options: SandboxOptions,
    limits: RegistrationLimits,
    data: Arc<dyn DataSource>,
}

impl PluginLoader {
    /// Loader with an empty in-memory data source
    pub fn new(options: SandboxOptions, limits: RegistrationLimits) -> Self {
        Self {
            options,
            limits,
            data: Arc::new(InMemoryDataSource::new()),
        }
    }

    /// Use `source` for the `data` capability
    pub fn with_data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.data = source;
        self
    }

    /// Sandbox options applied to every context
    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Read the plugin's entry file and return a factory for this generation
    pub fn factory(&self, plugin: &str, root: impl AsRef<Path>) -> Result<PluginFactory> {
        let entry = root.as_ref().join(ENTRY_FILE);
        let source = std::fs::read_to_string(&entry).map_err(|e| unreadable(&entry, e))?;
        Ok(self.factory_from_source(plugin, root, source))
    }

    /// Factory over an entry-file `source` already read from `root`
    pub fn factory_from_source(
        &self,
        plugin: &str,
        root: impl AsRef<Path>,
        source: String,
    ) -> PluginFactory {
        let root = root.as_ref().to_path_buf();
        info!(plugin = %plugin, root = %root.display(), bytes = source.len(), "Plugin source read");

        PluginFactory {
            plugin: plugin.to_string(),
            root,
            source: Arc::from(source),
            options: self.options.clone(),
            limits: self.limits,
            data: Arc::clone(&self.data),
        }
    }
}

/// Error for an entry file that cannot be read
pub fn unreadable(entry: &Path, e: std::io::Error) -> ScriptError {
    ScriptError::invalid_source(format!("cannot read {}: {}", entry.display(), e))
}

/// Builds contexts from one snapshot of a plugin's source
#[derive(Clone)]
pub struct PluginFactory {
    plugin: String,
    root: PathBuf,
    source: Arc<str>,
    options: SandboxOptions,
    limits: RegistrationLimits,
    data: Arc<dyn DataSource>,
}

impl PluginFactory {
    /// Plugin name
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Plugin root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContextFactory for PluginFactory {
    fn create(&self) -> Result<ExecutionContext> {
        let state = Arc::new(LoadState::new(&self.plugin, self.limits));

        let mut builder = ContextBuilder::new(&self.plugin, &self.options)
            .with_module_loader(&self.root)
            .with_load_state(Arc::clone(&state));

        builder
            .bind(log::MODULE, log::table(&self.plugin))
            .bind(data::MODULE, data::table(Arc::clone(&self.data)))
            .bind(hooks::MODULE, hooks::table(Arc::clone(&state)))
            .bind(routes::MODULE, routes::table(state));

        for module in CAPABILITY_MODULES {
            builder.freeze_module(module);
        }

        builder.load(&self.source)
    }
}

impl fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFactory")
            .field("plugin", &self.plugin)
            .field("root", &self.root)
            .field("source_len", &self.source.len())
            .finish()
    }
}
