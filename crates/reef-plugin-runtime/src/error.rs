//! Plugin runtime error types

use reef_scripting::ScriptError;
use std::fmt;

/// Execution-context pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No context became available in time, or the pool is not open
    #[error("Execution pool exhausted for plugin '{plugin}'")]
    Exhausted {
        /// Plugin name
        plugin: String,
    },

    /// The factory failed to build a context
    #[error("Failed to create execution context for plugin '{plugin}': {source}")]
    Create {
        /// Plugin name
        plugin: String,
        /// Underlying load error
        #[source]
        source: ScriptError,
    },
}

impl PoolError {
    /// Create an exhausted error
    pub fn exhausted(plugin: impl fmt::Display) -> Self {
        Self::Exhausted {
            plugin: plugin.to_string(),
        }
    }

    /// Whether this is back-pressure rather than a build failure
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Hook dispatch and approval errors
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// A before-hook vetoed the operation
    ///
    /// Carries only the hook identity; the handler's own message is logged.
    #[error("Operation rejected by plugin '{plugin}' hook {event} on '{table}'")]
    Rejected {
        /// Plugin name
        plugin: String,
        /// Event name
        event: String,
        /// Table the hook was registered for
        table: String,
    },

    /// No execution context could be checked out for a before-hook
    #[error("Hook handler unavailable for plugin '{plugin}'")]
    Unavailable {
        /// Plugin name
        plugin: String,
    },

    /// No durable row for the given hook
    #[error("Hook not found: {0}")]
    NotFound(String),

    /// The record could not be converted into a script value
    #[error("Invalid hook record: {0}")]
    InvalidRecord(String),

    /// Durable store failure
    #[error("Hook store error: {0}")]
    Store(#[from] reef_state::Error),
}

/// Plugin source checksum errors
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// More script files than allowed
    #[error("Plugin directory has more than {limit} script files")]
    TooManyFiles {
        /// File-count ceiling
        limit: usize,
    },

    /// Script files larger in total than allowed
    #[error("Plugin scripts exceed {limit} bytes")]
    TooLarge {
        /// Byte ceiling
        limit: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Plugin runtime error type
#[derive(Debug, thiserror::Error)]
pub enum PluginRuntimeError {
    /// Plugin not found
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// Plugin already exists
    #[error("Plugin already exists: {0}")]
    PluginAlreadyExists(String),

    /// Script load error
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Hook error
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Result type for plugin runtime operations
pub type Result<T> = std::result::Result<T, PluginRuntimeError>;

impl PluginRuntimeError {
    /// Create a new plugin not found error
    pub fn not_found(name: impl fmt::Display) -> Self {
        Self::PluginNotFound(name.to_string())
    }

    /// Create a new already exists error
    pub fn already_exists(name: impl fmt::Display) -> Self {
        Self::PluginAlreadyExists(name.to_string())
    }

    /// Create a new other error
    pub fn other(msg: impl fmt::Display) -> Self {
        Self::Other(msg.to_string())
    }
}
