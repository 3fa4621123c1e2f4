//! `routes` capability: HTTP route registration
//!
//! Routes are captured here and served by the host's HTTP bridge.

use super::{capability_error, LoadState};
use crate::frozen::CapabilityTable;
use rhai::{Dynamic, EvalAltResult, FnPtr, ImmutableString, Map};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Module name
pub const MODULE: &str = "routes";

/// Maximum route path length
pub const MAX_PATH_LEN: usize = 256;

/// HTTP methods a route may be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl RouteMethod {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(RouteMethod::Get),
            "POST" => Ok(RouteMethod::Post),
            "PUT" => Ok(RouteMethod::Put),
            "PATCH" => Ok(RouteMethod::Patch),
            "DELETE" => Ok(RouteMethod::Delete),
            _ => Err(format!("unknown route method '{}'", s)),
        }
    }
}

/// A route registration captured during plugin load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRegistration {
    /// HTTP method
    pub method: RouteMethod,
    /// Path pattern, e.g. `/items/{id}`
    pub path: String,
    /// Served without authentication
    pub public: bool,
    /// Key of the handler in the context's handler table
    pub handler_key: String,
}

/// Build the `routes` table writing into `state`
pub fn table(state: Arc<LoadState>) -> CapabilityTable {
    let mut table = CapabilityTable::new();

    let s = Arc::clone(&state);
    let hash = table.module_mut().set_native_fn(
        "register",
        move |method: ImmutableString,
              path: ImmutableString,
              handler: FnPtr|
              -> Result<(), Box<EvalAltResult>> {
            register(&s, &method, &path, handler, &Dynamic::UNIT)
        },
    );
    table.record("register", hash);

    let s = state;
    let hash = table.module_mut().set_native_fn(
        "register",
        move |method: ImmutableString,
              path: ImmutableString,
              handler: FnPtr,
              options: Dynamic|
              -> Result<(), Box<EvalAltResult>> {
            register(&s, &method, &path, handler, &options)
        },
    );
    table.record("register", hash);

    table
}

fn register(
    state: &LoadState,
    method: &str,
    path: &str,
    handler: FnPtr,
    options: &Dynamic,
) -> Result<(), Box<EvalAltResult>> {
    let method = RouteMethod::from_str(method).map_err(capability_error)?;
    validate_path(path).map_err(capability_error)?;
    state.guard_phase("routes::register")?;

    let mut routes = state.routes.lock();
    if routes
        .iter()
        .any(|r| r.method == method && r.path == path)
    {
        return Err(capability_error(format!(
            "route {} {} is already registered",
            method, path
        )));
    }
    if routes.len() >= state.limits.max_routes {
        return Err(capability_error(format!(
            "plugin '{}' exceeded the route registration limit ({})",
            state.plugin, state.limits.max_routes
        )));
    }

    let public = options
        .read_lock::<Map>()
        .and_then(|map| map.get("public").and_then(|v| v.as_bool().ok()))
        .unwrap_or(false);
    let handler_key = state.store_handler("route", handler);

    debug!(
        plugin = %state.plugin,
        method = %method,
        path = %path,
        public = public,
        "Route registered"
    );

    routes.push(RouteRegistration {
        method,
        path: path.to_string(),
        public,
        handler_key,
    });

    Ok(())
}

/// Check a route path's shape
pub fn validate_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("route path '{}' must start with '/'", path));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(format!(
            "route path exceeds {} characters",
            MAX_PATH_LEN
        ));
    }
    if path.contains('?') || path.contains('#') {
        return Err(format!(
            "route path '{}' must not contain a query or fragment",
            path
        ));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(format!("route path '{}' must not contain '..'", path));
    }
    if let Some(c) = path.chars().find(|c| !is_path_char(*c)) {
        return Err(format!(
            "route path '{}' contains invalid character '{}'",
            path, c
        ));
    }
    Ok(())
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.' | ':' | '{' | '}' | '*')
}
