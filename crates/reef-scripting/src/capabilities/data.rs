//! `data` capability: read-only record access
//!
//! Records cross the script boundary as JSON through `rhai::serde`.

use super::capability_error;
use crate::frozen::CapabilityTable;
use crate::module_loader::is_simple_identifier;
use dashmap::DashMap;
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, EvalAltResult, ImmutableString, Map};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Module name
pub const MODULE: &str = "data";

/// Host-provided record source
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Fetch one record by id
    fn get(&self, table: &str, id: &str) -> Result<Option<Value>, String>;

    /// Records whose fields equal every entry of `filter`
    fn find(&self, table: &str, filter: &serde_json::Map<String, Value>) -> Result<Vec<Value>, String>;
}

/// `DataSource` backed by in-process tables
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    tables: DashMap<String, BTreeMap<String, Value>>,
}

impl InMemoryDataSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn insert(&self, table: &str, id: &str, record: Value) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), record);
    }
}

impl DataSource for InMemoryDataSource {
    fn get(&self, table: &str, id: &str) -> Result<Option<Value>, String> {
        Ok(self
            .tables
            .get(table)
            .and_then(|records| records.get(id).cloned()))
    }

    fn find(&self, table: &str, filter: &serde_json::Map<String, Value>) -> Result<Vec<Value>, String> {
        let Some(records) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(records
            .values()
            .filter(|record| {
                filter
                    .iter()
                    .all(|(key, expected)| record.get(key) == Some(expected))
            })
            .cloned()
            .collect())
    }
}

/// Build the `data` table reading from `source`
pub fn table(source: Arc<dyn DataSource>) -> CapabilityTable {
    let mut table = CapabilityTable::new();

    let s = Arc::clone(&source);
    let hash = table.module_mut().set_native_fn(
        "get",
        move |name: ImmutableString, id: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            check_table(&name)?;
            let id = id.to_string();
            match s.get(&name, &id).map_err(capability_error)? {
                Some(record) => to_dynamic(record),
                None => Ok(Dynamic::UNIT),
            }
        },
    );
    table.record("get", hash);

    let s = source;
    let hash = table.module_mut().set_native_fn(
        "find",
        move |name: ImmutableString, filter: Map| -> Result<Dynamic, Box<EvalAltResult>> {
            check_table(&name)?;
            let filter = match from_dynamic::<Value>(&Dynamic::from_map(filter))? {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            let records = s.find(&name, &filter).map_err(capability_error)?;
            to_dynamic(records)
        },
    );
    table.record("find", hash);

    table
}

fn check_table(name: &str) -> Result<(), Box<EvalAltResult>> {
    if is_simple_identifier(name) {
        Ok(())
    } else {
        Err(capability_error(format!("invalid table name '{}'", name)))
    }
}
