//! Merged hook entries and their dispatch order

use reef_scripting::capabilities::hooks::WILDCARD_TABLE;
use reef_scripting::{HookEvent, HookRegistration};
use reef_state::HookKey;
use serde::Serialize;
use std::cmp::Ordering;

/// One plugin subscription in the merged registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookEntry {
    /// Owning plugin
    pub plugin: String,
    /// Subscribed event
    pub event: HookEvent,
    /// Table name or `*`
    pub table: String,
    /// Priority, lower runs first
    pub priority: i64,
    /// Matches every table
    pub wildcard: bool,
    /// Rank of the owning plugin, assigned when it first registers
    pub rank: u64,
    /// Position among the plugin's own registrations
    pub order: u64,
    /// Handler key resolved against whichever context is checked out
    pub handler_key: String,
}

impl HookEntry {
    /// Build an entry from a pending registration
    pub fn from_registration(
        plugin: &str,
        registration: &HookRegistration,
        rank: u64,
        order: u64,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            event: registration.event,
            table: registration.table.clone(),
            priority: registration.priority,
            wildcard: registration.is_wildcard(),
            rank,
            order,
            handler_key: registration.handler_key.clone(),
        }
    }

    /// Whether the entry subscribes to `event` on `table`
    pub fn matches(&self, event: HookEvent, table: &str) -> bool {
        self.event == event && (self.wildcard || self.table == table)
    }

    /// Durable approval key
    pub fn key(&self) -> HookKey {
        let table = if self.wildcard {
            WILDCARD_TABLE
        } else {
            self.table.as_str()
        };
        HookKey::new(&self.plugin, self.event.as_str(), table)
    }

    /// Priority ascending, exact before wildcard, then plugin rank and
    /// registration order within the plugin
    pub fn dispatch_cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.wildcard, self.rank, self.order).cmp(&(
            other.priority,
            other.wildcard,
            other.rank,
            other.order,
        ))
    }
}
