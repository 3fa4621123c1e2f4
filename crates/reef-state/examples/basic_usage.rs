//! Basic usage of the in-memory hook store

use reef_state::{HookKey, HookRegistrationRow, HookStore, InMemoryHookStore, Result};

fn registration(event: &str, table: &str, priority: i64) -> HookRegistrationRow {
    HookRegistrationRow {
        event: event.to_string(),
        table_name: table.to_string(),
        priority,
        wildcard: table == "*",
        handler: format!("{event}_{}", table.replace('*', "any")),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let store = InMemoryHookStore::new();

    println!("=== Register ===");
    let outcome = store
        .upsert_hook_registrations(
            "audit",
            "1.0.0",
            &[
                registration("before_create", "orders", 100),
                registration("after_update", "*", 500),
            ],
        )
        .await?;
    println!("rows written: {}, revoked: {}", outcome.rows, outcome.revoked);

    println!("\n=== Approve ===");
    let key = HookKey::new("audit", "before_create", "orders");
    store.set_approval(&key, true, "ops@example.com").await?;
    for row in store.list_plugin_hooks("audit").await? {
        println!("{} eligible={}", row.key(), row.is_eligible());
    }

    println!("\n=== Same version keeps approval ===");
    store
        .upsert_hook_registrations("audit", "1.0.0", &[registration("before_create", "orders", 50)])
        .await?;
    for row in store.list_plugin_hooks("audit").await? {
        println!("{} priority={} eligible={}", row.key(), row.priority, row.is_eligible());
    }

    println!("\n=== New version revokes ===");
    let outcome = store
        .upsert_hook_registrations("audit", "1.1.0", &[registration("before_create", "orders", 50)])
        .await?;
    println!("revoked: {}", outcome.revoked);

    println!("\n=== Orphan cleanup ===");
    let removed = store.cleanup_orphaned_hooks(&["billing".to_string()]).await?;
    println!("removed {removed} rows, {} left", store.len());

    Ok(())
}
