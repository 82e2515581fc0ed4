//! Inventory business logic - item counts per user.

use crate::core::{decode_or_default, encode};
use crate::errors::{Error, Result};
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::instrument;

/// Collection holding one inventory per user id.
pub const COLLECTION: &str = "inventory";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Item name to count. Items with a zero count are removed.
    #[serde(default)]
    pub items: BTreeMap<String, u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Inventory {
    #[must_use]
    pub fn count(&self, item: &str) -> u64 {
        self.items.get(item).copied().unwrap_or(0)
    }
}

pub async fn get_inventory(store: &RecordStore, user_id: &str) -> Result<Inventory> {
    let record = store.get(COLLECTION, user_id).await?;
    decode_or_default(record.as_ref())
}

/// Adds `quantity` of `item` to a user's inventory.
#[instrument(skip(store))]
pub async fn add_item(
    store: &RecordStore,
    user_id: &str,
    item: &str,
    quantity: u64,
) -> Result<Inventory> {
    if quantity == 0 {
        return Err(Error::InvalidAmount { amount: 0.0 });
    }
    let item = normalize_item_name(item)?;

    modify_inventory(store, user_id, move |inventory| {
        let count = inventory.items.entry(item).or_insert(0);
        *count = count.saturating_add(quantity);
        Ok(())
    })
    .await
}

/// Takes `quantity` of `item` out of a user's inventory.
#[instrument(skip(store))]
pub async fn remove_item(
    store: &RecordStore,
    user_id: &str,
    item: &str,
    quantity: u64,
) -> Result<Inventory> {
    if quantity == 0 {
        return Err(Error::InvalidAmount { amount: 0.0 });
    }
    let item = normalize_item_name(item)?;

    modify_inventory(store, user_id, move |inventory| {
        let have = inventory.count(&item);
        if have == 0 {
            return Err(Error::ItemNotFound { name: item });
        }
        if have < quantity {
            return Err(Error::InsufficientQuantity {
                name: item,
                have,
                requested: quantity,
            });
        }
        if have == quantity {
            inventory.items.remove(&item);
        } else {
            inventory.items.insert(item, have - quantity);
        }
        Ok(())
    })
    .await
}

// Item names are matched case-insensitively, as users type them.
fn normalize_item_name(item: &str) -> Result<String> {
    let name = item.trim().to_lowercase();
    if name.is_empty() {
        return Err(Error::ItemNotFound {
            name: item.to_string(),
        });
    }
    Ok(name)
}

async fn modify_inventory<F>(store: &RecordStore, user_id: &str, change: F) -> Result<Inventory>
where
    F: FnOnce(&mut Inventory) -> Result<()> + Send + 'static,
{
    let record = store
        .try_update(COLLECTION, user_id, Value::Null, move |record| {
            let mut inventory: Inventory = if record.is_null() {
                Inventory::default()
            } else {
                serde_json::from_value(record)?
            };
            change(&mut inventory)?;
            encode(&inventory)
        })
        .await?;
    decode_or_default(Some(&record))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::{init_test_tracing, setup_test_store};

    #[tokio::test]
    async fn test_add_and_remove_items() -> Result<()> {
        init_test_tracing();
        let (_dir, store) = setup_test_store().await;

        add_item(&store, "u1", "Apple", 3).await?;
        let inventory = add_item(&store, "u1", " apple ", 2).await?;
        assert_eq!(inventory.count("apple"), 5);

        let inventory = remove_item(&store, "u1", "APPLE", 5).await?;
        assert_eq!(inventory.count("apple"), 0);
        assert!(inventory.items.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_errors_leave_inventory_alone() -> Result<()> {
        init_test_tracing();
        let (_dir, store) = setup_test_store().await;
        add_item(&store, "u1", "sword", 1).await?;

        let err = remove_item(&store, "u1", "shield", 1).await.unwrap_err();
        assert!(matches!(err, Error::ItemNotFound { .. }));

        let err = remove_item(&store, "u1", "sword", 2).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientQuantity {
                have: 1,
                requested: 2,
                ..
            }
        ));

        assert_eq!(get_inventory(&store, "u1").await?.count("sword"), 1);
        assert_eq!(store.revision(COLLECTION).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_legacy_records_are_readable() -> Result<()> {
        init_test_tracing();
        let (dir, store) = setup_test_store().await;
        std::fs::write(
            dir.path().join("inventory.json"),
            r#"[{"id": "u1", "items": {"potion": 2}, "amount": 5}]"#,
        )?;

        let inventory = get_inventory(&store, "u1").await?;
        assert_eq!(inventory.count("potion"), 2);
        assert_eq!(inventory.extra.get("amount"), Some(&Value::from(5)));
        Ok(())
    }
}
