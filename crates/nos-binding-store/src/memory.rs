//! Process-local binding store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::model::{BindingFilter, BindingKey, PortBinding};
use crate::store::BindingStore;

#[derive(Debug, Default)]
struct Table {
    next_id: u64,
    rows: BTreeMap<u64, PortBinding>,
}

impl Table {
    fn contains_key(&self, key: &BindingKey, except: Option<u64>) -> bool {
        self.rows
            .values()
            .any(|row| Some(row.binding_id) != except && row.key() == *key)
    }
}

/// In-memory [`BindingStore`]; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBindingStore {
    table: RwLock<Table>,
}

impl MemoryBindingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every row, for inspection in tests.
    pub async fn snapshot(&self) -> Vec<PortBinding> {
        self.table.read().await.rows.values().cloned().collect()
    }

    /// Inserts a row as-is, bypassing uniqueness checks.
    ///
    /// Used to seed rows from older schema revisions.
    pub async fn seed(&self, row: PortBinding) {
        let mut table = self.table.write().await;
        table.next_id = table.next_id.max(row.binding_id);
        table.rows.insert(row.binding_id, row);
    }
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn insert(&self, key: &BindingKey) -> StoreResult<PortBinding> {
        let mut table = self.table.write().await;
        if table.contains_key(key, None) {
            return Err(StoreError::Duplicate {
                binding: key.to_string(),
            });
        }
        table.next_id += 1;
        let row = PortBinding::from_key(table.next_id, key);
        table.rows.insert(row.binding_id, row.clone());
        Ok(row)
    }

    async fn find(&self, filter: &BindingFilter) -> StoreResult<Vec<PortBinding>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn delete(&self, rows: &[PortBinding]) -> StoreResult<()> {
        let mut table = self.table.write().await;
        for row in rows {
            table.rows.remove(&row.binding_id);
        }
        Ok(())
    }

    async fn replace(&self, row: &PortBinding) -> StoreResult<()> {
        let mut table = self.table.write().await;
        if !table.rows.contains_key(&row.binding_id) {
            return Err(StoreError::NotFound {
                filters: format!("binding_id={}", row.binding_id),
            });
        }
        if table.contains_key(&row.key(), Some(row.binding_id)) {
            return Err(StoreError::Duplicate {
                binding: row.key().to_string(),
            });
        }
        table.rows.insert(row.binding_id, row.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(port: &str, vlan: u16, switch: &str, vm: &str) -> BindingKey {
        BindingKey::new(port, vlan, switch, vm)
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let store = MemoryBindingStore::new();
        store
            .add_binding(&key("port:10", 100, "10.0.0.1", "vm-1"))
            .await
            .unwrap();
        store
            .add_binding(&key("port:11", 100, "10.0.0.1", "vm-2"))
            .await
            .unwrap();
        store
            .add_binding(&key("port:10", 200, "10.0.0.1", "vm-3"))
            .await
            .unwrap();

        assert_eq!(store.get_vlan_bindings(100, "10.0.0.1").await.unwrap().len(), 2);
        assert_eq!(
            store
                .get_port_switch_bindings("port:10", "10.0.0.1")
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(store.get_vm_bindings(200, "vm-3").await.unwrap().len(), 1);
        assert_eq!(
            store
                .get_port_vlan_switch_bindings("port:11", 100, "10.0.0.1")
                .await
                .unwrap()[0]
                .instance_id,
            "vm-2"
        );
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let store = MemoryBindingStore::new();
        let k = key("port:10", 100, "10.0.0.1", "vm-1");
        store.add_binding(&k).await.unwrap();
        assert!(matches!(
            store.add_binding(&k).await,
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_not_found_lookups() {
        let store = MemoryBindingStore::new();
        assert!(store
            .get_vlan_bindings(100, "10.0.0.1")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store
            .remove_binding(&key("port:10", 100, "10.0.0.1", "vm-1"))
            .await
            .unwrap_err()
            .is_not_found());
        // Interface lookups report an empty list instead.
        assert!(store
            .get_port_switch_bindings("port:10", "10.0.0.1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_remove_binding() {
        let store = MemoryBindingStore::new();
        let k = key("port:10", 100, "10.0.0.1", "vm-1");
        store.add_binding(&k).await.unwrap();
        let removed = store.remove_binding(&k).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_process_binding_flips_once() {
        let store = MemoryBindingStore::new();
        let k = key("port:10", 100, "10.0.0.1", "vm-1");
        store.add_binding(&k).await.unwrap();

        let row = store.process_binding(&k).await.unwrap();
        assert!(row.processed);
        assert!(store.get_port_binding(&k).await.unwrap()[0].processed);

        // Nothing unprocessed is left for this key.
        assert!(store.process_binding(&k).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_binding_vlan() {
        let store = MemoryBindingStore::new();
        store
            .add_binding(&key("port:10", 100, "10.0.0.1", "vm-1"))
            .await
            .unwrap();

        assert_eq!(store.update_binding_vlan("port:10", None).await.unwrap(), None);
        assert_eq!(store.snapshot().await[0].vlan_id, 100);

        let row = store
            .update_binding_vlan("port:10", Some(300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.vlan_id, 300);
        assert_eq!(store.get_vlan_bindings(300, "10.0.0.1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_binding_vlan_ambiguous() {
        let store = MemoryBindingStore::new();
        store
            .add_binding(&key("port:10", 100, "10.0.0.1", "vm-1"))
            .await
            .unwrap();
        store
            .add_binding(&key("port:10", 100, "10.0.0.1", "vm-2"))
            .await
            .unwrap();
        assert!(matches!(
            store.update_binding_vlan("port:10", Some(300)).await,
            Err(StoreError::Ambiguous { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_seeded_rows_keep_ids_unique() {
        let store = MemoryBindingStore::new();
        let mut legacy = PortBinding::from_key(41, &key("port:1", 10, "10.0.0.9", "vm-0"));
        legacy.processed = false;
        store.seed(legacy).await;
        let row = store
            .add_binding(&key("port:2", 10, "10.0.0.9", "vm-1"))
            .await
            .unwrap();
        assert_eq!(row.binding_id, 42);
    }
}
