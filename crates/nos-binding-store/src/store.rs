//! The binding store trait.
//!
//! Backends implement four primitives (`insert`, `find`, `delete`,
//! `set_fields`); the named lookups used by the engine and the drivers
//! are provided methods on top of them so that every backend shares the
//! same not-found and uniqueness semantics.

use async_trait::async_trait;
use nos_fabric_common::VlanId;
use tracing::{debug, instrument, warn};

use crate::error::{StoreError, StoreResult};
use crate::model::{BindingFilter, BindingKey, PortBinding};

/// Durable table of port/VLAN/switch/instance bindings.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Inserts a new unprocessed row.
    ///
    /// Fails with [`StoreError::Duplicate`] if the 4-tuple exists.
    async fn insert(&self, key: &BindingKey) -> StoreResult<PortBinding>;

    /// Returns every row matching the filter, ordered by binding id.
    async fn find(&self, filter: &BindingFilter) -> StoreResult<Vec<PortBinding>>;

    /// Deletes the given rows by binding id.
    async fn delete(&self, rows: &[PortBinding]) -> StoreResult<()>;

    /// Rewrites one row in place, keeping its binding id.
    ///
    /// Fails with [`StoreError::Duplicate`] if the new 4-tuple collides
    /// with another row.
    async fn replace(&self, row: &PortBinding) -> StoreResult<()>;

    /// Adds a binding.
    #[instrument(skip(self), fields(binding = %key))]
    async fn add_binding(&self, key: &BindingKey) -> StoreResult<PortBinding> {
        let row = self.insert(key).await?;
        debug!(binding_id = row.binding_id, "Added port binding");
        Ok(row)
    }

    /// Removes the binding with this exact 4-tuple and returns it.
    #[instrument(skip(self), fields(binding = %key))]
    async fn remove_binding(&self, key: &BindingKey) -> StoreResult<Vec<PortBinding>> {
        let rows = self.lookup_all(&key.filter()).await?;
        self.delete(&rows).await?;
        debug!(count = rows.len(), "Removed port binding");
        Ok(rows)
    }

    /// Returns the binding with this exact 4-tuple.
    async fn get_port_binding(&self, key: &BindingKey) -> StoreResult<Vec<PortBinding>> {
        self.lookup_all(&key.filter()).await
    }

    /// Returns every binding of a VLAN on a switch.
    async fn get_vlan_bindings(
        &self,
        vlan_id: VlanId,
        switch_ip: &str,
    ) -> StoreResult<Vec<PortBinding>> {
        self.lookup_all(&BindingFilter::new().vlan_id(vlan_id).switch_ip(switch_ip))
            .await
    }

    /// Returns every binding of a workload on a VLAN, across switches.
    async fn get_vm_bindings(
        &self,
        vlan_id: VlanId,
        instance_id: &str,
    ) -> StoreResult<Vec<PortBinding>> {
        self.lookup_all(&BindingFilter::new().vlan_id(vlan_id).instance_id(instance_id))
            .await
    }

    /// Returns every binding of a VLAN on one switch interface.
    async fn get_port_vlan_switch_bindings(
        &self,
        port_id: &str,
        vlan_id: VlanId,
        switch_ip: &str,
    ) -> StoreResult<Vec<PortBinding>> {
        self.lookup_all(
            &BindingFilter::new()
                .port_id(port_id)
                .vlan_id(vlan_id)
                .switch_ip(switch_ip),
        )
        .await
    }

    /// Returns every binding on one switch interface.
    ///
    /// An interface without bindings yields an empty list, not an error.
    async fn get_port_switch_bindings(
        &self,
        port_id: &str,
        switch_ip: &str,
    ) -> StoreResult<Vec<PortBinding>> {
        self.find(&BindingFilter::new().port_id(port_id).switch_ip(switch_ip))
            .await
    }

    /// Moves the single binding of `port_id` to a new VLAN.
    ///
    /// Without a VLAN this logs a warning and changes nothing.
    #[instrument(skip(self))]
    async fn update_binding_vlan(
        &self,
        port_id: &str,
        new_vlan_id: Option<VlanId>,
    ) -> StoreResult<Option<PortBinding>> {
        let Some(vlan_id) = new_vlan_id else {
            warn!(port_id, "Binding VLAN update requested without a VLAN");
            return Ok(None);
        };

        let mut row = self.lookup_one(&BindingFilter::new().port_id(port_id)).await?;
        row.vlan_id = vlan_id;
        self.replace(&row).await?;
        debug!(binding_id = row.binding_id, vlan_id, "Updated binding VLAN");
        Ok(Some(row))
    }

    /// Marks the unprocessed binding with this 4-tuple as processed.
    #[instrument(skip(self), fields(binding = %key))]
    async fn process_binding(&self, key: &BindingKey) -> StoreResult<PortBinding> {
        let mut row = self.lookup_one(&key.filter().processed(false)).await?;
        row.processed = true;
        self.replace(&row).await?;
        debug!(binding_id = row.binding_id, "Marked binding processed");
        Ok(row)
    }

    /// Like `find`, but an empty result is [`StoreError::NotFound`].
    async fn lookup_all(&self, filter: &BindingFilter) -> StoreResult<Vec<PortBinding>> {
        let rows = self.find(filter).await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound {
                filters: filter.to_string(),
            });
        }
        Ok(rows)
    }

    /// Returns the single row matching the filter.
    async fn lookup_one(&self, filter: &BindingFilter) -> StoreResult<PortBinding> {
        let mut rows = self.lookup_all(filter).await?;
        if rows.len() > 1 {
            return Err(StoreError::Ambiguous {
                filters: filter.to_string(),
                count: rows.len(),
            });
        }
        Ok(rows.remove(0))
    }
}
