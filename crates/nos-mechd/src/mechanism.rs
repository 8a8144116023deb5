//! NosMechanism - reconciles port events onto the switches a host is cabled to

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

use nos_binding_store::{BindingFilter, BindingKey, BindingStore, PortBinding, StoreError};
use nos_drivers::NosDriver;
use nos_fabric_common::{
    AgentConfig, FabricError, FabricResult, HostConnection, Port, PortContext, Segment,
    SwitchInventory, VlanId,
};

/// The workload attachment an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub vlan_id: VlanId,
    pub device_id: String,
    pub host_id: String,
}

/// What an update event asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Put the workload's VLAN on the host's switch ports
    Bind(Attachment),
    /// Take it off again
    Unbind(Attachment),
}

/// NosMechanism turns port lifecycle events into switch changes
///
/// Event flow:
/// 1. precommit records or removes bindings in the store
/// 2. postcommit compares the bindings left per switch and decides between
///    create-and-trunk, trunk only, remove from trunk and delete VLAN
/// 3. the driver (normally a `DriverSelector`) pushes each change
///
/// `update_port` and `delete_port` run both phases while holding the lock
/// of every switch the host is cabled to.
pub struct NosMechanism {
    inventory: Arc<SwitchInventory>,
    store: Arc<dyn BindingStore>,
    driver: Arc<dyn NosDriver>,
    vlan_name_prefix: String,
    managed_physical_network: Option<String>,
    switch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NosMechanism {
    /// Creates the engine.
    pub fn new(
        inventory: Arc<SwitchInventory>,
        store: Arc<dyn BindingStore>,
        driver: Arc<dyn NosDriver>,
        agent: &AgentConfig,
    ) -> Self {
        Self {
            inventory,
            store,
            driver,
            vlan_name_prefix: agent.vlan_name_prefix.clone(),
            managed_physical_network: agent.managed_physical_network.clone(),
            switch_locks: DashMap::new(),
        }
    }

    /// Name given to a VLAN created on a switch.
    pub fn vlan_name(&self, vlan_id: VlanId) -> String {
        format!("{}{}", self.vlan_name_prefix, vlan_id)
    }

    /// Extracts the attachment, failing with the list of missing fields.
    pub fn attachment(&self, port: &Port, segment: Option<&Segment>) -> FabricResult<Attachment> {
        let vlan_id =
            segment.and_then(|s| s.managed_vlan(self.managed_physical_network.as_deref()));
        let device_id = port.device_id.as_deref().filter(|id| !id.is_empty());
        let host_id = port.host_id.as_deref().filter(|id| !id.is_empty());

        match (vlan_id, device_id, host_id) {
            (Some(vlan_id), Some(device_id), Some(host_id)) => Ok(Attachment {
                vlan_id,
                device_id: device_id.to_string(),
                host_id: host_id.to_string(),
            }),
            _ => {
                let mut missing = Vec::new();
                if vlan_id.is_none() {
                    missing.push("vlan_id");
                }
                if device_id.is_none() {
                    missing.push("device_id");
                }
                if host_id.is_none() {
                    missing.push("host_id");
                }
                Err(FabricError::MissingRequiredFields {
                    fields: missing.join(" "),
                })
            }
        }
    }

    /// Decides what an update event means for the switches.
    ///
    /// A migration tears down the original attachment. Otherwise only
    /// active compute ports are bound.
    pub fn update_intent(&self, ctx: &PortContext) -> FabricResult<Option<Intent>> {
        if ctx.is_migration() {
            let unbound = Port::default();
            let original = ctx.original.as_ref().unwrap_or(&unbound);
            return Ok(Some(Intent::Unbind(
                self.attachment(original, ctx.original_segment.as_ref())?,
            )));
        }
        if ctx.current.is_compute() && ctx.current.is_active() {
            return Ok(Some(Intent::Bind(
                self.attachment(&ctx.current, ctx.segment.as_ref())?,
            )));
        }
        Ok(None)
    }

    fn delete_attachment(&self, ctx: &PortContext) -> FabricResult<Option<Attachment>> {
        if !ctx.current.is_compute() {
            return Ok(None);
        }
        self.attachment(&ctx.current, ctx.segment.as_ref()).map(Some)
    }

    /// Records the bindings of an update.
    #[instrument(skip(self, ctx), fields(port = %ctx.current.id))]
    pub async fn update_port_precommit(&self, ctx: &PortContext) -> FabricResult<()> {
        match self.update_intent(ctx)? {
            Some(Intent::Bind(attachment)) => self.record_bindings(&attachment).await,
            Some(Intent::Unbind(attachment)) => self.forget_bindings(&attachment).await,
            None => Ok(()),
        }
    }

    /// Pushes an update to the switches.
    ///
    /// If a bind fails, its bindings that never reached a switch are
    /// dropped again before the error is returned.
    #[instrument(skip(self, ctx), fields(port = %ctx.current.id))]
    pub async fn update_port_postcommit(&self, ctx: &PortContext) -> FabricResult<()> {
        match self.update_intent(ctx)? {
            Some(Intent::Bind(attachment)) => {
                if let Err(err) = self.configure_switches(&attachment).await {
                    self.discard_unprocessed(&attachment).await;
                    return Err(err);
                }
                Ok(())
            }
            Some(Intent::Unbind(attachment)) => self.deconfigure_switches(&attachment).await,
            None => Ok(()),
        }
    }

    /// Removes the bindings of a deleted port.
    #[instrument(skip(self, ctx), fields(port = %ctx.current.id))]
    pub async fn delete_port_precommit(&self, ctx: &PortContext) -> FabricResult<()> {
        match self.delete_attachment(ctx)? {
            Some(attachment) => self.forget_bindings(&attachment).await,
            None => Ok(()),
        }
    }

    /// Removes a deleted port's VLAN from the switches.
    #[instrument(skip(self, ctx), fields(port = %ctx.current.id))]
    pub async fn delete_port_postcommit(&self, ctx: &PortContext) -> FabricResult<()> {
        match self.delete_attachment(ctx)? {
            Some(attachment) => self.deconfigure_switches(&attachment).await,
            None => Ok(()),
        }
    }

    /// Handles an update event end to end.
    pub async fn update_port(&self, ctx: &PortContext) -> FabricResult<()> {
        let host = if ctx.is_migration() {
            ctx.original_host()
        } else {
            ctx.host()
        };
        let _guards = self.lock_switches(host).await;
        self.update_port_precommit(ctx).await?;
        self.update_port_postcommit(ctx).await
    }

    /// Handles a delete event end to end.
    pub async fn delete_port(&self, ctx: &PortContext) -> FabricResult<()> {
        let _guards = self.lock_switches(ctx.host()).await;
        self.delete_port_precommit(ctx).await?;
        self.delete_port_postcommit(ctx).await
    }

    /// Locks every switch the host is cabled to, in address order.
    ///
    /// An unknown host locks nothing; the hooks report it.
    async fn lock_switches(&self, host: Option<&str>) -> Vec<OwnedMutexGuard<()>> {
        let mut switches: Vec<String> = host
            .and_then(|host| self.inventory.host_connections(host).ok())
            .map(|conns| conns.into_iter().map(|c| c.switch_ip).collect())
            .unwrap_or_default();
        switches.sort();
        switches.dedup();

        let mut guards = Vec::with_capacity(switches.len());
        for switch in switches {
            let lock = self.switch_locks.entry(switch).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    #[instrument(skip(self))]
    async fn record_bindings(&self, attachment: &Attachment) -> FabricResult<()> {
        for conn in self.inventory.host_connections(&attachment.host_id)? {
            let key = binding_key(&conn, attachment);
            match self.store.add_binding(&key).await {
                Ok(_) => {}
                Err(StoreError::Duplicate { .. }) => {
                    debug!(binding = %key, "Binding already recorded");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn forget_bindings(&self, attachment: &Attachment) -> FabricResult<()> {
        let rows = match self
            .store
            .get_vm_bindings(attachment.vlan_id, &attachment.device_id)
            .await
        {
            Ok(rows) => rows,
            Err(err) if err.is_not_found() => {
                debug!("No bindings to remove");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        for row in rows {
            self.store.remove_binding(&row.key()).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn configure_switches(&self, attachment: &Attachment) -> FabricResult<()> {
        let vlan_id = attachment.vlan_id;
        let vlan_name = self.vlan_name(vlan_id);
        // A host cabled twice to one switch must not create the VLAN twice.
        let mut created = HashSet::new();

        for conn in self.inventory.host_connections(&attachment.host_id)? {
            let HostConnection {
                switch_ip,
                interface,
            } = &conn;
            let shared = self
                .vlan_bindings(vlan_id, switch_ip)
                .await?
                .iter()
                .any(|row| row.instance_id != attachment.device_id);

            let result = if shared || created.contains(switch_ip) {
                debug!(switch = %switch_ip, vlan_id, %interface, "Trunking existing VLAN");
                self.driver
                    .enable_vlan_on_trunk_int(switch_ip, vlan_id, interface)
                    .await
            } else {
                created.insert(switch_ip.clone());
                debug!(switch = %switch_ip, vlan_id, %interface, "Creating and trunking VLAN");
                self.driver
                    .create_and_trunk_vlan(switch_ip, vlan_id, &vlan_name, Some(interface))
                    .await
            };

            if let Err(err) = result {
                error!(switch = %switch_ip, vlan_id, %interface, error = %err, "Failed to configure switch");
                return Err(err);
            }
            info!(switch = %switch_ip, vlan_id, %interface, "VLAN trunked");
            self.mark_processed(&binding_key(&conn, attachment)).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deconfigure_switches(&self, attachment: &Attachment) -> FabricResult<()> {
        let vlan_id = attachment.vlan_id;
        // Several ports on one switch still delete the VLAN only once.
        let mut removed = HashSet::new();

        for conn in self.inventory.host_connections(&attachment.host_id)? {
            let HostConnection {
                switch_ip,
                interface,
            } = &conn;
            let port_id = interface.port_id();

            match self
                .store
                .get_port_vlan_switch_bindings(&port_id, vlan_id, switch_ip)
                .await
            {
                Ok(rows) => {
                    debug!(switch = %switch_ip, vlan_id, %interface, remaining = rows.len(), "Interface still carries VLAN");
                    continue;
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }

            if let Err(err) = self
                .driver
                .disable_vlan_on_trunk_int(switch_ip, vlan_id, interface)
                .await
            {
                error!(switch = %switch_ip, vlan_id, %interface, error = %err, "Failed to remove VLAN from interface");
                return Err(err);
            }
            info!(switch = %switch_ip, vlan_id, %interface, "VLAN removed from interface");

            if self.vlan_bindings(vlan_id, switch_ip).await?.is_empty()
                && removed.insert(switch_ip.clone())
            {
                if let Err(err) = self.driver.delete_vlan(switch_ip, vlan_id).await {
                    error!(switch = %switch_ip, vlan_id, error = %err, "Failed to delete VLAN");
                    return Err(err);
                }
                info!(switch = %switch_ip, vlan_id, "Deleted VLAN");
            }
        }
        Ok(())
    }

    /// Every binding of the VLAN on the switch; none is not an error here.
    async fn vlan_bindings(&self, vlan_id: VlanId, switch_ip: &str) -> FabricResult<Vec<PortBinding>> {
        match self.store.get_vlan_bindings(vlan_id, switch_ip).await {
            Ok(rows) => Ok(rows),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_processed(&self, key: &BindingKey) -> FabricResult<()> {
        match self.store.process_binding(key).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(binding = %key, "Binding already processed");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drops the attachment's bindings no switch has confirmed.
    async fn discard_unprocessed(&self, attachment: &Attachment) {
        let filter = BindingFilter::new()
            .vlan_id(attachment.vlan_id)
            .instance_id(&attachment.device_id)
            .processed(false);
        let result = match self.store.find(&filter).await {
            Ok(rows) => self.store.delete(&rows).await.map(|_| rows.len()),
            Err(err) => Err(err),
        };
        match result {
            Ok(count) => warn!(
                vlan_id = attachment.vlan_id,
                device_id = %attachment.device_id,
                count,
                "Discarded unprocessed bindings"
            ),
            Err(err) => error!(
                vlan_id = attachment.vlan_id,
                device_id = %attachment.device_id,
                error = %err,
                "Failed to discard unprocessed bindings"
            ),
        }
    }
}

fn binding_key(conn: &HostConnection, attachment: &Attachment) -> BindingKey {
    BindingKey::new(
        conn.interface.port_id(),
        attachment.vlan_id,
        conn.switch_ip.clone(),
        attachment.device_id.clone(),
    )
}
