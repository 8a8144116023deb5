//! Test fixtures for port events and switch inventories

use std::sync::Arc;

use nos_fabric_common::{
    OsFamily, Port, PortContext, PortEvent, Protocol, Secret, Segment, SnmpConfig,
    SwitchConnection, SwitchInventory, VlanId,
};

/// Physical network used by the fixtures.
pub const PHYSNET: &str = "physnet1";

/// Builds the [`PortContext`] of a compute port.
///
/// Defaults to an active `compute:nova` port with no VLAN segment yet.
#[derive(Debug, Clone)]
pub struct PortEventBuilder {
    ctx: PortContext,
}

impl PortEventBuilder {
    /// Compute port of `device_id` on `host_id`.
    pub fn compute(device_id: &str, host_id: &str) -> Self {
        Self {
            ctx: PortContext {
                current: Port {
                    id: format!("port-{}", device_id),
                    device_id: Some(device_id.to_string()),
                    device_owner: "compute:nova".to_string(),
                    status: "ACTIVE".to_string(),
                    host_id: Some(host_id.to_string()),
                },
                ..Default::default()
            },
        }
    }

    /// Binds the port to a VLAN segment on [`PHYSNET`].
    pub fn vlan(mut self, vlan_id: VlanId) -> Self {
        self.ctx.segment = Some(Segment::vlan(vlan_id, PHYSNET));
        self
    }

    pub fn segment(mut self, segment: Option<Segment>) -> Self {
        self.ctx.segment = segment;
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.ctx.current.status = status.to_string();
        self
    }

    pub fn owner(mut self, device_owner: &str) -> Self {
        self.ctx.current.device_owner = device_owner.to_string();
        self
    }

    /// Turns the event into the unbind half of a move away from
    /// `original_host`, where the port was on `vlan_id`.
    pub fn migrated_from(mut self, original_host: &str, vlan_id: VlanId) -> Self {
        let mut original = self.ctx.current.clone();
        original.host_id = Some(original_host.to_string());
        self.ctx.original = Some(original);
        self.ctx.original_segment = Some(Segment::vlan(vlan_id, PHYSNET));
        self.ctx.segment = None;
        self
    }

    pub fn build(self) -> PortContext {
        self.ctx
    }

    pub fn update(self) -> PortEvent {
        PortEvent::Update(self.ctx)
    }

    pub fn delete(self) -> PortEvent {
        PortEvent::Delete(self.ctx)
    }
}

/// Builds a [`SwitchInventory`].
#[derive(Debug, Default)]
pub struct InventoryBuilder {
    inventory: SwitchInventory,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a switch with test credentials.
    pub fn switch(mut self, switch_ip: &str, os: OsFamily, protocol: Protocol) -> Self {
        let conn = test_connection(os, protocol);
        self.inventory.insert(switch_ip, conn);
        self
    }

    /// Cables `host` to `ports` (e.g. `"10,portchannel:3"`) on a switch
    /// added earlier; an unknown switch is added as ENOS/SNMP first.
    pub fn host(mut self, switch_ip: &str, host: &str, ports: &str) -> Self {
        let mut conn = self
            .inventory
            .get(switch_ip)
            .cloned()
            .unwrap_or_else(|_| test_connection(OsFamily::Enos, Protocol::Snmp));
        conn.hosts.insert(host.to_string(), ports.to_string());
        self.inventory.insert(switch_ip, conn);
        self
    }

    pub fn build(self) -> Arc<SwitchInventory> {
        Arc::new(self.inventory)
    }
}

fn test_connection(os: OsFamily, protocol: Protocol) -> SwitchConnection {
    SwitchConnection {
        username: "admin".to_string(),
        password: Secret::new("admin"),
        os,
        protocol: Some(protocol),
        snmp: SnmpConfig {
            community: Some(Secret::new("private")),
            ..Default::default()
        },
        ..Default::default()
    }
}
