//! SNMP driver.
//!
//! Every change is a SET against the device's private MIB followed by a
//! separate "apply configuration" SET, since the device buffers pending
//! changes until they are committed. Object addresses come from the
//! [`VendorAddressTable`] the [`DeviceResolver`] selects for the switch.
//!
//! Port-channels are expanded to their member ports by reading the trunk
//! group bitmap, and each member is updated on its own. Members that fail
//! are reported through `PartialApply`; those that succeeded are still
//! committed so the device matches what the error reports.

pub mod transport;
pub mod vendor;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use nos_fabric_common::{FabricError, FabricResult, Interface, InterfaceType, VlanId, DEFAULT_VLAN};

use crate::driver::{DriverContext, NosDriver};
use crate::membership::{plan_disable, MembershipPlan, PlanAction, PortMode};

pub use transport::{security_params, SecurityParams, Snmp2Transport, SnmpTransport, SnmpValue};
pub use vendor::{Attribute, DeviceResolver, ObjectId, VendorAddressTable, VENDOR_TABLES};

/// vlanNewCfgState: enabled
const VLAN_ENABLED: i64 = 2;
/// vlanNewCfgDelete: delete
const VLAN_DELETE: i64 = 2;
/// agPortNewCfgVlanTag: untagged
const PORT_UNTAGGED: i64 = 1;
/// agPortNewCfgVlanTag: tagged
const PORT_TAGGED: i64 = 2;
/// agApplyConfiguration: apply
const APPLY: i64 = 2;

/// Bindings per SET during the trunk initialization sweep.
pub const SWEEP_BATCH: usize = 20;

/// Highest VLAN swept on legacy firmware.
const COMPAT_SWEEP_MAX: VlanId = 4094;
/// Highest VLAN swept otherwise.
const SWEEP_MAX: VlanId = 4095;

/// Decodes a trunk group port bitmap. The most significant bit of the
/// first octet is port 0.
pub fn bitmap_ports(bitmap: &[u8]) -> Vec<u32> {
    let mut ports = Vec::new();
    for (octet, byte) in bitmap.iter().enumerate() {
        let base = octet as u32 * 8;
        for bit in (0..8u32).rev() {
            if byte & (1 << bit) != 0 {
                ports.push(base + 7 - bit);
            }
        }
    }
    ports
}

/// Collapses per-member results into one outcome.
fn member_outcome(
    switch: &str,
    vlan_id: VlanId,
    applied: Vec<u32>,
    mut failed: Vec<(u32, FabricError)>,
) -> FabricResult<()> {
    if failed.is_empty() {
        return Ok(());
    }
    if applied.is_empty() {
        let (_, first) = failed.remove(0);
        return Err(first);
    }
    Err(FabricError::PartialApply {
        switch: switch.to_string(),
        vlan_id,
        applied,
        failed: failed
            .into_iter()
            .map(|(port, err)| (port, err.to_string()))
            .collect(),
    })
}

/// What to do to each member port.
enum PortChange<'a> {
    Enable { init_trunk: bool },
    Disable(&'a MembershipPlan),
}

/// [`NosDriver`] speaking SNMP.
pub struct SnmpDriver {
    ctx: DriverContext,
    transport: Arc<dyn SnmpTransport>,
    resolver: DeviceResolver,
}

impl SnmpDriver {
    /// Creates a driver that talks to switches over UDP.
    pub fn new(ctx: DriverContext) -> Self {
        let transport = Arc::new(Snmp2Transport::new(
            ctx.inventory.clone(),
            ctx.timeouts.clone(),
        ));
        Self::with_transport(ctx, transport)
    }

    /// Creates a driver over an arbitrary transport.
    pub fn with_transport(ctx: DriverContext, transport: Arc<dyn SnmpTransport>) -> Self {
        Self {
            ctx,
            transport,
            resolver: DeviceResolver::new(),
        }
    }

    async fn table(&self, switch: &str) -> FabricResult<&'static VendorAddressTable> {
        self.resolver.resolve(self.transport.as_ref(), switch).await
    }

    async fn apply(&self, switch: &str, table: &VendorAddressTable) -> FabricResult<()> {
        self.transport
            .set(
                switch,
                &[(table.scalar(Attribute::ApplyConfig), SnmpValue::Integer(APPLY))],
            )
            .await
    }

    async fn max_vlan_id(&self, switch: &str, table: &VendorAddressTable) -> FabricResult<VlanId> {
        let value = self
            .transport
            .get(switch, &table.scalar(Attribute::MaxVlanId))
            .await?;
        value
            .as_integer()
            .and_then(|v| VlanId::try_from(v).ok())
            .ok_or_else(|| {
                FabricError::snmp(switch, "GET", format!("unexpected vlanMaxVlanID {:?}", value))
            })
    }

    /// Physical ports behind an interface.
    async fn member_ports(
        &self,
        switch: &str,
        table: &VendorAddressTable,
        interface: &Interface,
    ) -> FabricResult<Vec<u32>> {
        let index = interface.index()?;
        match interface.kind {
            InterfaceType::Port => Ok(vec![index]),
            InterfaceType::PortChannel => {
                let value = self
                    .transport
                    .get(switch, &table.cell(Attribute::TrunkGroupPorts, index))
                    .await?;
                let SnmpValue::OctetString(bitmap) = value else {
                    return Err(FabricError::snmp(
                        switch,
                        "GET",
                        format!("unexpected trunkGroupInfoPorts {:?}", value),
                    ));
                };
                let ports = bitmap_ports(&bitmap);
                debug!(switch, %interface, ?ports, "Port-channel members");
                Ok(ports)
            }
        }
    }

    /// Tags the port, resets its PVID to 1 and strips every other VLAN.
    ///
    /// Rejections inside the sweep are expected for VLANs the device does
    /// not have and are skipped; connectivity errors abort.
    async fn trunk_init(
        &self,
        switch: &str,
        table: &VendorAddressTable,
        port: u32,
    ) -> FabricResult<()> {
        self.transport
            .set(
                switch,
                &[
                    (table.cell(Attribute::PortVlanTag, port), SnmpValue::Integer(PORT_TAGGED)),
                    (
                        table.cell(Attribute::PortPvid, port),
                        SnmpValue::Integer(i64::from(DEFAULT_VLAN)),
                    ),
                ],
            )
            .await?;

        let cap = if self.ctx.switch(switch)?.compat_mode {
            COMPAT_SWEEP_MAX
        } else {
            SWEEP_MAX
        };
        let upper = self.max_vlan_id(switch, table).await?.min(cap);
        let bindings: Vec<(ObjectId, SnmpValue)> = (DEFAULT_VLAN + 1..=upper)
            .map(|vid| {
                (
                    table.cell(Attribute::VlanRemovePort, u32::from(vid)),
                    SnmpValue::Gauge32(port),
                )
            })
            .collect();
        debug!(switch, port, upper, "Stripping VLANs from fresh trunk port");

        for batch in bindings.chunks(SWEEP_BATCH) {
            match self.transport.set(switch, batch).await {
                Ok(()) => {}
                Err(err) if err.is_config_rejection() => {
                    warn!(switch, port, error = %err, "VLAN strip batch rejected, continuing");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn change_port(
        &self,
        switch: &str,
        table: &VendorAddressTable,
        vlan_id: VlanId,
        port: u32,
        change: &PortChange<'_>,
    ) -> FabricResult<()> {
        match change {
            PortChange::Enable { init_trunk } => {
                if *init_trunk {
                    self.trunk_init(switch, table, port).await?;
                }
                self.transport
                    .set(
                        switch,
                        &[(
                            table.cell(Attribute::VlanAddPort, u32::from(vlan_id)),
                            SnmpValue::Gauge32(port),
                        )],
                    )
                    .await
            }
            PortChange::Disable(plan) => {
                let mut bindings = vec![(
                    table.cell(Attribute::VlanRemovePort, u32::from(vlan_id)),
                    SnmpValue::Gauge32(port),
                )];
                if plan.pvid_changed() {
                    bindings.push((
                        table.cell(Attribute::PortPvid, port),
                        SnmpValue::Integer(i64::from(plan.after.pvid)),
                    ));
                }
                if plan.after.mode == PortMode::Access {
                    bindings.push((
                        table.cell(Attribute::PortVlanTag, port),
                        SnmpValue::Integer(PORT_UNTAGGED),
                    ));
                }
                self.transport.set(switch, &bindings).await
            }
        }
    }

    /// Applies `change` to every member of `interface`, then commits.
    async fn change_interface(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
        change: PortChange<'_>,
    ) -> FabricResult<()> {
        let table = self.table(switch).await?;
        let ports = self.member_ports(switch, table, interface).await?;
        if ports.is_empty() {
            warn!(switch, %interface, "Interface has no member ports");
            return Ok(());
        }

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for port in ports {
            match self.change_port(switch, table, vlan_id, port, &change).await {
                Ok(()) => applied.push(port),
                Err(err) => {
                    error!(switch, vlan_id, %interface, port, error = %err, "Member port update failed");
                    failed.push((port, err));
                }
            }
        }

        if !applied.is_empty() {
            self.apply(switch, table).await?;
        }
        member_outcome(switch, vlan_id, applied, failed)
    }
}

#[async_trait]
impl NosDriver for SnmpDriver {
    fn name(&self) -> &'static str {
        "snmp"
    }

    #[instrument(skip(self))]
    async fn create_vlan(&self, switch: &str, vlan_id: VlanId, vlan_name: &str) -> FabricResult<()> {
        let table = self.table(switch).await?;
        let index = u32::from(vlan_id);
        self.transport
            .set(
                switch,
                &[
                    (table.cell(Attribute::VlanState, index), SnmpValue::Integer(VLAN_ENABLED)),
                    (
                        table.cell(Attribute::VlanName, index),
                        SnmpValue::OctetString(vlan_name.as_bytes().to_vec()),
                    ),
                ],
            )
            .await?;
        self.apply(switch, table).await
    }

    #[instrument(skip(self))]
    async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()> {
        let table = self.table(switch).await?;
        self.transport
            .set(
                switch,
                &[(
                    table.cell(Attribute::VlanDelete, u32::from(vlan_id)),
                    SnmpValue::Integer(VLAN_DELETE),
                )],
            )
            .await?;
        self.apply(switch, table).await?;
        info!(switch, vlan_id, "Deleted VLAN");
        Ok(())
    }

    #[instrument(skip(self, interface), fields(interface = %interface))]
    async fn enable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        let init_trunk = self.ctx.is_first_vlan(switch, interface).await?;
        self.change_interface(switch, vlan_id, interface, PortChange::Enable { init_trunk })
            .await
    }

    #[instrument(skip(self, interface), fields(interface = %interface))]
    async fn disable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        let current = self.ctx.stored_membership(switch, interface, vlan_id).await?;
        let plan = plan_disable(&current, vlan_id, switch, &interface.port_id())?;
        if plan.action == PlanAction::NoChange {
            debug!(switch, vlan_id, %interface, "VLAN not on interface");
            return Ok(());
        }
        self.change_interface(switch, vlan_id, interface, PortChange::Disable(&plan))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nos_binding_store::{BindingKey, BindingStore, MemoryBindingStore};
    use nos_fabric_common::{
        Protocol, Secret, SnmpConfig, SwitchConnection, SwitchInventory, TimeoutConfig,
    };
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const SW: &str = "10.0.0.1";
    const GRYPHON: &str = "1.3.6.1.4.1.26543.2.7.6";

    type Rule = Box<dyn Fn(&ObjectId, &SnmpValue) -> bool + Send + Sync>;

    /// Agent that answers GETs from a map and records SETs.
    #[derive(Default)]
    struct FakeAgent {
        values: Mutex<HashMap<String, SnmpValue>>,
        sets: Mutex<Vec<Vec<(String, SnmpValue)>>>,
        reject: Mutex<Option<Rule>>,
    }

    impl FakeAgent {
        fn gryphon(max_vlan: i64) -> Self {
            let agent = Self::default();
            agent.put("1.3.6.1.2.1.1.1.0", SnmpValue::OctetString(b"RackSwitch G8264".to_vec()));
            agent.put(&format!("{}.2.1.1.4.0", GRYPHON), SnmpValue::Integer(max_vlan));
            agent
        }

        fn put(&self, oid: &str, value: SnmpValue) {
            self.values.lock().unwrap().insert(oid.to_string(), value);
        }

        fn reject_when(&self, rule: impl Fn(&ObjectId, &SnmpValue) -> bool + Send + Sync + 'static) {
            *self.reject.lock().unwrap() = Some(Box::new(rule));
        }

        fn sets(&self) -> Vec<Vec<(String, SnmpValue)>> {
            self.sets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnmpTransport for FakeAgent {
        async fn get(&self, switch: &str, oid: &ObjectId) -> FabricResult<SnmpValue> {
            self.values
                .lock()
                .unwrap()
                .get(&oid.to_string())
                .cloned()
                .ok_or_else(|| FabricError::snmp(switch, "GET", format!("no such object {}", oid)))
        }

        async fn set(&self, switch: &str, bindings: &[(ObjectId, SnmpValue)]) -> FabricResult<()> {
            if let Some(rule) = self.reject.lock().unwrap().as_ref() {
                if bindings.iter().any(|(oid, value)| rule(oid, value)) {
                    return Err(FabricError::SnmpFailure {
                        switch: switch.to_string(),
                        operation: "SET".to_string(),
                        detail: "inconsistentValue".to_string(),
                        error_status: Some(12),
                        error_index: Some(1),
                    });
                }
            }
            self.sets.lock().unwrap().push(
                bindings
                    .iter()
                    .map(|(oid, value)| (oid.to_string(), value.clone()))
                    .collect(),
            );
            Ok(())
        }
    }

    struct Harness {
        agent: Arc<FakeAgent>,
        store: Arc<MemoryBindingStore>,
        driver: SnmpDriver,
    }

    fn harness(agent: FakeAgent, compat_mode: bool) -> Harness {
        let mut inventory = SwitchInventory::new();
        inventory.insert(
            SW,
            SwitchConnection {
                protocol: Some(Protocol::Snmp),
                compat_mode,
                snmp: SnmpConfig {
                    community: Some(Secret::new("private")),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let agent = Arc::new(agent);
        let store = Arc::new(MemoryBindingStore::new());
        let ctx = DriverContext::new(Arc::new(inventory), store.clone(), TimeoutConfig::default());
        Harness {
            driver: SnmpDriver::with_transport(ctx, agent.clone()),
            agent,
            store,
        }
    }

    fn apply_set() -> Vec<(String, SnmpValue)> {
        vec![(format!("{}.1.1.1.2.0", GRYPHON), SnmpValue::Integer(APPLY))]
    }

    #[test]
    fn test_bitmap_ports() {
        assert_eq!(bitmap_ports(&[0b1000_0001, 0, 0b0100_0000]), vec![0, 7, 17]);
        assert!(bitmap_ports(&[0, 0]).is_empty());
    }

    #[tokio::test]
    async fn test_create_vlan_sets_state_and_name_then_applies() {
        let h = harness(FakeAgent::gryphon(4094), false);
        h.driver.create_vlan(SW, 100, "q-100").await.unwrap();
        assert_eq!(
            h.agent.sets(),
            vec![
                vec![
                    (format!("{}.2.1.1.3.1.4.100", GRYPHON), SnmpValue::Integer(2)),
                    (
                        format!("{}.2.1.1.3.1.2.100", GRYPHON),
                        SnmpValue::OctetString(b"q-100".to_vec())
                    ),
                ],
                apply_set(),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_vlan() {
        let h = harness(FakeAgent::gryphon(4094), false);
        h.driver.delete_vlan(SW, 100).await.unwrap();
        assert_eq!(
            h.agent.sets(),
            vec![
                vec![(format!("{}.2.1.1.3.1.7.100", GRYPHON), SnmpValue::Integer(2))],
                apply_set(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let agent = FakeAgent::default();
        agent.put("1.3.6.1.2.1.1.1.0", SnmpValue::OctetString(b"Other switch".to_vec()));
        let h = harness(agent, false);
        let err = h.driver.create_vlan(SW, 100, "q-100").await.unwrap_err();
        assert!(matches!(err, FabricError::UnknownDeviceModel { .. }));
        assert!(h.agent.sets().is_empty());
    }

    #[tokio::test]
    async fn test_first_vlan_initializes_trunk_and_sweeps_in_batches() {
        let h = harness(FakeAgent::gryphon(45), false);
        h.store
            .add_binding(&BindingKey::new("port:10", 100, SW, "vm-1"))
            .await
            .unwrap();

        h.driver
            .enable_vlan_on_trunk_int(SW, 100, &Interface::port("10"))
            .await
            .unwrap();

        let sets = h.agent.sets();
        assert_eq!(sets.len(), 6);
        assert_eq!(
            sets[0],
            vec![
                (format!("{}.1.1.2.3.1.3.10", GRYPHON), SnmpValue::Integer(2)),
                (format!("{}.1.1.2.3.1.6.10", GRYPHON), SnmpValue::Integer(1)),
            ]
        );
        assert_eq!(sets[1].len(), 20);
        assert_eq!(sets[2].len(), 20);
        assert_eq!(sets[3].len(), 4);
        assert_eq!(
            sets[1][0],
            (format!("{}.2.1.1.3.1.6.2", GRYPHON), SnmpValue::Gauge32(10))
        );
        assert_eq!(
            sets[4],
            vec![(format!("{}.2.1.1.3.1.5.100", GRYPHON), SnmpValue::Gauge32(10))]
        );
        assert_eq!(sets[5], apply_set());
    }

    #[tokio::test]
    async fn test_sweep_upper_bound_follows_compat_mode() {
        for (compat, last) in [(true, 4094usize), (false, 4095)] {
            let h = harness(FakeAgent::gryphon(4095), compat);
            h.store
                .add_binding(&BindingKey::new("port:10", 100, SW, "vm-1"))
                .await
                .unwrap();
            h.driver
                .enable_vlan_on_trunk_int(SW, 100, &Interface::port("10"))
                .await
                .unwrap();

            let swept: Vec<String> = h
                .agent
                .sets()
                .into_iter()
                .flatten()
                .map(|(oid, _)| oid)
                .filter(|oid| oid.starts_with(&format!("{}.2.1.1.3.1.6.", GRYPHON)))
                .collect();
            assert_eq!(swept.len(), last - 1);
            assert!(swept
                .last()
                .unwrap()
                .ends_with(&format!(".{}", last)));
        }
    }

    #[tokio::test]
    async fn test_sweep_skips_rejected_batches() {
        let agent = FakeAgent::gryphon(45);
        let strip = format!("{}.2.1.1.3.1.6.21", GRYPHON);
        agent.reject_when(move |oid, _| oid.to_string() == strip);
        let h = harness(agent, false);
        h.store
            .add_binding(&BindingKey::new("port:10", 100, SW, "vm-1"))
            .await
            .unwrap();

        h.driver
            .enable_vlan_on_trunk_int(SW, 100, &Interface::port("10"))
            .await
            .unwrap();
        // the batch holding VLAN 21 is dropped; the rest goes through
        assert_eq!(h.agent.sets().len(), 5);
    }

    #[tokio::test]
    async fn test_later_vlan_only_appends() {
        let h = harness(FakeAgent::gryphon(4094), false);
        h.store
            .add_binding(&BindingKey::new("port:10", 100, SW, "vm-1"))
            .await
            .unwrap();
        h.store
            .add_binding(&BindingKey::new("port:10", 200, SW, "vm-2"))
            .await
            .unwrap();

        h.driver
            .enable_vlan_on_trunk_int(SW, 200, &Interface::port("10"))
            .await
            .unwrap();
        assert_eq!(
            h.agent.sets(),
            vec![
                vec![(format!("{}.2.1.1.3.1.5.200", GRYPHON), SnmpValue::Gauge32(10))],
                apply_set(),
            ]
        );
    }

    #[tokio::test]
    async fn test_disable_last_vlan_returns_port_to_access() {
        let h = harness(FakeAgent::gryphon(4094), false);
        h.driver
            .disable_vlan_on_trunk_int(SW, 100, &Interface::port("10"))
            .await
            .unwrap();
        assert_eq!(
            h.agent.sets(),
            vec![
                vec![
                    (format!("{}.2.1.1.3.1.6.100", GRYPHON), SnmpValue::Gauge32(10)),
                    (format!("{}.1.1.2.3.1.3.10", GRYPHON), SnmpValue::Integer(1)),
                ],
                apply_set(),
            ]
        );
    }

    #[tokio::test]
    async fn test_disable_keeps_trunk_while_other_vlans_remain() {
        let h = harness(FakeAgent::gryphon(4094), false);
        h.store
            .add_binding(&BindingKey::new("port:10", 200, SW, "vm-2"))
            .await
            .unwrap();
        h.driver
            .disable_vlan_on_trunk_int(SW, 100, &Interface::port("10"))
            .await
            .unwrap();
        assert_eq!(
            h.agent.sets()[0],
            vec![(format!("{}.2.1.1.3.1.6.100", GRYPHON), SnmpValue::Gauge32(10))]
        );
    }

    #[tokio::test]
    async fn test_port_channel_expands_members() {
        let agent = FakeAgent::gryphon(4094);
        agent.put(
            &format!("{}.2.3.9.1.1.3.3", GRYPHON),
            SnmpValue::OctetString(vec![0, 0b0011_0000]),
        );
        let h = harness(agent, false);
        h.store
            .add_binding(&BindingKey::new("portchannel:3", 100, SW, "vm-1"))
            .await
            .unwrap();
        h.store
            .add_binding(&BindingKey::new("portchannel:3", 200, SW, "vm-2"))
            .await
            .unwrap();

        h.driver
            .enable_vlan_on_trunk_int(SW, 200, &Interface::port_channel("3"))
            .await
            .unwrap();
        assert_eq!(
            h.agent.sets(),
            vec![
                vec![(format!("{}.2.1.1.3.1.5.200", GRYPHON), SnmpValue::Gauge32(10))],
                vec![(format!("{}.2.1.1.3.1.5.200", GRYPHON), SnmpValue::Gauge32(11))],
                apply_set(),
            ]
        );
    }

    #[tokio::test]
    async fn test_port_channel_partial_failure_is_reported() {
        let agent = FakeAgent::gryphon(4094);
        agent.put(
            &format!("{}.2.3.9.1.1.3.3", GRYPHON),
            SnmpValue::OctetString(vec![0, 0b0011_0000]),
        );
        agent.reject_when(|_, value| *value == SnmpValue::Gauge32(11));
        let h = harness(agent, false);

        let err = h
            .driver
            .disable_vlan_on_trunk_int(SW, 100, &Interface::port_channel("3"))
            .await
            .unwrap_err();
        match err {
            FabricError::PartialApply {
                applied, failed, ..
            } => {
                assert_eq!(applied, vec![10]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, 11);
            }
            other => panic!("unexpected error {:?}", other),
        }
        // the member that succeeded is still committed
        assert_eq!(h.agent.sets().last().unwrap(), &apply_set());
    }

    #[tokio::test]
    async fn test_all_members_failing_returns_first_error() {
        let agent = FakeAgent::gryphon(4094);
        agent.reject_when(|oid, _| oid.to_string().contains(".2.1.1.3.1.6."));
        let h = harness(agent, false);
        let err = h
            .driver
            .disable_vlan_on_trunk_int(SW, 100, &Interface::port("10"))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::SnmpFailure { error_status: Some(12), .. }));
        assert!(h.agent.sets().is_empty());
    }
}
