//! In-memory switches that behave like the real ones, minus the wire.
//!
//! [`SimulatedFabric`] keeps VLAN objects and per-interface membership for
//! every switch and implements [`NosDriver`] on top of that state, using
//! the same membership planner as the real drivers. A freshly cabled
//! interface is an access port in VLAN 1; interfaces back in that state
//! are forgotten, so a create followed by a delete leaves no trace.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use nos_drivers::{plan_disable, plan_enable, NosDriver, VlanMembership};
use nos_fabric_common::{FabricError, FabricResult, Interface, VlanId, DEFAULT_VLAN};

/// Driver primitive, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    CreateVlan,
    DeleteVlan,
    Enable,
    Disable,
}

/// Live state of one switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchState {
    /// VLAN objects and their names
    pub vlans: BTreeMap<VlanId, String>,
    /// Interfaces that differ from the untouched default
    pub ports: BTreeMap<Interface, VlanMembership>,
}

impl SwitchState {
    /// Membership of an interface, default if never touched.
    pub fn membership(&self, interface: &Interface) -> VlanMembership {
        self.ports
            .get(interface)
            .cloned()
            .unwrap_or_else(untouched)
    }

    fn store_membership(&mut self, interface: &Interface, membership: VlanMembership) {
        if membership == untouched() {
            self.ports.remove(interface);
        } else {
            self.ports.insert(interface.clone(), membership);
        }
    }
}

fn untouched() -> VlanMembership {
    VlanMembership::new(DEFAULT_VLAN, [DEFAULT_VLAN])
}

/// A set of simulated switches keyed by management address.
#[derive(Debug, Default)]
pub struct SimulatedFabric {
    switches: Mutex<BTreeMap<String, SwitchState>>,
    failing: Mutex<HashSet<DriverOp>>,
}

impl SimulatedFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `op` fail with `ConfigFailed`.
    pub fn fail(&self, op: DriverOp) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).insert(op);
    }

    /// Clears injected faults.
    pub fn heal(&self) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Snapshot of one switch.
    pub fn state(&self, switch: &str) -> SwitchState {
        self.switches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(switch)
            .cloned()
            .unwrap_or_default()
    }

    /// VLAN objects present on a switch.
    pub fn vlans(&self, switch: &str) -> Vec<VlanId> {
        self.state(switch).vlans.keys().copied().collect()
    }

    /// Membership of one interface.
    pub fn membership(&self, switch: &str, interface: &Interface) -> VlanMembership {
        self.state(switch).membership(interface)
    }

    fn check(&self, switch: &str, op: DriverOp) -> FabricResult<()> {
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&op)
        {
            return Err(FabricError::config_failed(
                switch,
                format!("{:?}", op),
                "injected failure",
            ));
        }
        Ok(())
    }

    fn with_switch<T>(&self, switch: &str, f: impl FnOnce(&mut SwitchState) -> T) -> T {
        let mut switches = self.switches.lock().unwrap_or_else(|e| e.into_inner());
        f(switches.entry(switch.to_string()).or_default())
    }
}

#[async_trait]
impl NosDriver for SimulatedFabric {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create_vlan(&self, switch: &str, vlan_id: VlanId, vlan_name: &str) -> FabricResult<()> {
        self.check(switch, DriverOp::CreateVlan)?;
        self.with_switch(switch, |state| {
            state.vlans.insert(vlan_id, vlan_name.to_string());
        });
        Ok(())
    }

    /// Deleting a VLAN also drops it from every interface, as devices do.
    async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()> {
        self.check(switch, DriverOp::DeleteVlan)?;
        self.with_switch(switch, |state| {
            state.vlans.remove(&vlan_id);
            let touched: Vec<Interface> = state
                .ports
                .iter()
                .filter(|(_, m)| m.contains(vlan_id))
                .map(|(i, _)| i.clone())
                .collect();
            for interface in touched {
                let current = state.membership(&interface);
                let mut vlans = current.vlans.clone();
                vlans.remove(&vlan_id);
                if vlans.is_empty() {
                    vlans.insert(DEFAULT_VLAN);
                }
                let pvid = if current.pvid == vlan_id {
                    vlans.iter().next().copied().unwrap_or(DEFAULT_VLAN)
                } else {
                    current.pvid
                };
                state.store_membership(&interface, VlanMembership::new(pvid, vlans));
            }
        });
        Ok(())
    }

    async fn enable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        self.check(switch, DriverOp::Enable)?;
        self.with_switch(switch, |state| {
            if !state.vlans.contains_key(&vlan_id) {
                return Err(FabricError::config_failed(
                    switch,
                    format!("vlan {} on {}", vlan_id, interface),
                    "VLAN does not exist",
                ));
            }
            let first = !state.ports.contains_key(interface);
            let plan = plan_enable(&state.membership(interface), vlan_id, first);
            state.store_membership(interface, plan.after);
            Ok(())
        })
    }

    async fn disable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        self.check(switch, DriverOp::Disable)?;
        self.with_switch(switch, |state| {
            let plan = plan_disable(
                &state.membership(interface),
                vlan_id,
                switch,
                &interface.port_id(),
            )?;
            state.store_membership(interface, plan.after);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nos_drivers::PortMode;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_and_delete_round_trip() {
        let fabric = SimulatedFabric::new();
        let port = Interface::port("10");
        let before = fabric.state("sw");

        fabric
            .create_and_trunk_vlan("sw", 100, "q-100", Some(&port))
            .await
            .unwrap();
        assert_eq!(fabric.vlans("sw"), vec![100]);
        assert_eq!(fabric.membership("sw", &port).mode, PortMode::Trunk);

        fabric.delete_vlan("sw", 100).await.unwrap();
        assert_eq!(fabric.state("sw"), before);
    }

    #[tokio::test]
    async fn test_enable_requires_vlan_object() {
        let fabric = SimulatedFabric::new();
        let err = fabric
            .enable_vlan_on_trunk_int("sw", 100, &Interface::port("10"))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::ConfigFailed { .. }));
    }

    #[tokio::test]
    async fn test_disable_to_access_then_empty() {
        let fabric = SimulatedFabric::new();
        let port = Interface::port("10");
        fabric.create_and_trunk_vlan("sw", 100, "q-100", Some(&port)).await.unwrap();

        fabric.disable_vlan_on_trunk_int("sw", 1, &port).await.unwrap();
        let membership = fabric.membership("sw", &port);
        assert_eq!(membership.mode, PortMode::Access);
        assert_eq!(membership.pvid, 100);

        let err = fabric
            .disable_vlan_on_trunk_int("sw", 100, &port)
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::EmptyVlanSet { .. }));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let fabric = SimulatedFabric::new();
        fabric.fail(DriverOp::CreateVlan);
        assert!(fabric.create_vlan("sw", 100, "q-100").await.is_err());
        fabric.heal();
        assert!(fabric.create_vlan("sw", 100, "q-100").await.is_ok());
    }
}
