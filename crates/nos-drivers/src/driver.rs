//! The protocol driver contract and the state every driver shares.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use nos_binding_store::{BindingStore, PortBinding};
use nos_fabric_common::{
    FabricResult, Interface, SwitchConnection, SwitchInventory, TimeoutConfig, VlanId,
};

use crate::membership::VlanMembership;

/// The four VLAN primitives every switch back end implements.
///
/// Implementations own their connection lifecycle; callers pass the switch
/// by management address only.
#[async_trait]
pub trait NosDriver: Send + Sync {
    /// Short protocol name used in logs.
    fn name(&self) -> &'static str;

    /// Creates the VLAN object and brings it up.
    async fn create_vlan(&self, switch: &str, vlan_id: VlanId, vlan_name: &str)
        -> FabricResult<()>;

    /// Removes the VLAN object.
    async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()>;

    /// Adds the VLAN to the interface's trunk membership.
    ///
    /// The first VLAN bound to an interface initializes it as a trunk with
    /// native VLAN 1; later VLANs are appended.
    async fn enable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()>;

    /// Removes the VLAN from the interface's membership.
    ///
    /// Fails with `EmptyVlanSet` rather than leave the interface in no VLAN.
    async fn disable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()>;

    /// Creates the VLAN, then trunks it onto `interface` if one is given.
    ///
    /// A failed create is compensated with a best-effort `delete_vlan`
    /// before the original error is returned.
    #[instrument(skip(self), fields(driver = self.name()))]
    async fn create_and_trunk_vlan(
        &self,
        switch: &str,
        vlan_id: VlanId,
        vlan_name: &str,
        interface: Option<&Interface>,
    ) -> FabricResult<()> {
        if let Err(err) = self.create_vlan(switch, vlan_id, vlan_name).await {
            error!(switch, vlan_id, error = %err, "VLAN create failed, rolling back");
            if let Err(cleanup) = self.delete_vlan(switch, vlan_id).await {
                warn!(switch, vlan_id, error = %cleanup, "Rollback delete failed");
            }
            return Err(err);
        }
        info!(switch, vlan_id, vlan_name, "Created VLAN");

        if let Some(interface) = interface {
            self.enable_vlan_on_trunk_int(switch, vlan_id, interface)
                .await?;
        }
        Ok(())
    }
}

/// Inventory, binding store and timeouts handed to every driver.
#[derive(Clone)]
pub struct DriverContext {
    /// Static switch parameters
    pub inventory: Arc<SwitchInventory>,
    /// Binding table, read to tell a fresh interface from a trunked one
    pub store: Arc<dyn BindingStore>,
    /// Network timeouts
    pub timeouts: TimeoutConfig,
}

impl DriverContext {
    pub fn new(
        inventory: Arc<SwitchInventory>,
        store: Arc<dyn BindingStore>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            inventory,
            store,
            timeouts,
        }
    }

    /// Looks up a switch's connection parameters.
    pub fn switch(&self, switch_ip: &str) -> FabricResult<&SwitchConnection> {
        self.inventory.get(switch_ip)
    }

    /// Returns every binding on the interface.
    pub async fn port_bindings(
        &self,
        switch_ip: &str,
        interface: &Interface,
    ) -> FabricResult<Vec<PortBinding>> {
        Ok(self
            .store
            .get_port_switch_bindings(&interface.port_id(), switch_ip)
            .await?)
    }

    /// True when exactly one binding exists for the interface, i.e. the
    /// VLAN being enabled is the first one the agent put there.
    ///
    /// The answer is only stable while the caller holds the switch lock.
    pub async fn is_first_vlan(&self, switch_ip: &str, interface: &Interface) -> FabricResult<bool> {
        let count = self.port_bindings(switch_ip, interface).await?.len();
        debug!(switch_ip, %interface, count, "Interface binding count");
        Ok(count == 1)
    }

    /// Membership implied by the binding table without `vlan_id`, i.e. the
    /// interface as it was before `vlan_id` was bound to it.
    pub async fn prior_membership(
        &self,
        switch_ip: &str,
        interface: &Interface,
        vlan_id: VlanId,
    ) -> FabricResult<VlanMembership> {
        let bindings = self.port_bindings(switch_ip, interface).await?;
        Ok(VlanMembership::from_bindings(
            bindings
                .iter()
                .map(|b| b.vlan_id)
                .filter(|vlan| *vlan != vlan_id),
        ))
    }

    /// Membership implied by the binding table, plus `vlan_id`.
    ///
    /// Used by drivers that cannot read live membership cheaply.
    pub async fn stored_membership(
        &self,
        switch_ip: &str,
        interface: &Interface,
        vlan_id: VlanId,
    ) -> FabricResult<VlanMembership> {
        let bindings = self.port_bindings(switch_ip, interface).await?;
        Ok(VlanMembership::from_bindings(
            bindings.iter().map(|b| b.vlan_id).chain(std::iter::once(vlan_id)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nos_fabric_common::FabricError;
    use std::sync::Mutex;

    /// Driver whose create step can be made to fail.
    #[derive(Default)]
    struct FlakyDriver {
        fail_create: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyDriver {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NosDriver for FlakyDriver {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn create_vlan(&self, switch: &str, vlan_id: VlanId, _: &str) -> FabricResult<()> {
            self.calls.lock().unwrap().push(format!("create {}", vlan_id));
            if self.fail_create {
                return Err(FabricError::config_failed(switch, "vlan", "rejected"));
            }
            Ok(())
        }

        async fn delete_vlan(&self, _: &str, vlan_id: VlanId) -> FabricResult<()> {
            self.calls.lock().unwrap().push(format!("delete {}", vlan_id));
            Ok(())
        }

        async fn enable_vlan_on_trunk_int(
            &self,
            _: &str,
            vlan_id: VlanId,
            interface: &Interface,
        ) -> FabricResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("enable {} {}", vlan_id, interface));
            Ok(())
        }

        async fn disable_vlan_on_trunk_int(
            &self,
            _: &str,
            _: VlanId,
            _: &Interface,
        ) -> FabricResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_create_and_trunk() {
        let driver = FlakyDriver::default();
        driver
            .create_and_trunk_vlan("sw", 100, "q-100", Some(&Interface::port("10")))
            .await
            .unwrap();
        assert_eq!(driver.calls(), vec!["create 100", "enable 100 port:10"]);
    }

    #[tokio::test]
    async fn test_create_without_interface() {
        let driver = FlakyDriver::default();
        driver
            .create_and_trunk_vlan("sw", 100, "q-100", None)
            .await
            .unwrap();
        assert_eq!(driver.calls(), vec!["create 100"]);
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back() {
        let driver = FlakyDriver {
            fail_create: true,
            ..Default::default()
        };
        let err = driver
            .create_and_trunk_vlan("sw", 100, "q-100", Some(&Interface::port("10")))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::ConfigFailed { .. }));
        assert_eq!(driver.calls(), vec!["create 100", "delete 100"]);
    }
}
