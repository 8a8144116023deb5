//! Picks the driver for a switch from its (OS, protocol) pair.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use nos_fabric_common::{
    FabricError, FabricResult, Interface, OsFamily, Protocol, SwitchInventory, VlanId,
};

use crate::driver::{DriverContext, NosDriver};
use crate::netconf::NetconfDriver;
use crate::rest::RestDriver;
use crate::snmp::SnmpDriver;
use crate::ssh::SshDriver;

/// Lookup table from (OS, protocol) to driver.
///
/// The selector is itself a [`NosDriver`] that forwards each call to the
/// driver of the switch named in it.
pub struct DriverSelector {
    inventory: Arc<SwitchInventory>,
    drivers: HashMap<(OsFamily, Protocol), Arc<dyn NosDriver>>,
}

impl DriverSelector {
    /// Creates an empty selector.
    pub fn new(inventory: Arc<SwitchInventory>) -> Self {
        Self {
            inventory,
            drivers: HashMap::new(),
        }
    }

    /// Registers a driver for a pair, replacing any previous one.
    pub fn register(
        mut self,
        os: OsFamily,
        protocol: Protocol,
        driver: Arc<dyn NosDriver>,
    ) -> Self {
        self.drivers.insert((os, protocol), driver);
        self
    }

    /// Selector with the four production drivers.
    pub fn with_default_drivers(ctx: DriverContext) -> Self {
        Self::new(ctx.inventory.clone())
            .register(OsFamily::Enos, Protocol::Snmp, Arc::new(SnmpDriver::new(ctx.clone())))
            .register(
                OsFamily::Enos,
                Protocol::Netconf,
                Arc::new(NetconfDriver::new(ctx.clone())),
            )
            .register(OsFamily::Cnos, Protocol::Rest, Arc::new(RestDriver::new(ctx.clone())))
            .register(OsFamily::Cnos, Protocol::Ssh, Arc::new(SshDriver::new(ctx)))
    }

    /// Returns the driver configured for `switch`.
    pub fn driver_for(&self, switch: &str) -> FabricResult<Arc<dyn NosDriver>> {
        let conn = self.inventory.get(switch)?;
        let key = (conn.os, conn.protocol());
        let driver = self
            .drivers
            .get(&key)
            .cloned()
            .ok_or_else(|| FabricError::InvalidOsProtocol {
                os: key.0.to_string(),
                protocol: key.1.to_string(),
            })?;
        debug!(switch, os = %key.0, protocol = %key.1, driver = driver.name(), "Selected driver");
        Ok(driver)
    }
}

#[async_trait]
impl NosDriver for DriverSelector {
    fn name(&self) -> &'static str {
        "selector"
    }

    async fn create_vlan(&self, switch: &str, vlan_id: VlanId, vlan_name: &str) -> FabricResult<()> {
        self.driver_for(switch)?
            .create_vlan(switch, vlan_id, vlan_name)
            .await
    }

    async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()> {
        self.driver_for(switch)?.delete_vlan(switch, vlan_id).await
    }

    async fn enable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        self.driver_for(switch)?
            .enable_vlan_on_trunk_int(switch, vlan_id, interface)
            .await
    }

    async fn disable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        self.driver_for(switch)?
            .disable_vlan_on_trunk_int(switch, vlan_id, interface)
            .await
    }

    async fn create_and_trunk_vlan(
        &self,
        switch: &str,
        vlan_id: VlanId,
        vlan_name: &str,
        interface: Option<&Interface>,
    ) -> FabricResult<()> {
        self.driver_for(switch)?
            .create_and_trunk_vlan(switch, vlan_id, vlan_name, interface)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nos_fabric_common::SwitchConnection;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Named {
        name: &'static str,
        calls: Mutex<Vec<String>>,
    }

    impl Named {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NosDriver for Named {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn create_vlan(&self, switch: &str, vlan_id: VlanId, _: &str) -> FabricResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {} {}", switch, vlan_id));
            Ok(())
        }

        async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete {} {}", switch, vlan_id));
            Ok(())
        }

        async fn enable_vlan_on_trunk_int(&self, _: &str, _: VlanId, _: &Interface) -> FabricResult<()> {
            Ok(())
        }

        async fn disable_vlan_on_trunk_int(&self, _: &str, _: VlanId, _: &Interface) -> FabricResult<()> {
            Ok(())
        }
    }

    fn inventory() -> Arc<SwitchInventory> {
        let mut inventory = SwitchInventory::new();
        inventory.insert(
            "10.0.0.1",
            SwitchConnection {
                os: OsFamily::Enos,
                protocol: Some(Protocol::Snmp),
                ..Default::default()
            },
        );
        inventory.insert(
            "10.0.0.2",
            SwitchConnection {
                os: OsFamily::Cnos,
                ..Default::default()
            },
        );
        inventory.insert(
            "10.0.0.3",
            SwitchConnection {
                os: OsFamily::Enos,
                protocol: Some(Protocol::Rest),
                ..Default::default()
            },
        );
        Arc::new(inventory)
    }

    #[tokio::test]
    async fn test_dispatch_by_os_and_protocol() {
        let snmp = Named::new("snmp");
        let rest = Named::new("rest");
        let selector = DriverSelector::new(inventory())
            .register(OsFamily::Enos, Protocol::Snmp, snmp.clone())
            .register(OsFamily::Cnos, Protocol::Rest, rest.clone());

        selector.create_vlan("10.0.0.1", 100, "q-100").await.unwrap();
        selector.delete_vlan("10.0.0.2", 200).await.unwrap();

        assert_eq!(*snmp.calls.lock().unwrap(), vec!["create 10.0.0.1 100"]);
        assert_eq!(*rest.calls.lock().unwrap(), vec!["delete 10.0.0.2 200"]);
        assert_eq!(selector.driver_for("10.0.0.2").unwrap().name(), "rest");
    }

    #[test]
    fn test_unsupported_pair() {
        let selector = DriverSelector::new(inventory())
            .register(OsFamily::Enos, Protocol::Snmp, Named::new("snmp"));
        assert!(matches!(
            selector.driver_for("10.0.0.3"),
            Err(FabricError::InvalidOsProtocol { .. })
        ));
    }

    #[test]
    fn test_unknown_switch() {
        let selector = DriverSelector::new(inventory());
        assert!(matches!(
            selector.driver_for("192.0.2.1"),
            Err(FabricError::UnknownSwitch { .. })
        ));
    }
}
