//! A driver that records what the engine asked for.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use nos_drivers::NosDriver;
use nos_fabric_common::{FabricResult, Interface, VlanId};

/// One call into the driver contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    CreateVlan {
        switch: String,
        vlan_id: VlanId,
        vlan_name: String,
    },
    DeleteVlan {
        switch: String,
        vlan_id: VlanId,
    },
    Enable {
        switch: String,
        vlan_id: VlanId,
        interface: Interface,
    },
    Disable {
        switch: String,
        vlan_id: VlanId,
        interface: Interface,
    },
    CreateAndTrunk {
        switch: String,
        vlan_id: VlanId,
        vlan_name: String,
        interface: Option<Interface>,
    },
}

impl DriverCall {
    pub fn create_and_trunk(
        switch: &str,
        vlan_id: VlanId,
        vlan_name: &str,
        interface: Interface,
    ) -> Self {
        Self::CreateAndTrunk {
            switch: switch.to_string(),
            vlan_id,
            vlan_name: vlan_name.to_string(),
            interface: Some(interface),
        }
    }

    pub fn enable(switch: &str, vlan_id: VlanId, interface: Interface) -> Self {
        Self::Enable {
            switch: switch.to_string(),
            vlan_id,
            interface,
        }
    }

    pub fn disable(switch: &str, vlan_id: VlanId, interface: Interface) -> Self {
        Self::Disable {
            switch: switch.to_string(),
            vlan_id,
            interface,
        }
    }

    pub fn delete_vlan(switch: &str, vlan_id: VlanId) -> Self {
        Self::DeleteVlan {
            switch: switch.to_string(),
            vlan_id,
        }
    }
}

/// Records every top-level call, then forwards it to an inner driver.
///
/// Without an inner driver every call succeeds. `create_and_trunk_vlan`
/// is recorded once; the create and enable it performs inside the inner
/// driver are not.
#[derive(Default)]
pub struct RecordingDriver {
    inner: Option<Arc<dyn NosDriver>>,
    calls: Mutex<Vec<DriverCall>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapping(inner: Arc<dyn NosDriver>) -> Self {
        Self {
            inner: Some(inner),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl NosDriver for RecordingDriver {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn create_vlan(&self, switch: &str, vlan_id: VlanId, vlan_name: &str) -> FabricResult<()> {
        self.record(DriverCall::CreateVlan {
            switch: switch.to_string(),
            vlan_id,
            vlan_name: vlan_name.to_string(),
        });
        match &self.inner {
            Some(inner) => inner.create_vlan(switch, vlan_id, vlan_name).await,
            None => Ok(()),
        }
    }

    async fn delete_vlan(&self, switch: &str, vlan_id: VlanId) -> FabricResult<()> {
        self.record(DriverCall::delete_vlan(switch, vlan_id));
        match &self.inner {
            Some(inner) => inner.delete_vlan(switch, vlan_id).await,
            None => Ok(()),
        }
    }

    async fn enable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        self.record(DriverCall::enable(switch, vlan_id, interface.clone()));
        match &self.inner {
            Some(inner) => inner.enable_vlan_on_trunk_int(switch, vlan_id, interface).await,
            None => Ok(()),
        }
    }

    async fn disable_vlan_on_trunk_int(
        &self,
        switch: &str,
        vlan_id: VlanId,
        interface: &Interface,
    ) -> FabricResult<()> {
        self.record(DriverCall::disable(switch, vlan_id, interface.clone()));
        match &self.inner {
            Some(inner) => inner.disable_vlan_on_trunk_int(switch, vlan_id, interface).await,
            None => Ok(()),
        }
    }

    async fn create_and_trunk_vlan(
        &self,
        switch: &str,
        vlan_id: VlanId,
        vlan_name: &str,
        interface: Option<&Interface>,
    ) -> FabricResult<()> {
        self.record(DriverCall::CreateAndTrunk {
            switch: switch.to_string(),
            vlan_id,
            vlan_name: vlan_name.to_string(),
            interface: interface.cloned(),
        });
        match &self.inner {
            Some(inner) => {
                inner
                    .create_and_trunk_vlan(switch, vlan_id, vlan_name, interface)
                    .await
            }
            None => Ok(()),
        }
    }
}
