//! Port lifecycle events delivered by the host orchestration framework.
//!
//! An event carries the port as it is now, the port as it was before the
//! change, and the network segment each of them is bound to. The engine
//! only reads these; it never builds them outside tests.

use serde::{Deserialize, Serialize};

use crate::types::VlanId;

/// Port status that allows an update to reach the switches.
pub const PORT_STATUS_ACTIVE: &str = "ACTIVE";

/// Device owner prefix of workload ports.
pub const COMPUTE_OWNER_PREFIX: &str = "compute";

/// A virtual port as reported by the orchestration framework.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    /// Port identifier
    pub id: String,
    /// Owning workload
    pub device_id: Option<String>,
    /// Owner classification, e.g. `compute:nova`
    pub device_owner: String,
    /// Port status, e.g. `ACTIVE` or `DOWN`
    pub status: String,
    /// Host the port is bound to
    #[serde(alias = "binding:host_id")]
    pub host_id: Option<String>,
}

impl Port {
    /// True for ports owned by a compute workload.
    pub fn is_compute(&self) -> bool {
        self.device_owner.starts_with(COMPUTE_OWNER_PREFIX)
    }

    /// True once the port is up.
    pub fn is_active(&self) -> bool {
        self.status == PORT_STATUS_ACTIVE
    }
}

/// Segmentation type of a network segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Vlan,
    Vxlan,
    Flat,
    Local,
    Gre,
    Geneve,
    /// Anything this agent does not manage
    #[serde(other)]
    Other,
}

/// The network segment a port is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(alias = "type")]
    pub network_type: NetworkType,
    #[serde(default)]
    pub physical_network: Option<String>,
    #[serde(default, alias = "id")]
    pub segmentation_id: Option<VlanId>,
}

impl Segment {
    /// VLAN segment on a physical network.
    pub fn vlan(vlan_id: VlanId, physical_network: impl Into<String>) -> Self {
        Self {
            network_type: NetworkType::Vlan,
            physical_network: Some(physical_network.into()),
            segmentation_id: Some(vlan_id),
        }
    }

    /// The VLAN id, if this is a VLAN segment on the managed network.
    ///
    /// Without a managed network every physical network qualifies.
    pub fn managed_vlan(&self, managed_physical_network: Option<&str>) -> Option<VlanId> {
        if self.network_type != NetworkType::Vlan {
            return None;
        }
        if let Some(managed) = managed_physical_network {
            if self.physical_network.as_deref() != Some(managed) {
                return None;
            }
        }
        self.segmentation_id
    }
}

/// Everything one port event carries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortContext {
    /// The port after the change
    pub current: Port,
    /// The port before the change
    #[serde(default)]
    pub original: Option<Port>,
    /// Segment the port is bound to now
    #[serde(default)]
    pub segment: Option<Segment>,
    /// Segment the port was bound to before the change
    #[serde(default)]
    pub original_segment: Option<Segment>,
}

impl PortContext {
    /// Host the port is bound to now.
    pub fn host(&self) -> Option<&str> {
        self.current.host_id.as_deref()
    }

    /// Host the port was bound to before the change.
    pub fn original_host(&self) -> Option<&str> {
        self.original.as_ref().and_then(|p| p.host_id.as_deref())
    }

    /// True when the port lost its binding while moving to another host.
    ///
    /// The old attachment is then torn down; the new host's attachment
    /// arrives as a separate update once the port is bound again.
    pub fn is_migration(&self) -> bool {
        self.segment.is_none() && self.original_segment.is_some() && self.host() != self.original_host()
    }
}

/// A port lifecycle event, as read from the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PortEvent {
    Update(PortContext),
    Delete(PortContext),
}
