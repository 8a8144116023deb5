//! Vendor address tables and the device model resolver.
//!
//! Every supported switch family exposes the same private MIB layout under
//! a model specific product branch, so a table is just that branch. The
//! resolver probes `sysDescr` once per switch and caches the match.

use dashmap::DashMap;
use std::fmt;
use tracing::{debug, info, instrument};

use nos_fabric_common::{FabricError, FabricResult};

use super::transport::{SnmpTransport, SnmpValue};

/// `iso.org.dod.internet.private.enterprises`
pub const ENTERPRISE_PREFIX: &[u32] = &[1, 3, 6, 1, 4, 1];

/// `SNMPv2-MIB::sysDescr.0`
pub const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];

/// Numeric SNMP object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Vec<u32>);

impl ObjectId {
    pub fn new(arcs: impl Into<Vec<u32>>) -> Self {
        Self(arcs.into())
    }

    /// Appends an instance index.
    pub fn child(&self, index: u32) -> Self {
        let mut arcs = self.0.clone();
        arcs.push(index);
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|a| a.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

/// Logical switch attribute addressed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// vlanNewCfgState, indexed by VLAN
    VlanState,
    /// vlanNewCfgVlanName, indexed by VLAN
    VlanName,
    /// vlanNewCfgDelete, indexed by VLAN
    VlanDelete,
    /// vlanNewCfgAddPort, indexed by VLAN, value is the port
    VlanAddPort,
    /// vlanNewCfgRemovePort, indexed by VLAN, value is the port
    VlanRemovePort,
    /// vlanMaxVlanID scalar
    MaxVlanId,
    /// agPortNewCfgVlanTag, indexed by port
    PortVlanTag,
    /// agPortNewCfgPVID, indexed by port
    PortPvid,
    /// trunkGroupInfoPorts bitmap, indexed by port-channel
    TrunkGroupPorts,
    /// agApplyConfiguration scalar
    ApplyConfig,
}

impl Attribute {
    /// Position of the attribute below the product branch.
    fn suffix(&self) -> &'static [u32] {
        match self {
            Attribute::VlanState => &[2, 1, 1, 3, 1, 4],
            Attribute::VlanName => &[2, 1, 1, 3, 1, 2],
            Attribute::VlanDelete => &[2, 1, 1, 3, 1, 7],
            Attribute::VlanAddPort => &[2, 1, 1, 3, 1, 5],
            Attribute::VlanRemovePort => &[2, 1, 1, 3, 1, 6],
            Attribute::MaxVlanId => &[2, 1, 1, 4, 0],
            Attribute::PortVlanTag => &[1, 1, 2, 3, 1, 3],
            Attribute::PortPvid => &[1, 1, 2, 3, 1, 6],
            Attribute::TrunkGroupPorts => &[2, 3, 9, 1, 1, 3],
            Attribute::ApplyConfig => &[1, 1, 1, 2, 0],
        }
    }
}

/// Object addresses of one device model.
#[derive(Debug, PartialEq, Eq)]
pub struct VendorAddressTable {
    /// Model family name
    pub model: &'static str,
    /// `sysDescr` substring identifying the model
    pub pattern: &'static str,
    /// Product branch below the enterprise prefix
    pub product: &'static [u32],
}

impl VendorAddressTable {
    /// Fully-qualified address of a scalar attribute.
    pub fn scalar(&self, attr: Attribute) -> ObjectId {
        let mut arcs = ENTERPRISE_PREFIX.to_vec();
        arcs.extend_from_slice(self.product);
        arcs.extend_from_slice(attr.suffix());
        ObjectId(arcs)
    }

    /// Fully-qualified address of a table cell.
    pub fn cell(&self, attr: Attribute, index: u32) -> ObjectId {
        self.scalar(attr).child(index)
    }
}

/// Known models. Patterns may be substrings of one another; lookup always
/// tries the longest pattern first. The G8264-T answers on the same
/// product branch as the G8264.
pub static VENDOR_TABLES: &[VendorAddressTable] = &[
    VendorAddressTable {
        model: "Gryphon",
        pattern: "G8264",
        product: &[26543, 2, 7, 6],
    },
    VendorAddressTable {
        model: "Pegasus",
        pattern: "G8264-T",
        product: &[26543, 2, 7, 6],
    },
];

/// Picks the most specific table whose pattern occurs in `description`.
pub fn match_description<'a>(
    tables: &'a [VendorAddressTable],
    description: &str,
) -> Option<&'a VendorAddressTable> {
    let mut candidates: Vec<&VendorAddressTable> = tables.iter().collect();
    candidates.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
    candidates
        .into_iter()
        .find(|table| description.contains(table.pattern))
}

/// Probes devices and caches their address table per switch.
pub struct DeviceResolver {
    tables: &'static [VendorAddressTable],
    cache: DashMap<String, &'static VendorAddressTable>,
}

impl DeviceResolver {
    pub fn new() -> Self {
        Self::with_tables(VENDOR_TABLES)
    }

    pub fn with_tables(tables: &'static [VendorAddressTable]) -> Self {
        Self {
            tables,
            cache: DashMap::new(),
        }
    }

    /// Returns the address table for `switch`, probing it on first use.
    #[instrument(skip(self, transport))]
    pub async fn resolve(
        &self,
        transport: &dyn SnmpTransport,
        switch: &str,
    ) -> FabricResult<&'static VendorAddressTable> {
        if let Some(table) = self.cache.get(switch).map(|entry| *entry) {
            return Ok(table);
        }

        let value = transport.get(switch, &ObjectId::new(SYS_DESCR)).await?;
        let description = match value {
            SnmpValue::OctetString(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => format!("{:?}", other),
        };
        debug!(switch, description = %description, "Probed sysDescr");

        let table = match_description(self.tables, &description).ok_or_else(|| {
            FabricError::UnknownDeviceModel {
                switch: switch.to_string(),
                description: description.clone(),
            }
        })?;

        info!(switch, model = table.model, "Resolved device model");
        self.cache.insert(switch.to_string(), table);
        Ok(table)
    }
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self::new()
    }
}
