//! VLAN membership planning shared by all drivers.
//!
//! Drivers differ in how they read and write an interface's VLAN set,
//! but the add/remove rules are the same everywhere:
//!
//! - the first VLAN on an interface resets it to trunk mode with native
//!   VLAN 1 and members `{1, X}`
//! - later VLANs are appended
//! - removing a VLAN recomputes the mode (`access` for one member,
//!   `trunk` otherwise) and moves the native VLAN if it was removed
//! - removing the last VLAN is refused

use std::collections::BTreeSet;
use std::fmt;

use nos_fabric_common::{FabricError, FabricResult, VlanId, DEFAULT_VLAN};

/// Bridge-port mode of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortMode {
    /// Untagged, single VLAN
    Access,
    /// Tagged, many VLANs
    Trunk,
}

impl PortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortMode::Access => "access",
            PortMode::Trunk => "trunk",
        }
    }

    /// Mode implied by the number of member VLANs.
    pub fn for_member_count(count: usize) -> Self {
        if count == 1 {
            PortMode::Access
        } else {
            PortMode::Trunk
        }
    }
}

impl fmt::Display for PortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode, native VLAN and member set of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanMembership {
    pub mode: PortMode,
    pub pvid: VlanId,
    pub vlans: BTreeSet<VlanId>,
}

impl VlanMembership {
    /// Builds a membership, deriving the mode from the member count.
    pub fn new(pvid: VlanId, vlans: impl IntoIterator<Item = VlanId>) -> Self {
        let vlans: BTreeSet<VlanId> = vlans.into_iter().collect();
        Self {
            mode: PortMode::for_member_count(vlans.len()),
            pvid,
            vlans,
        }
    }

    /// Membership of an interface the agent trunked: native VLAN 1 plus
    /// every bound VLAN.
    pub fn from_bindings(vlans: impl IntoIterator<Item = VlanId>) -> Self {
        Self::new(
            DEFAULT_VLAN,
            std::iter::once(DEFAULT_VLAN).chain(vlans),
        )
    }

    /// State written by trunk initialization for `vlan_id`.
    pub fn trunk_init(vlan_id: VlanId) -> Self {
        Self::new(DEFAULT_VLAN, [DEFAULT_VLAN, vlan_id])
    }

    pub fn contains(&self, vlan_id: VlanId) -> bool {
        self.vlans.contains(&vlan_id)
    }
}

/// What a plan does to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    /// Reset the interface to trunk mode with native VLAN 1
    InitTrunk,
    /// Append one VLAN
    Add,
    /// Remove one VLAN
    Remove,
    /// Device already in the target state
    NoChange,
}

/// A membership transition for one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipPlan {
    pub action: PlanAction,
    pub vlan_id: VlanId,
    pub before: VlanMembership,
    pub after: VlanMembership,
}

impl MembershipPlan {
    /// True when the native VLAN changes.
    pub fn pvid_changed(&self) -> bool {
        self.before.pvid != self.after.pvid
    }

    /// True when the bridge-port mode changes.
    pub fn mode_changed(&self) -> bool {
        self.before.mode != self.after.mode
    }

    /// VLANs present after but not before.
    pub fn added(&self) -> Vec<VlanId> {
        self.after.vlans.difference(&self.before.vlans).copied().collect()
    }

    /// VLANs present before but not after.
    pub fn removed(&self) -> Vec<VlanId> {
        self.before.vlans.difference(&self.after.vlans).copied().collect()
    }
}

/// Plans enabling `vlan_id` on an interface currently in `current`.
pub fn plan_enable(current: &VlanMembership, vlan_id: VlanId, first_vlan: bool) -> MembershipPlan {
    let (action, after) = if first_vlan {
        (PlanAction::InitTrunk, VlanMembership::trunk_init(vlan_id))
    } else if current.contains(vlan_id) {
        (PlanAction::NoChange, current.clone())
    } else {
        let mut vlans = current.vlans.clone();
        vlans.insert(vlan_id);
        (PlanAction::Add, VlanMembership::new(current.pvid, vlans))
    };

    MembershipPlan {
        action,
        vlan_id,
        before: current.clone(),
        after,
    }
}

/// Plans removing `vlan_id` from an interface currently in `current`.
///
/// `switch` and `interface` only label the `EmptyVlanSet` error.
pub fn plan_disable(
    current: &VlanMembership,
    vlan_id: VlanId,
    switch: &str,
    interface: &str,
) -> FabricResult<MembershipPlan> {
    if !current.contains(vlan_id) {
        return Ok(MembershipPlan {
            action: PlanAction::NoChange,
            vlan_id,
            before: current.clone(),
            after: current.clone(),
        });
    }

    let mut vlans = current.vlans.clone();
    vlans.remove(&vlan_id);
    let Some(&first) = vlans.iter().next() else {
        return Err(FabricError::EmptyVlanSet {
            switch: switch.to_string(),
            interface: interface.to_string(),
            vlan_id,
        });
    };

    let pvid = if current.pvid == vlan_id { first } else { current.pvid };
    Ok(MembershipPlan {
        action: PlanAction::Remove,
        vlan_id,
        before: current.clone(),
        after: VlanMembership::new(pvid, vlans),
    })
}
