//! CLI command snippets used by the NETCONF and interactive SSH drivers.

use nos_fabric_common::{Interface, InterfaceType, OsFamily, VlanId};

use crate::membership::{MembershipPlan, PlanAction, PortMode};

/// Enter configuration mode.
pub const CLI_START_CONF: &str = "configure terminal";

/// Leave configuration mode.
pub const CLI_END_CONF: &str = "end";

/// Interface keyword set of a NOS family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliDialect {
    /// `port <N>` / `portchannel <N>`
    Enos,
    /// `ethernet <N>` / `port-aggregation <N>`
    Cnos,
}

impl CliDialect {
    /// Renders the interface as the CLI names it.
    pub fn interface_name(&self, interface: &Interface) -> String {
        let keyword = match (self, interface.kind) {
            (CliDialect::Enos, InterfaceType::Port) => "port",
            (CliDialect::Enos, InterfaceType::PortChannel) => "portchannel",
            (CliDialect::Cnos, InterfaceType::Port) => "ethernet",
            (CliDialect::Cnos, InterfaceType::PortChannel) => "port-aggregation",
        };
        format!("{} {}", keyword, interface.number)
    }
}

impl From<OsFamily> for CliDialect {
    fn from(os: OsFamily) -> Self {
        match os {
            OsFamily::Enos => CliDialect::Enos,
            OsFamily::Cnos => CliDialect::Cnos,
        }
    }
}

pub fn vlan_create(vlan_id: VlanId, vlan_name: &str) -> String {
    format!("vlan {}\nname {}\nexit", vlan_id, vlan_name)
}

pub fn vlan_no_shutdown(vlan_id: VlanId) -> String {
    format!("vlan {}\nno shutdown\nexit", vlan_id)
}

pub fn vlan_delete(vlan_id: VlanId) -> String {
    format!("no vlan {}", vlan_id)
}

/// Commands moving the interface from `plan.before` to `plan.after`.
///
/// Returns `None` when nothing needs to change.
pub fn interface_membership(
    dialect: CliDialect,
    interface: &Interface,
    plan: &MembershipPlan,
) -> Option<String> {
    let mut lines = vec![format!("interface {}", dialect.interface_name(interface))];

    match plan.action {
        PlanAction::NoChange => return None,
        PlanAction::InitTrunk => {
            let allowed: Vec<String> = plan.after.vlans.iter().map(|v| v.to_string()).collect();
            lines.push("switchport mode trunk".to_string());
            lines.push(format!("switchport trunk native vlan {}", plan.after.pvid));
            lines.push(format!("switchport trunk allowed vlan {}", allowed.join(",")));
        }
        PlanAction::Add => {
            if plan.mode_changed() {
                lines.push("switchport mode trunk".to_string());
            }
            lines.push(format!("switchport trunk allowed vlan add {}", plan.vlan_id));
        }
        PlanAction::Remove => {
            lines.push(format!("switchport trunk allowed vlan remove {}", plan.vlan_id));
            if plan.after.mode == PortMode::Access {
                lines.push("switchport mode access".to_string());
                lines.push(format!("switchport access vlan {}", plan.after.pvid));
            } else if plan.pvid_changed() {
                lines.push(format!("switchport trunk native vlan {}", plan.after.pvid));
            }
        }
    }

    lines.push("exit".to_string());
    Some(lines.join("\n"))
}

/// Wraps a snippet in configure/end.
pub fn config_session(snippet: &str) -> String {
    format!("{}\n{}\n{}\n", CLI_START_CONF, snippet.trim_end(), CLI_END_CONF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{plan_disable, plan_enable, VlanMembership};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_interface_names() {
        assert_eq!(
            CliDialect::Cnos.interface_name(&Interface::port("1/10")),
            "ethernet 1/10"
        );
        assert_eq!(
            CliDialect::Cnos.interface_name(&Interface::port_channel("3")),
            "port-aggregation 3"
        );
        assert_eq!(
            CliDialect::Enos.interface_name(&Interface::port_channel("3")),
            "portchannel 3"
        );
    }

    #[test]
    fn test_trunk_init_commands() {
        let plan = plan_enable(&VlanMembership::from_bindings([100]), 100, true);
        let text = interface_membership(CliDialect::Cnos, &Interface::port("10"), &plan).unwrap();
        assert_eq!(
            text,
            "interface ethernet 10\n\
             switchport mode trunk\n\
             switchport trunk native vlan 1\n\
             switchport trunk allowed vlan 1,100\n\
             exit"
        );
    }

    #[test]
    fn test_append_commands() {
        let plan = plan_enable(&VlanMembership::from_bindings([100]), 200, false);
        let text = interface_membership(CliDialect::Enos, &Interface::port("10"), &plan).unwrap();
        assert_eq!(
            text,
            "interface port 10\nswitchport trunk allowed vlan add 200\nexit"
        );
    }

    #[test]
    fn test_remove_last_tagged_vlan_returns_to_access() {
        let plan = plan_disable(&VlanMembership::from_bindings([100]), 100, "sw", "p").unwrap();
        let text = interface_membership(CliDialect::Cnos, &Interface::port("10"), &plan).unwrap();
        assert_eq!(
            text,
            "interface ethernet 10\n\
             switchport trunk allowed vlan remove 100\n\
             switchport mode access\n\
             switchport access vlan 1\n\
             exit"
        );
    }

    #[test]
    fn test_no_change_renders_nothing() {
        let plan = plan_enable(&VlanMembership::from_bindings([100]), 100, false);
        assert!(interface_membership(CliDialect::Cnos, &Interface::port("10"), &plan).is_none());
    }

    #[test]
    fn test_config_session_framing() {
        assert_eq!(
            config_session("no vlan 100"),
            "configure terminal\nno vlan 100\nend\n"
        );
    }
}
