//! Domain types shared across the agent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FabricError, FabricResult};

/// 802.1Q VLAN identifier.
pub type VlanId = u16;

/// VLAN every port belongs to before the agent touches it.
pub const DEFAULT_VLAN: VlanId = 1;

/// Highest VLAN id any supported device accepts.
pub const MAX_VLAN_ID: VlanId = 4095;

/// Kind of switch interface a host is cabled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// Physical port
    Port,
    /// Link aggregation group
    #[serde(rename = "portchannel")]
    PortChannel,
}

impl InterfaceType {
    /// Returns the name used in binding port ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Port => "port",
            InterfaceType::PortChannel => "portchannel",
        }
    }
}

impl FromStr for InterfaceType {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "port" => Ok(InterfaceType::Port),
            "portchannel" => Ok(InterfaceType::PortChannel),
            other => Err(FabricError::UnknownInterfaceType {
                intf_type: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A switch interface: its type and its number on the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interface {
    /// Interface type
    pub kind: InterfaceType,
    /// Interface number as the device names it (e.g. "10")
    pub number: String,
}

impl Interface {
    /// Creates a new interface.
    pub fn new(kind: InterfaceType, number: impl Into<String>) -> Self {
        Self {
            kind,
            number: number.into(),
        }
    }

    /// Shorthand for a physical port.
    pub fn port(number: impl Into<String>) -> Self {
        Self::new(InterfaceType::Port, number)
    }

    /// Shorthand for a port-channel.
    pub fn port_channel(number: impl Into<String>) -> Self {
        Self::new(InterfaceType::PortChannel, number)
    }

    /// Returns the binding port id, `"{type}:{number}"`.
    pub fn port_id(&self) -> String {
        format!("{}:{}", self.kind, self.number)
    }

    /// Parses a host port spec such as `"10"` or `"portchannel:3"`.
    ///
    /// A bare number is a physical port.
    pub fn parse(spec: &str) -> FabricResult<Self> {
        let spec = spec.trim();
        let (kind, number) = match spec.split_once(':') {
            Some((kind, number)) => (kind.trim().parse()?, number.trim()),
            None => (InterfaceType::Port, spec),
        };
        if number.is_empty() {
            return Err(FabricError::InvalidInterface {
                interface: spec.to_string(),
                message: "missing interface number".to_string(),
            });
        }
        Ok(Self::new(kind, number))
    }

    /// Returns the interface number as an integer index.
    pub fn index(&self) -> FabricResult<u32> {
        self.number
            .parse()
            .map_err(|_| FabricError::InvalidInterface {
                interface: self.port_id(),
                message: "interface number is not numeric".to_string(),
            })
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.number)
    }
}
