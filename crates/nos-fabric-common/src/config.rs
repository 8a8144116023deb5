//! Agent configuration and the switch inventory.
//!
//! The configuration is a single YAML document:
//!
//! ```yaml
//! agent:
//!   vlan_name_prefix: "q-"
//!   managed_physical_network: physnet1
//!   store:
//!     backend: redis
//!     redis_url: redis://127.0.0.1:6379/0
//! switches:
//!   "10.0.0.1":
//!     os: enos
//!     protocol: snmp
//!     username: admin
//!     password: admin
//!     snmp:
//!       version: "2c"
//!       community: private
//!     hosts:
//!       compute-1: "10,portchannel:3"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{FabricError, FabricResult};
use crate::types::Interface;

/// Default SSH port for NETCONF and CLI sessions.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default SNMP agent port.
pub const DEFAULT_SNMP_PORT: u16 = 161;

/// Default REST API port.
pub const DEFAULT_REST_PORT: u16 = 8090;

/// Default prefix for VLAN names created on switches.
pub const DEFAULT_VLAN_NAME_PREFIX: &str = "q-";

/// A credential that never shows up in logs.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value for use on the wire.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Network operating system family of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Enterprise NOS (SNMP or NETCONF managed)
    #[default]
    Enos,
    /// Cloud NOS (REST or CLI managed)
    Cnos,
}

impl OsFamily {
    /// Returns the configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Enos => "enos",
            OsFamily::Cnos => "cnos",
        }
    }

    /// Protocol used when the switch entry does not name one.
    pub fn default_protocol(&self) -> Protocol {
        match self {
            OsFamily::Enos => Protocol::Netconf,
            OsFamily::Cnos => Protocol::Rest,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Management protocol used to configure a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// SNMP SET/GET
    Snmp,
    /// NETCONF edit-config over SSH
    Netconf,
    /// HTTP REST API
    Rest,
    /// Interactive CLI over SSH
    Ssh,
}

impl Protocol {
    /// Returns the configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Snmp => "snmp",
            Protocol::Netconf => "netconf",
            Protocol::Rest => "rest",
            Protocol::Ssh => "ssh",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SNMP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SnmpVersion {
    /// Community based, version 1
    #[serde(rename = "1")]
    V1,
    /// Community based, version 2c
    #[default]
    #[serde(rename = "2c")]
    V2c,
    /// User based security model
    #[serde(rename = "3")]
    V3,
}

/// SNMPv3 authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpAuthProtocol {
    /// HMAC-MD5-96
    #[serde(rename = "MD5")]
    Md5,
    /// HMAC-SHA-96
    #[serde(rename = "SHA")]
    Sha,
}

/// SNMPv3 privacy algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpPrivProtocol {
    /// CBC-DES
    #[serde(rename = "DES")]
    Des,
    /// CFB-AES-128
    #[serde(rename = "AES-128", alias = "AES")]
    Aes128,
}

/// SNMP access parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpConfig {
    /// Agent UDP port
    pub port: u16,
    /// Protocol version
    pub version: SnmpVersion,
    /// Community for v1/v2c
    pub community: Option<Secret>,
    /// USM user for v3
    pub user: Option<String>,
    /// Authentication key; absent means no authentication
    pub authkey: Option<Secret>,
    /// Privacy key; absent means no privacy
    pub privkey: Option<Secret>,
    /// Authentication algorithm
    pub auth: Option<SnmpAuthProtocol>,
    /// Privacy algorithm
    #[serde(rename = "priv")]
    pub privacy: Option<SnmpPrivProtocol>,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SNMP_PORT,
            version: SnmpVersion::default(),
            community: None,
            user: None,
            authkey: None,
            privkey: None,
            auth: None,
            privacy: None,
        }
    }
}

/// REST access parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// API TCP port
    pub tcp_port: u16,
    /// Use HTTPS
    pub use_tls: bool,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_REST_PORT,
            use_tls: false,
        }
    }
}

/// Static connection parameters for one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConnection {
    /// Login user
    #[serde(default)]
    pub username: String,
    /// Login password
    #[serde(default)]
    pub password: Secret,
    /// Operating system family
    #[serde(default)]
    pub os: OsFamily,
    /// Management protocol; derived from `os` when absent
    #[serde(default)]
    pub protocol: Option<Protocol>,
    /// SSH port for NETCONF and CLI
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// SNMP parameters
    #[serde(default)]
    pub snmp: SnmpConfig,
    /// REST parameters
    #[serde(default)]
    pub rest: RestConfig,
    /// Legacy firmware compatibility
    #[serde(default)]
    pub compat_mode: bool,
    /// Compute host id -> comma separated port list
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl Default for SwitchConnection {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: Secret::default(),
            os: OsFamily::default(),
            protocol: None,
            ssh_port: DEFAULT_SSH_PORT,
            snmp: SnmpConfig::default(),
            rest: RestConfig::default(),
            compat_mode: false,
            hosts: BTreeMap::new(),
        }
    }
}

impl SwitchConnection {
    /// Returns the protocol in effect for this switch.
    pub fn protocol(&self) -> Protocol {
        self.protocol.unwrap_or_else(|| self.os.default_protocol())
    }

    /// Parses the port list configured for `host`, if any.
    pub fn host_interfaces(&self, host: &str) -> FabricResult<Vec<Interface>> {
        match self.hosts.get(host) {
            Some(list) => list
                .split(',')
                .filter(|spec| !spec.trim().is_empty())
                .map(Interface::parse)
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    fn validate(&self, switch: &str) -> FabricResult<()> {
        let field = |name: &str| format!("switches.{}.{}", switch, name);

        if self.protocol() != Protocol::Snmp {
            if self.username.is_empty() {
                return Err(FabricError::invalid_config(field("username"), "required"));
            }
            if self.password.expose().is_empty() {
                return Err(FabricError::invalid_config(field("password"), "required"));
            }
        }

        match (self.os, self.protocol()) {
            (OsFamily::Enos, Protocol::Snmp | Protocol::Netconf)
            | (OsFamily::Cnos, Protocol::Rest | Protocol::Ssh) => {}
            (os, protocol) => {
                return Err(FabricError::InvalidOsProtocol {
                    os: os.to_string(),
                    protocol: protocol.to_string(),
                })
            }
        }

        if self.protocol() == Protocol::Snmp {
            match self.snmp.version {
                SnmpVersion::V3 if self.snmp.user.is_none() => {
                    return Err(FabricError::invalid_config(
                        field("snmp.user"),
                        "required for SNMP version 3",
                    ));
                }
                SnmpVersion::V1 | SnmpVersion::V2c if self.snmp.community.is_none() => {
                    return Err(FabricError::invalid_config(
                        field("snmp.community"),
                        "required for SNMP version 1/2c",
                    ));
                }
                _ => {}
            }
        }

        for host in self.hosts.keys() {
            self.host_interfaces(host)
                .map_err(|e| FabricError::invalid_config(field(&format!("hosts.{}", host)), e.to_string()))?;
        }

        Ok(())
    }
}

/// One physical attachment of a compute host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostConnection {
    /// Management address of the switch
    pub switch_ip: String,
    /// Interface the host is cabled to
    pub interface: Interface,
}

/// All configured switches, keyed by management address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwitchInventory {
    switches: BTreeMap<String, SwitchConnection>,
}

impl SwitchInventory {
    /// Creates an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a switch.
    pub fn insert(&mut self, switch_ip: impl Into<String>, conn: SwitchConnection) {
        self.switches.insert(switch_ip.into(), conn);
    }

    /// Looks up a switch by management address.
    pub fn get(&self, switch_ip: &str) -> FabricResult<&SwitchConnection> {
        self.switches
            .get(switch_ip)
            .ok_or_else(|| FabricError::UnknownSwitch {
                switch: switch_ip.to_string(),
            })
    }

    /// Iterates over all switches in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SwitchConnection)> {
        self.switches.iter()
    }

    /// Returns the number of switches.
    pub fn len(&self) -> usize {
        self.switches.len()
    }

    /// Returns true if no switch is configured.
    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    /// Returns every switch port the host is cabled to.
    ///
    /// A host may be multi-homed to several switches and several ports on
    /// the same switch.
    pub fn host_connections(&self, host: &str) -> FabricResult<Vec<HostConnection>> {
        let mut connections = Vec::new();
        for (switch_ip, conn) in &self.switches {
            for interface in conn.host_interfaces(host)? {
                connections.push(HostConnection {
                    switch_ip: switch_ip.clone(),
                    interface,
                });
            }
        }

        if connections.is_empty() {
            return Err(FabricError::ComputeHostNotConfigured {
                host: host.to_string(),
            });
        }
        debug!(host, count = connections.len(), "Resolved host connections");
        Ok(connections)
    }

    /// Validates every switch entry.
    pub fn validate(&self) -> FabricResult<()> {
        for (switch_ip, conn) in &self.switches {
            conn.validate(switch_ip)?;
        }
        Ok(())
    }
}

/// Binding store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store (tests, dry runs)
    #[default]
    Memory,
    /// Redis hashes
    Redis,
}

/// Binding store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend to use
    pub backend: StoreBackend,
    /// Redis connection URL
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

/// Network call timeouts and retry bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Transport connect timeout in seconds
    pub connect_secs: u64,
    /// Per request timeout in seconds
    pub request_secs: u64,
    /// Interactive shell prompt wait in seconds
    pub prompt_secs: u64,
    /// SSH keepalive interval in seconds
    pub keepalive_secs: u64,
    /// SSH executor attempts
    pub ssh_attempts: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 30,
            prompt_secs: 5,
            keepalive_secs: 30,
            ssh_attempts: 3,
        }
    }
}

impl TimeoutConfig {
    /// Connect timeout.
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Request timeout.
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    /// Prompt wait timeout.
    pub fn prompt(&self) -> Duration {
        Duration::from_secs(self.prompt_secs)
    }

    /// Keepalive interval.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Agent-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Prefix of VLAN names created on switches
    pub vlan_name_prefix: String,
    /// Only segments on this physical network are managed
    pub managed_physical_network: Option<String>,
    /// Binding store settings
    pub store: StoreConfig,
    /// Network timeouts
    pub timeouts: TimeoutConfig,
    /// Default log filter
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            vlan_name_prefix: DEFAULT_VLAN_NAME_PREFIX.to_string(),
            managed_physical_network: None,
            store: StoreConfig::default(),
            timeouts: TimeoutConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Top level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Agent settings
    #[serde(default)]
    pub agent: AgentConfig,
    /// Switch inventory
    #[serde(default)]
    pub switches: SwitchInventory,
}

impl FabricConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(text: &str) -> FabricResult<Self> {
        let config: FabricConfig = serde_yaml::from_str(text)
            .map_err(|e| FabricError::invalid_config("<document>", e.to_string()))?;
        config.switches.validate()?;
        Ok(config)
    }

    /// Loads and validates a YAML file.
    pub fn load(path: impl AsRef<Path>) -> FabricResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FabricError::invalid_config(path.display().to_string(), e.to_string()))?;
        let config = Self::from_yaml_str(&text)?;
        info!(
            path = %path.display(),
            switches = config.switches.len(),
            "Loaded fabric configuration"
        );
        Ok(config)
    }
}
