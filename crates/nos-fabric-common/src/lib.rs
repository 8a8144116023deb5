//! Common infrastructure for the NOS fabric agent.
//!
//! This crate provides the pieces shared by the binding store, the
//! protocol drivers and the reconciliation engine:
//!
//! - [`error`]: The [`FabricError`] taxonomy for every failure the agent surfaces
//! - [`types`]: VLAN ids, interface types and interface identifiers
//! - [`config`]: Per-switch connection parameters and agent settings
//! - [`event`]: Port lifecycle events from the orchestration framework
//!
//! # Architecture
//!
//! The agent follows this flow for each port lifecycle event:
//!
//! 1. Resolve the host's physical switch ports from the [`SwitchInventory`]
//! 2. Record or remove bindings in the binding store
//! 3. Pick a protocol driver for each switch and push the VLAN change
//! 4. Mark the binding processed once the switch accepted it
//!
//! # Example
//!
//! ```ignore
//! use nos_fabric_common::{FabricConfig, FabricResult};
//!
//! fn ports_of(path: &str, host: &str) -> FabricResult<usize> {
//!     let config = FabricConfig::load(path)?;
//!     Ok(config.switches.host_connections(host)?.len())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{
    AgentConfig, FabricConfig, HostConnection, OsFamily, Protocol, RestConfig, Secret,
    SnmpAuthProtocol, SnmpConfig, SnmpPrivProtocol, SnmpVersion, StoreBackend, StoreConfig,
    SwitchConnection, SwitchInventory, TimeoutConfig,
};
pub use error::{FabricError, FabricResult};
pub use event::{NetworkType, Port, PortContext, PortEvent, Segment};
pub use types::{Interface, InterfaceType, VlanId, DEFAULT_VLAN, MAX_VLAN_ID};
