//! Protocol drivers for the NOS fabric agent.
//!
//! Every switch back end implements the same [`NosDriver`] contract of four
//! VLAN primitives. The drivers differ in wire protocol and in how they
//! keep connections:
//!
//! - [`snmp`]: SET/GET against a vendor object table picked by probing
//!   `sysDescr`; every mutating group ends with an "apply" SET
//! - [`netconf`]: vendor CLI wrapped in `edit-config`, one persistent
//!   session per switch
//! - [`rest`]: read-modify-write of the interface object over HTTP, with
//!   a cookie session opened by a retried login
//! - [`ssh`]: CLI typed into a pooled interactive shell, retried with
//!   random back-off
//!
//! [`DriverSelector`] maps a switch's (OS, protocol) pair to one of them
//! and is itself a [`NosDriver`], so the engine talks to a single object.
//!
//! # Architecture
//!
//! 1. The engine calls the selector with a switch address
//! 2. The selector looks the switch up in the inventory and forwards
//! 3. The driver reads the binding store through [`DriverContext`] to
//!    tell a fresh interface from a trunked one
//! 4. [`membership`] turns the current VLAN set into the new one
//! 5. The driver encodes the plan for its protocol and sends it
//!
//! # Example
//!
//! ```ignore
//! use nos_drivers::{DriverContext, DriverSelector, NosDriver};
//!
//! let selector = DriverSelector::with_default_drivers(ctx);
//! selector
//!     .create_and_trunk_vlan("10.0.0.1", 100, "q-100", Some(&Interface::port("10")))
//!     .await?;
//! ```

pub mod cli;
pub mod driver;
pub mod membership;
pub mod netconf;
pub mod rest;
pub mod selector;
pub mod snmp;
pub mod ssh;

pub use cli::CliDialect;
pub use driver::{DriverContext, NosDriver};
pub use membership::{plan_disable, plan_enable, MembershipPlan, PortMode, VlanMembership};
pub use netconf::NetconfDriver;
pub use rest::RestDriver;
pub use selector::DriverSelector;
pub use snmp::SnmpDriver;
pub use ssh::SshDriver;
